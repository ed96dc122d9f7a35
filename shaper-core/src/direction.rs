use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The traffic direction a session applies to, relative to the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Packets arriving at the local host.
    Inbound,
    /// Packets leaving the local host.
    Outbound,
    /// Both directions.
    #[default]
    Both,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
            Self::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid direction: {0:?} (expected inbound, outbound or both)")]
pub struct ParseDirectionError(String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbound" | "in" => Ok(Self::Inbound),
            "outbound" | "out" => Ok(Self::Outbound),
            "both" | "any" => Ok(Self::Both),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}
