use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The transport protocol a session intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    /// Either TCP or UDP.
    #[default]
    Any,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Any => write!(f, "any"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid protocol: {0:?} (expected tcp, udp or any)")]
pub struct ParseProtocolError(String);

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "any" | "both" => Ok(Self::Any),
            other => Err(ParseProtocolError(other.to_string())),
        }
    }
}
