use std::fmt;

use crate::{Direction, Protocol, ShapingSession};

/// Builds the boundary filter expression handed verbatim to the packet
/// interception facility when a session starts.
///
/// The construction is pure: the facility itself performs the matching, so
/// no per-packet classification happens on our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryFilter {
    direction: Direction,
    protocol: Protocol,
    port: Option<u16>,
}

impl BoundaryFilter {
    pub fn new(direction: Direction, protocol: Protocol, port: Option<u16>) -> Self {
        Self { direction, protocol, port }
    }

    pub fn from_session(session: &ShapingSession) -> Self {
        Self::new(session.direction, session.protocol, session.port)
    }

    /// Renders the filter in the interception facility's expression grammar,
    /// e.g. `ip and (tcp or udp) and ((tcp.SrcPort == 3389 or
    /// tcp.DstPort == 3389) or (udp.SrcPort == 3389 or udp.DstPort == 3389))`.
    pub fn expression(&self) -> String {
        let mut parts = Vec::with_capacity(4);

        match self.direction {
            Direction::Inbound => parts.push("inbound".to_string()),
            Direction::Outbound => parts.push("outbound".to_string()),
            // Both directions is the facility's default scope.
            Direction::Both => {}
        }

        parts.push("ip".to_string());

        match self.protocol {
            Protocol::Tcp => parts.push("tcp".to_string()),
            Protocol::Udp => parts.push("udp".to_string()),
            Protocol::Any => parts.push("(tcp or udp)".to_string()),
        }

        if let Some(port) = self.port {
            let clause = match self.protocol {
                Protocol::Tcp => Self::port_clause("tcp", port),
                Protocol::Udp => Self::port_clause("udp", port),
                Protocol::Any => format!(
                    "({} or {})",
                    Self::port_clause("tcp", port),
                    Self::port_clause("udp", port)
                ),
            };
            parts.push(clause);
        }

        parts.join(" and ")
    }

    fn port_clause(proto: &str, port: u16) -> String {
        format!("({proto}.SrcPort == {port} or {proto}.DstPort == {port})")
    }
}

impl fmt::Display for BoundaryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}
