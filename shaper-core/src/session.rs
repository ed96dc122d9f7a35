use serde::{Deserialize, Serialize};

use crate::{Direction, Protocol};

/// Configuration for one shaping session: which traffic to intercept and
/// which impairments to apply to it.
///
/// A session is immutable once a capture loop is running; reconfiguring
/// means stopping and starting a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapingSession {
    /// Fixed added latency in milliseconds.
    pub latency_ms: f64,
    /// Upper bound of the uniformly drawn per-packet jitter in milliseconds.
    pub jitter_ms: f64,
    /// Probability in percent that a packet is dropped. `0` never drops,
    /// `100` always drops.
    pub loss_percent: f64,
    /// Throughput cap in bytes per second. `0` means unlimited.
    pub max_bytes_per_second: u64,
    /// Which traffic direction the session intercepts.
    pub direction: Direction,
    /// Which transport protocol the session intercepts.
    pub protocol: Protocol,
    /// Restrict interception to a single port (source or destination).
    /// `None` matches any port.
    pub port: Option<u16>,
}

impl Default for ShapingSession {
    fn default() -> Self {
        Self {
            latency_ms: 0.0,
            jitter_ms: 0.0,
            loss_percent: 0.0,
            max_bytes_per_second: 0,
            direction: Direction::Both,
            protocol: Protocol::Any,
            port: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidSession {
    #[error("latency_ms must be a finite number in [0, {}], got {0}", ShapingSession::MAX_DELAY_MS)]
    Latency(f64),
    #[error("jitter_ms must be a finite number in [0, {}], got {0}", ShapingSession::MAX_DELAY_MS)]
    Jitter(f64),
    #[error("loss_percent must be in [0, 100], got {0}")]
    Loss(f64),
}

impl ShapingSession {
    /// Upper bound on `latency_ms` and `jitter_ms`: one hour. Anything
    /// beyond it is a configuration mistake, and the release-time
    /// arithmetic needs a bounded range to stay panic-free.
    pub const MAX_DELAY_MS: f64 = 3_600_000.0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fixed added latency in milliseconds.
    pub fn latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set the jitter upper bound in milliseconds.
    pub fn jitter_ms(mut self, jitter_ms: f64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Set the packet loss rate in percent.
    pub fn loss_percent(mut self, loss_percent: f64) -> Self {
        self.loss_percent = loss_percent;
        self
    }

    /// Set the throughput cap in bytes per second (`0` = unlimited).
    pub fn max_bytes_per_second(mut self, max: u64) -> Self {
        self.max_bytes_per_second = max;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Checks the numeric ranges of the session parameters.
    pub fn validate(&self) -> Result<(), InvalidSession> {
        if !(0.0..=Self::MAX_DELAY_MS).contains(&self.latency_ms) {
            return Err(InvalidSession::Latency(self.latency_ms));
        }
        if !(0.0..=Self::MAX_DELAY_MS).contains(&self.jitter_ms) {
            return Err(InvalidSession::Jitter(self.jitter_ms));
        }
        if !self.loss_percent.is_finite() || !(0.0..=100.0).contains(&self.loss_percent) {
            return Err(InvalidSession::Loss(self.loss_percent));
        }
        Ok(())
    }

    /// Whether the session adds any delay at all. Sessions with no latency
    /// and no jitter bypass the delay queue entirely.
    pub fn delays_packets(&self) -> bool {
        self.latency_ms > 0.0 || self.jitter_ms > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_roundtrip() {
        let session = ShapingSession::new()
            .latency_ms(50.0)
            .jitter_ms(5.0)
            .loss_percent(2.0)
            .max_bytes_per_second(50 * 1024)
            .direction(Direction::Outbound)
            .protocol(Protocol::Tcp)
            .port(3389);

        session.validate().unwrap();
        assert!(session.delays_packets());
        assert_eq!(session.port, Some(3389));
    }

    #[test]
    fn zero_delay_session_does_not_delay() {
        let session = ShapingSession::new().loss_percent(100.0);
        session.validate().unwrap();
        assert!(!session.delays_packets());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(ShapingSession::new().latency_ms(-1.0).validate().is_err());
        assert!(ShapingSession::new().jitter_ms(f64::NAN).validate().is_err());
        assert!(ShapingSession::new().loss_percent(100.1).validate().is_err());
    }

    #[test]
    fn rejects_delay_beyond_the_ceiling() {
        assert!(ShapingSession::new().latency_ms(1e30).validate().is_err());
        assert!(ShapingSession::new().latency_ms(f64::INFINITY).validate().is_err());
        assert!(ShapingSession::new()
            .jitter_ms(ShapingSession::MAX_DELAY_MS + 1.0)
            .validate()
            .is_err());

        // The ceiling itself is a usable value.
        ShapingSession::new()
            .latency_ms(ShapingSession::MAX_DELAY_MS)
            .jitter_ms(ShapingSession::MAX_DELAY_MS)
            .validate()
            .unwrap();
    }

    #[test]
    fn serde_key_value_document() {
        let session = ShapingSession::new().latency_ms(50.0).port(3389);
        let doc = toml::to_string(&session).unwrap();
        let parsed: ShapingSession = toml::from_str(&doc).unwrap();
        assert_eq!(parsed, session);
    }
}
