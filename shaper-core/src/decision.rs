use std::time::{Duration, Instant};

use rand::Rng;

use crate::{Packet, ShapingSession};

/// The fate of one captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Never reinjected, simulating network loss.
    Drop,
    /// Reinjected immediately.
    Pass,
    /// Reinjected at the contained instant via the delay queue.
    Delay(Instant),
}

/// The per-packet policy, applied in order: loss first, then the
/// throughput cap, then the delay computation.
///
/// The policy is split into [`check_loss`](Self::check_loss) and
/// [`release_time`](Self::release_time) so the capture loop can sleep on
/// [`TokenBucket::admit`](crate::TokenBucket::admit) in between: a packet
/// dropped by loss never burns rate budget, and the delay clock starts only
/// once the packet has been admitted.
///
/// Loss convention: a uniform draw from `[0, 100)` is compared with a strict
/// `<` against `loss_percent`. A loss of exactly 0 can therefore never drop,
/// and a loss of exactly 100 always drops.
#[derive(Debug, Default)]
pub struct ShapingDecision {
    /// Length of the current run of consecutive drops. Diagnostic only;
    /// it never influences a verdict.
    consecutive_drops: u64,
}

impl ShapingDecision {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws the loss lottery for one packet. `true` means the packet is
    /// dropped and must not progress to the rate cap or delay stages.
    pub fn check_loss<R: Rng>(
        &mut self,
        packet: &Packet,
        session: &ShapingSession,
        rng: &mut R,
    ) -> bool {
        if session.loss_percent > 0.0 && rng.gen_range(0.0..100.0) < session.loss_percent {
            self.consecutive_drops += 1;
            tracing::debug!(%packet, streak = self.consecutive_drops, "dropped by loss policy");
            return true;
        }
        self.consecutive_drops = 0;
        false
    }

    /// Computes the release time for a packet that survived loss and the
    /// rate cap. `None` means pass it through immediately; a session with
    /// zero latency and zero jitter always passes, keeping the disabled
    /// case free of queuing overhead.
    pub fn release_time<R: Rng>(
        session: &ShapingSession,
        rng: &mut R,
        now: Instant,
    ) -> Option<Instant> {
        if !session.delays_packets() {
            return None;
        }

        let mut delay_ms = session.latency_ms;
        if session.jitter_ms > 0.0 {
            delay_ms += rng.gen_range(0.0..session.jitter_ms);
        }

        if delay_ms <= 0.0 {
            return None;
        }

        Some(now + Duration::from_secs_f64(delay_ms / 1000.0))
    }

    /// Convenience composition of both stages for rate-uncapped paths.
    pub fn decide<R: Rng>(
        &mut self,
        packet: &Packet,
        session: &ShapingSession,
        rng: &mut R,
        now: Instant,
    ) -> Verdict {
        if self.check_loss(packet, session, rng) {
            return Verdict::Drop;
        }
        match Self::release_time(session, rng, now) {
            Some(at) => Verdict::Delay(at),
            None => Verdict::Pass,
        }
    }

    /// Length of the current run of consecutive loss-drops.
    pub fn consecutive_drops(&self) -> u64 {
        self.consecutive_drops
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::Direction;

    fn packet() -> Packet {
        Packet::opaque(Bytes::from_static(b"payload"), Direction::Outbound)
    }

    #[test]
    fn zero_loss_never_drops() {
        let _ = tracing_subscriber::fmt::try_init();
        let session = ShapingSession::new().latency_ms(10.0);
        let mut decision = ShapingDecision::new();
        let mut rng = StdRng::seed_from_u64(7);
        let now = Instant::now();

        for _ in 0..10_000 {
            assert_ne!(decision.decide(&packet(), &session, &mut rng, now), Verdict::Drop);
        }
        assert_eq!(decision.consecutive_drops(), 0);
    }

    #[test]
    fn full_loss_always_drops() {
        let _ = tracing_subscriber::fmt::try_init();
        let session = ShapingSession::new().loss_percent(100.0);
        let mut decision = ShapingDecision::new();
        let mut rng = StdRng::seed_from_u64(7);
        let now = Instant::now();

        for i in 1..=1000u64 {
            assert_eq!(decision.decide(&packet(), &session, &mut rng, now), Verdict::Drop);
            assert_eq!(decision.consecutive_drops(), i);
        }
    }

    #[test]
    fn zero_delay_passes_without_queuing() {
        let _ = tracing_subscriber::fmt::try_init();
        let session = ShapingSession::new();
        let mut decision = ShapingDecision::new();
        let mut rng = StdRng::seed_from_u64(7);
        let now = Instant::now();

        for _ in 0..100 {
            assert_eq!(decision.decide(&packet(), &session, &mut rng, now), Verdict::Pass);
        }
    }

    #[test]
    fn delay_respects_latency_floor_and_jitter_ceiling() {
        let _ = tracing_subscriber::fmt::try_init();
        let session = ShapingSession::new().latency_ms(50.0).jitter_ms(20.0);
        let mut rng = StdRng::seed_from_u64(7);
        let now = Instant::now();

        for _ in 0..1000 {
            let at = ShapingDecision::release_time(&session, &mut rng, now)
                .expect("capped session must delay");
            let delay = at - now;
            assert!(delay >= Duration::from_millis(50));
            assert!(delay < Duration::from_millis(70));
        }
    }

    #[test]
    fn maximal_valid_delay_yields_a_release_time() {
        let _ = tracing_subscriber::fmt::try_init();
        let session = ShapingSession::new()
            .latency_ms(ShapingSession::MAX_DELAY_MS)
            .jitter_ms(ShapingSession::MAX_DELAY_MS);
        session.validate().unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let now = Instant::now();

        // Any delay a valid session can describe must be representable.
        let at = ShapingDecision::release_time(&session, &mut rng, now)
            .expect("delaying session must delay");
        assert!(at - now >= Duration::from_secs(3600));
    }

    #[test]
    fn drop_streak_resets_on_pass() {
        let _ = tracing_subscriber::fmt::try_init();
        let session = ShapingSession::new().loss_percent(50.0);
        let mut decision = ShapingDecision::new();
        let mut rng = StdRng::seed_from_u64(7);

        let mut saw_reset_after_drop = false;
        let mut last_was_drop = false;
        for _ in 0..1000 {
            if decision.check_loss(&packet(), &session, &mut rng) {
                last_was_drop = true;
            } else {
                if last_was_drop {
                    assert_eq!(decision.consecutive_drops(), 0);
                    saw_reset_after_drop = true;
                }
                last_was_drop = false;
            }
        }
        assert!(saw_reset_after_drop);
    }
}
