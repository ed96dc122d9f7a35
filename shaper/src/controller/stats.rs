use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session counters, shared between the capture loop, the releaser loop
/// and the controller front-end.
///
/// They track every accepted packet to its end: a captured packet is either
/// passed, delayed or dropped by loss, and a delayed packet is later
/// released, drained at shutdown, or shed on queue overflow. Send failures
/// are counted on top (the packet is abandoned, not retried).
#[derive(Debug, Default)]
pub struct SessionStats {
    captured: AtomicU64,
    passed: AtomicU64,
    delayed: AtomicU64,
    dropped_by_loss: AtomicU64,
    released: AtomicU64,
    drained: AtomicU64,
    overflow_dropped: AtomicU64,
    send_failures: AtomicU64,
}

impl SessionStats {
    #[inline]
    pub(crate) fn increment_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_passed(&self) {
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_delayed(&self) {
        self.delayed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_dropped_by_loss(&self) {
        self.dropped_by_loss.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_drained(&self) {
        self.drained.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_overflow_dropped(&self) -> u64 {
        self.overflow_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub(crate) fn increment_send_failures(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets received from the interception handle.
    #[inline]
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Packets reinjected immediately, without queuing.
    #[inline]
    pub fn passed(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }

    /// Packets scheduled on the delay queue.
    #[inline]
    pub fn delayed(&self) -> u64 {
        self.delayed.load(Ordering::Relaxed)
    }

    /// Packets dropped by the loss policy.
    #[inline]
    pub fn dropped_by_loss(&self) -> u64 {
        self.dropped_by_loss.load(Ordering::Relaxed)
    }

    /// Delayed packets reinjected at their release time.
    #[inline]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Delayed packets reinjected by the final drain at shutdown.
    #[inline]
    pub fn drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }

    /// Packets shed because the delay queue was at capacity.
    #[inline]
    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped.load(Ordering::Relaxed)
    }

    /// Reinjection attempts that failed; the packets were abandoned.
    #[inline]
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }
}
