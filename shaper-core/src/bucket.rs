use std::time::{Duration, Instant};

/// A fixed-window byte budget enforcing a throughput cap.
///
/// The window is exactly one second. Bytes admitted within a window never
/// exceed the cap, with one documented exception: a packet arriving against
/// an exhausted window is admitted immediately after the window resets, even
/// if it is larger than the remaining (or total) budget. Packets are never
/// split or rejected by the bucket, so a single oversized packet can
/// overshoot the cap at a window boundary.
///
/// Like [`DelayQueue`](crate::DelayQueue), the bucket is not synchronized;
/// shared use requires external locking around every read-modify-write.
#[derive(Debug)]
pub struct TokenBucket {
    max_bytes_per_second: u64,
    window_start: Instant,
    bytes_used: u64,
}

impl TokenBucket {
    const WINDOW: Duration = Duration::from_secs(1);

    /// Creates a bucket with the given cap in bytes per second.
    /// A cap of `0` means unlimited: every packet is admitted immediately.
    pub fn new(max_bytes_per_second: u64, now: Instant) -> Self {
        Self { max_bytes_per_second, window_start: now, bytes_used: 0 }
    }

    /// Whether the bucket enforces a cap at all.
    pub fn is_unlimited(&self) -> bool {
        self.max_bytes_per_second == 0
    }

    /// Attempts to admit `len` bytes at `now`.
    ///
    /// Returns [`Duration::ZERO`] if the bytes were admitted and counted
    /// against the current window. Otherwise returns the time remaining
    /// until the window resets; the caller sleeps that long and calls
    /// `admit` again, which will start a fresh window.
    #[must_use]
    pub fn admit(&mut self, len: u64, now: Instant) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Self::WINDOW {
            self.window_start = now;
            self.bytes_used = 0;
        }

        if self.bytes_used > 0 && self.bytes_used + len > self.max_bytes_per_second {
            return Self::WINDOW.saturating_sub(now.saturating_duration_since(self.window_start));
        }

        self.bytes_used += len;
        Duration::ZERO
    }

    /// Bytes counted against the current window.
    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }
}
