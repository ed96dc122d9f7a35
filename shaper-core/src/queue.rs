use std::{
    cmp::{Ordering, Reverse},
    collections::{binary_heap::PeekMut, BinaryHeap},
    time::Instant,
};

use crate::Packet;

/// A packet scheduled for future reinjection.
#[derive(Debug)]
pub struct ScheduledPacket {
    /// The instant at which the packet becomes due.
    pub release_at: Instant,
    /// Insertion order, used to break ties between equal release times so
    /// the queue never reorders packets beyond the configured jitter.
    seq: u64,
    pub packet: Packet,
}

impl PartialEq for ScheduledPacket {
    fn eq(&self, other: &Self) -> bool {
        self.release_at == other.release_at && self.seq == other.seq
    }
}

impl Eq for ScheduledPacket {}

impl PartialOrd for ScheduledPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_at.cmp(&other.release_at).then(self.seq.cmp(&other.seq))
    }
}

/// A time-ordered queue of packets awaiting reinjection.
///
/// Bounded min-heap keyed by release time. The bound is a safety valve: a
/// pathological configuration (large latency against a high-volume flow)
/// must degrade by shedding packets, not by growing without limit.
///
/// The queue itself is not synchronized; callers that share it between a
/// capture loop and a releaser loop must wrap it in a mutex. That locking is
/// a correctness requirement, not an optimization: push and pop from two
/// unsynchronized call sites can corrupt the heap.
#[derive(Debug)]
pub struct DelayQueue {
    heap: BinaryHeap<Reverse<ScheduledPacket>>,
    capacity: usize,
    next_seq: u64,
}

impl DelayQueue {
    /// The default safety ceiling on queued packets.
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(capacity.min(1024)), capacity, next_seq: 0 }
    }

    /// Schedules a packet for reinjection at `release_at`.
    ///
    /// At capacity the packet is handed back to the caller, which decides
    /// how to report the overflow.
    pub fn push(&mut self, packet: Packet, release_at: Instant) -> Result<(), Packet> {
        if self.heap.len() >= self.capacity {
            return Err(packet);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledPacket { release_at, seq, packet }));
        Ok(())
    }

    /// Removes and returns every packet due at `now`, in release-time order
    /// with ties in insertion order. Never returns a packet whose release
    /// time is still in the future.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Packet> {
        let mut due = Vec::new();
        while let Some(head) = self.heap.peek_mut() {
            if head.0.release_at > now {
                break;
            }
            let Reverse(entry) = PeekMut::pop(head);
            due.push(entry.packet);
        }
        due
    }

    /// Empties the queue unconditionally, in release-time order. Used at
    /// shutdown so in-flight packets are still reinjected rather than
    /// silently discarded.
    pub fn drain_all(&mut self) -> Vec<Packet> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(Reverse(entry)) = self.heap.pop() {
            all.push(entry.packet);
        }
        all
    }

    /// The instant of the earliest pending release, if any.
    pub fn next_release(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.release_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
