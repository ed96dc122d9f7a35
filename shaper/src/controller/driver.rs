//! The two loops of a running session: the capture loop (receive → loss →
//! rate cap → pass or schedule) and the releaser loop (periodically reinject
//! everything due, and drain the rest on shutdown).

use std::{
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use rand::{rngs::SmallRng, SeedableRng};
use shaper_core::{Packet, ShapingDecision, ShapingSession};
use shaper_divert::PacketSource;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use super::{SessionEvent, SharedState};

/// Receives packets for the session's lifetime and decides each one's fate.
///
/// Exits when the source errors after `stop()` shut the receive path down
/// (expected) or on an unrecoverable error, in which case it signals the
/// stop channel itself so the releaser tears the session down.
pub(crate) async fn capture_loop<S: PacketSource>(
    source: Arc<S>,
    session: ShapingSession,
    shared: Arc<SharedState>,
    mut stop_rx: watch::Receiver<bool>,
    stop_tx: Arc<watch::Sender<bool>>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut decision = ShapingDecision::new();
    let mut rng = SmallRng::from_entropy();

    loop {
        let packet = match source.recv().await {
            Ok(packet) => packet,
            // Once stop was requested any receive error is part of the
            // teardown, including an OS error racing the clean close.
            Err(e) if *stop_rx.borrow() => {
                debug!(error = %e, "capture loop exiting after stop request");
                break;
            }
            Err(e) => {
                error!(error = %e, "unrecoverable capture error, tearing session down");
                shared.fatal.store(true, Ordering::Release);
                let _ = stop_tx.send(true);
                let _ = events.try_send(SessionEvent::CaptureError { error: e.to_string() });
                break;
            }
        };

        shared.stats.increment_captured();

        if decision.check_loss(&packet, &session, &mut rng) {
            shared.stats.increment_dropped_by_loss();
            continue;
        }

        // Time-based backpressure: hold the packet until the current rate
        // window has room for it. Dropped packets never get this far, so
        // they burn no budget.
        if session.max_bytes_per_second > 0 {
            let mut admitted = false;
            while !admitted {
                let wait = shared.bucket.lock().admit(packet.len() as u64, Instant::now());
                if wait.is_zero() {
                    admitted = true;
                } else {
                    tokio::select! {
                        _ = stop_rx.wait_for(|stopped| *stopped) => {
                            // Session is stopping; let the packet through to
                            // the normal path so it is not silently lost.
                            admitted = true;
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        match ShapingDecision::release_time(&session, &mut rng, Instant::now()) {
            None => {
                if send_packet(source.as_ref(), &shared, &events, &packet) {
                    shared.stats.increment_passed();
                }
            }
            Some(release_at) => {
                let overflow = shared.queue.lock().push(packet, release_at).is_err();
                if overflow {
                    let shed_total = shared.stats.increment_overflow_dropped();
                    warn!(shed_total, "delay queue at capacity, shedding packet");
                    let _ = events.try_send(SessionEvent::QueueOverflow { shed_total });
                } else {
                    shared.stats.increment_delayed();
                }
            }
        }
    }
}

/// Wakes on a short fixed interval, reinjecting every packet whose release
/// time has elapsed. On stop it performs the final drain so every queued
/// packet is still reinjected rather than discarded.
pub(crate) async fn releaser_loop<S: PacketSource>(
    source: Arc<S>,
    shared: Arc<SharedState>,
    mut stop_rx: watch::Receiver<bool>,
    release_interval: std::time::Duration,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut interval = tokio::time::interval(release_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            _ = interval.tick() => {
                let due = shared.queue.lock().pop_due(Instant::now());
                for packet in due {
                    if send_packet(source.as_ref(), &shared, &events, &packet) {
                        shared.stats.increment_released();
                    }
                }
            }
        }
    }

    // On a regular stop the controller drains after joining both loops, so
    // a packet the capture loop is still scheduling cannot slip in behind
    // the drain. When the capture loop died of an error it signalled stop
    // itself after its last packet, and there is no stop() in flight, so
    // finish the whole teardown here.
    if shared.fatal.load(Ordering::Acquire) {
        drain_queue(source.as_ref(), &shared, &events);
        source.close();
    }
}

/// Empties the delay queue and reinjects everything in it, preserving the
/// property that no accepted packet is silently discarded at shutdown.
pub(crate) fn drain_queue<S: PacketSource>(
    source: &S,
    shared: &SharedState,
    events: &mpsc::Sender<SessionEvent>,
) {
    let remaining = shared.queue.lock().drain_all();
    if !remaining.is_empty() {
        debug!(count = remaining.len(), "draining delay queue on shutdown");
    }
    for packet in remaining {
        if send_packet(source, shared, events, &packet) {
            shared.stats.increment_drained();
        }
    }
}

/// Reinjects one packet. A failure is logged and counted and the packet is
/// abandoned; stale packets are not worth retrying after a processing delay.
fn send_packet<S: PacketSource>(
    source: &S,
    shared: &SharedState,
    events: &mpsc::Sender<SessionEvent>,
    packet: &Packet,
) -> bool {
    match source.send(packet) {
        Ok(()) => true,
        Err(e) => {
            warn!(%packet, error = %e, "reinjection failed, abandoning packet");
            shared.stats.increment_send_failures();
            let _ = events.try_send(SessionEvent::SendFailure { error: e.to_string() });
            false
        }
    }
}
