use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use shaper_core::{BoundaryFilter, DelayQueue, ShapingSession, TokenBucket};
use shaper_divert::{PacketSource, PacketSourceProvider, SourceError};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

mod driver;
mod stats;
pub use stats::SessionStats;

#[derive(Debug, Error)]
pub enum ShaperError {
    #[error("a session is already running")]
    AlreadyRunning,
    #[error("invalid session: {0}")]
    InvalidSession(#[from] shaper_core::session::InvalidSession),
    #[error("packet source error: {0}")]
    Source(#[from] SourceError),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Out-of-band notifications from a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session started capturing with the given boundary filter.
    Started { filter: String },
    /// The session stopped and its handle was closed.
    Stopped,
    /// The delay queue was at capacity; the packet was shed.
    QueueOverflow { shed_total: u64 },
    /// A reinjection failed; the packet was abandoned.
    SendFailure { error: String },
    /// The capture loop hit an unrecoverable error and tore the session
    /// down. `stop()` afterwards is a no-op beyond releasing the handle.
    CaptureError { error: String },
}

/// Tuning knobs that are independent of the per-session shaping parameters.
#[derive(Debug, Clone)]
pub struct ShaperOptions {
    /// Safety ceiling on queued packets.
    pub queue_capacity: usize,
    /// Releaser wake interval. Its scheduling slop adds to the configured
    /// jitter, so it is kept well below the minimum practical latency.
    pub release_interval: Duration,
    /// Capacity of the session event channel. Events beyond it are logged
    /// and discarded rather than blocking the pipeline.
    pub event_buffer: usize,
}

impl Default for ShaperOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DelayQueue::DEFAULT_CAPACITY,
            release_interval: Duration::from_millis(5),
            event_buffer: 64,
        }
    }
}

impl ShaperOptions {
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn release_interval(mut self, release_interval: Duration) -> Self {
        self.release_interval = release_interval;
        self
    }

    pub fn event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }
}

/// State shared by the capture loop, the releaser loop and `stop()`.
///
/// The queue and bucket locks are a correctness requirement: push (capture
/// loop) and pop/drain (releaser loop, teardown) are concurrent writers.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) queue: Mutex<DelayQueue>,
    pub(crate) bucket: Mutex<TokenBucket>,
    pub(crate) stats: Arc<SessionStats>,
    /// Set when the capture loop dies of an unexpected error, so the
    /// releaser closes the handle after its final drain.
    pub(crate) fatal: std::sync::atomic::AtomicBool,
}

struct Active<S> {
    source: Arc<S>,
    stop_tx: Arc<watch::Sender<bool>>,
    capture: JoinHandle<()>,
    releaser: JoinHandle<()>,
    shared: Arc<SharedState>,
}

/// Orchestrates one shaping session at a time: owns the interception handle
/// and the capture/releaser loops for the session's lifetime.
///
/// State machine: Idle → (`start`) → Running → (`stop`) → Idle. `stop` on an
/// idle controller is a no-op.
pub struct Shaper<P: PacketSourceProvider> {
    provider: P,
    options: ShaperOptions,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    stats: Arc<SessionStats>,
    active: Option<Active<P::Source>>,
}

impl<P: PacketSourceProvider> std::fmt::Debug for Shaper<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shaper").field("running", &self.active.is_some()).finish()
    }
}

impl<P: PacketSourceProvider> Shaper<P> {
    pub fn new(provider: P) -> Self {
        Self::with_options(provider, ShaperOptions::default())
    }

    pub fn with_options(provider: P, options: ShaperOptions) -> Self {
        let (event_tx, event_rx) = mpsc::channel(options.event_buffer);
        Self {
            provider,
            options,
            event_tx,
            event_rx: Some(event_rx),
            stats: Arc::new(SessionStats::default()),
            active: None,
        }
    }

    /// Takes the session event receiver. Can be taken once.
    pub fn events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Counters of the current session, or of the last one after `stop()`.
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a session: opens the interception handle scoped to the
    /// session's boundary filter and spawns the capture and releaser loops.
    ///
    /// Fails synchronously on an invalid session, insufficient privilege or
    /// a rejected filter; no partial session is left behind in those cases.
    pub async fn start(&mut self, session: ShapingSession) -> Result<(), ShaperError> {
        if self.active.is_some() {
            return Err(ShaperError::AlreadyRunning);
        }
        session.validate()?;

        let filter = BoundaryFilter::from_session(&session);
        let source = Arc::new(self.provider.open(&filter).await?);

        let stats = Arc::new(SessionStats::default());
        let shared = Arc::new(SharedState {
            queue: Mutex::new(DelayQueue::new(self.options.queue_capacity)),
            bucket: Mutex::new(TokenBucket::new(session.max_bytes_per_second, Instant::now())),
            stats: Arc::clone(&stats),
            fatal: std::sync::atomic::AtomicBool::new(false),
        });
        self.stats = stats;

        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);

        let capture = tokio::spawn(driver::capture_loop(
            Arc::clone(&source),
            session.clone(),
            Arc::clone(&shared),
            stop_rx.clone(),
            Arc::clone(&stop_tx),
            self.event_tx.clone(),
        ));
        let releaser = tokio::spawn(driver::releaser_loop(
            Arc::clone(&source),
            Arc::clone(&shared),
            stop_rx,
            self.options.release_interval,
            self.event_tx.clone(),
        ));

        tracing::info!(filter = %filter, ?session, "session started");
        self.emit(SessionEvent::Started { filter: filter.expression() });

        self.active = Some(Active { source, stop_tx, capture, releaser, shared });
        Ok(())
    }

    /// Stops the running session: signals both loops, unblocks the pending
    /// receive, joins the loops, reinjects everything still queued, then
    /// closes the handle.
    ///
    /// A no-op when no session is running.
    pub async fn stop(&mut self) -> Result<(), ShaperError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        let _ = active.stop_tx.send(true);
        active.source.shutdown_recv();

        active.capture.await?;
        active.releaser.await?;

        // Both loops are done: nothing pushes or pops anymore, so this
        // drain reinjects exactly what was in flight at the stop request.
        driver::drain_queue(active.source.as_ref(), &active.shared, &self.event_tx);
        active.source.close();
        tracing::info!(
            captured = self.stats.captured(),
            passed = self.stats.passed(),
            released = self.stats.released(),
            drained = self.stats.drained(),
            dropped_by_loss = self.stats.dropped_by_loss(),
            "session stopped"
        );
        self.emit(SessionEvent::Stopped);
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(?e, "event channel full or closed, discarding event");
        }
    }
}

impl<P: PacketSourceProvider> Drop for Shaper<P> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            // Best effort teardown without awaiting: signal the loops and
            // unblock the receive. Queued packets are lost at this point;
            // callers that care must stop() before dropping. The handle
            // closes when the last task drops its reference.
            let _ = active.stop_tx.send(true);
            active.source.shutdown_recv();
        }
    }
}
