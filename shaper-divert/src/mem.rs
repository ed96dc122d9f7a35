//! A channel-backed [`PacketSource`] for tests and dry runs.
//!
//! Packets injected through the [`MemHandle`] come out of the source's
//! `recv`; everything the pipeline reinjects lands back on the handle for
//! inspection. Close semantics mirror the real backend: shutting down
//! receive unblocks a pending `recv` while `send` keeps working until the
//! handle is fully closed.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shaper_core::{BoundaryFilter, Packet};
use tokio::sync::{mpsc, watch, Mutex};

use crate::{PacketSource, PacketSourceProvider, SourceError};

#[derive(Debug)]
struct Shared {
    inject_rx: Mutex<mpsc::Receiver<Packet>>,
    reinjected_tx: mpsc::UnboundedSender<Packet>,
    last_filter: std::sync::Mutex<Option<String>>,
    deny_permission: AtomicBool,
    fail_recv: AtomicBool,
}

/// Test-side handle paired with a [`MemSourceProvider`].
#[derive(Debug)]
pub struct MemHandle {
    inject_tx: mpsc::Sender<Packet>,
    reinjected_rx: mpsc::UnboundedReceiver<Packet>,
    shared: Arc<Shared>,
}

impl MemHandle {
    /// Feeds a packet into the source, as if the facility had captured it.
    pub async fn inject(&self, packet: Packet) -> Result<(), SourceError> {
        self.inject_tx.send(packet).await.map_err(|_| SourceError::Closed)
    }

    /// Receives the next packet the pipeline reinjected.
    pub async fn reinjected(&mut self) -> Option<Packet> {
        self.reinjected_rx.recv().await
    }

    /// Drains every reinjected packet currently buffered.
    pub fn drain_reinjected(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(packet) = self.reinjected_rx.try_recv() {
            out.push(packet);
        }
        out
    }

    /// The filter expression passed to the most recent `open`.
    pub fn last_filter(&self) -> Option<String> {
        self.shared.last_filter.lock().expect("filter lock").clone()
    }

    /// Makes the source surface an I/O error instead of a clean `Closed`
    /// on the receive path, simulating a driver failure.
    pub fn fail_recv(&self) {
        self.shared.fail_recv.store(true, Ordering::Relaxed);
    }
}

/// Provider handing out [`MemSource`]s wired to one [`MemHandle`].
///
/// Successive opens (session restarts) share the same underlying channels.
#[derive(Debug, Clone)]
pub struct MemSourceProvider {
    shared: Arc<Shared>,
}

impl MemSourceProvider {
    /// Creates a provider and its paired test handle. `buffer` bounds the
    /// injection channel.
    pub fn channel(buffer: usize) -> (Self, MemHandle) {
        let (inject_tx, inject_rx) = mpsc::channel(buffer);
        let (reinjected_tx, reinjected_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            inject_rx: Mutex::new(inject_rx),
            reinjected_tx,
            last_filter: std::sync::Mutex::new(None),
            deny_permission: AtomicBool::new(false),
            fail_recv: AtomicBool::new(false),
        });

        let handle = MemHandle { inject_tx, reinjected_rx, shared: Arc::clone(&shared) };
        (Self { shared }, handle)
    }

    /// Makes every subsequent `open` fail with
    /// [`SourceError::PermissionDenied`], simulating an unprivileged run.
    pub fn deny_permission(self) -> Self {
        self.shared.deny_permission.store(true, Ordering::Relaxed);
        self
    }
}

#[async_trait::async_trait]
impl PacketSourceProvider for MemSourceProvider {
    type Source = MemSource;

    async fn open(&self, filter: &BoundaryFilter) -> Result<MemSource, SourceError> {
        if self.shared.deny_permission.load(Ordering::Relaxed) {
            return Err(SourceError::PermissionDenied);
        }

        *self.shared.last_filter.lock().expect("filter lock") = Some(filter.expression());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(MemSource {
            shared: Arc::clone(&self.shared),
            shutdown_tx,
            shutdown_rx,
            closed: AtomicBool::new(false),
        })
    }
}

/// The in-memory [`PacketSource`].
#[derive(Debug)]
pub struct MemSource {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    closed: AtomicBool,
}

impl MemSource {
    fn recv_error(&self) -> SourceError {
        if self.shared.fail_recv.load(Ordering::Relaxed) {
            SourceError::Io(std::io::Error::other("simulated receive failure"))
        } else {
            SourceError::Closed
        }
    }
}

#[async_trait::async_trait]
impl PacketSource for MemSource {
    async fn recv(&self) -> Result<Packet, SourceError> {
        let mut shutdown = self.shutdown_rx.clone();
        if *shutdown.borrow() {
            return Err(self.recv_error());
        }

        let mut inject_rx = self.shared.inject_rx.lock().await;
        tokio::select! {
            _ = shutdown.wait_for(|stopped| *stopped) => Err(self.recv_error()),
            packet = inject_rx.recv() => packet.ok_or_else(|| self.recv_error()),
        }
    }

    fn send(&self, packet: &Packet) -> Result<(), SourceError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(SourceError::Closed);
        }
        self.shared.reinjected_tx.send(packet.clone()).map_err(|_| SourceError::Closed)
    }

    fn shutdown_recv(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn close(&self) {
        self.shutdown_recv();
        self.closed.store(true, Ordering::Relaxed);
    }
}
