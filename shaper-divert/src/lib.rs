#![doc(issue_tracker_base_url = "https://github.com/shaper-rs/shaper-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Packet interception sources: the privileged seam between the shaping
//! pipeline and the OS packet-interception facility.
//!
//! The [`PacketSource`] trait abstracts one open interception handle. The
//! real Windows backend lives in [`divert`]; the channel-backed [`mem`]
//! backend serves tests and dry runs.

use shaper_core::{BoundaryFilter, Packet};

#[cfg(windows)]
pub mod divert;
pub mod mem;

#[cfg(windows)]
pub use divert::{DivertSource, DivertSourceProvider};
pub use mem::{MemHandle, MemSource, MemSourceProvider};

/// Errors surfaced by a packet source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The interception capability could not be acquired for lack of
    /// privilege. Fatal at session start; never retried.
    #[error("insufficient privilege to open the interception handle")]
    PermissionDenied,
    /// The boundary filter expression was rejected by the facility.
    #[error("invalid filter expression: {0}")]
    InvalidFilter(String),
    /// The handle is closed. Expected during shutdown; fatal otherwise.
    #[error("interception handle closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One open interception handle, exclusively owned by a session's controller
/// for the session's lifetime.
#[async_trait::async_trait]
pub trait PacketSource: Send + Sync + 'static {
    /// Blocks until a packet matching the boundary filter is available.
    ///
    /// Fails with [`SourceError::Closed`] once [`shutdown_recv`](Self::shutdown_recv)
    /// or [`close`](Self::close) has been called, including for a `recv`
    /// already pending at that moment.
    async fn recv(&self) -> Result<Packet, SourceError>;

    /// Reinjects a packet into the network stack.
    fn send(&self, packet: &Packet) -> Result<(), SourceError>;

    /// Stops packet delivery and unblocks any pending [`recv`](Self::recv),
    /// while keeping [`send`](Self::send) usable so already-captured packets
    /// can still be reinjected during teardown.
    fn shutdown_recv(&self);

    /// Releases the capability. Safe to call more than once; implies
    /// [`shutdown_recv`](Self::shutdown_recv).
    fn close(&self);
}

/// Opens [`PacketSource`]s. The controller goes through a provider so tests
/// can inject an in-memory source in place of the privileged one.
#[async_trait::async_trait]
pub trait PacketSourceProvider: Send + Sync + 'static {
    type Source: PacketSource;

    /// Acquires the interception capability scoped to `filter`.
    async fn open(&self, filter: &BoundaryFilter) -> Result<Self::Source, SourceError>;
}
