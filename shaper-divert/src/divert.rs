//! The Windows packet-interception backend, a thin safe wrapper over the
//! raw WinDivert driver bindings.
//!
//! The raw API is used directly (rather than the high-level wrapper crate)
//! because the [`PacketSource`] contract needs the driver's
//! shutdown-receive/close split: `WinDivertShutdown(RECV)` unblocks a
//! pending receive while the handle stays valid for reinjection, and only
//! `WinDivertClose` releases the capability.
//!
//! Opening a handle requires administrator privileges and an installed
//! WinDivert driver.

use std::{
    ffi::CString,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use shaper_core::{BoundaryFilter, Direction, Packet};
use windivert_sys as wd;

use crate::{PacketSource, PacketSourceProvider, SourceError};

const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_INVALID_PARAMETER: i32 = 87;
/// Returned by `WinDivertRecv` once the receive path has been shut down and
/// the packet backlog is drained.
const ERROR_NO_DATA: i32 = 232;
const ERROR_OPERATION_ABORTED: i32 = 995;

/// The largest frame the driver will hand us (`WINDIVERT_MTU_MAX`).
const RECV_BUFFER_SIZE: usize = 65575;

/// Opens [`DivertSource`]s against the live network stack.
#[derive(Debug, Clone)]
pub struct DivertSourceProvider {
    priority: i16,
}

impl DivertSourceProvider {
    /// Handle priority relative to other interception consumers, matching
    /// the tooling this crate descends from.
    pub const DEFAULT_PRIORITY: i16 = 10;

    pub fn new() -> Self {
        Self { priority: Self::DEFAULT_PRIORITY }
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for DivertSourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PacketSourceProvider for DivertSourceProvider {
    type Source = DivertSource;

    async fn open(&self, filter: &BoundaryFilter) -> Result<DivertSource, SourceError> {
        DivertSource::open(&filter.expression(), self.priority)
    }
}

/// Raw driver handle. The driver supports concurrent recv/send/shutdown
/// calls on one handle from multiple threads.
#[derive(Debug)]
struct RawHandle(wd::HANDLE);

unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

/// A live interception handle on the Windows network layer.
#[derive(Debug)]
pub struct DivertSource {
    handle: Arc<RawHandle>,
    shutdown: AtomicBool,
    closed: AtomicBool,
}

impl DivertSource {
    fn open(filter: &str, priority: i16) -> Result<Self, SourceError> {
        let filter_cstr = CString::new(filter)
            .map_err(|_| SourceError::InvalidFilter(filter.to_string()))?;

        let handle = unsafe {
            wd::WinDivertOpen(
                filter_cstr.as_ptr(),
                wd::WinDivertLayer::Network,
                priority,
                wd::WinDivertFlags::new(),
            )
        };

        if handle == wd::INVALID_HANDLE_VALUE {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(ERROR_ACCESS_DENIED) => SourceError::PermissionDenied,
                Some(ERROR_INVALID_PARAMETER) => SourceError::InvalidFilter(filter.to_string()),
                _ => SourceError::Io(err),
            });
        }

        tracing::info!(filter, priority, "interception handle opened");
        Ok(Self {
            handle: Arc::new(RawHandle(handle)),
            shutdown: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn recv_blocking(handle: &RawHandle) -> Result<Packet, SourceError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut recv_len: u32 = 0;
        let mut address = wd::WINDIVERT_ADDRESS::default();

        let ok = unsafe {
            wd::WinDivertRecv(
                handle.0,
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                &mut recv_len,
                &mut address,
            )
        };

        if !ok {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(ERROR_NO_DATA) | Some(ERROR_OPERATION_ABORTED) => SourceError::Closed,
                _ => SourceError::Io(err),
            });
        }

        buf.truncate(recv_len as usize);
        let raw = Bytes::from(buf);
        let direction =
            if address.outbound() { Direction::Outbound } else { Direction::Inbound };

        let packet = Packet::parse(raw.clone(), direction)
            .unwrap_or_else(|| Packet::opaque(raw, direction));
        Ok(packet.with_context(address_to_bytes(&address)))
    }
}

#[async_trait::async_trait]
impl PacketSource for DivertSource {
    async fn recv(&self) -> Result<Packet, SourceError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }

        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || Self::recv_blocking(&handle))
            .await
            .map_err(|e| SourceError::Io(io::Error::other(e)))?
    }

    fn send(&self, packet: &Packet) -> Result<(), SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }

        let mut address = address_from_bytes(packet.context())
            .ok_or_else(|| SourceError::Io(io::Error::other("packet without capture address")))?;
        let mut send_len: u32 = 0;

        let ok = unsafe {
            wd::WinDivertSend(
                self.handle.0,
                packet.raw().as_ptr().cast(),
                packet.raw().len() as u32,
                &mut send_len,
                &mut address,
            )
        };

        if !ok {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(ERROR_NO_DATA) | Some(ERROR_OPERATION_ABORTED) => SourceError::Closed,
                _ => SourceError::Io(err),
            });
        }
        Ok(())
    }

    fn shutdown_recv(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let ok = unsafe { wd::WinDivertShutdown(self.handle.0, wd::WinDivertShutdownMode::Recv) };
        if !ok {
            tracing::warn!(error = %io::Error::last_os_error(), "receive shutdown failed");
        }
    }

    fn close(&self) {
        self.shutdown_recv();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let ok = unsafe { wd::WinDivertClose(self.handle.0) };
        if !ok {
            tracing::warn!(error = %io::Error::last_os_error(), "handle close failed");
        } else {
            tracing::info!("interception handle closed");
        }
    }
}

impl Drop for DivertSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// The capture address is a plain C struct; it travels through the pipeline
/// as opaque bytes and is reconstructed verbatim for reinjection.
fn address_to_bytes(address: &wd::WINDIVERT_ADDRESS) -> Bytes {
    let len = std::mem::size_of::<wd::WINDIVERT_ADDRESS>();
    // SAFETY: WINDIVERT_ADDRESS is repr(C) plain-old-data.
    let slice = unsafe { std::slice::from_raw_parts((address as *const wd::WINDIVERT_ADDRESS).cast::<u8>(), len) };
    Bytes::copy_from_slice(slice)
}

fn address_from_bytes(bytes: &Bytes) -> Option<wd::WINDIVERT_ADDRESS> {
    if bytes.len() != std::mem::size_of::<wd::WINDIVERT_ADDRESS>() {
        return None;
    }
    // SAFETY: the bytes were produced by `address_to_bytes` from a valid
    // address of the same layout.
    Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast()) })
}
