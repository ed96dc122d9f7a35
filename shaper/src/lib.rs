#![doc(issue_tracker_base_url = "https://github.com/shaper-rs/shaper-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Traffic shaping sessions over a packet-interception capability:
//! capture, classify, delay, drop and reinject live packets to emulate
//! latency, jitter, loss and throughput caps on a real network path.

mod controller;

pub use controller::{SessionEvent, SessionStats, Shaper, ShaperError, ShaperOptions};

pub use shaper_core::{
    BoundaryFilter, DelayQueue, Direction, Packet, Protocol, ShapingDecision, ShapingSession,
    TokenBucket, Verdict,
};
pub use shaper_divert::{MemHandle, MemSourceProvider, PacketSource, PacketSourceProvider, SourceError};

#[cfg(windows)]
pub use shaper_divert::DivertSourceProvider;
