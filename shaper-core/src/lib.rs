#![doc(issue_tracker_base_url = "https://github.com/shaper-rs/shaper-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Core types and pure machinery for traffic shaping: session configuration,
//! per-packet shaping verdicts, the time-ordered delay queue and the
//! byte-rate bucket. Everything here is runtime-agnostic; the capture and
//! release loops live in the `shaper` crate.

pub mod bucket;
pub mod decision;
pub mod direction;
pub mod filter;
pub mod packet;
pub mod protocol;
pub mod queue;
pub mod session;

pub use bucket::TokenBucket;
pub use decision::{ShapingDecision, Verdict};
pub use direction::Direction;
pub use filter::BoundaryFilter;
pub use packet::Packet;
pub use protocol::Protocol;
pub use queue::{DelayQueue, ScheduledPacket};
pub use session::ShapingSession;
