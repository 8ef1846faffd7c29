//! Per-stream DASH segment scheduling.
//!
//! ```text
//! ┌──────────────┐  tick   ┌──────────────────────┐  fetch  ┌────────────┐
//! │Playback clock├────────►│                      ├────────►│ Downloader │
//! └──────────────┘         │                      ◄────────┤            │
//!                          │   SegmentScheduler   │  bytes  └────────────┘
//! ┌──────────────┐ update  │                      │
//! │   Manifest   ├────────►│ [single-flight pass] │  write  ┌────────────┐
//! └──────────────┘         │                      ├────────►│    Sink    │
//!                          └───┬──────────────▲───┘         └────────────┘
//!                       timeout│              │observe
//!                          ┌───▼──────────────┴───┐
//!                          │  ThroughputEstimator │ (shared between streams)
//!                          └──────────────────────┘
//! ```

pub mod abr;
pub mod buffer;
pub mod config;
pub mod download;
pub mod error;
pub mod index;
pub mod scheduler;
pub mod segment;
pub mod session;
pub mod sink;
pub mod throughput;
pub mod util;

pub use config::*;
pub use error::*;
pub use index::{DocumentParameters, Representation, SegmentIndex};
pub use scheduler::{SchedulerState, SegmentScheduler};
pub use segment::*;
pub use session::StreamSession;
pub use throughput::ThroughputEstimator;
pub use util::range::ByteRange;

/// Kind of media carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StreamType {
    Audio,
    #[default]
    Video,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}
