use std::{fmt, time::Duration};

use bytes::Bytes;
use url::Url;

use crate::{ByteRange, StreamType};

/// A span on the playback timeline, used both as the period of a segment and
/// to remember the last downloaded one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: Duration,
    pub duration: Duration,
}

impl TimeRange {
    pub fn new(start: Duration, duration: Duration) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn contains(&self, time: Duration) -> bool {
        self.start <= time && time < self.end()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}-{:?})", self.start, self.end())
    }
}

/// A fetchable unit of a representation.
///
/// Initialization segments carry no period.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub period: Option<TimeRange>,
}

impl Segment {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            byte_range: None,
            period: None,
        }
    }

    pub fn with_byte_range(mut self, byte_range: ByteRange) -> Self {
        self.byte_range = Some(byte_range);
        self
    }

    pub fn with_period(mut self, period: TimeRange) -> Self {
        self.period = Some(period);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub segment: Segment,
    /// `None` for initialization segments.
    pub segment_id: Option<u64>,
    pub stream_type: StreamType,
    /// Missing resources are expected and should not be reported loudly.
    pub ignore_error: bool,
}

#[derive(Debug, Clone)]
pub struct DownloadResponse {
    pub data: Bytes,
    pub segment_id: Option<u64>,
    pub segment: Segment,
}
