mod number;
mod template;

pub use number::{TemplateSegmentIndex, TemplateSegmentIndexBuilder};
pub use template::Template;

use std::{fmt, sync::Arc, time::Duration};

use crate::{Segment, TimeRange};

/// Presentation-wide values of the manifest a representation was taken from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentParameters {
    /// `type="dynamic"`
    pub is_dynamic: bool,
    pub media_presentation_duration: Option<Duration>,
    pub min_buffer_time: Option<Duration>,
    pub time_shift_buffer_depth: Option<Duration>,
}

/// Segment lookup of one representation.
///
/// A lookup without a match is an expected outcome (for example the live
/// edge has not been published yet) and is reported as `None`.
pub trait SegmentIndex: Send + Sync {
    /// Id of the segment covering `time`.
    fn segment_id(&self, time: Duration) -> Option<u64>;

    fn time_range(&self, id: u64) -> Option<TimeRange>;

    /// Id following `id`, which may not be available yet on live content.
    fn next_id(&self, id: u64) -> Option<u64>;

    /// Id of the segment following the one which covers `time`, or the first
    /// listed segment when `time` precedes the listed window.
    fn segment_id_after(&self, time: Duration) -> Option<u64> {
        match self.segment_id(time) {
            Some(id) => self.next_id(id),
            None => self.first_id().filter(|id| {
                self.time_range(*id)
                    .is_some_and(|range| time < range.start)
            }),
        }
    }

    /// First segment id currently listed.
    fn first_id(&self) -> Option<u64>;

    fn init_segment(&self) -> Option<Segment>;

    fn media_segment(&self, id: u64) -> Option<Segment>;

    /// Total duration of the listed segments.
    fn duration(&self) -> Option<Duration>;

    /// Number of listed segments.
    fn count(&self) -> usize;

    fn document(&self) -> &DocumentParameters;
}

/// One encoded variant of a stream.
#[derive(Clone)]
pub struct Representation {
    pub id: String,
    /// bits per second
    pub bandwidth: Option<u64>,
    /// Segment id playback starts from when nothing else was requested.
    pub aligned_start_segment_id: u64,
    /// Subtracted from segment times to move the first segment to zero.
    pub aligned_trim_offset: Option<Duration>,
    pub segments: Arc<dyn SegmentIndex>,
}

impl Representation {
    pub fn new(id: impl Into<String>, segments: Arc<dyn SegmentIndex>) -> Self {
        Self {
            id: id.into(),
            bandwidth: None,
            aligned_start_segment_id: segments.first_id().unwrap_or_default(),
            aligned_trim_offset: None,
            segments,
        }
    }

    pub fn with_bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn with_aligned_start_segment_id(mut self, id: u64) -> Self {
        self.aligned_start_segment_id = id;
        self
    }

    pub fn with_aligned_trim_offset(mut self, offset: Duration) -> Self {
        self.aligned_trim_offset = Some(offset);
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.segments.document().is_dynamic
    }

    /// Playback length used for end-of-content detection.
    pub fn stream_duration(&self) -> Option<Duration> {
        if self.is_dynamic() {
            self.segments.document().media_presentation_duration
        } else {
            self.segments.duration()
        }
    }
}

impl fmt::Debug for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Representation")
            .field("id", &self.id)
            .field("bandwidth", &self.bandwidth)
            .field("aligned_start_segment_id", &self.aligned_start_segment_id)
            .field("aligned_trim_offset", &self.aligned_trim_offset)
            .field("document", self.segments.document())
            .finish()
    }
}
