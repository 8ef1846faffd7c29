use std::time::Duration;

use url::Url;

use super::{DocumentParameters, SegmentIndex, Template};
use crate::{Segment, TimeRange, TsumugiError, TsumugiResult};

/// `SegmentTemplate` addressing with `$Number$` and a constant segment duration.
///
/// A static index lists a fixed number of segments. A dynamic index is one
/// snapshot of the live availability window; a refreshed manifest produces a
/// new snapshot.
#[derive(Debug, Clone)]
pub struct TemplateSegmentIndex {
    base_url: Url,
    media: String,
    initialization: Option<String>,
    template: Template,

    segment_duration: Duration,
    timescale: u64,
    /// Number of the segment starting at time zero.
    start_number: u64,
    /// First number of the listed window.
    first_number: u64,
    segment_count: u64,

    document: DocumentParameters,
}

impl TemplateSegmentIndex {
    pub fn builder(base_url: Url, media: impl Into<String>) -> TemplateSegmentIndexBuilder {
        TemplateSegmentIndexBuilder::new(base_url, media.into())
    }

    fn last_number(&self) -> Option<u64> {
        (self.segment_count > 0).then(|| self.first_number + self.segment_count - 1)
    }

    fn is_listed(&self, id: u64) -> bool {
        self.last_number()
            .is_some_and(|last| self.first_number <= id && id <= last)
    }

    fn period_of(&self, id: u64) -> Option<TimeRange> {
        let index = u32::try_from(id.checked_sub(self.start_number)?).ok()?;
        Some(TimeRange::new(
            self.segment_duration * index,
            self.segment_duration,
        ))
    }

    fn number_at(&self, time: Duration) -> u64 {
        self.start_number + (time.as_nanos() / self.segment_duration.as_nanos()) as u64
    }

    fn resolve(&self, template: &str, args: Template) -> Option<Url> {
        self.base_url.join(&args.resolve(template)).ok()
    }

    /// Where playback of a live window starts: a quarter of the window behind
    /// its beginning, so the buffer has room to grow before the window moves.
    pub fn live_start_id(&self) -> Option<u64> {
        self.last_number()
            .map(|_| self.first_number + self.segment_count / 4)
    }
}

impl SegmentIndex for TemplateSegmentIndex {
    fn segment_id(&self, time: Duration) -> Option<u64> {
        let id = self.number_at(time);
        self.is_listed(id).then_some(id)
    }

    fn time_range(&self, id: u64) -> Option<TimeRange> {
        if !self.document.is_dynamic && !self.is_listed(id) {
            return None;
        }
        self.period_of(id)
    }

    fn next_id(&self, id: u64) -> Option<u64> {
        let next = id + 1;
        if self.document.is_dynamic || self.is_listed(next) {
            Some(next)
        } else {
            None
        }
    }

    fn segment_id_after(&self, time: Duration) -> Option<u64> {
        let next = (self.number_at(time) + 1).max(self.first_number);
        if self.document.is_dynamic || self.is_listed(next) {
            Some(next)
        } else {
            None
        }
    }

    fn first_id(&self) -> Option<u64> {
        self.last_number().map(|_| self.first_number)
    }

    fn init_segment(&self) -> Option<Segment> {
        let initialization = self.initialization.as_deref()?;
        self.resolve(initialization, self.template.clone())
            .map(Segment::new)
    }

    fn media_segment(&self, id: u64) -> Option<Segment> {
        if !self.is_listed(id) {
            return None;
        }

        let period = self.period_of(id)?;
        let ticks = period.start.as_nanos() * u128::from(self.timescale) / 1_000_000_000;
        let args = self
            .template
            .clone()
            .with_number(id)
            .with_time(ticks as u64);
        self.resolve(&self.media, args)
            .map(|url| Segment::new(url).with_period(period))
    }

    fn duration(&self) -> Option<Duration> {
        let count = u32::try_from(self.segment_count).ok()?;
        Some(self.segment_duration * count)
    }

    fn count(&self) -> usize {
        self.segment_count as usize
    }

    fn document(&self) -> &DocumentParameters {
        &self.document
    }
}

pub struct TemplateSegmentIndexBuilder {
    base_url: Url,
    media: String,
    initialization: Option<String>,
    representation_id: String,
    bandwidth: Option<u64>,

    segment_duration: Duration,
    timescale: u64,
    start_number: u64,
    window: Window,

    document: DocumentParameters,
}

enum Window {
    Static { count: u64 },
    /// Segments fully published `elapsed` after availability start.
    Live { elapsed: Duration },
}

impl TemplateSegmentIndexBuilder {
    fn new(base_url: Url, media: String) -> Self {
        Self {
            base_url,
            media,
            initialization: None,
            representation_id: String::new(),
            bandwidth: None,
            segment_duration: Duration::from_secs(2),
            timescale: 1,
            start_number: 1,
            window: Window::Static { count: 0 },
            document: DocumentParameters::default(),
        }
    }

    pub fn initialization(mut self, initialization: impl Into<String>) -> Self {
        self.initialization = Some(initialization.into());
        self
    }

    pub fn representation_id(mut self, id: impl Into<String>) -> Self {
        self.representation_id = id.into();
        self
    }

    pub fn bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn segment_duration(mut self, duration: Duration) -> Self {
        self.segment_duration = duration;
        self
    }

    /// Ticks per second used for `$Time$`.
    pub fn timescale(mut self, timescale: u64) -> Self {
        self.timescale = timescale;
        self
    }

    pub fn start_number(mut self, start_number: u64) -> Self {
        self.start_number = start_number;
        self
    }

    /// Static content with `count` segments.
    pub fn segment_count(mut self, count: u64) -> Self {
        self.window = Window::Static { count };
        self.document.is_dynamic = false;
        self
    }

    /// Dynamic content, listing the segments published `elapsed` after the
    /// availability start and still inside the time shift buffer.
    pub fn published_until(mut self, elapsed: Duration) -> Self {
        self.window = Window::Live { elapsed };
        self.document.is_dynamic = true;
        self
    }

    pub fn min_buffer_time(mut self, time: Duration) -> Self {
        self.document.min_buffer_time = Some(time);
        self
    }

    pub fn time_shift_buffer_depth(mut self, depth: Duration) -> Self {
        self.document.time_shift_buffer_depth = Some(depth);
        self
    }

    pub fn media_presentation_duration(mut self, duration: Duration) -> Self {
        self.document.media_presentation_duration = Some(duration);
        self
    }

    pub fn build(self) -> TsumugiResult<TemplateSegmentIndex> {
        if self.segment_duration.is_zero() {
            return Err(TsumugiError::InvalidSegmentIndex(
                "segment duration must not be zero".to_string(),
            ));
        }

        let template = Template::for_representation(&self.representation_id, self.bandwidth);
        // fail early on templates which can not produce a valid url
        self.base_url
            .join(&template.clone().with_number(self.start_number).with_time(0).resolve(&self.media))?;
        if let Some(initialization) = &self.initialization {
            self.base_url.join(&template.resolve(initialization))?;
        }

        let (first_number, segment_count) = match self.window {
            Window::Static { count } => (self.start_number, count),
            Window::Live { elapsed } => {
                let published = (elapsed.as_nanos() / self.segment_duration.as_nanos()) as u64;
                let window = self
                    .document
                    .time_shift_buffer_depth
                    .map(|depth| (depth.as_nanos() / self.segment_duration.as_nanos()) as u64)
                    .filter(|window| *window > 0)
                    .unwrap_or(published);
                let count = published.min(window);
                (self.start_number + published - count, count)
            }
        };

        Ok(TemplateSegmentIndex {
            base_url: self.base_url,
            media: self.media,
            initialization: self.initialization,
            template,
            segment_duration: self.segment_duration,
            timescale: self.timescale,
            start_number: self.start_number,
            first_number,
            segment_count,
            document: self.document,
        })
    }
}
