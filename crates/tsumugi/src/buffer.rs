use std::time::Duration;

use crate::{Representation, SchedulerConfig};

/// Decides how much media, in playback time, is downloaded ahead of the
/// playback position.
#[derive(Debug, Clone, Copy)]
pub struct BufferDepthController {
    default_depth: Duration,
    max_depth: Duration,
}

impl BufferDepthController {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            default_depth: config.default_buffer_depth(),
            max_depth: config.max_buffer_depth(),
        }
    }

    pub fn target_depth(&self, representation: &Representation) -> Duration {
        let index = &representation.segments;
        let document = index.document();
        if document.is_dynamic {
            self.dynamic_depth(document.time_shift_buffer_depth)
        } else {
            self.static_depth(index.duration(), index.count(), document.min_buffer_time)
        }
    }

    /// Keeps one average segment buffered, plus the manifest's minimum buffer
    /// time rounded down to whole segments.
    ///
    /// When a segment alone already covers the minimum buffer time, a 10%
    /// margin is used instead. The result is limited to the larger of the
    /// maximum depth and one average segment.
    pub fn static_depth(
        &self,
        duration: Option<Duration>,
        segment_count: usize,
        min_buffer_time: Option<Duration>,
    ) -> Duration {
        let (Some(duration), Ok(count @ 1..)) = (duration, u32::try_from(segment_count)) else {
            return self.default_depth;
        };
        let min_buffer_time = min_buffer_time.unwrap_or(self.default_depth);

        let average = duration / count;
        if average.is_zero() {
            return self.default_depth;
        }

        let mut depth = average;
        if average >= min_buffer_time {
            depth += average.mul_f64(0.1);
        } else {
            let multiples = (min_buffer_time.as_secs_f64() / average.as_secs_f64()).floor();
            depth += average.mul_f64(multiples);
        }

        depth.min(self.max_depth.max(average))
    }

    /// Half of the time shift buffer, as the live window keeps moving.
    pub fn dynamic_depth(&self, time_shift_buffer_depth: Option<Duration>) -> Duration {
        let depth = time_shift_buffer_depth
            .map(|depth| depth / 2)
            .filter(|depth| !depth.is_zero())
            .unwrap_or(self.default_depth);

        depth.min(self.max_depth)
    }
}

impl Default for BufferDepthController {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}
