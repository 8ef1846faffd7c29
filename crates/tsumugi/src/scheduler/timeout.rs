use std::time::Duration;

use crate::{SchedulerConfig, TimeRange};

/// Time allowed for downloading one segment.
///
/// The expected transfer time of the segment at the estimated throughput,
/// with `timeout_margin` applied, but never less than the manifest's minimum
/// buffer time. Without an estimate, a bitrate or a period the configured
/// default is used.
pub fn download_timeout(
    config: &SchedulerConfig,
    throughput_bps: f64,
    bandwidth: Option<u64>,
    period: Option<TimeRange>,
    min_buffer_time: Option<Duration>,
) -> Duration {
    let default = config.default_timeout();
    let (Some(bandwidth), Some(period)) = (bandwidth, period) else {
        return default;
    };
    if throughput_bps <= 0. || !throughput_bps.is_finite() {
        return default;
    }

    let segment_bits = bandwidth as f64 * period.duration.as_secs_f64();
    let Ok(needed) = Duration::try_from_secs_f64(segment_bits / throughput_bps * config.timeout_margin)
    else {
        return default;
    };

    needed.max(min_buffer_time.unwrap_or_default())
}
