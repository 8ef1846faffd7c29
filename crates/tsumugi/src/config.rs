use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TsumugiConfig {
    pub throughput: ThroughputConfig,
    pub scheduler: SchedulerConfig,
}

/// Decay coefficients and starting values of the two bandwidth averages.
///
/// A coefficient closer to `1.0` makes the average slower to react.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputConfig {
    pub slow_coefficient: f64,
    pub fast_coefficient: f64,
    /// bits per second
    pub initial_slow_bps: f64,
    /// bits per second
    pub initial_fast_bps: f64,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            slow_coefficient: 0.99,
            fast_coefficient: 0.98,
            initial_slow_bps: 20_000_000.,
            initial_fast_bps: 20_000_000.,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Buffer depth used when the manifest does not provide enough data.
    pub default_buffer_depth_secs: f64,
    /// Upper bound of the buffer depth for both static and dynamic content.
    pub max_buffer_depth_secs: f64,
    /// Download timeout used before any throughput sample is available.
    pub default_timeout_secs: f64,
    /// Safety factor applied to the estimated transfer time.
    pub timeout_margin: f64,
    /// How long `reset` and `stop` wait for in-flight work.
    pub join_timeout_secs: f64,
    /// Report download failures on static content through the error handler.
    ///
    /// Disabled by default, playback silently stops instead.
    pub report_static_failures: bool,
}

const DEFAULT_BUFFER_DEPTH_SECS: f64 = 10.;
const MAX_BUFFER_DEPTH_SECS: f64 = 15.;
const DEFAULT_TIMEOUT_SECS: f64 = 10.;
const JOIN_TIMEOUT_SECS: f64 = 5.;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_buffer_depth_secs: DEFAULT_BUFFER_DEPTH_SECS,
            max_buffer_depth_secs: MAX_BUFFER_DEPTH_SECS,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            timeout_margin: 1.5,
            join_timeout_secs: JOIN_TIMEOUT_SECS,
            report_static_failures: false,
        }
    }
}

/// Negative, NaN and out of range values fall back to `default`.
fn seconds(name: &str, value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|e| {
        tracing::warn!("Invalid {name} {value}: {e}, using {default}s");
        Duration::from_secs_f64(default)
    })
}

impl SchedulerConfig {
    pub fn default_buffer_depth(&self) -> Duration {
        seconds(
            "default_buffer_depth_secs",
            self.default_buffer_depth_secs,
            DEFAULT_BUFFER_DEPTH_SECS,
        )
    }

    pub fn max_buffer_depth(&self) -> Duration {
        seconds(
            "max_buffer_depth_secs",
            self.max_buffer_depth_secs,
            MAX_BUFFER_DEPTH_SECS,
        )
    }

    pub fn default_timeout(&self) -> Duration {
        seconds(
            "default_timeout_secs",
            self.default_timeout_secs,
            DEFAULT_TIMEOUT_SECS,
        )
    }

    pub fn join_timeout(&self) -> Duration {
        seconds("join_timeout_secs", self.join_timeout_secs, JOIN_TIMEOUT_SECS)
    }
}
