use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::ThroughputConfig;

/// Produce bandwidth estimates based on two exponential moving averages, one
/// evolving slow and the other evolving fast.
///
/// The minimum of both is used, so a sudden fall in bandwidth has an immediate
/// impact on estimates while a raise is only trusted once it lasted long enough.
///
/// One estimator is usually shared by all streams of a session.
#[derive(Debug)]
pub struct ThroughputEstimator {
    config: ThroughputConfig,
    averages: Mutex<Averages>,
}

#[derive(Debug, Clone, Copy)]
struct Averages {
    slow: f64,
    fast: f64,
}

impl ThroughputEstimator {
    pub fn new(config: ThroughputConfig) -> Self {
        let averages = Averages {
            slow: config.initial_slow_bps,
            fast: config.initial_fast_bps,
        };
        Self {
            config,
            averages: Mutex::new(averages),
        }
    }

    fn averages(&self) -> MutexGuard<'_, Averages> {
        self.averages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed a completed transfer of `size` bytes which took `elapsed`.
    pub fn observe(&self, size: usize, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }

        let bandwidth = 8. * size as f64 / elapsed.as_secs_f64();
        let slow = self.config.slow_coefficient;
        let fast = self.config.fast_coefficient;

        let mut averages = self.averages();
        averages.slow = slow * averages.slow + (1. - slow) * bandwidth;
        averages.fast = fast * averages.fast + (1. - fast) * bandwidth;
    }

    /// Current estimate in bits per second.
    pub fn estimate(&self) -> f64 {
        let averages = self.averages();
        averages.slow.min(averages.fast)
    }

    pub fn reset(&self) {
        *self.averages() = Averages {
            slow: self.config.initial_slow_bps,
            fast: self.config.initial_fast_bps,
        };
    }
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new(ThroughputConfig::default())
    }
}
