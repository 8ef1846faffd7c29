use std::time::Duration;

use tokio::time::Instant;

/// Simulated playback position, driven by wall time.
///
/// Playback never moves past the buffered media: without data the clock
/// stalls until the buffer catches up.
pub struct PlaybackClock {
    position: Duration,
    speed: f64,
    last_tick: Instant,
    stalled: bool,
}

impl PlaybackClock {
    pub fn new(position: Duration, speed: f64) -> Self {
        Self {
            position,
            speed,
            last_tick: Instant::now(),
            stalled: false,
        }
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn tick(&mut self, buffered_until: Duration) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last_tick;
        self.last_tick = now;
        self.advance(elapsed, buffered_until)
    }

    fn advance(&mut self, elapsed: Duration, buffered_until: Duration) -> Duration {
        let target = self.position + elapsed.mul_f64(self.speed);
        let stalled = target > buffered_until;
        if stalled && !self.stalled {
            tracing::warn!("Playback stalled at {:?}", buffered_until.max(self.position));
        } else if !stalled && self.stalled {
            tracing::info!("Playback resumed at {:?}", self.position);
        }
        self.stalled = stalled;

        self.position = target.min(buffered_until).max(self.position);
        self.position
    }
}
