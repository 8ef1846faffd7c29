use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tsumugi::TsumugiConfig;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub engine: TsumugiConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Interval between two playback position updates.
    pub tick_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
        }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Config {
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let Some(file) = file else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(file)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let config = toml::from_str(data)?;
        Ok(config)
    }
}
