//! Configuration management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Background sources
    #[serde(default)]
    pub background: BackgroundConfig,

    /// Frame pump configuration
    #[serde(default)]
    pub display: DisplayConfig,

    /// Metrics poller configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Background source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Static background image path; empty for none
    #[serde(default)]
    pub image: String,

    /// Video background path; empty for none
    #[serde(default)]
    pub video: String,

    /// Playback mode for preloaded clips: "loop" or "bounce"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Target playback frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            video: String::new(),
            mode: default_mode(),
            fps: default_fps(),
        }
    }
}

/// Frame pump configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Interval between frame uploads in milliseconds
    #[serde(default = "default_refresh")]
    pub refresh: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh: default_refresh(),
        }
    }
}

/// Metrics poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Fast sample interval in seconds (CPU load/temp/freq, GPU)
    #[serde(default = "default_fast")]
    pub fast: f64,

    /// Slow sample interval in seconds (CPU count, disk, memory)
    #[serde(default = "default_slow")]
    pub slow: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast(),
            slow: default_slow(),
        }
    }
}

// Default value functions
fn default_mode() -> String {
    "loop".to_string()
}

fn default_fps() -> u32 {
    24
}

fn default_refresh() -> u64 {
    40 // ~25 Hz, fast enough that the panel never times out
}

fn default_fast() -> f64 {
    0.2
}

fn default_slow() -> f64 {
    2.5
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.background.mode, "loop");
        assert_eq!(config.background.fps, 24);
        assert_eq!(config.display.refresh, 40);
        assert_eq!(config.metrics.fast, 0.2);
        assert_eq!(config.metrics.slow, 2.5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [background]
            video = "/tmp/clip.mp4"
            mode = "bounce"
            "#,
        )
        .unwrap();
        assert_eq!(config.background.video, "/tmp/clip.mp4");
        assert_eq!(config.background.mode, "bounce");
        assert_eq!(config.background.fps, 24);
        assert_eq!(config.display.refresh, 40);
    }
}
