use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::constants::{DRAIN_POLL_MS, PACKET_SAMPLES, PIPE_CAPACITY, SAMPLE_RATE};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz. Must be an Opus-supported rate.
    pub sample_rate: u32,
    /// Samples per mixed packet (mono). Must be a valid Opus frame size for
    /// the configured rate; the default is 20 ms at 48 kHz.
    pub packet_samples: usize,
    /// Byte pipe capacity between the transcoder process and the decoder.
    pub pipe_capacity: usize,
    /// Poll interval for drain-before-release waits, in milliseconds.
    pub drain_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            packet_samples: PACKET_SAMPLES,
            pipe_capacity: PIPE_CAPACITY,
            drain_poll_ms: DRAIN_POLL_MS,
        }
    }
}

impl EngineConfig {
    /// Duration of one mixed packet, which is also the tick interval.
    pub fn packet_duration(&self) -> Duration {
        Duration::from_secs_f64(self.packet_samples as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Executable used to transcode remote streams, resolved via `PATH` when
    /// not an absolute path.
    pub path: String,
    /// Container format the transcoder emits on its standard output.
    pub format: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            path: "ffmpeg".to_string(),
            format: "mp3".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub filters: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_str = std::fs::read_to_string(path).unwrap_or_else(|_| "".to_string());
        if config_str.is_empty() {
            return Err("config file not found or empty".into());
        }
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_20ms_packets() {
        let config = EngineConfig::default();
        assert_eq!(config.packet_duration(), Duration::from_millis(20));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            packet_samples = 480

            [transcoder]
            path = "/usr/local/bin/ffmpeg"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.packet_samples, 480);
        assert_eq!(config.engine.sample_rate, SAMPLE_RATE);
        assert_eq!(config.transcoder.path, "/usr/local/bin/ffmpeg");
        assert_eq!(config.transcoder.format, "mp3");
    }
}
