//! Acquisition configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `WAVE_DAQ_`, nested keys separated by `__`
//!    (for example `WAVE_DAQ_BUFFER__CAPACITY=4096`)
//!
//! Durations are written in humantime form (`"5ms"`, `"2s"`). Every section has
//! defaults, so an empty file describes a 4-channel, 100 Hz simulated session.
//!
//! # Example
//! ```no_run
//! use wave_daq::config::AcquisitionConfig;
//!
//! let config = AcquisitionConfig::from_file("config/acquisition.toml")?;
//! config.validate()?;
//! println!("Session: {}", config.session.name);
//! # Ok::<(), wave_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::data::OverflowPolicy;
use crate::error::{AppResult, DaqError};
use crate::hardware::SourceConfig;
use crate::logging::OutputFormat;
use crate::spectral::SpectralConfig;
use crate::wave::WaveConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "WAVE_DAQ_";

/// Top-level acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Session identification and logging
    pub session: SessionConfig,
    /// Buffer geometry and overflow policy
    pub buffer: BufferConfig,
    /// Spectral stage settings
    pub spectral: SpectralConfig,
    /// Wave separation stage settings (stage disabled when absent)
    pub wave: Option<WaveConfig>,
    /// Thread timing and frame source
    pub orchestrator: OrchestratorConfig,
}

/// Session-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session name used in logs and summaries
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "wave-session".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of channels (probes)
    pub channels: usize,
    /// Frames per second
    pub sample_rate: f64,
    /// Samples per channel; must be a power of two
    pub capacity: usize,
    /// Behaviour when a channel is full
    pub overflow_policy: OverflowPolicy,
    /// Samples per channel handed to each processing stage
    pub block_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            channels: 4,
            sample_rate: 100.0,
            capacity: 1024,
            overflow_policy: OverflowPolicy::default(),
            block_size: 256,
        }
    }
}

/// Orchestrator timing and source selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Sleep between polls when no frame or block is ready
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on draining buffered data after stop
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
    /// Interval between published buffer statistics
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
    /// Frame source backend
    pub source: SourceConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            drain_timeout: Duration::from_secs(2),
            stats_interval: Duration::from_secs(1),
            source: SourceConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    /// Load configuration from a TOML file merged with `WAVE_DAQ_` environment variables.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path).extract().map_err(DaqError::from)
    }

    /// Figment used by [`from_file`](Self::from_file): the file, then the environment.
    /// Missing keys take their defaults.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(DaqError::from)
    }

    /// Read cursors needed: one for the spectral stage, one more for the wave stage.
    pub fn consumer_count(&self) -> usize {
        if self.wave.is_some() {
            2
        } else {
            1
        }
    }

    /// Along-flume position of every channel (0 for channels that are not probes).
    pub fn channel_offsets(&self) -> Vec<f64> {
        let mut offsets = vec![0.0; self.buffer.channels];
        if let Some(wave) = &self.wave {
            for (channel, x) in wave
                .resolved_probe_channels()
                .into_iter()
                .zip(wave.geometry.offsets())
            {
                if let Some(slot) = offsets.get_mut(channel) {
                    *slot = x;
                }
            }
        }
        offsets
    }

    /// Validate configuration after loading, reporting the first problem.
    pub fn validate(&self) -> AppResult<()> {
        self.check().map_err(DaqError::Configuration)
    }

    fn check(&self) -> Result<(), String> {
        crate::logging::parse_log_level(&self.session.log_level)?;
        crate::validation::is_not_empty(&self.session.name)
            .map_err(|e| format!("session.name: {}", e))?;

        let buffer = &self.buffer;
        if buffer.channels == 0 {
            return Err("buffer.channels must be at least 1".to_string());
        }
        crate::validation::is_positive_finite(buffer.sample_rate)
            .map_err(|e| format!("buffer.sample_rate {}: {}", buffer.sample_rate, e))?;
        crate::validation::is_power_of_two(buffer.capacity)
            .map_err(|e| format!("buffer.capacity {}: {}", buffer.capacity, e))?;
        crate::validation::is_in_range(buffer.block_size, 1..=buffer.capacity).map_err(|e| {
            format!(
                "buffer.block_size {} (capacity {}): {}",
                buffer.block_size, buffer.capacity, e
            )
        })?;

        self.spectral
            .validate()
            .map_err(|e| format!("spectral: {}", e))?;
        if buffer.block_size < self.spectral.window_length {
            return Err(format!(
                "buffer.block_size {} is shorter than spectral.window_length {}",
                buffer.block_size, self.spectral.window_length
            ));
        }
        for &(a, b) in &self.spectral.coherence.pairs {
            if a >= buffer.channels || b >= buffer.channels {
                return Err(format!(
                    "spectral.coherence pair ({}, {}) refers to a missing channel",
                    a, b
                ));
            }
        }

        if let Some(wave) = &self.wave {
            wave.validate(buffer.channels, buffer.sample_rate)
                .map_err(|e| format!("wave: {}", e))?;
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.poll_interval.is_zero() {
            return Err("orchestrator.poll_interval must be non-zero".to_string());
        }
        if orchestrator.stats_interval.is_zero() {
            return Err("orchestrator.stats_interval must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::WindowType;
    use crate::wave::ProbeGeometry;

    fn with_wave() -> AcquisitionConfig {
        AcquisitionConfig {
            wave: Some(WaveConfig::new(
                ProbeGeometry::from_offsets(&[0.0, 0.31, 0.74, 1.17]).unwrap(),
            )),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AcquisitionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consumer_count(), 1);
        assert!(with_wave().validate().is_ok());
        assert_eq!(with_wave().consumer_count(), 2);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AcquisitionConfig::default();
        config.session.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(msg)) if msg.contains("log level")
        ));
    }

    #[test]
    fn test_capacity_must_be_power_of_two() {
        let mut config = AcquisitionConfig::default();
        config.buffer.capacity = 1000;
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(msg)) if msg.contains("buffer.capacity")
        ));
    }

    #[test]
    fn test_block_must_fit_window_and_capacity() {
        let mut config = AcquisitionConfig::default();
        config.buffer.block_size = 2048;
        assert!(config.validate().is_err());

        let mut config = AcquisitionConfig::default();
        config.buffer.block_size = 128;
        assert!(config.validate().is_err());
        config.spectral.window_length = 128;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probe_channel_mismatch() {
        let mut config = with_wave();
        config.buffer.channels = 3;
        assert!(config.validate().is_err());

        let mut config = with_wave();
        config.buffer.channels = 6;
        if let Some(wave) = config.wave.as_mut() {
            wave.probe_channels = vec![5, 4, 3, 2];
        }
        assert!(config.validate().is_ok());
        assert_eq!(config.channel_offsets(), vec![0.0, 0.0, 1.17, 0.74, 0.31, 0.0]);
    }

    #[test]
    fn test_coherence_pairs_checked() {
        let mut config = AcquisitionConfig::default();
        config.spectral.coherence.pairs = vec![(0, 4)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_sections() {
        let config = AcquisitionConfig::from_toml_str(
            r#"
            [session]
            name = "flume-a"

            [buffer]
            channels = 4
            capacity = 2048
            overflow_policy = "overwrite_oldest"

            [spectral]
            window_length = 128

            [spectral.window]
            type = "kaiser"
            beta = 8.6

            [wave]
            depth = 0.8
            max_frequency = 2.5
            geometry = [{ x = 0.0 }, { x = 0.3 }, { x = 0.7 }, { x = 1.2 }]

            [orchestrator]
            poll_interval = "5ms"
            drain_timeout = "500ms"

            [orchestrator.source]
            kind = "simulated"
            frame_limit = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.session.name, "flume-a");
        assert_eq!(config.session.log_level, "info");
        assert_eq!(config.buffer.capacity, 2048);
        assert_eq!(config.buffer.overflow_policy, OverflowPolicy::OverwriteOldest);
        assert_eq!(config.spectral.window, WindowType::Kaiser { beta: 8.6 });
        assert_eq!(config.orchestrator.poll_interval, Duration::from_millis(5));
        assert_eq!(config.orchestrator.drain_timeout, Duration::from_millis(500));
        let wave = config.wave.as_ref().unwrap();
        assert_eq!(wave.geometry.len(), 4);
        assert_eq!(wave.window, WindowType::Rectangular);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unparseable_toml_is_a_config_error() {
        assert!(matches!(
            AcquisitionConfig::from_toml_str("[buffer]\ncapacity = \"big\""),
            Err(DaqError::Config(_))
        ));
    }
}
