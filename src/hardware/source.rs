//! Frame source contract between hardware backends and the orchestrator.
//!
//! A backend delivers one frame (one sample per channel) per sample period through
//! [`FrameSource::poll_frame`]. The orchestrator's producer thread is the only caller
//! and never branches on which backend it is talking to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::simulated::{SimulatedConfig, SimulatedWaveSource};
use crate::error::{AppResult, DaqError};

/// Errors reported by a frame source. All of them end the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Device went away mid-session.
    #[error("Device disconnected: {0}")]
    Disconnected(String),

    /// Device stopped answering.
    #[error("Device timed out: {0}")]
    Timeout(String),

    /// Source produced a frame of the wrong width.
    #[error("Frame has {actual} channels, expected {expected}")]
    FrameWidth {
        /// Channels configured
        expected: usize,
        /// Channels delivered
        actual: usize,
    },

    /// Any other device-reported failure.
    #[error("Device error: {0}")]
    Device(String),
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePoll {
    /// The frame buffer was filled with a new frame.
    Ready,
    /// No frame is due yet; poll again later.
    Pending,
    /// The source is exhausted; the session should stop.
    Finished,
}

/// Narrow producer-side interface every backend implements.
pub trait FrameSource: Send {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Channels per frame.
    fn channel_count(&self) -> usize;

    /// Nominal frames per second.
    fn sample_rate(&self) -> f64;

    /// Prepare the device. Called once on the producer thread before polling.
    fn open(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    /// Write the next frame into `frame` (length [`channel_count`](Self::channel_count)).
    fn poll_frame(&mut self, frame: &mut [f64]) -> Result<FramePoll, HardwareError>;

    /// Release the device. Called once on the producer thread after the last poll.
    fn close(&mut self) {}
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Synthetic wave field
    Simulated(SimulatedConfig),
    /// USB data acquisition card
    UsbDaq {
        /// Device identifier
        device: String,
    },
    /// Networked acquisition unit
    NetworkDaq {
        /// Host and port
        address: String,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Simulated(SimulatedConfig::default())
    }
}

impl SourceConfig {
    /// Backend name as used in configuration files.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Simulated(_) => "simulated",
            SourceConfig::UsbDaq { .. } => "usb_daq",
            SourceConfig::NetworkDaq { .. } => "network_daq",
        }
    }
}

/// Build the configured backend for `channels` channels at `sample_rate` Hz.
///
/// `probe_offsets` places the simulated wave field; channels beyond the listed offsets
/// sit at x = 0.
pub fn build_source(
    config: &SourceConfig,
    channels: usize,
    sample_rate: f64,
    probe_offsets: &[f64],
) -> AppResult<Box<dyn FrameSource>> {
    match config {
        SourceConfig::Simulated(simulated) => Ok(Box::new(SimulatedWaveSource::new(
            simulated.clone(),
            channels,
            sample_rate,
            probe_offsets,
        )?)),
        SourceConfig::UsbDaq { .. } | SourceConfig::NetworkDaq { .. } => {
            Err(DaqError::FeatureNotEnabled(config.kind().to_string()))
        }
    }
}
