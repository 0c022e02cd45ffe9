//! Simulated Hardware Implementations
//!
//! Frame sources that need no physical device:
//!
//! - `SimulatedWaveSource` - synthetic wave field sampled at each probe position
//! - `ReplaySource` - plays back a recorded set of frames
//!
//! The simulated wave field is a sum of progressive linear waves travelling in +x,
//! each optionally paired with a reflected wave travelling in -x:
//!
//! ```text
//! η(x, t) = Σ Aᵢ·[cos(ωᵢt − kᵢx) + Kr·cos(ωᵢt + kᵢx)] + noise
//! ```
//!
//! with `kᵢ` from the dispersion relation at the configured depth.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::source::{FramePoll, FrameSource, HardwareError};
use crate::error::{AppResult, DaqError};
use crate::wave::DispersionSolver;

/// One regular wave in the simulated field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveComponent {
    /// Frequency in Hz
    pub frequency: f64,
    /// Incident amplitude in m
    pub amplitude: f64,
}

/// Settings of the simulated backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Regular wave components
    pub components: Vec<WaveComponent>,
    /// Reflected amplitude as a fraction of the incident amplitude
    pub reflection_coefficient: f64,
    /// Still-water depth in m
    pub depth: f64,
    /// Half-width of uniform noise added to every sample
    pub noise_amplitude: f64,
    /// Noise generator seed
    pub seed: u64,
    /// Release frames at the sample rate instead of as fast as they are polled
    pub realtime: bool,
    /// Finish after this many frames
    pub frame_limit: Option<u64>,
    /// Report a disconnect after this many frames
    pub fail_after: Option<u64>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            components: vec![WaveComponent {
                frequency: 0.5,
                amplitude: 1.0,
            }],
            reflection_coefficient: 0.0,
            depth: 1.0,
            noise_amplitude: 0.0,
            seed: 42,
            realtime: false,
            frame_limit: None,
            fail_after: None,
        }
    }
}

/// Synthetic wave-probe array.
#[derive(Debug)]
pub struct SimulatedWaveSource {
    config: SimulatedConfig,
    channels: usize,
    sample_rate: f64,
    offsets: Vec<f64>,
    /// (ω, k, A) per component
    components: Vec<(f64, f64, f64)>,
    rng: StdRng,
    frames: u64,
    started: Option<Instant>,
}

impl SimulatedWaveSource {
    /// Create a source of `channels` probes; channel `c` sits at `probe_offsets[c]`
    /// (0 when not listed).
    pub fn new(
        config: SimulatedConfig,
        channels: usize,
        sample_rate: f64,
        probe_offsets: &[f64],
    ) -> AppResult<Self> {
        if channels == 0 {
            return Err(DaqError::Configuration(
                "simulated source needs at least one channel".into(),
            ));
        }
        crate::validation::is_positive_finite(sample_rate)
            .map_err(|e| DaqError::Configuration(format!("sample_rate: {}", e)))?;
        crate::validation::is_positive_finite(config.depth)
            .map_err(|e| DaqError::Configuration(format!("simulated depth: {}", e)))?;
        if !(config.noise_amplitude.is_finite() && config.noise_amplitude >= 0.0) {
            return Err(DaqError::Configuration(format!(
                "noise_amplitude must be finite and non-negative, got {}",
                config.noise_amplitude
            )));
        }

        let solver = DispersionSolver::default();
        let components = config
            .components
            .iter()
            .map(|c| {
                let k = solver.wavenumber(c.frequency, config.depth)?;
                Ok((2.0 * PI * c.frequency, k, c.amplitude))
            })
            .collect::<AppResult<Vec<_>>>()?;

        let offsets = (0..channels)
            .map(|c| probe_offsets.get(c).copied().unwrap_or(0.0))
            .collect();

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            channels,
            sample_rate,
            offsets,
            components,
            frames: 0,
            started: None,
        })
    }

    /// Frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.frames
    }

    fn elevation(&self, x: f64, t: f64) -> f64 {
        let kr = self.config.reflection_coefficient;
        self.components
            .iter()
            .map(|&(omega, k, amplitude)| {
                amplitude * ((omega * t - k * x).cos() + kr * (omega * t + k * x).cos())
            })
            .sum()
    }
}

impl FrameSource for SimulatedWaveSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn open(&mut self) -> Result<(), HardwareError> {
        self.started = Some(Instant::now());
        info!(
            channels = self.channels,
            sample_rate = self.sample_rate,
            components = self.components.len(),
            realtime = self.config.realtime,
            "Simulated wave source opened"
        );
        Ok(())
    }

    fn poll_frame(&mut self, frame: &mut [f64]) -> Result<FramePoll, HardwareError> {
        if let Some(limit) = self.config.fail_after {
            if self.frames >= limit {
                warn!(frames = self.frames, "Simulated disconnect");
                return Err(HardwareError::Disconnected(format!(
                    "simulated disconnect after {} frames",
                    limit
                )));
            }
        }
        if let Some(limit) = self.config.frame_limit {
            if self.frames >= limit {
                return Ok(FramePoll::Finished);
            }
        }
        if frame.len() != self.channels {
            return Err(HardwareError::FrameWidth {
                expected: self.channels,
                actual: frame.len(),
            });
        }
        if self.config.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = Duration::from_secs_f64(self.frames as f64 / self.sample_rate);
            if started.elapsed() < due {
                return Ok(FramePoll::Pending);
            }
        }

        let t = self.frames as f64 / self.sample_rate;
        let noise = self.config.noise_amplitude;
        for (c, slot) in frame.iter_mut().enumerate() {
            let mut value = self.elevation(self.offsets[c], t);
            if noise > 0.0 {
                value += self.rng.gen_range(-noise..=noise);
            }
            *slot = value;
        }
        self.frames += 1;
        Ok(FramePoll::Ready)
    }

    fn close(&mut self) {
        debug!(frames = self.frames, "Simulated wave source closed");
    }
}

/// Plays back recorded frames once, then finishes.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    frames: Vec<Vec<f64>>,
    channels: usize,
    sample_rate: f64,
    position: usize,
}

impl ReplaySource {
    /// Source over frame-major data (`frames[i][channel]`).
    pub fn new(sample_rate: f64, frames: Vec<Vec<f64>>) -> Result<Self, HardwareError> {
        let channels = frames.first().map_or(0, Vec::len);
        if let Some(bad) = frames.iter().find(|f| f.len() != channels) {
            return Err(HardwareError::FrameWidth {
                expected: channels,
                actual: bad.len(),
            });
        }
        Ok(Self {
            frames,
            channels,
            sample_rate,
            position: 0,
        })
    }

    /// Source over channel-major data (`channels[channel][i]`), truncated to the
    /// shortest channel.
    pub fn from_channels(sample_rate: f64, channels: &[Vec<f64>]) -> Self {
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        let frames = (0..len)
            .map(|i| channels.iter().map(|c| c[i]).collect())
            .collect();
        Self {
            frames,
            channels: channels.len(),
            sample_rate,
            position: 0,
        }
    }

    /// Frames not yet delivered.
    pub fn remaining(&self) -> usize {
        self.frames.len() - self.position
    }
}

impl FrameSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn poll_frame(&mut self, frame: &mut [f64]) -> Result<FramePoll, HardwareError> {
        let Some(next) = self.frames.get(self.position) else {
            return Ok(FramePoll::Finished);
        };
        if frame.len() != next.len() {
            return Err(HardwareError::FrameWidth {
                expected: frame.len(),
                actual: next.len(),
            });
        }
        frame.copy_from_slice(next);
        self.position += 1;
        Ok(FramePoll::Ready)
    }
}
