//! Welch power spectral density estimation.
//!
//! `SpectralProcessor` turns fixed-size sample blocks into one-sided PSD estimates:
//!
//! 1. Split the block into overlapping segments of `window_length` samples
//! 2. Optionally remove each segment's mean
//! 3. Apply the window and zero-pad to the next power of two
//! 4. Real FFT (plans cached, see [`FftPlanCache`])
//! 5. `PSD = |X(f)|² / (fs · Σw²)`, doubled for every bin except DC and Nyquist,
//!    averaged over segments
//!
//! With this scaling `Σ PSD · Δf` equals the mean-square value of the (detrended)
//! input, so a sinusoid of amplitude `A` integrates to `A²/2`.

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::coherence::{CoherenceConfig, CoherenceEstimator, CoherenceResult};
use super::fft::FftPlanCache;
use super::window::WindowType;

/// Errors produced while computing spectra. All of them are per-block and recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpectralError {
    /// Block shorter than one window.
    #[error("Insufficient data: need at least {required} samples, got {actual}")]
    InsufficientData {
        /// Window length
        required: usize,
        /// Samples supplied
        actual: usize,
    },

    /// NaN or infinite sample (for example a gap placeholder).
    #[error("Non-finite sample at index {index} on channel {channel}")]
    NonFiniteInput {
        /// Channel index
        channel: usize,
        /// Sample index within the block
        index: usize,
    },

    /// Channels of an aligned block differ in length.
    #[error("Channel {channel} has {actual} samples, expected {expected}")]
    LengthMismatch {
        /// Channel index
        channel: usize,
        /// Length of channel 0
        expected: usize,
        /// Length of this channel
        actual: usize,
    },

    /// Rejected configuration.
    #[error("Invalid spectral configuration: {0}")]
    InvalidConfig(String),

    /// The FFT backend refused the buffers it was given.
    #[error("FFT failed: {0}")]
    Transform(String),
}

/// Spectral processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Window applied to each segment
    pub window: WindowType,
    /// Samples per segment
    pub window_length: usize,
    /// Fraction of a segment shared with the next one, `0.0..=0.95`
    pub overlap_fraction: f64,
    /// Remove each segment's mean before windowing
    pub detrend: bool,
    /// Maximum number of cached FFT plans
    pub plan_cache_capacity: usize,
    /// Lower bound on `Σw²` and on coherence denominators
    pub energy_floor: f64,
    /// Cross-channel coherence
    pub coherence: CoherenceConfig,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            window: WindowType::Hann,
            window_length: 256,
            overlap_fraction: 0.5,
            detrend: true,
            plan_cache_capacity: 8,
            energy_floor: 1e-12,
            coherence: CoherenceConfig::default(),
        }
    }
}

impl SpectralConfig {
    /// Check the settings, reporting the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_length < 2 {
            return Err(format!(
                "window_length must be at least 2, got {}",
                self.window_length
            ));
        }
        crate::validation::is_in_range(self.overlap_fraction, 0.0..=0.95)
            .map_err(|e| format!("overlap_fraction {}: {}", self.overlap_fraction, e))?;
        self.window
            .validate()
            .map_err(|e| format!("window: {}", e))?;
        crate::validation::is_positive_finite(self.energy_floor)
            .map_err(|e| format!("energy_floor: {}", e))?;
        if self.coherence.enabled && self.coherence.history_segments == 0 {
            return Err("coherence.history_segments must be at least 1".to_string());
        }
        Ok(())
    }

    /// Transform length: next power of two at or above the window length.
    pub fn nfft(&self) -> usize {
        self.window_length.max(1).next_power_of_two()
    }

    /// Hop between segment starts.
    pub fn step(&self) -> usize {
        let overlap = (self.overlap_fraction * self.window_length as f64).round() as usize;
        self.window_length.saturating_sub(overlap).max(1)
    }
}

/// One-sided power spectrum of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralResult {
    /// Channel index
    pub channel: usize,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Transform length
    pub nfft: usize,
    /// Frequency axis in Hz, `nfft/2 + 1` ascending values
    pub frequencies: Vec<f64>,
    /// Power spectral density (units² / Hz), non-negative
    pub psd: Vec<f64>,
    /// Frequency of the largest non-DC bin (0 for a flat spectrum)
    pub peak_frequency: f64,
    /// PSD value at the peak
    pub peak_density: f64,
    /// Power-weighted mean frequency
    pub mean_frequency: f64,
    /// Power-weighted RMS spread around the mean frequency
    pub bandwidth: f64,
    /// `Σ PSD · Δf`
    pub total_power: f64,
    /// Bin spacing `fs / nfft`
    pub frequency_resolution: f64,
    /// Welch segments averaged
    pub segments: usize,
}

/// Spectra of every channel of an aligned block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralAnalysis {
    /// One result per channel, in channel order
    pub channels: Vec<SpectralResult>,
    /// Coherence per configured pair (empty when disabled or single channel)
    pub coherence: Vec<CoherenceResult>,
}

/// Windowed FFT / PSD processor with a cached plan set.
#[derive(Debug)]
pub struct SpectralProcessor {
    config: SpectralConfig,
    sample_rate: f64,
    window: Vec<f64>,
    window_energy: f64,
    plans: FftPlanCache,
    coherence: CoherenceEstimator,
}

impl SpectralProcessor {
    /// Create a processor for signals sampled at `sample_rate` Hz.
    pub fn new(sample_rate: f64, config: SpectralConfig) -> Result<Self, SpectralError> {
        crate::validation::is_positive_finite(sample_rate)
            .map_err(|e| SpectralError::InvalidConfig(format!("sample_rate: {}", e)))?;
        config.validate().map_err(SpectralError::InvalidConfig)?;

        let window = config.window.coefficients(config.window_length);
        let window_energy = window.iter().map(|w| w * w).sum();
        Ok(Self {
            plans: FftPlanCache::new(config.plan_cache_capacity),
            coherence: CoherenceEstimator::new(config.coherence.clone()),
            config,
            sample_rate,
            window,
            window_energy,
        })
    }

    /// Change window type, length and overlap. Plans stay cached; coherence restarts.
    pub fn configure(
        &mut self,
        window: WindowType,
        window_length: usize,
        overlap_fraction: f64,
    ) -> Result<(), SpectralError> {
        let candidate = SpectralConfig {
            window,
            window_length,
            overlap_fraction,
            ..self.config.clone()
        };
        candidate.validate().map_err(SpectralError::InvalidConfig)?;

        self.window = window.coefficients(window_length);
        self.window_energy = self.window.iter().map(|w| w * w).sum();
        self.config = candidate;
        self.coherence.reset();
        info!(
            window = window.name(),
            window_length,
            overlap_fraction,
            nfft = self.config.nfft(),
            "Spectral processor configured"
        );
        Ok(())
    }

    /// Settings in use.
    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// FFT plan cache (for hit/miss inspection).
    pub fn plan_cache(&self) -> &FftPlanCache {
        &self.plans
    }

    /// Frequency axis for the current transform length.
    pub fn frequencies(&self) -> Vec<f64> {
        let nfft = self.config.nfft();
        let resolution = self.sample_rate / nfft as f64;
        (0..=nfft / 2).map(|k| k as f64 * resolution).collect()
    }

    /// PSD of a single channel block.
    pub fn process_block(&mut self, samples: &[f64]) -> Result<SpectralResult, SpectralError> {
        let spectra = self.segment_spectra(0, samples)?;
        Ok(self.summarise(0, &spectra))
    }

    /// PSD of every channel plus cross-channel coherence.
    ///
    /// All channels must have the same length. Segment spectra are fed to the coherence
    /// history, so coherence estimates improve across successive calls.
    pub fn process_aligned<S: AsRef<[f64]>>(
        &mut self,
        channels: &[S],
    ) -> Result<SpectralAnalysis, SpectralError> {
        let expected = channels.first().map_or(0, |c| c.as_ref().len());
        let mut per_channel = Vec::with_capacity(channels.len());
        for (index, samples) in channels.iter().enumerate() {
            let samples = samples.as_ref();
            if samples.len() != expected {
                return Err(SpectralError::LengthMismatch {
                    channel: index,
                    expected,
                    actual: samples.len(),
                });
            }
            per_channel.push(self.segment_spectra(index, samples)?);
        }

        let results = per_channel
            .iter()
            .enumerate()
            .map(|(index, spectra)| self.summarise(index, spectra))
            .collect();

        let coherence = if self.config.coherence.enabled && channels.len() > 1 {
            let segments = per_channel.first().map_or(0, Vec::len);
            for segment in 0..segments {
                self.coherence.push_segment(
                    per_channel
                        .iter()
                        .map(|spectra| spectra[segment].clone())
                        .collect(),
                );
            }
            self.coherence
                .estimate(&self.frequencies(), self.config.energy_floor)
        } else {
            Vec::new()
        };

        Ok(SpectralAnalysis {
            channels: results,
            coherence,
        })
    }

    /// Windowed one-sided spectra of every Welch segment in `samples`.
    fn segment_spectra(
        &mut self,
        channel: usize,
        samples: &[f64],
    ) -> Result<Vec<Vec<Complex<f64>>>, SpectralError> {
        let window_length = self.config.window_length;
        if samples.len() < window_length {
            return Err(SpectralError::InsufficientData {
                required: window_length,
                actual: samples.len(),
            });
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(SpectralError::NonFiniteInput { channel, index });
        }

        let nfft = self.config.nfft();
        let step = self.config.step();
        let segments = (samples.len() - window_length) / step + 1;
        let mut padded = vec![0.0; nfft];

        (0..segments)
            .map(|s| {
                let segment = &samples[s * step..s * step + window_length];
                let mean = if self.config.detrend {
                    segment.iter().sum::<f64>() / window_length as f64
                } else {
                    0.0
                };
                for ((slot, &x), &w) in padded.iter_mut().zip(segment).zip(&self.window) {
                    *slot = (x - mean) * w;
                }
                self.plans.real_forward(&padded)
            })
            .collect()
    }

    /// Average segment spectra into a PSD and derive the scalar summary.
    fn summarise(&self, channel: usize, spectra: &[Vec<Complex<f64>>]) -> SpectralResult {
        let nfft = self.config.nfft();
        let bins = nfft / 2 + 1;
        let resolution = self.sample_rate / nfft as f64;
        let scale = 1.0
            / (self.sample_rate
                * self.window_energy.max(self.config.energy_floor)
                * spectra.len().max(1) as f64);

        let psd: Vec<f64> = (0..bins)
            .map(|k| {
                let power: f64 = spectra.iter().map(|x| x[k].norm_sqr()).sum();
                let one_sided = if k == 0 || (nfft % 2 == 0 && k == nfft / 2) {
                    1.0
                } else {
                    2.0
                };
                power * scale * one_sided
            })
            .collect();
        let frequencies: Vec<f64> = (0..bins).map(|k| k as f64 * resolution).collect();

        let total = psd.iter().sum::<f64>();
        let total_power = total * resolution;

        let (peak_bin, peak_density) = psd
            .iter()
            .copied()
            .enumerate()
            .skip(1)
            .fold((0, 0.0), |best, (k, p)| if p > best.1 { (k, p) } else { best });
        let significant = total > self.config.energy_floor;

        let mean_frequency = if significant {
            frequencies.iter().zip(&psd).map(|(f, p)| f * p).sum::<f64>() / total
        } else {
            0.0
        };
        let bandwidth = if significant {
            (frequencies
                .iter()
                .zip(&psd)
                .map(|(f, p)| (f - mean_frequency).powi(2) * p)
                .sum::<f64>()
                / total)
                .sqrt()
        } else {
            0.0
        };

        debug!(
            channel,
            segments = spectra.len(),
            peak_hz = peak_bin as f64 * resolution,
            "Spectrum computed"
        );

        SpectralResult {
            channel,
            sample_rate: self.sample_rate,
            nfft,
            peak_frequency: if significant {
                peak_bin as f64 * resolution
            } else {
                0.0
            },
            peak_density,
            mean_frequency,
            bandwidth,
            total_power,
            frequency_resolution: resolution,
            segments: spectra.len(),
            frequencies,
            psd,
        }
    }
}
