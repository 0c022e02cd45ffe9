//! Incident/reflected wave separation and derived statistics.
//!
//! The analyzer takes one aligned block per probe, transforms each to the frequency
//! domain and applies the cached per-bin pseudo-inverse (see [`GeometryMatrices`]) to
//! recover the complex incident and reflected amplitudes. From the incident and reflected
//! spectra it derives the usual scalar wave statistics:
//!
//! | statistic | definition |
//! |---|---|
//! | `H_m0` | `4·√m0` |
//! | `Tp` | `1 / f_peak` |
//! | `Tm01` | `m0 / m1` |
//! | `Tm02` | `√(m0 / m2)` |
//! | `ν` | `√(m0·m2 / m1² − 1)` |
//! | `Kr` | `√(m0_R / m0_I)` |
//!
//! where `m_n = Σ fⁿ·S(f)·Δf` over the valid bins only. Bins whose dispersion solve
//! failed or whose probe matrix is ill-conditioned are excluded and reported, never
//! replaced by zeros.

use std::sync::Arc;

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::dispersion::DispersionConfig;
use super::geometry::{
    ExclusionReason, GeometryCache, GeometryError, GeometryKey, GeometryMatrices, MatrixParams,
    ProbeGeometry,
};
use super::svd::SvdConfig;
use crate::spectral::{FftPlanCache, SpectralError, WindowType};

/// Per-block analysis failures. All are recoverable; the next block may succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaveAnalysisError {
    /// Number of channel blocks differs from the probe count.
    #[error("Expected {expected} probe blocks, got {actual}")]
    ProbeCountMismatch {
        /// Probes in the geometry
        expected: usize,
        /// Blocks supplied
        actual: usize,
    },

    /// Probe blocks differ in length.
    #[error("Probe {probe} block has {actual} samples, expected {expected}")]
    LengthMismatch {
        /// Probe index
        probe: usize,
        /// Length of probe 0
        expected: usize,
        /// Length of this probe
        actual: usize,
    },

    /// Block too short to contain any non-DC bin.
    #[error("Insufficient data: need at least {required} samples, got {actual}")]
    InsufficientData {
        /// Minimum block length
        required: usize,
        /// Samples supplied
        actual: usize,
    },

    /// NaN or infinite sample (for example a gap placeholder).
    #[error("Non-finite sample at index {index} on probe {probe}")]
    NonFiniteInput {
        /// Probe index
        probe: usize,
        /// Sample index
        index: usize,
    },

    /// Every in-band bin was excluded.
    #[error("No valid frequency bins ({excluded} excluded)")]
    NoValidBins {
        /// Excluded bins
        excluded: usize,
    },

    /// Invalid probe layout.
    #[error("Invalid probe geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// Rejected configuration.
    #[error("Invalid wave analysis configuration: {0}")]
    InvalidConfig(String),

    /// FFT execution failed.
    #[error("Transform failed: {0}")]
    Transform(#[from] SpectralError),
}

fn default_depth() -> f64 {
    1.0
}

fn default_window() -> WindowType {
    WindowType::Rectangular
}

fn default_true() -> bool {
    true
}

fn default_max_condition_number() -> f64 {
    1e3
}

fn default_geometry_cache_capacity() -> usize {
    8
}

/// Wave separation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveConfig {
    /// Probe layout, in probe order
    pub geometry: ProbeGeometry,
    /// Buffer channel feeding each probe; empty means channels `0..probes`
    #[serde(default)]
    pub probe_channels: Vec<usize>,
    /// Still-water depth in m
    #[serde(default = "default_depth")]
    pub depth: f64,
    /// Lowest analysed frequency in Hz
    #[serde(default)]
    pub min_frequency: f64,
    /// Highest analysed frequency in Hz (Nyquist when unset)
    #[serde(default)]
    pub max_frequency: Option<f64>,
    /// Window applied to each probe block
    #[serde(default = "default_window")]
    pub window: WindowType,
    /// Remove each probe block's mean before the transform
    #[serde(default = "default_true")]
    pub detrend: bool,
    /// Dispersion solver settings
    #[serde(default)]
    pub dispersion: DispersionConfig,
    /// SVD settings
    #[serde(default)]
    pub svd: SvdConfig,
    /// Bins whose probe matrix exceeds this condition number are excluded
    #[serde(default = "default_max_condition_number")]
    pub max_condition_number: f64,
    /// Maximum number of cached layouts
    #[serde(default = "default_geometry_cache_capacity")]
    pub geometry_cache_capacity: usize,
    /// Reconstruct incident and reflected time series at the first probe
    #[serde(default)]
    pub reconstruct_time_series: bool,
}

impl WaveConfig {
    /// Settings with defaults for everything but the layout.
    pub fn new(geometry: ProbeGeometry) -> Self {
        Self {
            geometry,
            probe_channels: Vec::new(),
            depth: default_depth(),
            min_frequency: 0.0,
            max_frequency: None,
            window: default_window(),
            detrend: true,
            dispersion: DispersionConfig::default(),
            svd: SvdConfig::default(),
            max_condition_number: default_max_condition_number(),
            geometry_cache_capacity: default_geometry_cache_capacity(),
            reconstruct_time_series: false,
        }
    }

    /// Buffer channel for each probe.
    pub fn resolved_probe_channels(&self) -> Vec<usize> {
        if self.probe_channels.is_empty() {
            (0..self.geometry.len()).collect()
        } else {
            self.probe_channels.clone()
        }
    }

    /// Check the settings against a buffer of `channels` channels sampled at `sample_rate`.
    pub fn validate(&self, channels: usize, sample_rate: f64) -> Result<(), String> {
        crate::validation::is_positive_finite(self.depth)
            .map_err(|e| format!("depth: {}", e))?;
        let probe_channels = self.resolved_probe_channels();
        if probe_channels.len() != self.geometry.len() {
            return Err(format!(
                "probe_channels lists {} channels but the geometry has {} probes",
                probe_channels.len(),
                self.geometry.len()
            ));
        }
        if let Some(&channel) = probe_channels.iter().find(|&&c| c >= channels) {
            return Err(format!(
                "probe channel {} does not exist (buffer has {} channels)",
                channel, channels
            ));
        }
        crate::validation::is_unique(&probe_channels)
            .map_err(|e| format!("probe_channels: {}", e))?;
        if !(self.min_frequency.is_finite() && self.min_frequency >= 0.0) {
            return Err(format!(
                "min_frequency must be finite and non-negative, got {}",
                self.min_frequency
            ));
        }
        let max_frequency = self.max_frequency.unwrap_or(sample_rate / 2.0);
        if !(max_frequency > self.min_frequency) {
            return Err(format!(
                "max_frequency {} must exceed min_frequency {}",
                max_frequency, self.min_frequency
            ));
        }
        self.window
            .validate()
            .map_err(|e| format!("window: {}", e))?;
        self.dispersion
            .validate()
            .map_err(|e| format!("dispersion: {}", e))?;
        self.svd.validate().map_err(|e| format!("svd: {}", e))?;
        if !(self.max_condition_number >= 1.0) {
            return Err(format!(
                "max_condition_number must be at least 1, got {}",
                self.max_condition_number
            ));
        }
        Ok(())
    }
}

/// Scalar wave statistics of one analysed block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WaveStatistics {
    /// Incident significant wave height `4·√m0` in m
    pub incident_hm0: f64,
    /// Reflected significant wave height in m
    pub reflected_hm0: f64,
    /// Reflection coefficient `√(m0_R / m0_I)`
    pub reflection_coefficient: f64,
    /// Incident peak period in s (0 when the spectrum is empty)
    pub peak_period: f64,
    /// Incident mean period `m0/m1` in s
    pub mean_period: f64,
    /// Incident zero-crossing period `√(m0/m2)` in s
    pub zero_crossing_period: f64,
    /// Incident spectral width parameter ν
    pub spectral_width: f64,
}

/// A bin left out of the separation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedBin {
    /// FFT bin index
    pub bin: usize,
    /// Bin frequency in Hz
    pub frequency: f64,
    /// Why it was excluded
    pub reason: ExclusionReason,
}

/// Separated spectra and statistics for one block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveDecompositionResult {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Samples per probe block (also the transform length)
    pub block_length: usize,
    /// Frequencies of the valid bins in Hz, ascending
    pub frequencies: Vec<f64>,
    /// Incident spectral density at each valid bin (m²/Hz)
    pub incident_spectrum: Vec<f64>,
    /// Reflected spectral density at each valid bin (m²/Hz)
    pub reflected_spectrum: Vec<f64>,
    /// In-band bins that were excluded
    pub excluded_bins: Vec<ExcludedBin>,
    /// Derived statistics over the valid bins
    pub statistics: WaveStatistics,
    /// Incident elevation at the first probe (windowed, detrended block)
    pub incident_series: Option<Vec<f64>>,
    /// Reflected elevation at the first probe (windowed, detrended block)
    pub reflected_series: Option<Vec<f64>>,
}

impl WaveDecompositionResult {
    /// Number of excluded in-band bins.
    pub fn excluded_bin_count(&self) -> usize {
        self.excluded_bins.len()
    }

    /// Number of bins the statistics were computed from.
    pub fn valid_bin_count(&self) -> usize {
        self.frequencies.len()
    }
}

/// Multi-probe incident/reflected separation (least squares via SVD).
#[derive(Debug)]
pub struct WaveSeparationAnalyzer {
    config: WaveConfig,
    sample_rate: f64,
    cache: GeometryCache,
    plans: FftPlanCache,
    last_matrices: Option<Arc<GeometryMatrices>>,
}

impl WaveSeparationAnalyzer {
    /// Create an analyzer for probes sampled at `sample_rate` Hz.
    pub fn new(sample_rate: f64, config: WaveConfig) -> Result<Self, WaveAnalysisError> {
        crate::validation::is_positive_finite(sample_rate)
            .map_err(|e| WaveAnalysisError::InvalidConfig(format!("sample_rate: {}", e)))?;
        config
            .validate(usize::MAX, sample_rate)
            .map_err(WaveAnalysisError::InvalidConfig)?;

        info!(
            probes = config.geometry.len(),
            geometry = %config.geometry.key(),
            depth = config.depth,
            "Wave separation analyzer created"
        );
        Ok(Self {
            cache: GeometryCache::new(config.geometry_cache_capacity),
            plans: FftPlanCache::new(4),
            config,
            sample_rate,
            last_matrices: None,
        })
    }

    /// Switch to a new probe layout. Matrices for earlier layouts stay cached.
    pub fn configure(&mut self, geometry: ProbeGeometry) -> Result<(), WaveAnalysisError> {
        let candidate = WaveConfig {
            geometry,
            probe_channels: Vec::new(),
            ..self.config.clone()
        };
        candidate
            .validate(usize::MAX, self.sample_rate)
            .map_err(WaveAnalysisError::InvalidConfig)?;
        info!(
            probes = candidate.geometry.len(),
            geometry = %candidate.geometry.key(),
            "Probe geometry configured"
        );
        self.config = candidate;
        Ok(())
    }

    /// Settings in use.
    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    /// Current probe layout.
    pub fn geometry(&self) -> &ProbeGeometry {
        &self.config.geometry
    }

    /// Hash of the current layout.
    pub fn geometry_key(&self) -> GeometryKey {
        self.config.geometry.key()
    }

    /// Matrices used by the most recent successful lookup.
    pub fn geometry_matrices(&self) -> Option<Arc<GeometryMatrices>> {
        self.last_matrices.clone()
    }

    /// Geometry cache (for hit/miss inspection).
    pub fn geometry_cache(&self) -> &GeometryCache {
        &self.cache
    }

    fn matrix_params(&self, nfft: usize) -> MatrixParams {
        MatrixParams {
            depth: self.config.depth,
            sample_rate: self.sample_rate,
            nfft,
            min_frequency: self.config.min_frequency,
            max_frequency: self
                .config
                .max_frequency
                .unwrap_or(self.sample_rate / 2.0),
            max_condition_number: self.config.max_condition_number,
            dispersion: self.config.dispersion.clone(),
            svd: self.config.svd.clone(),
        }
    }

    /// Separate one aligned block (one slice per probe, in probe order).
    pub fn analyze<S: AsRef<[f64]>>(
        &mut self,
        probes: &[S],
    ) -> Result<WaveDecompositionResult, WaveAnalysisError> {
        let probe_count = self.config.geometry.len();
        if probes.len() != probe_count {
            return Err(WaveAnalysisError::ProbeCountMismatch {
                expected: probe_count,
                actual: probes.len(),
            });
        }
        let n = probes[0].as_ref().len();
        if n < 2 {
            return Err(WaveAnalysisError::InsufficientData {
                required: 2,
                actual: n,
            });
        }
        for (probe, block) in probes.iter().enumerate() {
            let block = block.as_ref();
            if block.len() != n {
                return Err(WaveAnalysisError::LengthMismatch {
                    probe,
                    expected: n,
                    actual: block.len(),
                });
            }
            if let Some(index) = block.iter().position(|s| !s.is_finite()) {
                return Err(WaveAnalysisError::NonFiniteInput { probe, index });
            }
        }

        let window = self.config.window.coefficients(n);
        let window_energy: f64 = window.iter().map(|w| w * w).sum::<f64>().max(1e-12);
        let spectra: Vec<Vec<Complex<f64>>> = probes
            .iter()
            .map(|block| {
                let block = block.as_ref();
                let mean = if self.config.detrend {
                    block.iter().sum::<f64>() / n as f64
                } else {
                    0.0
                };
                let windowed: Vec<f64> = block
                    .iter()
                    .zip(&window)
                    .map(|(x, w)| (x - mean) * w)
                    .collect();
                self.plans.real_forward(&windowed)
            })
            .collect::<Result<_, _>>()?;

        let params = self.matrix_params(n);
        let matrices = self.cache.get_or_build(&self.config.geometry, &params);
        self.last_matrices = Some(Arc::clone(&matrices));

        let resolution = self.sample_rate / n as f64;
        let scale = 2.0 / (self.sample_rate * window_energy);
        let nyquist_bin = if n % 2 == 0 { Some(n / 2) } else { None };
        let first_offset = self.config.geometry.offsets()[0];

        let mut frequencies = Vec::new();
        let mut incident_spectrum = Vec::new();
        let mut reflected_spectrum = Vec::new();
        let mut incident_bins = vec![Complex::new(0.0, 0.0); n / 2 + 1];
        let mut reflected_bins = vec![Complex::new(0.0, 0.0); n / 2 + 1];
        let mut observed = vec![Complex::new(0.0, 0.0); probe_count];

        for bin in matrices.valid_bins() {
            for (slot, spectrum) in observed.iter_mut().zip(&spectra) {
                *slot = spectrum[bin.bin];
            }
            let Some((incident, reflected)) = bin.solve(&observed) else {
                continue;
            };
            let one_sided = if Some(bin.bin) == nyquist_bin { 0.5 } else { 1.0 };
            frequencies.push(bin.frequency);
            incident_spectrum.push(incident.norm_sqr() * scale * one_sided);
            reflected_spectrum.push(reflected.norm_sqr() * scale * one_sided);

            if self.config.reconstruct_time_series {
                // Shift the reference from x = 0 to the first probe
                let k = bin.wavenumber.unwrap_or(0.0);
                incident_bins[bin.bin] = incident * Complex::from_polar(1.0, -k * first_offset);
                reflected_bins[bin.bin] = reflected * Complex::from_polar(1.0, k * first_offset);
            }
        }

        let excluded_bins: Vec<ExcludedBin> = matrices
            .bins
            .iter()
            .filter_map(|b| {
                b.exclusion.clone().map(|reason| ExcludedBin {
                    bin: b.bin,
                    frequency: b.frequency,
                    reason,
                })
            })
            .collect();

        if frequencies.is_empty() {
            warn!(
                excluded = excluded_bins.len(),
                "Wave separation found no valid bins"
            );
            return Err(WaveAnalysisError::NoValidBins {
                excluded: excluded_bins.len(),
            });
        }

        let statistics =
            wave_statistics(&frequencies, &incident_spectrum, &reflected_spectrum, resolution);
        debug!(
            hm0 = statistics.incident_hm0,
            kr = statistics.reflection_coefficient,
            excluded = excluded_bins.len(),
            "Wave block analysed"
        );

        let (incident_series, reflected_series) = if self.config.reconstruct_time_series {
            (
                Some(self.plans.real_inverse(&incident_bins, n)?),
                Some(self.plans.real_inverse(&reflected_bins, n)?),
            )
        } else {
            (None, None)
        };

        Ok(WaveDecompositionResult {
            sample_rate: self.sample_rate,
            block_length: n,
            frequencies,
            incident_spectrum,
            reflected_spectrum,
            excluded_bins,
            statistics,
            incident_series,
            reflected_series,
        })
    }
}

/// Spectral moment `Σ fⁿ·S(f)·Δf`.
fn moment(frequencies: &[f64], spectrum: &[f64], order: i32, resolution: f64) -> f64 {
    frequencies
        .iter()
        .zip(spectrum)
        .map(|(f, s)| f.powi(order) * s)
        .sum::<f64>()
        * resolution
}

fn wave_statistics(
    frequencies: &[f64],
    incident: &[f64],
    reflected: &[f64],
    resolution: f64,
) -> WaveStatistics {
    const FLOOR: f64 = 1e-300;
    let m0 = moment(frequencies, incident, 0, resolution);
    let m1 = moment(frequencies, incident, 1, resolution);
    let m2 = moment(frequencies, incident, 2, resolution);
    let m0_reflected = moment(frequencies, reflected, 0, resolution);

    let peak_frequency = incident
        .iter()
        .zip(frequencies)
        .filter(|(s, _)| **s > FLOOR)
        .max_by(|a, b| a.0.total_cmp(b.0))
        .map_or(0.0, |(_, f)| *f);

    WaveStatistics {
        incident_hm0: 4.0 * m0.max(0.0).sqrt(),
        reflected_hm0: 4.0 * m0_reflected.max(0.0).sqrt(),
        reflection_coefficient: if m0 > FLOOR {
            (m0_reflected / m0).sqrt()
        } else {
            0.0
        },
        peak_period: if peak_frequency > 0.0 {
            1.0 / peak_frequency
        } else {
            0.0
        },
        mean_period: if m1 > FLOOR { m0 / m1 } else { 0.0 },
        zero_crossing_period: if m2 > FLOOR { (m0 / m2).sqrt() } else { 0.0 },
        spectral_width: if m1 > FLOOR {
            (m0 * m2 / (m1 * m1) - 1.0).max(0.0).sqrt()
        } else {
            0.0
        },
    }
}
