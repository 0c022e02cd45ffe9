//! Magnitude-squared coherence between channel pairs.
//!
//! Coherence needs cross-spectral averaging over several segments, so the estimator keeps
//! a bounded history of per-segment spectra that spans successive blocks:
//!
//! ```text
//! γ²(f) = |Σ X(f)·conj(Y(f))|² / (Σ |X(f)|² · Σ |Y(f)|²)
//! ```
//!
//! With a single segment the estimate is trivially 1 at every bin, so values only become
//! meaningful once the history has filled.

use std::collections::VecDeque;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Coherence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    /// Compute coherence at all
    pub enabled: bool,
    /// Channel pairs to evaluate; empty means every pair `(i, j)` with `i < j`
    pub pairs: Vec<(usize, usize)>,
    /// Segments kept for averaging (oldest dropped first)
    pub history_segments: usize,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pairs: Vec::new(),
            history_segments: 32,
        }
    }
}

/// Coherence spectrum of one channel pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoherenceResult {
    /// First channel of the pair
    pub channel_a: usize,
    /// Second channel of the pair
    pub channel_b: usize,
    /// Frequency axis in Hz
    pub frequencies: Vec<f64>,
    /// γ² per bin, in `0.0..=1.0`
    pub coherence: Vec<f64>,
    /// Mean of `coherence` over all bins
    pub mean_coherence: f64,
    /// Segments that went into the average
    pub segments: usize,
}

/// Running cross-spectral averager.
#[derive(Debug, Clone)]
pub struct CoherenceEstimator {
    config: CoherenceConfig,
    /// One entry per segment, holding every channel's spectrum
    history: VecDeque<Vec<Vec<Complex<f64>>>>,
}

impl CoherenceEstimator {
    /// Create an empty estimator.
    pub fn new(config: CoherenceConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_segments.max(1)),
            config,
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &CoherenceConfig {
        &self.config
    }

    /// Segments currently held.
    pub fn segments(&self) -> usize {
        self.history.len()
    }

    /// Forget all accumulated segments.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Add one segment (one spectrum per channel).
    ///
    /// A segment whose shape differs from the history restarts the average.
    pub fn push_segment(&mut self, spectra: Vec<Vec<Complex<f64>>>) {
        let same_shape = self.history.front().map_or(true, |first| {
            first.len() == spectra.len()
                && first.iter().zip(&spectra).all(|(a, b)| a.len() == b.len())
        });
        if !same_shape {
            self.history.clear();
        }
        while self.history.len() >= self.config.history_segments.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(spectra);
    }

    /// Pairs that will be evaluated for `channels` channels.
    pub fn resolved_pairs(&self, channels: usize) -> Vec<(usize, usize)> {
        if self.config.pairs.is_empty() {
            (0..channels)
                .flat_map(|a| ((a + 1)..channels).map(move |b| (a, b)))
                .collect()
        } else {
            self.config
                .pairs
                .iter()
                .copied()
                .filter(|&(a, b)| a != b && a < channels && b < channels)
                .collect()
        }
    }

    /// Estimate coherence for every configured pair over the current history.
    ///
    /// Bins whose auto-spectral product is below `floor` report zero coherence.
    pub fn estimate(&self, frequencies: &[f64], floor: f64) -> Vec<CoherenceResult> {
        let Some(first) = self.history.front() else {
            return Vec::new();
        };
        let bins = frequencies.len().min(first.first().map_or(0, Vec::len));

        self.resolved_pairs(first.len())
            .into_iter()
            .map(|(a, b)| {
                let coherence: Vec<f64> = (0..bins)
                    .map(|k| {
                        let mut cross = Complex::new(0.0, 0.0);
                        let mut auto_a = 0.0;
                        let mut auto_b = 0.0;
                        for segment in &self.history {
                            let x = segment[a][k];
                            let y = segment[b][k];
                            cross += x * y.conj();
                            auto_a += x.norm_sqr();
                            auto_b += y.norm_sqr();
                        }
                        let denominator = auto_a * auto_b;
                        if denominator > floor {
                            (cross.norm_sqr() / denominator).clamp(0.0, 1.0)
                        } else {
                            0.0
                        }
                    })
                    .collect();
                let mean_coherence = if coherence.is_empty() {
                    0.0
                } else {
                    coherence.iter().sum::<f64>() / coherence.len() as f64
                };
                CoherenceResult {
                    channel_a: a,
                    channel_b: b,
                    frequencies: frequencies[..bins].to_vec(),
                    coherence,
                    mean_coherence,
                    segments: self.history.len(),
                }
            })
            .collect()
    }
}
