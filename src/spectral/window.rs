//! Window functions applied to each spectral segment.
//!
//! All windows are generated in their periodic (DFT-even) form, which is the usual
//! choice for spectral estimation: `w[n]` is evaluated over `n / N` rather than
//! `n / (N - 1)`.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Window applied to a segment before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowType {
    /// No tapering (all ones)
    Rectangular,
    /// Raised cosine, first sidelobe -31 dB
    #[default]
    Hann,
    /// Raised cosine on a pedestal, first sidelobe -43 dB
    Hamming,
    /// Three-term cosine, first sidelobe -58 dB
    Blackman,
    /// Kaiser-Bessel window with shape parameter `beta`
    Kaiser {
        /// Shape parameter; 0 gives a rectangular window, ~8.6 approximates Blackman
        beta: f64,
    },
}

impl WindowType {
    /// Short lowercase name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            WindowType::Rectangular => "rectangular",
            WindowType::Hann => "hann",
            WindowType::Hamming => "hamming",
            WindowType::Blackman => "blackman",
            WindowType::Kaiser { .. } => "kaiser",
        }
    }

    /// Generate `len` window coefficients.
    pub fn coefficients(&self, len: usize) -> Vec<f64> {
        if len <= 1 {
            return vec![1.0; len];
        }
        let n_total = len as f64;
        (0..len)
            .map(|n| {
                let phase = 2.0 * PI * n as f64 / n_total;
                match *self {
                    WindowType::Rectangular => 1.0,
                    WindowType::Hann => 0.5 - 0.5 * phase.cos(),
                    WindowType::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowType::Blackman => {
                        0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                    }
                    WindowType::Kaiser { beta } => {
                        let ratio = 2.0 * n as f64 / n_total - 1.0;
                        bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / bessel_i0(beta)
                    }
                }
            })
            .collect()
    }

    /// Whether the window parameters are usable.
    pub fn validate(&self) -> Result<(), &'static str> {
        match *self {
            WindowType::Kaiser { beta } if !(beta.is_finite() && beta >= 0.0) => {
                Err("Kaiser beta must be finite and non-negative")
            }
            _ => Ok(()),
        }
    }
}

/// Zeroth-order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half_sq = (x / 2.0) * (x / 2.0);
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..200 {
        term *= half_sq / (k as f64 * k as f64);
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular_is_all_ones() {
        assert!(WindowType::Rectangular
            .coefficients(16)
            .iter()
            .all(|&w| w == 1.0));
    }

    #[test]
    fn test_periodic_hann_shape() {
        let w = WindowType::Hann.coefficients(8);
        assert_eq!(w.len(), 8);
        assert!(w[0].abs() < 1e-12);
        assert!((w[4] - 1.0).abs() < 1e-12);
        // Periodic form is symmetric around the centre sample
        assert!((w[1] - w[7]).abs() < 1e-12);
        // Mean of a periodic Hann window is exactly 0.5
        assert!((w.iter().sum::<f64>() / 8.0 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_hamming_and_blackman_endpoints() {
        let hamming = WindowType::Hamming.coefficients(64);
        assert!((hamming[0] - 0.08).abs() < 1e-12);
        let blackman = WindowType::Blackman.coefficients(64);
        assert!(blackman[0].abs() < 1e-12);
        assert!((blackman[32] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_kaiser_beta_zero_is_rectangular() {
        let w = WindowType::Kaiser { beta: 0.0 }.coefficients(32);
        assert!(w.iter().all(|&v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_kaiser_peaks_at_centre() {
        let w = WindowType::Kaiser { beta: 8.6 }.coefficients(64);
        assert!((w[32] - 1.0).abs() < 1e-12);
        assert!(w[0] < 0.01);
        assert!(w.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_bessel_i0_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-15);
        assert!((bessel_i0(1.0) - 1.266_065_877_752_008_4).abs() < 1e-12);
        assert!((bessel_i0(5.0) - 27.239_871_823_604_45).abs() < 1e-9);
    }

    #[test]
    fn test_short_windows() {
        assert!(WindowType::Hann.coefficients(0).is_empty());
        assert_eq!(WindowType::Blackman.coefficients(1), vec![1.0]);
    }

    #[test]
    fn test_validate_kaiser_beta() {
        assert!(WindowType::Kaiser { beta: 5.0 }.validate().is_ok());
        assert!(WindowType::Kaiser { beta: -1.0 }.validate().is_err());
        assert!(WindowType::Hann.validate().is_ok());
    }
}
