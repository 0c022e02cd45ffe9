//! Linear wave dispersion relation.
//!
//! Solves `ω² = g·k·tanh(k·h)` for the wavenumber `k` at a given frequency and water
//! depth with Newton iteration, starting from Eckart's explicit approximation (within a
//! few percent everywhere, so Newton typically converges in three or four steps).

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.806_65;

/// Solver failures for a single frequency.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispersionError {
    /// Frequency must be strictly positive.
    #[error("Frequency must be positive, got {0} Hz")]
    NonPositiveFrequency(f64),

    /// Depth must be finite and strictly positive.
    #[error("Water depth must be positive, got {0} m")]
    InvalidDepth(f64),

    /// Newton iteration hit the iteration limit.
    #[error("Dispersion solve did not converge at {frequency} Hz after {iterations} iterations (residual {residual:e})")]
    NotConverged {
        /// Frequency in Hz
        frequency: f64,
        /// Iterations performed
        iterations: usize,
        /// Relative step size at the last iteration
        residual: f64,
    },

    /// Iteration produced a non-finite or non-positive wavenumber.
    #[error("Dispersion solve diverged at {frequency} Hz")]
    NonFinite {
        /// Frequency in Hz
        frequency: f64,
    },
}

/// Dispersion solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionConfig {
    /// Gravitational acceleration in m/s²
    pub gravity: f64,
    /// Relative wavenumber change at which iteration stops
    pub tolerance: f64,
    /// Newton iteration limit
    pub max_iterations: usize,
}

impl Default for DispersionConfig {
    fn default() -> Self {
        Self {
            gravity: STANDARD_GRAVITY,
            tolerance: 1e-12,
            max_iterations: 50,
        }
    }
}

impl DispersionConfig {
    /// Check the settings, reporting the first problem.
    pub fn validate(&self) -> Result<(), String> {
        crate::validation::is_positive_finite(self.gravity)
            .map_err(|e| format!("gravity: {}", e))?;
        crate::validation::is_positive_finite(self.tolerance)
            .map_err(|e| format!("tolerance: {}", e))?;
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Newton solver for the finite-depth dispersion relation.
#[derive(Debug, Clone, Default)]
pub struct DispersionSolver {
    config: DispersionConfig,
}

impl DispersionSolver {
    /// Create a solver.
    pub fn new(config: DispersionConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &DispersionConfig {
        &self.config
    }

    /// Wavenumber in rad/m for `frequency` Hz at `depth` m.
    pub fn wavenumber(&self, frequency: f64, depth: f64) -> Result<f64, DispersionError> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(DispersionError::NonPositiveFrequency(frequency));
        }
        if !(depth.is_finite() && depth > 0.0) {
            return Err(DispersionError::InvalidDepth(depth));
        }

        let g = self.config.gravity;
        let omega_sq = (2.0 * PI * frequency).powi(2);
        let deep = omega_sq / g;
        let mut k = deep / (deep * depth).tanh().sqrt();
        let mut residual = f64::INFINITY;

        for _ in 0..self.config.max_iterations {
            let kh = k * depth;
            let tanh = kh.tanh();
            let sech_sq = 1.0 / kh.cosh().powi(2);
            let f = g * k * tanh - omega_sq;
            let df = g * tanh + g * kh * sech_sq;
            let next = k - f / df;
            if !(next.is_finite() && next > 0.0) {
                return Err(DispersionError::NonFinite { frequency });
            }
            residual = ((next - k) / next).abs();
            k = next;
            if residual <= self.config.tolerance {
                return Ok(k);
            }
        }

        Err(DispersionError::NotConverged {
            frequency,
            iterations: self.config.max_iterations,
            residual,
        })
    }

    /// Wavelength in m for `frequency` Hz at `depth` m.
    pub fn wavelength(&self, frequency: f64, depth: f64) -> Result<f64, DispersionError> {
        Ok(2.0 * PI / self.wavenumber(frequency, depth)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residual(k: f64, frequency: f64, depth: f64) -> f64 {
        let omega_sq = (2.0 * PI * frequency).powi(2);
        (STANDARD_GRAVITY * k * (k * depth).tanh() - omega_sq).abs() / omega_sq
    }

    #[test]
    fn test_satisfies_dispersion_relation() {
        let solver = DispersionSolver::default();
        for &depth in &[0.2, 1.0, 5.0, 100.0] {
            for &frequency in &[0.05, 0.5, 1.0, 3.0, 10.0] {
                let k = solver.wavenumber(frequency, depth).unwrap();
                assert!(k > 0.0);
                assert!(residual(k, frequency, depth) < 1e-10);
            }
        }
    }

    #[test]
    fn test_deep_and_shallow_limits() {
        let solver = DispersionSolver::default();

        // Deep water: k = ω²/g
        let deep = solver.wavenumber(2.0, 100.0).unwrap();
        let expected = (2.0 * PI * 2.0_f64).powi(2) / STANDARD_GRAVITY;
        assert!((deep - expected).abs() / expected < 1e-9);

        // Shallow water: c = sqrt(g h)
        let depth = 0.1;
        let k = solver.wavenumber(0.02, depth).unwrap();
        let celerity = 2.0 * PI * 0.02 / k;
        assert!((celerity - (STANDARD_GRAVITY * depth).sqrt()).abs() < 1e-3);
    }

    #[test]
    fn test_known_laboratory_value() {
        // 0.5 Hz in 1 m of water: L ≈ 5.21 m
        let wavelength = DispersionSolver::default().wavelength(0.5, 1.0).unwrap();
        assert!((wavelength - 5.214).abs() < 0.005, "wavelength {wavelength}");
    }

    #[test]
    fn test_rejects_invalid_input() {
        let solver = DispersionSolver::default();
        assert_eq!(
            solver.wavenumber(0.0, 1.0).unwrap_err(),
            DispersionError::NonPositiveFrequency(0.0)
        );
        assert!(matches!(
            solver.wavenumber(f64::NAN, 1.0),
            Err(DispersionError::NonPositiveFrequency(_))
        ));
        assert_eq!(
            solver.wavenumber(1.0, -2.0).unwrap_err(),
            DispersionError::InvalidDepth(-2.0)
        );
    }

    #[test]
    fn test_iteration_limit_is_reported() {
        let solver = DispersionSolver::new(DispersionConfig {
            tolerance: 1e-300,
            max_iterations: 2,
            ..Default::default()
        });
        assert!(matches!(
            solver.wavenumber(0.5, 1.0),
            Err(DispersionError::NotConverged { iterations: 2, .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(DispersionConfig::default().validate().is_ok());
        assert!(DispersionConfig {
            max_iterations: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(DispersionConfig {
            gravity: -9.81,
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
