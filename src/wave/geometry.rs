//! Probe layout and the cache of geometry-derived matrices.
//!
//! For every analysed frequency bin the separation solves
//!
//! ```text
//! X_j = Z_I·e^{−i·k·x_j} + Z_R·e^{+i·k·x_j}      (one row per probe j)
//! ```
//!
//! for the incident and reflected complex amplitudes. The matrix of exponentials and its
//! pseudo-inverse depend only on the probe positions, the water depth and the frequency
//! grid, so they are built once per layout and reused for every block.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use super::dispersion::{DispersionConfig, DispersionSolver};
use super::svd::{ComplexMatrix, Svd, SvdConfig, C64};

/// Probe layout problems, detected at configuration time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// At least two probes are needed to separate two components.
    #[error("Wave separation needs at least 2 probes, got {count}")]
    TooFewProbes {
        /// Probes supplied
        count: usize,
    },

    /// NaN or infinite coordinate.
    #[error("Probe {index} has a non-finite position")]
    NonFinitePosition {
        /// Probe index
        index: usize,
    },

    /// Two probes share the same along-flume position.
    #[error("Probes {first} and {second} share the same position")]
    DuplicatePosition {
        /// First probe index
        first: usize,
        /// Second probe index
        second: usize,
    },
}

/// Position of one probe in metres. `x` runs along the direction of wave travel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbePosition {
    /// Along-flume coordinate
    pub x: f64,
    /// Cross-flume coordinate (ignored for normally incident waves)
    #[serde(default)]
    pub y: f64,
}

/// Ordered probe layout. Probe `j` observes channel block `j` of the analysed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ProbePosition>", into = "Vec<ProbePosition>")]
pub struct ProbeGeometry {
    positions: Vec<ProbePosition>,
}

impl TryFrom<Vec<ProbePosition>> for ProbeGeometry {
    type Error = GeometryError;

    fn try_from(positions: Vec<ProbePosition>) -> Result<Self, Self::Error> {
        Self::new(positions)
    }
}

impl From<ProbeGeometry> for Vec<ProbePosition> {
    fn from(geometry: ProbeGeometry) -> Self {
        geometry.positions
    }
}

impl ProbeGeometry {
    /// Validate and wrap a probe layout.
    pub fn new(positions: Vec<ProbePosition>) -> Result<Self, GeometryError> {
        if positions.len() < 2 {
            return Err(GeometryError::TooFewProbes {
                count: positions.len(),
            });
        }
        if let Some(index) = positions
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite()))
        {
            return Err(GeometryError::NonFinitePosition { index });
        }
        for second in 1..positions.len() {
            if let Some(first) = positions[..second]
                .iter()
                .position(|p| p.x == positions[second].x)
            {
                return Err(GeometryError::DuplicatePosition { first, second });
            }
        }
        Ok(Self { positions })
    }

    /// Layout from along-flume offsets only.
    pub fn from_offsets(offsets: &[f64]) -> Result<Self, GeometryError> {
        Self::new(offsets.iter().map(|&x| ProbePosition { x, y: 0.0 }).collect())
    }

    /// Probe positions in order.
    pub fn positions(&self) -> &[ProbePosition] {
        &self.positions
    }

    /// Along-flume coordinates in order.
    pub fn offsets(&self) -> Vec<f64> {
        self.positions.iter().map(|p| p.x).collect()
    }

    /// Number of probes.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Always false for a validated layout.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Content hash of the layout.
    pub fn key(&self) -> GeometryKey {
        let mut hasher = Sha256::new();
        for position in &self.positions {
            hasher.update(position.x.to_bits().to_le_bytes());
            hasher.update(position.y.to_bits().to_le_bytes());
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        GeometryKey(bytes)
    }
}

/// SHA-256 of a probe layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryKey([u8; 32]);

impl fmt::Display for GeometryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GeometryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeometryKey({})", self)
    }
}

/// Everything besides the layout that the matrices depend on.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixParams {
    /// Water depth in m
    pub depth: f64,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Transform length
    pub nfft: usize,
    /// Lowest analysed frequency in Hz (DC is never analysed)
    pub min_frequency: f64,
    /// Highest analysed frequency in Hz
    pub max_frequency: f64,
    /// Bins above this condition number are excluded
    pub max_condition_number: f64,
    /// Dispersion solver settings
    pub dispersion: DispersionConfig,
    /// SVD settings
    pub svd: SvdConfig,
}

/// Cache key: layout hash plus the bit patterns of every matrix parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixKey {
    geometry: GeometryKey,
    nfft: usize,
    max_iterations: usize,
    max_sweeps: usize,
    bits: [u64; 9],
}

impl MatrixKey {
    /// Key for `geometry` under `params`.
    pub fn new(geometry: &ProbeGeometry, params: &MatrixParams) -> Self {
        Self {
            geometry: geometry.key(),
            nfft: params.nfft,
            max_iterations: params.dispersion.max_iterations,
            max_sweeps: params.svd.max_sweeps,
            bits: [
                params.depth.to_bits(),
                params.sample_rate.to_bits(),
                params.min_frequency.to_bits(),
                params.max_frequency.to_bits(),
                params.max_condition_number.to_bits(),
                params.dispersion.gravity.to_bits(),
                params.dispersion.tolerance.to_bits(),
                params.svd.tolerance.to_bits(),
                params.svd.rcond.to_bits(),
            ],
        }
    }

    /// Layout part of the key.
    pub fn geometry(&self) -> GeometryKey {
        self.geometry
    }
}

/// Why a frequency bin was left out of the separation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Dispersion relation could not be solved
    DispersionFailed(String),
    /// Probe spacing is (nearly) a multiple of half a wavelength at this frequency
    Degenerate {
        /// Condition number of the bin's matrix
        condition_number: f64,
    },
}

/// Precomputed solution operator for one frequency bin.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSolution {
    /// FFT bin index
    pub bin: usize,
    /// Bin frequency in Hz
    pub frequency: f64,
    /// Wavenumber in rad/m, if the dispersion solve succeeded
    pub wavenumber: Option<f64>,
    /// Condition number of the probe matrix (infinite if not computed)
    pub condition_number: f64,
    /// `2×M` pseudo-inverse mapping probe spectra to `[Z_I, Z_R]`
    pub pseudo_inverse: Option<ComplexMatrix>,
    /// Set when the bin is excluded
    pub exclusion: Option<ExclusionReason>,
}

impl BinSolution {
    /// Solve for `[Z_I, Z_R]` from the probe spectra at this bin.
    pub fn solve(&self, probe_spectra: &[C64]) -> Option<(C64, C64)> {
        let pinv = self.pseudo_inverse.as_ref()?;
        let solution = pinv.mul_vec(probe_spectra);
        Some((solution[0], solution[1]))
    }
}

/// Geometry-derived operators for every in-band bin.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryMatrices {
    /// Key these matrices were built for
    pub key: MatrixKey,
    /// In-band bins, ascending
    pub bins: Vec<BinSolution>,
}

impl GeometryMatrices {
    /// Build the per-bin matrices for a layout.
    pub fn build(geometry: &ProbeGeometry, params: &MatrixParams) -> Self {
        let key = MatrixKey::new(geometry, params);
        let solver = DispersionSolver::new(params.dispersion.clone());
        let offsets = geometry.offsets();
        let resolution = params.sample_rate / params.nfft as f64;

        let bins: Vec<BinSolution> = (1..=params.nfft / 2)
            .map(|bin| (bin, bin as f64 * resolution))
            .filter(|&(_, f)| f >= params.min_frequency && f <= params.max_frequency)
            .map(|(bin, frequency)| {
                let wavenumber = match solver.wavenumber(frequency, params.depth) {
                    Ok(k) => k,
                    Err(e) => {
                        return BinSolution {
                            bin,
                            frequency,
                            wavenumber: None,
                            condition_number: f64::INFINITY,
                            pseudo_inverse: None,
                            exclusion: Some(ExclusionReason::DispersionFailed(e.to_string())),
                        }
                    }
                };

                let matrix = ComplexMatrix::from_fn(offsets.len(), 2, |j, c| {
                    let sign = if c == 0 { -1.0 } else { 1.0 };
                    C64::from_polar(1.0, sign * wavenumber * offsets[j])
                });
                let (condition_number, pseudo_inverse) =
                    match Svd::decompose(&matrix, &params.svd) {
                        Ok(svd) => (
                            svd.condition_number(),
                            Some(svd.pseudo_inverse(params.svd.rcond)),
                        ),
                        Err(_) => (f64::INFINITY, None),
                    };

                if pseudo_inverse.is_none() || condition_number > params.max_condition_number {
                    return BinSolution {
                        bin,
                        frequency,
                        wavenumber: Some(wavenumber),
                        condition_number,
                        pseudo_inverse: None,
                        exclusion: Some(ExclusionReason::Degenerate { condition_number }),
                    };
                }

                BinSolution {
                    bin,
                    frequency,
                    wavenumber: Some(wavenumber),
                    condition_number,
                    pseudo_inverse,
                    exclusion: None,
                }
            })
            .collect();

        let excluded = bins.iter().filter(|b| b.exclusion.is_some()).count();
        info!(
            geometry = %key.geometry(),
            probes = geometry.len(),
            bins = bins.len(),
            excluded,
            "Built wave separation matrices"
        );

        Self { key, bins }
    }

    /// Bins usable for separation.
    pub fn valid_bins(&self) -> impl Iterator<Item = &BinSolution> {
        self.bins.iter().filter(|b| b.exclusion.is_none())
    }

    /// Number of excluded in-band bins.
    pub fn excluded_count(&self) -> usize {
        self.bins.iter().filter(|b| b.exclusion.is_some()).count()
    }
}

/// Bounded LRU cache of [`GeometryMatrices`].
pub struct GeometryCache {
    entries: LruCache<MatrixKey, Arc<GeometryMatrices>>,
    hits: u64,
    misses: u64,
}

impl fmt::Debug for GeometryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryCache")
            .field("len", &self.entries.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl GeometryCache {
    /// Create a cache holding at most `max_entries` layouts (at least one).
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached matrices for `geometry` under `params`, building them on a miss.
    pub fn get_or_build(
        &mut self,
        geometry: &ProbeGeometry,
        params: &MatrixParams,
    ) -> Arc<GeometryMatrices> {
        let key = MatrixKey::new(geometry, params);
        if let Some(matrices) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(matrices);
        }

        self.misses += 1;
        debug!(geometry = %key.geometry(), "Geometry cache miss");
        let matrices = Arc::new(GeometryMatrices::build(geometry, params));
        self.entries.put(key, Arc::clone(&matrices));
        matrices
    }

    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that built new matrices.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Layouts currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all cached matrices.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(nfft: usize) -> MatrixParams {
        MatrixParams {
            depth: 1.0,
            sample_rate: 100.0,
            nfft,
            min_frequency: 0.0,
            max_frequency: 5.0,
            max_condition_number: 1e3,
            dispersion: DispersionConfig::default(),
            svd: SvdConfig::default(),
        }
    }

    fn lab_geometry() -> ProbeGeometry {
        ProbeGeometry::from_offsets(&[0.0, 0.31, 0.74, 1.17]).unwrap()
    }

    #[test]
    fn test_geometry_validation() {
        assert_eq!(
            ProbeGeometry::from_offsets(&[0.0]).unwrap_err(),
            GeometryError::TooFewProbes { count: 1 }
        );
        assert_eq!(
            ProbeGeometry::from_offsets(&[0.0, f64::NAN]).unwrap_err(),
            GeometryError::NonFinitePosition { index: 1 }
        );
        assert_eq!(
            ProbeGeometry::from_offsets(&[0.0, 0.3, 0.0]).unwrap_err(),
            GeometryError::DuplicatePosition {
                first: 0,
                second: 2
            }
        );
    }

    #[test]
    fn test_key_depends_on_layout_only() {
        let a = lab_geometry();
        let b = lab_geometry();
        let c = ProbeGeometry::from_offsets(&[0.0, 0.31, 0.74, 1.18]).unwrap();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.key().to_string().len(), 16);
    }

    #[test]
    fn test_geometry_deserializes_from_position_list() {
        let geometry: ProbeGeometry =
            serde_json::from_str(r#"[{"x": 0.0}, {"x": 0.5, "y": 0.1}]"#).unwrap();
        assert_eq!(geometry.len(), 2);
        assert_eq!(geometry.positions()[1].y, 0.1);

        let invalid: Result<ProbeGeometry, _> = serde_json::from_str(r#"[{"x": 0.0}]"#);
        assert!(invalid.is_err());
    }

    #[test]
    fn test_matrices_cover_band_without_dc() {
        let matrices = GeometryMatrices::build(&lab_geometry(), &params(256));
        let resolution = 100.0 / 256.0;
        assert_eq!(matrices.bins.first().unwrap().bin, 1);
        assert!(matrices.bins.iter().all(|b| b.frequency <= 5.0));
        assert_eq!(matrices.bins.len(), (5.0 / resolution) as usize);
        assert_eq!(matrices.excluded_count(), 0);
        assert!(matrices.valid_bins().all(|b| b.condition_number < 10.0));
    }

    #[test]
    fn test_pseudo_inverse_separates_components() {
        let geometry = lab_geometry();
        let matrices = GeometryMatrices::build(&geometry, &params(256));
        let bin = &matrices.bins[3];
        let k = bin.wavenumber.unwrap();
        let incident = C64::new(1.5, -0.5);
        let reflected = C64::new(0.2, 0.1);

        let observed: Vec<C64> = geometry
            .offsets()
            .iter()
            .map(|&x| {
                incident * C64::from_polar(1.0, -k * x) + reflected * C64::from_polar(1.0, k * x)
            })
            .collect();
        let (zi, zr) = bin.solve(&observed).unwrap();
        assert!((zi - incident).norm() < 1e-10);
        assert!((zr - reflected).norm() < 1e-10);
    }

    #[test]
    fn test_degenerate_spacing_is_excluded() {
        // Probes exactly half a wavelength apart at 0.5 Hz in 1 m of water
        let half_wavelength = DispersionSolver::default().wavelength(0.5, 1.0).unwrap() / 2.0;
        let geometry = ProbeGeometry::from_offsets(&[0.0, half_wavelength]).unwrap();
        let mut p = params(200);
        p.max_frequency = 0.5;
        let matrices = GeometryMatrices::build(&geometry, &p);

        let bin = matrices.bins.last().unwrap();
        assert!((bin.frequency - 0.5).abs() < 1e-12);
        assert!(matches!(
            bin.exclusion,
            Some(ExclusionReason::Degenerate { .. })
        ));
        assert!(bin.solve(&[C64::new(1.0, 0.0); 2]).is_none());
    }

    #[test]
    fn test_dispersion_failure_is_excluded() {
        let mut p = params(256);
        p.dispersion.max_iterations = 1;
        p.dispersion.tolerance = 1e-300;
        let matrices = GeometryMatrices::build(&lab_geometry(), &p);
        assert_eq!(matrices.excluded_count(), matrices.bins.len());
        assert!(matches!(
            matrices.bins[0].exclusion,
            Some(ExclusionReason::DispersionFailed(_))
        ));
    }

    #[test]
    fn test_cache_returns_identical_matrices() {
        let mut cache = GeometryCache::new(2);
        let geometry = lab_geometry();
        let first = cache.get_or_build(&geometry, &params(256));
        let second = cache.get_or_build(&geometry, &params(256));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);

        // Changing any parameter is a different entry
        cache.get_or_build(&geometry, &params(128));
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 2);

        // Bounded: a third layout evicts the least recently used one
        let other = ProbeGeometry::from_offsets(&[0.0, 0.4]).unwrap();
        cache.get_or_build(&other, &params(256));
        assert_eq!(cache.len(), 2);
    }
}
