//! Incident/reflected wave separation for multi-probe arrays.
//!
//! - [`dispersion`]: linear dispersion relation solver
//! - [`svd`]: complex singular value decomposition and pseudo-inverse
//! - [`geometry`]: probe layouts and the LRU cache of per-bin matrices
//! - [`analyzer`]: block analysis and wave statistics
pub mod analyzer;
pub mod dispersion;
pub mod geometry;
pub mod svd;

pub use analyzer::{
    ExcludedBin, WaveAnalysisError, WaveConfig, WaveDecompositionResult, WaveSeparationAnalyzer,
    WaveStatistics,
};
pub use dispersion::{DispersionConfig, DispersionError, DispersionSolver, STANDARD_GRAVITY};
pub use geometry::{
    ExclusionReason, GeometryCache, GeometryError, GeometryKey, GeometryMatrices, MatrixParams,
    ProbeGeometry, ProbePosition,
};
pub use svd::{ComplexMatrix, Svd, SvdConfig, SvdError};
