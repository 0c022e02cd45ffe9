//! Frequency-domain analysis of buffered probe signals.
//!
//! - [`window`]: segment window functions
//! - [`fft`]: FFT execution with an LRU plan cache
//! - [`processor`]: Welch PSD estimation and spectral summary values
//! - [`coherence`]: magnitude-squared coherence between channel pairs
pub mod coherence;
pub mod fft;
pub mod processor;
pub mod window;

pub use coherence::{CoherenceConfig, CoherenceEstimator, CoherenceResult};
pub use fft::{FftPlanCache, PlanKey, TransformKind};
pub use processor::{SpectralAnalysis, SpectralConfig, SpectralError, SpectralProcessor, SpectralResult};
pub use window::WindowType;
