//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate. Each
//! component keeps its own `thiserror` enum close to the code that raises it and
//! `DaqError` folds them together with `#[from]`, so `?` works across layers.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   while extracting the configuration.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine, such as a
//!   non-power-of-two capacity or a probe count that does not match the geometry. These
//!   are raised once, when a session enters `Configuring`.
//! - **`Buffer`**: Invalid buffer construction parameters.
//! - **`Spectral`**, **`WaveAnalysis`**, **`Dispersion`**: Per-block numerical failures.
//!   Recoverable; the next block may succeed.
//! - **`Hardware`**: Errors from the frame source. These force the session into
//!   `Stopping`.
//! - **`InvalidTransition`**: A lifecycle command issued in a state that does not accept it.
//! - **`FeatureNotEnabled`**: A backend that is not compiled into this build.
//!
//! Producer-path operations (`push`, `push_frame`) never return errors; data loss is
//! reported through buffer statistics only.

use thiserror::Error;

use crate::acquisition::state::{AcquisitionState, StateEvent};
use crate::data::BufferError;
use crate::hardware::HardwareError;
use crate::spectral::SpectralError;
use crate::wave::{DispersionError, WaveAnalysisError};

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Spectral processing error: {0}")]
    Spectral(#[from] SpectralError),

    #[error("Wave analysis error: {0}")]
    WaveAnalysis(#[from] WaveAnalysisError),

    #[error("Dispersion error: {0}")]
    Dispersion(#[from] DispersionError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Cannot {event} while {from}")]
    InvalidTransition {
        from: AcquisitionState,
        event: StateEvent,
    },

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether a session can keep running after this error.
    ///
    /// Per-block processing failures are recoverable. Configuration, hardware and
    /// lifecycle errors are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::Spectral(_)
            | DaqError::WaveAnalysis(_)
            | DaqError::Dispersion(_)
            | DaqError::Processing(_) => true,
            DaqError::ShutdownFailed(errors) => errors.iter().all(DaqError::is_recoverable),
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::Io(_)
            | DaqError::Buffer(_)
            | DaqError::Hardware(_)
            | DaqError::InvalidTransition { .. }
            | DaqError::FeatureNotEnabled(_) => false,
        }
    }
}
