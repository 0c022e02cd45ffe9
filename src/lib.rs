//! # Wave DAQ Core Library
//!
//! Real-time acquisition and analysis core for multi-probe wave flumes. Samples from a
//! hardware frame source are buffered without locks, turned into power spectra and
//! separated into incident and reflected waves while acquisition is still running.
//!
//! ## Crate Structure
//!
//! - **`data`**: Lock-free single-channel ring buffers and the multi-channel buffer that
//!   aligns reads across probes.
//! - **`spectral`**: Window functions, the FFT plan cache, Welch PSD estimation and
//!   cross-channel coherence.
//! - **`wave`**: Dispersion relation, complex SVD, probe geometry caching and the
//!   incident/reflected separation analyzer.
//! - **`hardware`**: The `FrameSource` contract and the simulated and replay backends.
//! - **`acquisition`**: Session state machine, processing stages, observers and the
//!   orchestrator that owns the producer and consumer threads.
//! - **`config`**: Figment-based configuration loading and validation.
//! - **`error`**: The crate-level `DaqError` enum.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`validation`**: Small reusable validators for configuration values.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wave_daq::acquisition::{AcquisitionEvent, AcquisitionOrchestrator};
//! use wave_daq::config::AcquisitionConfig;
//!
//! # fn main() -> wave_daq::error::AppResult<()> {
//! let mut orchestrator = AcquisitionOrchestrator::new();
//! orchestrator.register_observer(Arc::new(|event: &AcquisitionEvent| {
//!     if let AcquisitionEvent::Spectral(analysis) = event {
//!         println!("peak {:.3} Hz", analysis.channels[0].peak_frequency);
//!     }
//! }));
//! orchestrator.configure(AcquisitionConfig::default())?;
//! orchestrator.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! let summary = orchestrator.stop()?;
//! println!("{} frames", summary.frames_acquired);
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod spectral;
pub mod validation;
pub mod wave;
