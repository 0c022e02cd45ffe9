//! Acquisition session orchestration.
//!
//! - [`state`]: lifecycle states and the transition table
//! - [`observer`]: result publication
//! - [`stage`]: processing stages fed from the shared buffer
//! - [`orchestrator`]: threads, backpressure and lifecycle commands
pub mod observer;
pub mod orchestrator;
pub mod stage;
pub mod state;

pub use observer::{AcquisitionEvent, ObserverId, ObserverRegistry, ResultObserver};
pub use orchestrator::{AcquisitionOrchestrator, FrameCallback, SessionSummary, StageSummary};
pub use stage::{ProcessingStage, SpectralStage, WaveStage, SPECTRAL_CONSUMER, WAVE_CONSUMER};
pub use state::{AcquisitionState, StateEvent};
