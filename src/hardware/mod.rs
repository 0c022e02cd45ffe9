//! Hardware Frame Sources
//!
//! Producer-side backends behind the narrow [`FrameSource`] contract.

pub mod simulated;
pub mod source;

pub use simulated::{ReplaySource, SimulatedConfig, SimulatedWaveSource, WaveComponent};
pub use source::{build_source, FramePoll, FrameSource, HardwareError, SourceConfig};
