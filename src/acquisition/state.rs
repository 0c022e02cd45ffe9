//! Acquisition session lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, DaqError};

/// Session lifecycle state.
///
/// # State Machine
///
/// ```text
///               Configure          Start
/// Idle ──────────────────> Configuring ──────> Running ──Pause──> Paused
///  ▲                            │                 │  ▲──Resume──────┘│
///  │           Cancel           │                 │                  │
///  ├────────────────────────────┘           Stop/Fault          Stop/Fault
///  │                                              ▼                  │
///  └──────────────── Complete ─────────────── Stopping <─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// No session; initial and terminal state
    Idle,
    /// Session validated and buffers allocated, threads not started
    Configuring,
    /// Producer writing and stages processing
    Running,
    /// Producer writing, stages not dispatching
    Paused,
    /// Draining and joining threads
    Stopping,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "Idle"),
            AcquisitionState::Configuring => write!(f, "Configuring"),
            AcquisitionState::Running => write!(f, "Running"),
            AcquisitionState::Paused => write!(f, "Paused"),
            AcquisitionState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Lifecycle commands and conditions driving transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateEvent {
    /// Validate a configuration and allocate buffers
    Configure,
    /// Abandon a configured session before it starts
    Cancel,
    /// Spawn producer and consumer threads
    Start,
    /// Suspend dispatching
    Pause,
    /// Resume dispatching
    Resume,
    /// Operator stop or source exhausted
    Stop,
    /// Unrecoverable hardware error
    Fault,
    /// Cleanup finished
    Complete,
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateEvent::Configure => "configure",
            StateEvent::Cancel => "cancel",
            StateEvent::Start => "start",
            StateEvent::Pause => "pause",
            StateEvent::Resume => "resume",
            StateEvent::Stop => "stop",
            StateEvent::Fault => "fault",
            StateEvent::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

impl AcquisitionState {
    /// Target state for `event`, or `None` if this state does not accept it.
    pub fn next(self, event: StateEvent) -> Option<AcquisitionState> {
        use AcquisitionState::*;
        use StateEvent::*;
        match (self, event) {
            (Idle, Configure) => Some(Configuring),
            (Configuring, Cancel) => Some(Idle),
            (Configuring, Start) => Some(Running),
            (Running, Pause) => Some(Paused),
            (Paused, Resume) => Some(Running),
            (Running | Paused, Stop | Fault) => Some(Stopping),
            (Stopping, Complete) => Some(Idle),
            _ => None,
        }
    }

    /// Like [`next`](Self::next) but reporting a rejected event as an error.
    pub fn transition(self, event: StateEvent) -> AppResult<AcquisitionState> {
        self.next(event)
            .ok_or(DaqError::InvalidTransition { from: self, event })
    }

    /// Whether producer and consumer threads are alive.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AcquisitionState::Running | AcquisitionState::Paused | AcquisitionState::Stopping
        )
    }

    /// Whether stages dispatch blocks in this state.
    pub fn is_dispatching(&self) -> bool {
        matches!(self, AcquisitionState::Running | AcquisitionState::Stopping)
    }
}
