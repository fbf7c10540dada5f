//! Session layer: who may use the microphone, speaker and network right now,
//! and what each operator command does.
//!
//! * [`SessionState`] / [`SessionTracker`]: exclusive activity state.
//! * [`Command`]: single-key operator commands.
//! * [`Controller`]: runs commands against the audio, storage, network and
//!   router components.
//! * [`ApplianceError`]: every failure a command can surface.

pub mod command;
pub mod controller;
pub mod state;

use thiserror::Error;

use crate::ai::AiError;
use crate::audio::{DeviceError, PumpError};
use crate::net::NetError;
use crate::router::RouterError;
use crate::storage::StorageError;

pub use command::Command;
pub use controller::{Controller, Peripherals, Services};
pub use state::{ActivityGuard, SessionError, SessionState, SessionTracker, StopOutcome};

/// Failure of one operator command.
///
/// Each variant wraps the component error unchanged; the controller prints it
/// as a single status line and the session is back at `Idle` by then.
#[derive(Debug, Error)]
pub enum ApplianceError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transfer(#[from] PumpError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Router(#[from] RouterError),
}
