//! Exclusive-activity state machine.
//!
//! [`SessionState`] names the one activity that may run at a time.  The only
//! way out of `Idle` is [`SessionTracker::begin`], which hands back an
//! [`ActivityGuard`]; dropping the guard returns the session to `Idle`, so an
//! operation that fails half-way can never leave the state stuck.
//!
//! [`SessionTracker`] is `Arc<Mutex<…>>` inside, cheap to clone and safe to
//! share with the input thread that signals cancellation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// States of the appliance.
///
/// ```text
/// Idle ──s──▶ Recording ──x / limit──▶ Idle
///      ──p/v/t──▶ Playing ──q / end──▶ Idle
///      ──r──▶ Transcribing ──reply text──▶ Synthesizing ──autoplay──▶ Playing
///                    │                         │
///                    └──keyword / empty────────┴──────────────▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Playing,
    Transcribing,
    Synthesizing,
}

impl SessionState {
    /// `true` for every state except `Idle`.
    ///
    /// ```
    /// use talkbox::session::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_busy());
    /// assert!(SessionState::Recording.is_busy());
    /// assert!(SessionState::Synthesizing.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// Short human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Playing => "playback",
            SessionState::Transcribing => "transcription",
            SessionState::Synthesizing => "synthesis",
        }
    }

    /// Internal handoffs that skip `Idle`.
    fn can_hand_off_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Transcribing, SessionState::Synthesizing)
                | (SessionState::Synthesizing, SessionState::Playing)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Another activity holds the session.
    #[error("busy: {active} in progress")]
    Busy { active: SessionState },

    #[error("cannot go from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Result of asking an activity to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The activity was running and will stop at its next block boundary.
    Signalled,
    /// The activity was not running; nothing changed.
    NotActive,
}

// ---------------------------------------------------------------------------
// SessionTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slot {
    state: SessionState,
    cancel: bool,
}

/// Process-wide owner of the [`SessionState`].
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    slot: Arc<Mutex<Slot>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> SessionState {
        self.lock().state
    }

    /// Check-then-set: move from `Idle` to `state` or report who is busy.
    pub fn begin(&self, state: SessionState) -> Result<ActivityGuard, SessionError> {
        let mut slot = self.lock();
        if state == SessionState::Idle {
            return Err(SessionError::InvalidTransition {
                from: slot.state,
                to: state,
            });
        }
        if slot.state.is_busy() {
            return Err(SessionError::Busy { active: slot.state });
        }
        slot.state = state;
        slot.cancel = false;
        log::debug!("session: idle → {state}");
        Ok(ActivityGuard {
            tracker: self.clone(),
            state,
        })
    }

    /// Ask `state` to stop if it is the running activity.
    pub fn request_stop(&self, state: SessionState) -> StopOutcome {
        let mut slot = self.lock();
        if slot.state == state && state.is_busy() {
            slot.cancel = true;
            StopOutcome::Signalled
        } else {
            StopOutcome::NotActive
        }
    }
}

// ---------------------------------------------------------------------------
// ActivityGuard
// ---------------------------------------------------------------------------

/// Proof of holding the session; returns it to `Idle` on drop.
#[derive(Debug)]
pub struct ActivityGuard {
    tracker: SessionTracker,
    state: SessionState,
}

impl ActivityGuard {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A stop was requested for the current activity.
    pub fn is_cancelled(&self) -> bool {
        self.tracker.lock().cancel
    }

    /// Move straight to the next stage of a chained operation.
    pub fn handoff(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_hand_off_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let mut slot = self.tracker.lock();
        slot.state = next;
        slot.cancel = false;
        log::debug!("session: {} → {next}", self.state);
        self.state = next;
        Ok(())
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let mut slot = self.tracker.lock();
        slot.state = SessionState::Idle;
        slot.cancel = false;
        log::debug!("session: {} → idle", self.state);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
