//! Action lifecycle state machine.
//!
//! One `ActionStateMachine` guards the attempt sequence of a single queued
//! action: `Queued -> Executing -> (Success | Failed | Retrying -> Executing -> ...)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle states for one action item's attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Waiting in the work queue
    Queued,
    /// An attempt is in flight
    Executing,
    /// Terminal: the action completed
    Success,
    /// Terminal: the action failed for good
    Failed,
    /// Waiting out the backoff before the next attempt
    Retrying,
    /// Terminal: externally cancelled (reserved; the executor never
    /// produces this state itself)
    Cancelled,
}

impl ActionState {
    /// States this state may legally transition into.
    pub fn allowed_transitions(self) -> &'static [ActionState] {
        use ActionState::*;
        match self {
            Queued => &[Executing, Cancelled],
            Executing => &[Success, Failed, Retrying, Cancelled],
            Retrying => &[Executing, Cancelled],
            Success | Failed | Cancelled => &[],
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionState::Queued => "queued",
            ActionState::Executing => "executing",
            ActionState::Success => "success",
            ActionState::Failed => "failed",
            ActionState::Retrying => "retrying",
            ActionState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Lifecycle transition errors.
///
/// An invalid transition is a programming error in the driving code, not a
/// recoverable runtime condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: ActionState, to: ActionState },
}

/// Guards legal lifecycle transitions for one attempt sequence.
#[derive(Debug, Clone)]
pub struct ActionStateMachine {
    state: ActionState,
}

impl ActionStateMachine {
    /// Create a machine at `Queued`.
    pub fn new() -> Self {
        Self {
            state: ActionState::Queued,
        }
    }

    /// Create a machine at an arbitrary starting state.
    pub fn starting_at(state: ActionState) -> Self {
        Self { state }
    }

    /// Current state.
    pub fn state(&self) -> ActionState {
        self.state
    }

    /// Move to `next` if the transition table allows it.
    pub fn transition(&mut self, next: ActionState) -> Result<(), StateError> {
        if self.state.allowed_transitions().contains(&next) {
            tracing::trace!(from = %self.state, to = %next, "state transition");
            self.state = next;
            Ok(())
        } else {
            Err(StateError::InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }
}

impl Default for ActionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
