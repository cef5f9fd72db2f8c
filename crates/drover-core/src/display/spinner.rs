//! Spinner state machine.
//!
//! Tracks which activity the live line describes. Every transition is
//! checked against an explicit allow-list; anything else is rejected so
//! the caller can reset instead of rendering a state that is not real.

use std::fmt;

/// Visible activity state of the spinner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpinnerState {
    #[default]
    Idle,
    Thinking,
    ToolActivity,
    Completion,
    Error,
}

impl SpinnerState {
    pub const ALL: [SpinnerState; 5] = [
        SpinnerState::Idle,
        SpinnerState::Thinking,
        SpinnerState::ToolActivity,
        SpinnerState::Completion,
        SpinnerState::Error,
    ];

    /// States in which the animation runs.
    pub fn is_active(self) -> bool {
        matches!(self, SpinnerState::Thinking | SpinnerState::ToolActivity)
    }

    /// States that end an activity and stop the animation.
    pub fn is_terminal(self) -> bool {
        matches!(self, SpinnerState::Completion | SpinnerState::Error)
    }
}

impl fmt::Display for SpinnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpinnerState::Idle => "idle",
            SpinnerState::Thinking => "thinking",
            SpinnerState::ToolActivity => "tool_activity",
            SpinnerState::Completion => "completion",
            SpinnerState::Error => "error",
        };
        f.write_str(s)
    }
}

/// A transition outside the allow-list was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid spinner transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: SpinnerState,
    pub to: SpinnerState,
}

/// Check whether `from -> to` is an edge of the spinner graph:
///
/// ```text
/// idle          -> thinking, idle
/// thinking      -> tool_activity, completion, error
/// tool_activity -> thinking, tool_activity, completion, error
/// completion    -> idle
/// error         -> idle
/// ```
pub fn is_valid_transition(from: SpinnerState, to: SpinnerState) -> bool {
    use SpinnerState::*;
    matches!(
        (from, to),
        (Idle, Thinking)
            | (Idle, Idle)
            | (Thinking, ToolActivity)
            | (Thinking, Completion)
            | (Thinking, Error)
            | (ToolActivity, Thinking)
            | (ToolActivity, ToolActivity)
            | (ToolActivity, Completion)
            | (ToolActivity, Error)
            | (Completion, Idle)
            | (Error, Idle)
    )
}

/// Current spinner state plus the message shown next to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpinnerFsm {
    state: SpinnerState,
    message: String,
}

impl SpinnerFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SpinnerState {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Move to `to`, replacing the message. Rejected transitions leave the
    /// machine untouched.
    pub fn transition(
        &mut self,
        to: SpinnerState,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if !is_valid_transition(self.state, to) {
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.message = message.into();
        Ok(())
    }

    /// Replace the message without changing state.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Force the machine back to `Idle` with an empty message.
    pub fn reset(&mut self) {
        self.state = SpinnerState::Idle;
        self.message.clear();
    }
}
