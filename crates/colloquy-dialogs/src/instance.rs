//! Persisted stack frames and per-turn results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One activation record on the dialog stack.
///
/// `state` holds the dialog's private locals. It is plain JSON so the frame
/// survives a storage round-trip unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogInstance {
    /// Id of the dialog in the [`DialogSet`](crate::DialogSet).
    pub id: String,
    /// Private state of this activation.
    #[serde(default)]
    pub state: Map<String, Value>,
}

impl DialogInstance {
    /// Creates a frame with empty state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Map::new(),
        }
    }
}

/// The persisted dialog stack of one conversation.
///
/// The most recently pushed frame is **last**.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogState {
    /// Frames, bottom first.
    #[serde(default)]
    pub dialog_stack: Vec<DialogInstance>,
}

impl DialogState {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no dialog is active.
    pub fn is_empty(&self) -> bool {
        self.dialog_stack.is_empty()
    }
}

/// Outcome of a stack operation for the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogTurnStatus {
    /// A dialog is running and has not yet suspended.
    Active,
    /// A dialog is suspended until the next inbound activity.
    Waiting,
    /// The stack finished (or was already empty).
    Complete,
    /// The stack was cancelled.
    Cancelled,
}

/// Result of a stack operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogTurnResult {
    /// What state the stack is in.
    pub status: DialogTurnStatus,
    /// The value the top-level dialog ended with, if any.
    pub result: Option<Value>,
    /// Set when ending a dialog also ended the parent it returned to.
    pub parent_ended: bool,
}

impl DialogTurnResult {
    /// Creates a result with the given status and no value.
    pub fn new(status: DialogTurnStatus) -> Self {
        Self {
            status,
            result: None,
            parent_ended: false,
        }
    }

    /// The marker a dialog returns to wait for the next inbound activity.
    pub fn end_of_turn() -> Self {
        Self::new(DialogTurnStatus::Waiting)
    }

    /// A completed result carrying `result`.
    pub fn complete(result: Option<Value>) -> Self {
        Self {
            result,
            ..Self::new(DialogTurnStatus::Complete)
        }
    }

    /// A cancelled result.
    pub fn cancelled() -> Self {
        Self::new(DialogTurnStatus::Cancelled)
    }

    /// Returns `true` if the stack ended this turn (completed or cancelled).
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            DialogTurnStatus::Complete | DialogTurnStatus::Cancelled
        )
    }
}

/// Why a dialog is being resumed or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogReason {
    /// The dialog was just started.
    BeginCalled,
    /// The dialog is continued with a new inbound activity.
    ContinueCalled,
    /// A child ended normally.
    EndCalled,
    /// The dialog is being replaced by a sibling.
    ReplaceCalled,
    /// The stack is being cancelled.
    CancelCalled,
    /// A waterfall step skipped ahead.
    NextCalled,
}
