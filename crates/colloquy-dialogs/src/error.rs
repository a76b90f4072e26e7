//! Error types for the dialog engine.

use colloquy_core::{BotError, StorageError};
use thiserror::Error;

/// Errors that can occur while driving the dialog stack.
#[derive(Debug, Error)]
pub enum DialogError {
    /// `begin_dialog`/`replace_dialog` named a dialog that is not registered,
    /// or the stack references one that no longer is.
    #[error("dialog '{id}' not found")]
    DialogNotFound {
        /// The unknown dialog id.
        id: String,
    },

    /// A dialog with the same id is already registered in the set.
    #[error("dialog '{id}' is already registered")]
    DuplicateDialog {
        /// The duplicate id.
        id: String,
    },

    /// The operation needs an active dialog but the stack is empty.
    #[error("no active dialog")]
    NoActiveDialog,

    /// The dialog set was created without a state accessor.
    #[error("dialog set has no state accessor")]
    MissingState,

    /// The options passed to a dialog were missing or malformed.
    #[error("invalid dialog options: {0}")]
    InvalidOptions(String),

    /// A frame's persisted state could not be (de)serialized.
    #[error("dialog state serialization error: {0}")]
    Serialization(String),

    /// A failure from the turn pipeline (sending, storage, user code).
    #[error(transparent)]
    Bot(#[from] BotError),
}

impl DialogError {
    /// Creates a dialog-not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::DialogNotFound { id: id.into() }
    }

    /// Returns `true` if the underlying failure was a stale state write.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Bot(e) if e.is_retryable())
    }
}

impl From<StorageError> for DialogError {
    fn from(err: StorageError) -> Self {
        Self::Bot(BotError::Storage(err))
    }
}

impl From<serde_json::Error> for DialogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<DialogError> for BotError {
    fn from(err: DialogError) -> Self {
        match err {
            DialogError::Bot(inner) => inner,
            other => BotError::other(other),
        }
    }
}

/// Result type for dialog operations.
pub type DialogResult<T> = Result<T, DialogError>;
