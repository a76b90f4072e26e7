//! Unified error types for the Colloquy core.
//!
//! This module provides the error types shared by the turn pipeline, the
//! turn context and the storage layer. Dialog-level errors live in
//! `colloquy-dialogs` and convert into [`BotError`] at the pipeline boundary.

use thiserror::Error;

/// A type-erased error, used for failures raised by user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors that can occur in storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The supplied e-tag no longer matches the stored item.
    ///
    /// This is a retryable condition: the caller should reload and reapply
    /// its changes instead of overwriting.
    #[error("e-tag conflict for '{key}': expected '{expected}', found '{actual}'")]
    ETagConflict {
        /// The key that failed to write.
        key: String,
        /// The e-tag the writer supplied.
        expected: String,
        /// The e-tag currently stored.
        actual: String,
    },

    /// The item could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns `true` if retrying the read-modify-write cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ETagConflict { .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Bot Errors
// =============================================================================

/// Errors that can occur while processing a turn.
#[derive(Debug, Error)]
pub enum BotError {
    /// The channel transport rejected an outbound operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The turn was cancelled before this stage ran.
    #[error("turn cancelled")]
    Cancelled,

    /// A failure raised by middleware, bot logic or dialogs.
    #[error(transparent)]
    Other(BoxError),
}

impl BotError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wraps an arbitrary error.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Other(err.into())
    }

    /// Returns `true` if this error came from a stale storage write.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for turn processing.
pub type BotResult<T> = Result<T, BotError>;
