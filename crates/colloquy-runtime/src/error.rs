//! Runtime error types.

use colloquy_core::BotError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The turn failed and no on-turn-error handler took care of it.
    #[error(transparent)]
    Turn(#[from] BotError),

    /// The runtime was built without a transport.
    #[error("No adapter configured")]
    MissingAdapter,

    /// The runtime no longer accepts turns.
    #[error("Runtime is shut down")]
    ShutDown,

    /// The inbound activity cannot start a turn.
    #[error("Invalid activity: {0}")]
    InvalidActivity(String),
}

impl RuntimeError {
    /// Returns `true` if the failure was a stale state write.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Turn(e) if e.is_retryable())
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
