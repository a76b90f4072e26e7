use std::path::PathBuf;

use thiserror::Error;

/// Why a [`ColloquyConfig`](super::ColloquyConfig) could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration file at {}", .0.display())]
    FileNotFound(PathBuf),

    /// A source was unreadable, malformed, or of an unsupported format.
    #[error("unreadable configuration: {0}")]
    ParseError(String),

    #[error("invalid configuration: {message}")]
    ValidationError { message: String },

    /// A setting that becomes mandatory because of another one, such as
    /// `logging.file_path` when logging to a file.
    #[error("`{field}` must be set")]
    MissingField { field: String },
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
