//! Configuration module for the Colloquy runtime.
//!
//! This module provides figment-based configuration loading and validation
//! for logging, state storage and turn processing.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ColloquyConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig,
    StorageBackend, StorageConfig, TurnConfig,
};
pub use validation::validate_config;
