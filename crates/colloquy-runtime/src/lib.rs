//! Colloquy Runtime - Orchestration layer for the Colloquy bot framework.
//!
//! This crate provides:
//! - Turn orchestration (`BotRuntime`)
//! - Per-conversation turn serialization (`ConversationLocks`)
//! - Durable state storage on disk (`FileStorage`)
//! - Configuration loading (`ConfigLoader`)
//! - Logging configuration
//! - An in-memory channel for tests (`testing::TestAdapter`)
//!
//! # Running turns
//!
//! ```ignore
//! use colloquy_runtime::{BotRuntime, load_config};
//! use colloquy_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::builder()
//!         .config(load_config()?)
//!         .init_logging()
//!         .adapter(MyChannel::new())
//!         .use_middleware(ActivityLoggerMiddleware)
//!         .build()?;
//!
//!     let bot = into_callback(|ctx| async move {
//!         ctx.send_text("hello").await?;
//!         Ok(())
//!     });
//!
//!     while let Some(activity) = next_inbound().await {
//!         runtime.process_activity(activity, bot.clone()).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Turns of the same conversation are run one at a time so their state
//! load/save cycles cannot interleave; turns of different conversations run
//! concurrently. Disable with `turns.serialize_turns = false` when the
//! channel already guarantees ordering.

pub mod config;
pub mod error;
pub mod locks;
pub mod logging;
pub mod runtime;
pub mod storage;
pub mod testing;

// Re-exports
pub use config::{
    ColloquyConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig, Profile,
    StorageBackend, StorageConfig, TurnConfig, load_config, load_config_from_file,
};
pub use error::{RuntimeError, RuntimeResult};
pub use locks::{ConversationGuard, ConversationLocks};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{BotRuntime, RuntimeBuilder, TurnErrorHandler};
pub use storage::{FileStorage, open_storage};
pub use testing::TestAdapter;

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
