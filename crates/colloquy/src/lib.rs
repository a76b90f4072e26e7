//! # Colloquy
//!
//! A conversational bot framework built from two pieces: a middleware turn
//! pipeline and a persisted, resumable dialog stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────┐     ┌───────────────────────────────┐
//! │ BotRuntime  │────▶│ MiddlewareSet        │────▶│ DialogManager                 │
//! │  (per-conv  │     │  logger ─▶ catch ─▶ …│     │   DialogContext ─▶ [root,     │
//! │   locking)  │     └──────────────────────┘     │                     child, …] │
//! └─────────────┘                │                 └───────────────┬───────────────┘
//!        ▲                       ▼                                 ▼
//!        │                 BotAdapter ──▶ channel          BotState ──▶ Storage
//!     channel
//! ```
//!
//! - **Runtime**: turns, per-conversation serialization, configuration and logging
//! - **Middleware**: ordered interceptors that run around the bot logic
//! - **Dialogs**: a call stack of conversational steps persisted between turns
//! - **State**: scoped, e-tagged records on a pluggable [`Storage`](core::Storage)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use colloquy::prelude::*;
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
//!     let greet = WaterfallDialog::new("greet")
//!         .step(|step| async move { step.prompt("name", PromptOptions::new("Name?")).await })
//!         .step(|step| async move {
//!             let name = step.result().cloned().unwrap_or_default();
//!             step.turn_context().send_text(format!("Hi {name}")).await?;
//!             step.end_dialog(None).await
//!         });
//!
//!     let manager = DialogManager::new(BotState::conversation(runtime.storage().clone()), greet)?
//!         .add_dialog(TextPrompt::text("name"))?;
//!
//!     while let Some(activity) = next_inbound().await {
//!         runtime.process_activity(activity, manager.callback()).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use colloquy_core as core;
pub use colloquy_dialogs as dialogs;
pub use colloquy_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use colloquy::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use colloquy_runtime::{BotRuntime, ColloquyConfig, ConfigLoader, load_config};

    // Turn pipeline
    pub use colloquy_core::prelude::*;
    pub use colloquy_core::{BoxedStorage, StatePropertyAccessor};

    // Dialogs
    pub use colloquy_dialogs::prelude::*;
}
