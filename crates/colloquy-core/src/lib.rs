//! # Colloquy Core
//!
//! The turn pipeline of the Colloquy bot framework.
//!
//! This crate provides everything that happens within a single turn: the
//! activity model, the per-turn context, the middleware pipeline around the
//! bot's logic, the transport abstraction and the state layer that carries
//! data from one turn to the next.
//!
//! ## Building Blocks
//!
//! - **Activities**: the message/event envelope ([`Activity`], [`ConversationReference`])
//! - **Turn Context**: one inbound activity plus outbound hooks and a service bag ([`TurnContext`], [`TurnState`])
//! - **Pipeline**: ordered, nestable interceptors ([`Middleware`], [`MiddlewareSet`], [`Next`])
//! - **Tower Integration**: a whole turn as a service ([`PipelineService`])
//! - **Transport**: outbound delivery to the channel ([`BotAdapter`])
//! - **State**: optimistic-concurrency storage and scoped state ([`Storage`], [`BotState`])
//!
//! ## Turn Flow
//!
//! ```text
//! ┌─────────┐    ┌──────────────────────────────────────┐    ┌─────────────┐
//! │ channel │───▶│ MiddlewareSet                        │    │             │
//! │         │    │   m0 ─▶ m1 ─▶ … ─▶ bot logic          │───▶│  BotAdapter │──▶ channel
//! └─────────┘    │   (sends pass through context hooks) │    │             │
//!                └──────────────────────────────────────┘    └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use colloquy_core::prelude::*;
//!
//! let mut pipeline = MiddlewareSet::new();
//! pipeline
//!     .use_middleware(CatchErrorMiddleware::new(|ctx, _err| async move {
//!         ctx.send_text("Sorry, something went wrong.").await?;
//!         Ok(())
//!     }))
//!     .use_middleware(ActivityLoggerMiddleware);
//!
//! let echo = into_callback(|ctx| async move {
//!     let text = ctx.activity().text_or_empty().to_string();
//!     ctx.send_text(format!("You said: {text}")).await?;
//!     Ok(())
//! });
//!
//! pipeline.receive_activity_with_status(ctx, echo).await?;
//! ```

pub mod activity;
pub mod adapter;
pub mod builtin;
pub mod context;
pub mod error;
pub mod hooks;
pub mod middleware;
pub mod service;
pub mod state;
pub mod storage;
pub mod turn_state;

#[cfg(test)]
pub(crate) mod test_support;

pub use activity::{
    Activity, ActivityType, ChannelAccount, ConversationAccount, ConversationReference,
};
pub use adapter::{BotAdapter, BoxedAdapter, ResourceResponse};
pub use builtin::{ActivityLoggerMiddleware, AutoSaveStateMiddleware, CatchErrorMiddleware};
pub use context::TurnContext;
pub use error::{BotError, BotResult, BoxError, StorageError, StorageResult};
pub use hooks::{
    DeleteActivityHook, Hook, HookNext, SendActivitiesHook, UpdateActivityHook, delete_hook,
    hook_fn, send_hook, update_hook,
};
pub use middleware::{
    BotCallback, Middleware, MiddlewareFn, MiddlewareSet, Next, into_callback, middleware_fn,
};
pub use service::PipelineService;
pub use state::{BotState, StatePropertyAccessor, StateScope};
pub use storage::{ANY_ETAG, BoxedStorage, MemoryStorage, Storage, StoreItem, check_etag};
pub use turn_state::TurnState;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        Activity, ActivityLoggerMiddleware, ActivityType, AutoSaveStateMiddleware, BotAdapter,
        BotCallback, BotError, BotResult, BotState, CatchErrorMiddleware, ConversationReference,
        MemoryStorage, Middleware, MiddlewareSet, Next, PipelineService, Storage, TurnContext,
        into_callback, middleware_fn,
    };
}
