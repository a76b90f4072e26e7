//! Turn orchestration.
//!
//! [`BotRuntime`] is the entry point a channel integration calls for every
//! inbound activity. It wraps the activity in a [`TurnContext`], waits for
//! its conversation's turn lock, runs the middleware pipeline and the bot
//! callback through a [`PipelineService`], and routes unhandled failures to
//! the on-turn-error handler.
//!
//! ```text
//!  activity ──▶ TurnContext ──▶ ConversationLocks ──▶ PipelineService ──▶ callback
//!                                  (per conversation)      (middleware)
//!                                                             │ Err
//!                                                             ▼
//!                                                     on_turn_error / Err
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use colloquy_runtime::BotRuntime;
//!
//! let runtime = BotRuntime::builder()
//!     .config(load_config()?)
//!     .init_logging()
//!     .adapter(my_adapter)
//!     .use_middleware(ActivityLoggerMiddleware)
//!     .on_turn_error(|ctx, err| async move {
//!         ctx.send_text("Sorry, something went wrong.").await?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! runtime.process_activity(activity, manager.callback()).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use colloquy_core::{
    Activity, BotAdapter, BotCallback, BotError, BotResult, BoxedAdapter, BoxedStorage,
    ConversationReference, Middleware, MiddlewareSet, PipelineService, TurnContext,
};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{Instrument, debug, error, info, info_span};

use crate::config::ColloquyConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::locks::ConversationLocks;
use crate::logging;
use crate::storage::open_storage;

/// Handles a turn failure nothing downstream handled.
pub type TurnErrorHandler =
    Arc<dyn Fn(Arc<TurnContext>, BotError) -> BoxFuture<'static, BotResult<()>> + Send + Sync>;

/// Drives turns through the middleware pipeline.
#[derive(Clone)]
pub struct BotRuntime {
    adapter: BoxedAdapter,
    middleware: Arc<MiddlewareSet>,
    on_turn_error: Option<TurnErrorHandler>,
    locks: Option<ConversationLocks>,
    storage: BoxedStorage,
    config: Arc<ColloquyConfig>,
    shutdown: CancellationToken,
}

impl BotRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Returns the configuration the runtime was built with.
    pub fn config(&self) -> &ColloquyConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn adapter(&self) -> &BoxedAdapter {
        &self.adapter
    }

    /// Returns the storage selected by the configuration, for building
    /// [`BotState`](colloquy_core::BotState)s.
    pub fn storage(&self) -> &BoxedStorage {
        &self.storage
    }

    /// Returns the middleware every turn runs through.
    pub fn middleware(&self) -> &Arc<MiddlewareSet> {
        &self.middleware
    }

    /// Returns `true` if turns of one conversation run one at a time.
    pub fn serializes_turns(&self) -> bool {
        self.locks.is_some()
    }

    // ─── Shutdown ─────────────────────────────────────────────────────────────

    /// Cancels every running turn and rejects new ones.
    ///
    /// Turns observe the cancellation at their next pipeline stage and fail
    /// with [`BotError::Cancelled`].
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Shutting down runtime");
            self.shutdown.cancel();
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns the token every turn's cancellation token derives from.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    // ─── Turns ────────────────────────────────────────────────────────────────

    /// Runs one turn for an inbound activity.
    ///
    /// Returns whether the pipeline ran to completion (`false` if a
    /// middleware short-circuited, or a failure was handled by the
    /// on-turn-error handler).
    pub async fn process_activity(
        &self,
        activity: Activity,
        callback: BotCallback,
    ) -> RuntimeResult<bool> {
        if activity.conversation.id.is_empty() {
            return Err(RuntimeError::InvalidActivity(
                "activity has no conversation id".to_string(),
            ));
        }
        let ctx = TurnContext::new(Arc::clone(&self.adapter), activity)
            .with_cancellation(self.shutdown.child_token());
        self.run_turn(Arc::new(ctx), callback).await
    }

    /// Starts a proactive turn in the conversation of `reference`.
    ///
    /// The turn's activity is a `ContinueConversation` event addressed from
    /// the reference, so state scopes resolve to the same conversation.
    pub async fn continue_conversation(
        &self,
        reference: &ConversationReference,
        callback: BotCallback,
    ) -> RuntimeResult<bool> {
        debug!(conversation = %reference.conversation_key(), "Continuing conversation");
        self.process_activity(reference.continuation_activity(), callback)
            .await
    }

    /// Runs a turn for an already built context.
    pub async fn run_turn(
        &self,
        ctx: Arc<TurnContext>,
        callback: BotCallback,
    ) -> RuntimeResult<bool> {
        if self.is_shut_down() {
            return Err(RuntimeError::ShutDown);
        }

        let key = ctx.conversation_reference().conversation_key();
        let span = info_span!(
            "turn",
            conversation = %key,
            activity_type = ctx.activity().activity_type.as_str(),
        );

        async move {
            let _guard = match &self.locks {
                Some(locks) => Some(locks.acquire(&key).await),
                None => None,
            };

            let service = PipelineService::new(Arc::clone(&self.middleware), callback);
            match service.oneshot(Arc::clone(&ctx)).await {
                Ok(completed) => {
                    debug!(completed, "Turn finished");
                    Ok(completed)
                }
                Err(err) => self.handle_turn_error(ctx, err).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_turn_error(
        &self,
        ctx: Arc<TurnContext>,
        err: BotError,
    ) -> RuntimeResult<bool> {
        let Some(handler) = &self.on_turn_error else {
            error!(error = %err, "Unhandled turn error");
            return Err(RuntimeError::Turn(err));
        };

        error!(error = %err, "Turn failed, running on-turn-error handler");
        if let Err(handler_err) = handler(ctx, err).await {
            error!(error = %handler_err, "On-turn-error handler failed");
            return Err(RuntimeError::Turn(handler_err));
        }
        Ok(false)
    }
}

impl std::fmt::Debug for BotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRuntime")
            .field("middleware", &self.middleware)
            .field("on_turn_error", &self.on_turn_error.is_some())
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`BotRuntime`].
pub struct RuntimeBuilder {
    config: ColloquyConfig,
    adapter: Option<BoxedAdapter>,
    middleware: MiddlewareSet,
    on_turn_error: Option<TurnErrorHandler>,
    storage: Option<BoxedStorage>,
    serialize_turns: Option<bool>,
}

impl RuntimeBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: ColloquyConfig::default(),
            adapter: None,
            middleware: MiddlewareSet::new(),
            on_turn_error: None,
            storage: None,
            serialize_turns: None,
        }
    }

    /// Uses a loaded configuration.
    pub fn config(mut self, config: ColloquyConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs the global subscriber described by the configured
    /// logging section. Call after [`config`](Self::config).
    pub fn init_logging(self) -> Self {
        logging::init_from_config(&self.config.logging);
        self
    }

    /// Sets the transport.
    pub fn adapter(self, adapter: impl BotAdapter) -> Self {
        self.adapter_arc(Arc::new(adapter))
    }

    /// Sets a shared transport.
    pub fn adapter_arc(mut self, adapter: BoxedAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Appends a middleware.
    pub fn use_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.use_middleware(middleware);
        self
    }

    /// Replaces the middleware set.
    pub fn middleware(mut self, middleware: MiddlewareSet) -> Self {
        self.middleware = middleware;
        self
    }

    /// Sets the handler for turn failures nothing downstream handled.
    pub fn on_turn_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arc<TurnContext>, BotError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BotResult<()>> + Send + 'static,
    {
        self.on_turn_error = Some(Arc::new(move |ctx: Arc<TurnContext>, err: BotError| {
            Box::pin(handler(ctx, err)) as BoxFuture<'static, BotResult<()>>
        }));
        self
    }

    /// Overrides the configured storage.
    pub fn storage(mut self, storage: BoxedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Overrides `turns.serialize_turns`.
    pub fn serialize_turns(mut self, enabled: bool) -> Self {
        self.serialize_turns = Some(enabled);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> RuntimeResult<BotRuntime> {
        let adapter = self.adapter.ok_or(RuntimeError::MissingAdapter)?;
        let serialize = self
            .serialize_turns
            .unwrap_or(self.config.turns.serialize_turns);

        let storage = self
            .storage
            .unwrap_or_else(|| open_storage(&self.config.storage));

        info!(
            middleware = self.middleware.len(),
            storage = ?self.config.storage.backend,
            serialize_turns = serialize,
            "Runtime initialized"
        );

        Ok(BotRuntime {
            adapter,
            middleware: Arc::new(self.middleware),
            on_turn_error: self.on_turn_error,
            locks: serialize.then(ConversationLocks::new),
            storage,
            config: Arc::new(self.config),
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestAdapter;
    use colloquy_core::{Next, into_callback, middleware_fn};
    use parking_lot::Mutex;

    fn echo() -> BotCallback {
        into_callback(|ctx: Arc<TurnContext>| async move {
            let text = ctx.activity().text_or_empty().to_string();
            ctx.send_text(format!("echo: {text}")).await?;
            Ok(())
        })
    }

    fn failing() -> BotCallback {
        into_callback(|_ctx: Arc<TurnContext>| async move {
            Err(BotError::invalid_argument("boom"))
        })
    }

    #[test]
    fn test_build_requires_adapter() {
        let err = BotRuntime::builder().build().unwrap_err();
        assert!(matches!(err, RuntimeError::MissingAdapter));
    }

    #[test]
    fn test_build_follows_turn_config() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .build()
            .unwrap();
        assert!(runtime.serializes_turns());

        let mut config = ColloquyConfig::default();
        config.turns.serialize_turns = false;
        let runtime = BotRuntime::builder()
            .config(config)
            .adapter_arc(adapter)
            .build()
            .unwrap();
        assert!(!runtime.serializes_turns());
    }

    #[tokio::test]
    async fn test_process_activity_runs_pipeline() {
        let adapter = TestAdapter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);

        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .use_middleware(middleware_fn(move |_ctx, next: Next| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push("enter");
                    next.run().await?;
                    seen.lock().push("exit");
                    Ok(())
                }
            }))
            .build()
            .unwrap();

        let completed = runtime
            .process_activity(adapter.make_activity("hi"), echo())
            .await
            .unwrap();

        assert!(completed);
        assert_eq!(*log.lock(), ["enter", "exit"]);
        assert_eq!(adapter.reply_texts(), ["echo: hi"]);
    }

    #[tokio::test]
    async fn test_short_circuit_reports_incomplete() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .use_middleware(middleware_fn(|_ctx, _next: Next| async move { Ok(()) }))
            .build()
            .unwrap();

        let completed = runtime
            .process_activity(adapter.make_activity("hi"), echo())
            .await
            .unwrap();

        assert!(!completed);
        assert!(adapter.reply_texts().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_activity_without_conversation() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter)
            .build()
            .unwrap();

        let err = runtime
            .process_activity(Activity::message("hi"), echo())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidActivity(_)));
    }

    #[tokio::test]
    async fn test_unhandled_error_propagates() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .build()
            .unwrap();

        let err = runtime
            .process_activity(adapter.make_activity("hi"), failing())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Turn(BotError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_on_turn_error_handles_failure() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .on_turn_error(|ctx, err| async move {
                ctx.send_text(format!("sorry: {err}")).await?;
                Ok(())
            })
            .build()
            .unwrap();

        let completed = runtime
            .process_activity(adapter.make_activity("hi"), failing())
            .await
            .unwrap();

        assert!(!completed);
        assert_eq!(adapter.reply_texts(), ["sorry: invalid argument: boom"]);
    }

    #[tokio::test]
    async fn test_failing_error_handler_propagates_its_error() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .on_turn_error(|_ctx, _err| async move { Err(BotError::transport("down")) })
            .build()
            .unwrap();

        let err = runtime
            .process_activity(adapter.make_activity("hi"), failing())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Turn(BotError::Transport(_))));
    }

    #[tokio::test]
    async fn test_continue_conversation_targets_reference() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .build()
            .unwrap();

        let reference = adapter.conversation_reference().clone();
        let proactive = into_callback(|ctx: Arc<TurnContext>| async move {
            assert_eq!(ctx.activity().name.as_deref(), Some("ContinueConversation"));
            ctx.send_text("ping").await?;
            Ok(())
        });

        assert!(runtime.continue_conversation(&reference, proactive).await.unwrap());
        let sent = adapter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].conversation.id, "convo1");
        assert_eq!(sent[0].text.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_turns() {
        let adapter = TestAdapter::new();
        let runtime = BotRuntime::builder()
            .adapter_arc(adapter.clone())
            .build()
            .unwrap();

        runtime.shutdown();
        assert!(runtime.is_shut_down());

        let err = runtime
            .process_activity(adapter.make_activity("hi"), echo())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ShutDown));
    }
}
