//! The middleware turn pipeline.
//!
//! A [`MiddlewareSet`] runs an ordered list of interceptors around a terminal
//! action (the bot's own turn logic). Registration order is nesting order:
//! the first registered middleware enters first and exits last.
//!
//! ```text
//! receive_activity_with_status(ctx, bot)
//!   │
//!   ├─► m0.on_turn(ctx, next₁) ──────────────────────────────┐
//!   │       pre-logic                                          │
//!   │       next₁.run() ─► m1.on_turn(ctx, next₂)              │
//!   │                         pre-logic                        │
//!   │                         next₂.run() ─► bot(ctx)          │
//!   │                         post-logic                       │
//!   │       post-logic                                         │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each [`Next`] is a one-shot continuation: [`Next::run`] consumes it, and
//! dropping it without running is a short-circuit. Errors raised downstream
//! come back out of the caller's own `next.run().await`, so an outer
//! middleware can catch what an inner stage raised.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut set = MiddlewareSet::new();
//! set.use_middleware(middleware_fn(|ctx, next: Next| async move {
//!     tracing::info!(text = ctx.activity().text_or_empty(), "inbound");
//!     next.run().await
//! }));
//!
//! let completed = set
//!     .receive_activity_with_status(ctx, into_callback(|ctx| async move {
//!         ctx.send_text("hello").await?;
//!         Ok(())
//!     }))
//!     .await?;
//! ```

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{Instrument, debug, debug_span, trace};

use crate::context::TurnContext;
use crate::error::{BotError, BotResult};

// =============================================================================
// Middleware Trait
// =============================================================================

/// An interceptor in the turn pipeline.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Processes the turn. Call `next.run().await` to continue the pipeline;
    /// return without calling it to short-circuit.
    async fn on_turn(&self, ctx: Arc<TurnContext>, next: Next) -> BotResult<()>;

    /// A name used in logs.
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

/// The terminal turn logic invoked after all middleware.
pub type BotCallback =
    Arc<dyn Fn(Arc<TurnContext>) -> BoxFuture<'static, BotResult<()>> + Send + Sync>;

/// Builds a [`BotCallback`] from an async closure.
pub fn into_callback<F, Fut>(f: F) -> BotCallback
where
    F: Fn(Arc<TurnContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BotResult<()>> + Send + 'static,
{
    Arc::new(move |ctx: Arc<TurnContext>| {
        Box::pin(f(ctx)) as BoxFuture<'static, BotResult<()>>
    })
}

// =============================================================================
// Chain & Next
// =============================================================================

enum Terminal {
    Noop,
    Callback(BotCallback),
    /// The `next` of an enclosing set this one is nested in.
    Outer(Next),
}

struct Chain {
    middleware: Arc<[Arc<dyn Middleware>]>,
    terminal: Mutex<Option<Terminal>>,
    reached: AtomicBool,
}

impl Chain {
    fn new(middleware: Arc<[Arc<dyn Middleware>]>, terminal: Terminal) -> Arc<Self> {
        Arc::new(Self {
            middleware,
            terminal: Mutex::new(Some(terminal)),
            reached: AtomicBool::new(false),
        })
    }

    fn invoke(
        self: Arc<Self>,
        ctx: Arc<TurnContext>,
        index: usize,
    ) -> BoxFuture<'static, BotResult<()>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(BotError::Cancelled);
            }

            if let Some(middleware) = self.middleware.get(index).cloned() {
                trace!(index, middleware = middleware.name(), "Entering middleware");
                let next = Next {
                    ctx: Arc::clone(&ctx),
                    chain: Arc::clone(&self),
                    index: index + 1,
                };
                return middleware.on_turn(ctx, next).await;
            }

            let terminal = self.terminal.lock().take();
            match terminal {
                Some(Terminal::Callback(callback)) => callback(ctx).await?,
                Some(Terminal::Outer(next)) => next.run().await?,
                Some(Terminal::Noop) | None => {}
            }
            // Only a terminal that finished cleanly counts as completion.
            self.reached.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// The rest of the pipeline, including the terminal bot logic.
///
/// Consumed by [`run`](Self::run); it cannot be invoked twice.
pub struct Next {
    ctx: Arc<TurnContext>,
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Runs the remaining middleware and the terminal action.
    ///
    /// Fails with [`BotError::Cancelled`] if the turn was cancelled before
    /// the next stage starts.
    pub async fn run(self) -> BotResult<()> {
        self.chain.invoke(self.ctx, self.index).await
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &(self.chain.middleware.len().saturating_sub(self.index)))
            .finish()
    }
}

// =============================================================================
// MiddlewareSet
// =============================================================================

/// An ordered set of middleware.
///
/// The set is itself a [`Middleware`], so sets can be nested; the members of
/// a nested set run as if they had been registered inline at its position.
#[derive(Clone, Default)]
pub struct MiddlewareSet {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the set.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware to the set.
    pub fn use_arc(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Builder-style variant of [`use_middleware`](Self::use_middleware).
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.use_middleware(middleware);
        self
    }

    /// Returns the number of registered middleware.
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Returns `true` if no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Runs the pipeline with a no-op terminal action.
    pub async fn receive_activity(&self, ctx: Arc<TurnContext>) -> BotResult<()> {
        self.run(ctx, Terminal::Noop).await.map(|_| ())
    }

    /// Runs the pipeline with `callback` as the terminal action.
    ///
    /// Returns `Ok(true)` if every middleware continued and the callback
    /// completed without error, `Ok(false)` if some middleware
    /// short-circuited or swallowed a failure from further down.
    pub async fn receive_activity_with_status(
        &self,
        ctx: Arc<TurnContext>,
        callback: BotCallback,
    ) -> BotResult<bool> {
        self.run(ctx, Terminal::Callback(callback)).await
    }

    async fn run(&self, ctx: Arc<TurnContext>, terminal: Terminal) -> BotResult<bool> {
        let span = debug_span!(
            "receive_activity",
            activity_type = %ctx.activity().activity_type,
            middleware = self.middleware.len(),
        );

        let chain = Chain::new(Arc::from(self.middleware.clone()), terminal);
        Arc::clone(&chain).invoke(ctx, 0).instrument(span).await?;

        let reached = chain.reached.load(Ordering::SeqCst);
        if !reached {
            debug!("Pipeline short-circuited before the terminal action");
        }
        Ok(reached)
    }
}

#[async_trait]
impl Middleware for MiddlewareSet {
    async fn on_turn(&self, ctx: Arc<TurnContext>, next: Next) -> BotResult<()> {
        let chain = Chain::new(Arc::from(self.middleware.clone()), Terminal::Outer(next));
        chain.invoke(ctx, 0).await
    }

    fn name(&self) -> &str {
        "MiddlewareSet"
    }
}

impl std::fmt::Debug for MiddlewareSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.middleware.iter().map(|m| m.name()))
            .finish()
    }
}

// =============================================================================
// Closure Middleware
// =============================================================================

type MiddlewareHandler =
    Arc<dyn Fn(Arc<TurnContext>, Next) -> BoxFuture<'static, BotResult<()>> + Send + Sync>;

/// A middleware backed by an async closure. Created by [`middleware_fn`].
pub struct MiddlewareFn {
    name: String,
    handler: MiddlewareHandler,
}

impl MiddlewareFn {
    /// Sets the name shown in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Middleware for MiddlewareFn {
    async fn on_turn(&self, ctx: Arc<TurnContext>, next: Next) -> BotResult<()> {
        (self.handler)(ctx, next).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapts an async closure into a [`Middleware`].
pub fn middleware_fn<F, Fut>(f: F) -> MiddlewareFn
where
    F: Fn(Arc<TurnContext>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BotResult<()>> + Send + 'static,
{
    MiddlewareFn {
        name: "middleware_fn".to_string(),
        handler: Arc::new(move |ctx: Arc<TurnContext>, next: Next| {
            Box::pin(f(ctx, next)) as BoxFuture<'static, BotResult<()>>
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingAdapter, inbound, turn};
    use std::sync::atomic::AtomicUsize;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Tracer {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Middleware for Tracer {
        async fn on_turn(&self, _ctx: Arc<TurnContext>, next: Next) -> BotResult<()> {
            self.log.lock().push(format!("enter {}", self.name));
            next.run().await?;
            self.log.lock().push(format!("exit {}", self.name));
            Ok(())
        }
    }

    fn tracer(name: &'static str, log: &Log) -> Tracer {
        Tracer {
            name,
            log: Arc::clone(log),
        }
    }

    fn recording_callback(log: &Log) -> BotCallback {
        let log = Arc::clone(log);
        into_callback(move |_ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push("bot".to_string());
                Ok(())
            }
        })
    }

    fn ctx() -> Arc<TurnContext> {
        turn(&RecordingAdapter::new(), inbound("hi"))
    }

    #[tokio::test]
    async fn test_enter_in_order_exit_in_reverse() {
        let log = Log::default();
        let set = MiddlewareSet::new()
            .with(tracer("A", &log))
            .with(tracer("B", &log));

        set.receive_activity(ctx()).await.unwrap();
        assert_eq!(*log.lock(), ["enter A", "enter B", "exit B", "exit A"]);
    }

    #[tokio::test]
    async fn test_callback_runs_once_between_pre_and_post_logic() {
        let log = Log::default();
        let set = MiddlewareSet::new()
            .with(tracer("A", &log))
            .with(tracer("B", &log))
            .with(tracer("C", &log));

        let completed = set
            .receive_activity_with_status(ctx(), recording_callback(&log))
            .await
            .unwrap();

        assert!(completed);
        assert_eq!(
            *log.lock(),
            ["enter A", "enter B", "enter C", "bot", "exit C", "exit B", "exit A"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_stops_downstream() {
        let log = Log::default();
        let gate_log = Arc::clone(&log);
        let set = MiddlewareSet::new()
            .with(tracer("A", &log))
            .with(middleware_fn(move |_ctx, _next: Next| {
                let log = Arc::clone(&gate_log);
                async move {
                    log.lock().push("gate".to_string());
                    Ok(())
                }
            }))
            .with(tracer("C", &log));

        let completed = set
            .receive_activity_with_status(ctx(), recording_callback(&log))
            .await
            .unwrap();

        assert!(!completed);
        assert_eq!(*log.lock(), ["enter A", "gate", "exit A"]);
    }

    #[tokio::test]
    async fn test_empty_set() {
        let set = MiddlewareSet::new();
        assert!(set.is_empty());
        set.receive_activity(ctx()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let completed = set
            .receive_activity_with_status(
                ctx(),
                into_callback(move |_ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                }),
            )
            .await
            .unwrap();

        assert!(completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_set_runs_inline() {
        let log = Log::default();
        let inner = MiddlewareSet::new()
            .with(tracer("B", &log))
            .with(tracer("C", &log));
        let outer = MiddlewareSet::new()
            .with(tracer("A", &log))
            .with(inner)
            .with(tracer("D", &log));

        let completed = outer
            .receive_activity_with_status(ctx(), recording_callback(&log))
            .await
            .unwrap();

        assert!(completed);
        assert_eq!(
            *log.lock(),
            [
                "enter A", "enter B", "enter C", "enter D", "bot", "exit D", "exit C", "exit B",
                "exit A"
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_short_circuit_blocks_outer_terminal() {
        let log = Log::default();
        let inner = MiddlewareSet::new().with(middleware_fn(|_ctx, _next: Next| async { Ok(()) }));
        let outer = MiddlewareSet::new()
            .with(inner)
            .with(tracer("after", &log));

        let completed = outer
            .receive_activity_with_status(ctx(), recording_callback(&log))
            .await
            .unwrap();

        assert!(!completed);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_outer_middleware_catches_inner_error() {
        let caught = Log::default();
        let sink = Arc::clone(&caught);
        let set = MiddlewareSet::new()
            .with(middleware_fn(move |_ctx, next: Next| {
                let sink = Arc::clone(&sink);
                async move {
                    if let Err(err) = next.run().await {
                        sink.lock().push(err.to_string());
                    }
                    Ok(())
                }
            }))
            .with(middleware_fn(|_ctx, _next: Next| async {
                Err(BotError::other("inner failure"))
            }));

        let completed = set
            .receive_activity_with_status(ctx(), into_callback(|_ctx| async { Ok(()) }))
            .await
            .unwrap();

        assert!(!completed);
        assert_eq!(*caught.lock(), ["inner failure"]);
    }

    #[tokio::test]
    async fn test_caught_callback_failure_is_not_completion() {
        let caught = Log::default();
        let sink = Arc::clone(&caught);
        let set = MiddlewareSet::new().with(middleware_fn(move |_ctx, next: Next| {
            let sink = Arc::clone(&sink);
            async move {
                if let Err(err) = next.run().await {
                    sink.lock().push(err.to_string());
                }
                Ok(())
            }
        }));

        let completed = set
            .receive_activity_with_status(
                ctx(),
                into_callback(|_ctx| async { Err(BotError::other("bot failed")) }),
            )
            .await
            .unwrap();

        assert!(!completed);
        assert_eq!(*caught.lock(), ["bot failed"]);
    }

    #[tokio::test]
    async fn test_nested_set_completion_follows_outer_callback() {
        let set = MiddlewareSet::new()
            .with(middleware_fn(|_ctx, next: Next| async move {
                let _ = next.run().await;
                Ok(())
            }))
            .with(MiddlewareSet::new().with(middleware_fn(|_ctx, next: Next| next.run())));

        let failed = set
            .receive_activity_with_status(
                ctx(),
                into_callback(|_ctx| async { Err(BotError::other("bot failed")) }),
            )
            .await
            .unwrap();
        let succeeded = set
            .receive_activity_with_status(ctx(), into_callback(|_ctx| async { Ok(()) }))
            .await
            .unwrap();

        assert!(!failed);
        assert!(succeeded);
    }

    #[tokio::test]
    async fn test_error_before_next_propagates() {
        let log = Log::default();
        let set = MiddlewareSet::new()
            .with(middleware_fn(|_ctx, _next: Next| async {
                Err(BotError::invalid_argument("bad input"))
            }))
            .with(tracer("B", &log));

        let err = set
            .receive_activity_with_status(ctx(), recording_callback(&log))
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::InvalidArgument(_)));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_fails_next_stage() {
        let log = Log::default();
        let observed = Log::default();
        let sink = Arc::clone(&observed);
        let set = MiddlewareSet::new()
            .with(middleware_fn(move |_ctx, next: Next| {
                let sink = Arc::clone(&sink);
                async move {
                    let result = next.run().await;
                    if let Err(err) = &result {
                        sink.lock().push(err.to_string());
                    }
                    result
                }
            }))
            .with(middleware_fn(|ctx: Arc<TurnContext>, next: Next| async move {
                ctx.cancel();
                next.run().await
            }))
            .with(tracer("C", &log));

        let err = set
            .receive_activity_with_status(ctx(), recording_callback(&log))
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::Cancelled));
        assert_eq!(*observed.lock(), ["turn cancelled"]);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_names() {
        let set = MiddlewareSet::new()
            .with(middleware_fn(|_ctx, next: Next| next.run()).named("passthrough"));
        assert_eq!(format!("{set:?}"), r#"["passthrough"]"#);
    }
}
