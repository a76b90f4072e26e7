//! Middleware shipped with the core.
//!
//! - [`AutoSaveStateMiddleware`]: persists registered [`BotState`]s after the
//!   rest of the turn succeeded.
//! - [`CatchErrorMiddleware`]: converts a failure raised anywhere downstream
//!   into a handler call (typically a "something went wrong" reply).
//! - [`ActivityLoggerMiddleware`]: logs inbound and outbound activities.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::context::TurnContext;
use crate::error::{BotError, BotResult};
use crate::hooks::send_hook;
use crate::middleware::{Middleware, Next};
use crate::state::BotState;

// =============================================================================
// AutoSaveStateMiddleware
// =============================================================================

/// Saves every registered [`BotState`] once the turn completed successfully.
#[derive(Debug, Clone, Default)]
pub struct AutoSaveStateMiddleware {
    states: Vec<BotState>,
}

impl AutoSaveStateMiddleware {
    /// Creates the middleware for the given states.
    pub fn new(states: impl IntoIterator<Item = BotState>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    /// Adds another state to save.
    pub fn add(mut self, state: BotState) -> Self {
        self.states.push(state);
        self
    }
}

#[async_trait]
impl Middleware for AutoSaveStateMiddleware {
    async fn on_turn(&self, ctx: Arc<TurnContext>, next: Next) -> BotResult<()> {
        next.run().await?;

        for state in &self.states {
            if let Err(err) = state.save_changes(&ctx, false).await {
                if ctx.responded() {
                    warn!(
                        scope = ?state.scope(),
                        error = %err,
                        "State save failed after activities were sent; replies and stored state are out of sync"
                    );
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "AutoSaveStateMiddleware"
    }
}

// =============================================================================
// CatchErrorMiddleware
// =============================================================================

type ErrorHandler =
    Arc<dyn Fn(Arc<TurnContext>, BotError) -> BoxFuture<'static, BotResult<()>> + Send + Sync>;

/// Hands any error raised downstream to a handler.
///
/// Register it first so it wraps the whole pipeline:
///
/// ```rust,ignore
/// set.use_middleware(CatchErrorMiddleware::new(|ctx, err| async move {
///     tracing::error!(error = %err, "turn failed");
///     ctx.send_text("Sorry, something went wrong.").await?;
///     Ok(())
/// }));
/// ```
pub struct CatchErrorMiddleware {
    handler: ErrorHandler,
}

impl CatchErrorMiddleware {
    /// Creates the middleware with an async error handler.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Arc<TurnContext>, BotError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BotResult<()>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |ctx: Arc<TurnContext>, err: BotError| {
                Box::pin(handler(ctx, err)) as BoxFuture<'static, BotResult<()>>
            }),
        }
    }
}

#[async_trait]
impl Middleware for CatchErrorMiddleware {
    async fn on_turn(&self, ctx: Arc<TurnContext>, next: Next) -> BotResult<()> {
        match next.run().await {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!(error = %err, "Caught turn error");
                (self.handler)(ctx, err).await
            }
        }
    }

    fn name(&self) -> &str {
        "CatchErrorMiddleware"
    }
}

// =============================================================================
// ActivityLoggerMiddleware
// =============================================================================

/// Logs the inbound activity and every activity sent during the turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityLoggerMiddleware;

fn log_activity(direction: &'static str, activity: &Activity) {
    info!(
        direction,
        activity_type = %activity.activity_type,
        channel = %activity.channel_id,
        conversation = %activity.conversation.id,
        from = %activity.from.id,
        text = activity.text.as_deref().unwrap_or_default(),
        "Activity"
    );
}

#[async_trait]
impl Middleware for ActivityLoggerMiddleware {
    async fn on_turn(&self, ctx: Arc<TurnContext>, next: Next) -> BotResult<()> {
        log_activity("inbound", ctx.activity());
        ctx.on_send_activities(send_hook(|_ctx, activities, next| async move {
            for activity in &activities {
                log_activity("outbound", activity);
            }
            next.run(activities).await
        }));
        next.run().await
    }

    fn name(&self) -> &str {
        "ActivityLoggerMiddleware"
    }
}
