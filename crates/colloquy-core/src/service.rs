//! Tower integration for the turn pipeline.
//!
//! [`PipelineService`] binds a shared [`MiddlewareSet`] and the bot's
//! [`BotCallback`] into a `tower::Service<Arc<TurnContext>>`, so whole turns
//! can be wrapped by ordinary tower layers (timeouts, concurrency limits,
//! buffering) and driven with `ServiceExt::oneshot`.
//!
//! ```rust,ignore
//! use tower::ServiceExt;
//!
//! let svc = PipelineService::new(Arc::new(middleware), bot);
//! let completed = svc.oneshot(ctx).await?;
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::Service;

use crate::context::TurnContext;
use crate::error::BotError;
use crate::middleware::{BotCallback, MiddlewareSet};

/// A tower [`Service`] that runs one turn through the middleware pipeline.
///
/// The response is the completion status of
/// [`MiddlewareSet::receive_activity_with_status`].
#[derive(Clone)]
pub struct PipelineService {
    middleware: Arc<MiddlewareSet>,
    callback: BotCallback,
}

impl PipelineService {
    /// Creates a service running `callback` behind `middleware`.
    pub fn new(middleware: Arc<MiddlewareSet>, callback: BotCallback) -> Self {
        Self {
            middleware,
            callback,
        }
    }

    /// Returns the middleware this service runs.
    pub fn middleware(&self) -> &Arc<MiddlewareSet> {
        &self.middleware
    }
}

impl Service<Arc<TurnContext>> for PipelineService {
    type Response = bool;
    type Error = BotError;
    type Future = BoxFuture<'static, Result<bool, BotError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<TurnContext>) -> Self::Future {
        let middleware = Arc::clone(&self.middleware);
        let callback = Arc::clone(&self.callback);
        Box::pin(async move {
            middleware
                .receive_activity_with_status(ctx, callback)
                .await
        })
    }
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Next, into_callback, middleware_fn};
    use crate::test_support::{RecordingAdapter, inbound, turn};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_oneshot_runs_turn() {
        let adapter = RecordingAdapter::new();
        let svc = PipelineService::new(
            Arc::new(MiddlewareSet::new()),
            into_callback(|ctx: Arc<TurnContext>| async move {
                ctx.send_text("pong").await?;
                Ok(())
            }),
        );

        let completed = svc.oneshot(turn(&adapter, inbound("ping"))).await.unwrap();
        assert!(completed);
        assert_eq!(adapter.sent_texts(), ["pong"]);
    }

    #[tokio::test]
    async fn test_short_circuit_reported_as_false() {
        let adapter = RecordingAdapter::new();
        let middleware = MiddlewareSet::new().with(middleware_fn(|_ctx, _next: Next| async { Ok(()) }));
        let svc = PipelineService::new(
            Arc::new(middleware),
            into_callback(|ctx: Arc<TurnContext>| async move {
                ctx.send_text("unreachable").await?;
                Ok(())
            }),
        );

        let completed = svc.oneshot(turn(&adapter, inbound("ping"))).await.unwrap();
        assert!(!completed);
        assert!(adapter.sent().is_empty());
    }
}
