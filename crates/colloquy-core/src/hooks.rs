//! Interceptor chains for outbound operations.
//!
//! Every send, update and delete issued through a
//! [`TurnContext`](crate::TurnContext) runs through a chain of hooks before
//! it reaches the [`BotAdapter`](crate::BotAdapter). The chains follow the
//! same discipline as the turn pipeline: the first registered hook runs
//! outermost, each hook receives a one-shot [`HookNext`] and may rewrite the
//! payload it forwards, or return without forwarding to suppress the
//! operation.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::activity::{Activity, ConversationReference};
use crate::adapter::ResourceResponse;
use crate::context::TurnContext;
use crate::error::BotResult;

/// The future returned by a hook.
pub type HookFuture<Res> = BoxFuture<'static, BotResult<Res>>;

/// A type-erased outbound interceptor.
pub type Hook<Req, Res> =
    Arc<dyn Fn(Arc<TurnContext>, Req, HookNext<Req, Res>) -> HookFuture<Res> + Send + Sync>;

/// Hook for outbound activity batches.
pub type SendActivitiesHook = Hook<Vec<Activity>, Vec<ResourceResponse>>;

/// Hook for activity updates.
pub type UpdateActivityHook = Hook<Activity, ResourceResponse>;

/// Hook for activity deletions.
pub type DeleteActivityHook = Hook<ConversationReference, ()>;

pub(crate) type Terminal<Req, Res> =
    Arc<dyn Fn(Arc<TurnContext>, Req) -> HookFuture<Res> + Send + Sync>;

/// The rest of an outbound chain, including the adapter call at the bottom.
pub struct HookNext<Req, Res> {
    ctx: Arc<TurnContext>,
    hooks: Arc<[Hook<Req, Res>]>,
    index: usize,
    terminal: Terminal<Req, Res>,
}

impl<Req, Res> HookNext<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub(crate) fn start(
        ctx: Arc<TurnContext>,
        hooks: Arc<[Hook<Req, Res>]>,
        terminal: Terminal<Req, Res>,
    ) -> Self {
        Self {
            ctx,
            hooks,
            index: 0,
            terminal,
        }
    }

    /// Forwards `req` to the next hook, or to the adapter when none remain.
    pub fn run(self, req: Req) -> HookFuture<Res> {
        match self.hooks.get(self.index).cloned() {
            Some(hook) => {
                let ctx = Arc::clone(&self.ctx);
                let next = HookNext {
                    index: self.index + 1,
                    ..self
                };
                hook(ctx, req, next)
            }
            None => (self.terminal)(self.ctx, req),
        }
    }
}

/// Builds a [`Hook`] from an async closure.
///
/// # Example
///
/// ```rust,ignore
/// ctx.on_send_activities(hook_fn(|_ctx, mut activities: Vec<Activity>, next| async move {
///     for a in &mut activities {
///         a.locale = Some("en-US".into());
///     }
///     next.run(activities).await
/// }));
/// ```
pub fn hook_fn<Req, Res, F, Fut>(f: F) -> Hook<Req, Res>
where
    Req: 'static,
    Res: 'static,
    F: Fn(Arc<TurnContext>, Req, HookNext<Req, Res>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BotResult<Res>> + Send + 'static,
{
    Arc::new(
        move |ctx: Arc<TurnContext>, req: Req, next: HookNext<Req, Res>| {
            Box::pin(f(ctx, req, next)) as HookFuture<Res>
        },
    )
}

pub(crate) fn terminal_fn<Req, Res, F, Fut>(f: F) -> Terminal<Req, Res>
where
    Req: 'static,
    Res: 'static,
    F: Fn(Arc<TurnContext>, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BotResult<Res>> + Send + 'static,
{
    Arc::new(move |ctx: Arc<TurnContext>, req: Req| Box::pin(f(ctx, req)) as HookFuture<Res>)
}

/// Builds a [`SendActivitiesHook`] from an async closure.
pub fn send_hook<F, Fut>(f: F) -> SendActivitiesHook
where
    F: Fn(Arc<TurnContext>, Vec<Activity>, HookNext<Vec<Activity>, Vec<ResourceResponse>>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = BotResult<Vec<ResourceResponse>>> + Send + 'static,
{
    hook_fn(f)
}

/// Builds an [`UpdateActivityHook`] from an async closure.
pub fn update_hook<F, Fut>(f: F) -> UpdateActivityHook
where
    F: Fn(Arc<TurnContext>, Activity, HookNext<Activity, ResourceResponse>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = BotResult<ResourceResponse>> + Send + 'static,
{
    hook_fn(f)
}

/// Builds a [`DeleteActivityHook`] from an async closure.
pub fn delete_hook<F, Fut>(f: F) -> DeleteActivityHook
where
    F: Fn(Arc<TurnContext>, ConversationReference, HookNext<ConversationReference, ()>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = BotResult<()>> + Send + 'static,
{
    hook_fn(f)
}
