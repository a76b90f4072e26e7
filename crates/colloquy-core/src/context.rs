//! The per-turn context.
//!
//! A [`TurnContext`] wraps the one inbound [`Activity`] of a turn together
//! with the adapter that received it, a [`TurnState`] service bag and the
//! outbound hook chains. It is created at the start of a turn, shared as
//! `Arc<TurnContext>` by every middleware, the bot callback and the dialog
//! engine, and dropped once the pipeline has unwound. Everything it holds is
//! released with the last `Arc`, whichever exit path the turn takes.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn on_turn(ctx: Arc<TurnContext>) -> BotResult<()> {
//!     let text = ctx.activity().text_or_empty().to_string();
//!     ctx.send_text(format!("You said: {text}")).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::activity::{Activity, ActivityType, ConversationReference};
use crate::adapter::{BoxedAdapter, ResourceResponse};
use crate::error::{BotError, BotResult};
use crate::hooks::{
    DeleteActivityHook, Hook, HookNext, SendActivitiesHook, UpdateActivityHook, terminal_fn,
};
use crate::turn_state::TurnState;

/// Context object for a single turn.
pub struct TurnContext {
    activity: Activity,
    adapter: BoxedAdapter,
    state: TurnState,
    send_hooks: Mutex<Vec<SendActivitiesHook>>,
    update_hooks: Mutex<Vec<UpdateActivityHook>>,
    delete_hooks: Mutex<Vec<DeleteActivityHook>>,
    /// Set once a non-trace activity has been delivered.
    responded: AtomicBool,
    cancellation: CancellationToken,
}

impl TurnContext {
    /// Creates a context for `activity` received through `adapter`.
    pub fn new(adapter: BoxedAdapter, activity: Activity) -> Self {
        Self {
            activity,
            adapter,
            state: TurnState::new(),
            send_hooks: Mutex::new(Vec::new()),
            update_hooks: Mutex::new(Vec::new()),
            delete_hooks: Mutex::new(Vec::new()),
            responded: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
        }
    }

    /// Ties this turn to an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the inbound activity.
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Returns the adapter that received the activity.
    pub fn adapter(&self) -> &BoxedAdapter {
        &self.adapter
    }

    /// Returns the turn's service bag.
    pub fn turn_state(&self) -> &TurnState {
        &self.state
    }

    /// Returns `true` once a non-trace activity has been sent this turn.
    pub fn responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    /// Returns the conversation reference of the inbound activity.
    pub fn conversation_reference(&self) -> ConversationReference {
        self.activity.conversation_reference()
    }

    // ─── Cancellation ─────────────────────────────────────────────────────────

    /// Requests cancellation of the rest of the turn.
    ///
    /// Stages that have not started yet fail with [`BotError::Cancelled`]
    /// when the pipeline tries to enter them.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns the turn's cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    // ─── Hook registration ────────────────────────────────────────────────────

    /// Registers an interceptor for outbound sends.
    pub fn on_send_activities(&self, hook: SendActivitiesHook) -> &Self {
        self.send_hooks.lock().push(hook);
        self
    }

    /// Registers an interceptor for activity updates.
    pub fn on_update_activity(&self, hook: UpdateActivityHook) -> &Self {
        self.update_hooks.lock().push(hook);
        self
    }

    /// Registers an interceptor for activity deletions.
    pub fn on_delete_activity(&self, hook: DeleteActivityHook) -> &Self {
        self.delete_hooks.lock().push(hook);
        self
    }

    // ─── Outbound operations ──────────────────────────────────────────────────

    /// Sends a plain text message.
    pub async fn send_text(self: &Arc<Self>, text: impl Into<String>) -> BotResult<ResourceResponse> {
        self.send_activity(Activity::message(text)).await
    }

    /// Sends one activity.
    pub async fn send_activity(self: &Arc<Self>, activity: Activity) -> BotResult<ResourceResponse> {
        let mut responses = self.send_activities(vec![activity]).await?;
        Ok(if responses.is_empty() {
            ResourceResponse::default()
        } else {
            responses.swap_remove(0)
        })
    }

    /// Sends a batch of activities through the send hooks and the adapter.
    ///
    /// Each activity is stamped with the inbound conversation reference
    /// before the hooks see it.
    pub async fn send_activities(
        self: &Arc<Self>,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>> {
        if activities.is_empty() {
            return Err(BotError::invalid_argument("activities must not be empty"));
        }

        let reference = self.conversation_reference();
        let activities = activities
            .into_iter()
            .map(|mut a| {
                a.apply_conversation_reference(&reference, false);
                a
            })
            .collect::<Vec<_>>();

        let hooks = snapshot(&self.send_hooks);
        trace!(
            count = activities.len(),
            hooks = hooks.len(),
            "Sending activities"
        );
        HookNext::start(
            Arc::clone(self),
            hooks,
            terminal_fn(|ctx: Arc<TurnContext>, activities: Vec<Activity>| async move {
                ctx.deliver(activities).await
            }),
        )
        .run(activities)
        .await
    }

    /// Replaces a previously sent activity.
    pub async fn update_activity(self: &Arc<Self>, mut activity: Activity) -> BotResult<ResourceResponse> {
        let reference = self.conversation_reference();
        activity.apply_conversation_reference(&reference, false);

        HookNext::start(
            Arc::clone(self),
            snapshot(&self.update_hooks),
            terminal_fn(|ctx: Arc<TurnContext>, activity: Activity| async move {
                let adapter = Arc::clone(ctx.adapter());
                adapter.update_activity(&ctx, activity).await
            }),
        )
        .run(activity)
        .await
    }

    /// Deletes a previously sent activity of this conversation by id.
    pub async fn delete_activity(self: &Arc<Self>, activity_id: &str) -> BotResult<()> {
        if activity_id.trim().is_empty() {
            return Err(BotError::invalid_argument("activity id must not be empty"));
        }
        let mut reference = self.conversation_reference();
        reference.activity_id = Some(activity_id.to_string());
        self.delete_activity_reference(reference).await
    }

    /// Deletes the activity identified by `reference`.
    pub async fn delete_activity_reference(
        self: &Arc<Self>,
        reference: ConversationReference,
    ) -> BotResult<()> {
        HookNext::start(
            Arc::clone(self),
            snapshot(&self.delete_hooks),
            terminal_fn(
                |ctx: Arc<TurnContext>, reference: ConversationReference| async move {
                    let adapter = Arc::clone(ctx.adapter());
                    adapter.delete_activity(&ctx, reference).await
                },
            ),
        )
        .run(reference)
        .await
    }

    /// Bottom of the send chain: hands the batch to the adapter.
    async fn deliver(&self, mut activities: Vec<Activity>) -> BotResult<Vec<ResourceResponse>> {
        let responses = self
            .adapter
            .send_activities(self, activities.clone())
            .await?;

        let mut sent_non_trace = false;
        for (activity, response) in activities.iter_mut().zip(&responses) {
            activity.id = Some(response.id.clone());
            sent_non_trace |= !activity.is_type(ActivityType::Trace);
        }
        if sent_non_trace {
            self.responded.store(true, Ordering::SeqCst);
        }
        Ok(responses)
    }
}

fn snapshot<Req, Res>(hooks: &Mutex<Vec<Hook<Req, Res>>>) -> Arc<[Hook<Req, Res>]> {
    Arc::from(hooks.lock().clone())
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("activity", &self.activity)
            .field("responded", &self.responded())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::hook_fn;
    use crate::test_support::{RecordingAdapter, inbound, turn};

    #[tokio::test]
    async fn test_send_stamps_reference_and_marks_responded() {
        let adapter = RecordingAdapter::new();
        let ctx = turn(&adapter, inbound("hi"));

        assert!(!ctx.responded());
        let response = ctx.send_text("hello").await.unwrap();

        let sent = adapter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient.id, "user1");
        assert_eq!(sent[0].reply_to_id.as_deref(), Some("in-1"));
        assert_eq!(response.id, "out-1");
        assert!(ctx.responded());
    }

    #[tokio::test]
    async fn test_trace_does_not_mark_responded() {
        let adapter = RecordingAdapter::new();
        let ctx = turn(&adapter, inbound("hi"));
        ctx.send_activity(Activity::trace("t", None, None, None))
            .await
            .unwrap();
        assert!(!ctx.responded());
    }

    #[tokio::test]
    async fn test_send_hooks_run_in_registration_order() {
        let adapter = RecordingAdapter::new();
        let ctx = turn(&adapter, inbound("hi"));

        ctx.on_send_activities(hook_fn(|_ctx, mut activities: Vec<Activity>, next| async move {
            for a in &mut activities {
                let text = a.text_or_empty().to_string();
                a.text = Some(format!("[{text}]"));
            }
            next.run(activities).await
        }));
        ctx.on_send_activities(hook_fn(|_ctx, mut activities: Vec<Activity>, next| async move {
            for a in &mut activities {
                let text = a.text_or_empty().to_string();
                a.text = Some(format!("<{text}>"));
            }
            next.run(activities).await
        }));

        ctx.send_text("x").await.unwrap();
        assert_eq!(adapter.sent()[0].text.as_deref(), Some("<[x]>"));
    }

    #[tokio::test]
    async fn test_send_hook_can_suppress() {
        let adapter = RecordingAdapter::new();
        let ctx = turn(&adapter, inbound("hi"));
        ctx.on_send_activities(hook_fn(|_ctx, _activities: Vec<Activity>, _next| async move {
            Ok(Vec::new())
        }));

        ctx.send_text("dropped").await.unwrap();
        assert!(adapter.sent().is_empty());
        assert!(!ctx.responded());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let adapter = RecordingAdapter::failing();
        let ctx = turn(&adapter, inbound("hi"));
        let err = ctx.send_text("hello").await.unwrap_err();
        assert!(matches!(err, BotError::Transport(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let adapter = RecordingAdapter::new();
        let ctx = turn(&adapter, inbound("hi"));
        let err = ctx.send_activities(Vec::new()).await.unwrap_err();
        assert!(matches!(err, BotError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete_hooks() {
        let adapter = RecordingAdapter::new();
        let ctx = turn(&adapter, inbound("hi"));

        ctx.on_update_activity(hook_fn(|_ctx, mut activity: Activity, next| async move {
            activity.text = Some("edited".into());
            next.run(activity).await
        }));
        ctx.on_delete_activity(hook_fn(|_ctx, reference: ConversationReference, next| async move {
            assert_eq!(reference.activity_id.as_deref(), Some("out-9"));
            next.run(reference).await
        }));

        ctx.update_activity(Activity::message("original")).await.unwrap();
        ctx.delete_activity("out-9").await.unwrap();

        assert_eq!(adapter.updated()[0].text.as_deref(), Some("edited"));
        assert_eq!(adapter.deleted(), vec!["out-9".to_string()]);
        assert!(ctx.delete_activity(" ").await.is_err());
    }
}
