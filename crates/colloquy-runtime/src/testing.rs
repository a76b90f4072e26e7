//! An in-memory channel for tests.
//!
//! [`TestAdapter`] plays both sides of a conversation: it builds inbound
//! activities from a fixed [`ConversationReference`] and records everything
//! the bot sends back.
//!
//! ```rust,ignore
//! let adapter = TestAdapter::new();
//! bot.on_turn(adapter.context("hi")).await?;
//! assert_eq!(adapter.reply_texts(), ["Hello!"]);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use colloquy_core::{
    Activity, ActivityType, BotAdapter, BotError, BotResult, ChannelAccount, ConversationAccount,
    ConversationReference, ResourceResponse, TurnContext,
};
use parking_lot::Mutex;

/// Channel id of the default test conversation.
pub const TEST_CHANNEL: &str = "test";

/// A recording [`BotAdapter`] with a scripted inbound side.
#[derive(Debug)]
pub struct TestAdapter {
    reference: ConversationReference,
    replies: Mutex<VecDeque<Activity>>,
    sent: Mutex<Vec<Activity>>,
    updated: Mutex<Vec<Activity>>,
    deleted: Mutex<Vec<ConversationReference>>,
    inbound_ids: AtomicUsize,
    outbound_ids: AtomicUsize,
    fail_sends: AtomicBool,
}

impl TestAdapter {
    /// Creates an adapter for `user1` talking to `bot` in `test/convo1`.
    pub fn new() -> Arc<Self> {
        Self::with_reference(ConversationReference {
            activity_id: None,
            user: ChannelAccount::new("user1", "User1"),
            bot: ChannelAccount::new("bot", "Bot"),
            conversation: ConversationAccount::new("convo1"),
            channel_id: TEST_CHANNEL.to_string(),
            service_url: "https://test.invalid".to_string(),
            locale: Some("en-US".to_string()),
        })
    }

    /// Creates an adapter for a specific conversation.
    pub fn with_reference(reference: ConversationReference) -> Arc<Self> {
        Arc::new(Self {
            reference,
            replies: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            inbound_ids: AtomicUsize::new(0),
            outbound_ids: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Returns the conversation inbound activities are addressed from.
    pub fn conversation_reference(&self) -> &ConversationReference {
        &self.reference
    }

    /// Builds the next inbound message, with a fresh id.
    pub fn make_activity(&self, text: impl Into<String>) -> Activity {
        let n = self.inbound_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let mut activity = Activity::message(text);
        activity.apply_conversation_reference(&self.reference, true);
        activity.id = Some(format!("in-{n}"));
        activity
    }

    /// Wraps the next inbound message in a turn context.
    pub fn context(self: &Arc<Self>, text: impl Into<String>) -> Arc<TurnContext> {
        let activity = self.make_activity(text);
        self.context_for(activity)
    }

    /// Wraps `activity` in a turn context, addressing it to the test
    /// conversation if it has no conversation yet.
    pub fn context_for(self: &Arc<Self>, mut activity: Activity) -> Arc<TurnContext> {
        if activity.conversation.id.is_empty() {
            activity.apply_conversation_reference(&self.reference, true);
        }
        let adapter: Arc<dyn BotAdapter> = self.clone();
        Arc::new(TurnContext::new(adapter, activity))
    }

    /// Makes subsequent sends fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Takes every activity sent since the last call.
    pub fn take_replies(&self) -> Vec<Activity> {
        self.replies.lock().drain(..).collect()
    }

    /// Takes the texts of the messages sent since the last call.
    pub fn reply_texts(&self) -> Vec<String> {
        self.take_replies()
            .into_iter()
            .filter(|a| a.is_type(ActivityType::Message))
            .map(|a| a.text.unwrap_or_default())
            .collect()
    }

    /// Returns every activity ever sent.
    pub fn sent(&self) -> Vec<Activity> {
        self.sent.lock().clone()
    }

    /// Returns every update request.
    pub fn updated(&self) -> Vec<Activity> {
        self.updated.lock().clone()
    }

    /// Returns every delete request.
    pub fn deleted(&self) -> Vec<ConversationReference> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl BotAdapter for TestAdapter {
    async fn send_activities(
        &self,
        _ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BotError::transport("test adapter is failing sends"));
        }

        let mut responses = Vec::with_capacity(activities.len());
        let mut replies = self.replies.lock();
        let mut sent = self.sent.lock();
        for mut activity in activities {
            let n = self.outbound_ids.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("out-{n}");
            activity.id = Some(id.clone());
            replies.push_back(activity.clone());
            sent.push(activity);
            responses.push(ResourceResponse::new(id));
        }
        Ok(responses)
    }

    async fn update_activity(
        &self,
        _ctx: &TurnContext,
        activity: Activity,
    ) -> BotResult<ResourceResponse> {
        let id = activity.id.clone().unwrap_or_default();
        self.updated.lock().push(activity);
        Ok(ResourceResponse::new(id))
    }

    async fn delete_activity(
        &self,
        _ctx: &TurnContext,
        reference: ConversationReference,
    ) -> BotResult<()> {
        self.deleted.lock().push(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_drains_replies() {
        let adapter = TestAdapter::new();
        let ctx = adapter.context("hi");
        assert_eq!(ctx.activity().id.as_deref(), Some("in-1"));
        assert_eq!(ctx.activity().conversation.id, "convo1");

        ctx.send_text("one").await.unwrap();
        ctx.send_activity(Activity::typing()).await.unwrap();
        ctx.send_text("two").await.unwrap();

        assert_eq!(adapter.reply_texts(), ["one", "two"]);
        assert!(adapter.reply_texts().is_empty());
        assert_eq!(adapter.sent().len(), 3);
        assert_eq!(adapter.sent()[0].reply_to_id.as_deref(), Some("in-1"));
    }

    #[tokio::test]
    async fn test_failing_sends() {
        let adapter = TestAdapter::new();
        adapter.set_fail_sends(true);
        let err = adapter.context("hi").send_text("x").await.unwrap_err();
        assert!(matches!(err, BotError::Transport(_)));
        assert!(adapter.sent().is_empty());
    }

    #[test]
    fn test_context_for_keeps_explicit_routing() {
        let adapter = TestAdapter::new();
        let mut activity = Activity::message("hi");
        activity.channel_id = "other".into();
        activity.conversation = ConversationAccount::new("elsewhere");

        let ctx = adapter.context_for(activity);
        assert_eq!(ctx.activity().conversation.id, "elsewhere");
        assert_eq!(ctx.activity().channel_id, "other");
    }
}
