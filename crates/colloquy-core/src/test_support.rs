//! Shared fixtures for the unit tests of this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::activity::{Activity, ChannelAccount, ConversationAccount, ConversationReference};
use crate::adapter::{BotAdapter, ResourceResponse};
use crate::context::TurnContext;
use crate::error::{BotError, BotResult};

/// An adapter that records every outbound operation.
#[derive(Default)]
pub(crate) struct RecordingAdapter {
    sent: Mutex<Vec<Activity>>,
    updated: Mutex<Vec<Activity>>,
    deleted: Mutex<Vec<String>>,
    counter: AtomicUsize,
    fail: bool,
}

impl RecordingAdapter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub(crate) fn sent(&self) -> Vec<Activity> {
        self.sent.lock().clone()
    }

    pub(crate) fn updated(&self) -> Vec<Activity> {
        self.updated.lock().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|a| a.text_or_empty().to_string())
            .collect()
    }
}

#[async_trait]
impl BotAdapter for RecordingAdapter {
    async fn send_activities(
        &self,
        _ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>> {
        if self.fail {
            return Err(BotError::transport("channel unavailable"));
        }
        let mut responses = Vec::with_capacity(activities.len());
        let mut sent = self.sent.lock();
        for activity in activities {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            responses.push(ResourceResponse::new(format!("out-{n}")));
            sent.push(activity);
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
        self.deleted
            .lock()
            .push(reference.activity_id.unwrap_or_default());
        Ok(())
    }
}

/// Builds an inbound message from `user1` to `bot` in `test/conv1`.
pub(crate) fn inbound(text: &str) -> Activity {
    Activity {
        id: Some("in-1".into()),
        channel_id: "test".into(),
        from: ChannelAccount::new("user1", "User"),
        recipient: ChannelAccount::new("bot", "Bot"),
        conversation: ConversationAccount::new("conv1"),
        ..Activity::message(text)
    }
}

/// Wraps `activity` in a fresh turn context served by `adapter`.
pub(crate) fn turn(adapter: &Arc<RecordingAdapter>, activity: Activity) -> Arc<TurnContext> {
    let adapter: Arc<dyn BotAdapter> = adapter.clone();
    Arc::new(TurnContext::new(adapter, activity))
}
