//! Channel transport abstraction.
//!
//! A [`BotAdapter`] is the outbound half of a channel integration: it
//! delivers, edits and deletes activities on the actual chat service. The
//! turn pipeline only ever talks to the channel through this trait, so the
//! core stays independent of any wire format.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ConversationReference};
use crate::context::TurnContext;
use crate::error::BotResult;

/// The channel's acknowledgement of an outbound operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    /// Channel-assigned id of the affected activity.
    #[serde(default)]
    pub id: String,
}

impl ResourceResponse {
    /// Creates a response carrying the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Outbound transport for one channel.
///
/// Failures are reported as errors and propagate back to whoever sent the
/// activity; the core never swallows a delivery failure.
#[async_trait]
pub trait BotAdapter: Send + Sync + 'static {
    /// Delivers a batch of activities, returning one response per activity.
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>>;

    /// Replaces a previously sent activity.
    async fn update_activity(
        &self,
        ctx: &TurnContext,
        activity: Activity,
    ) -> BotResult<ResourceResponse>;

    /// Deletes a previously sent activity.
    async fn delete_activity(
        &self,
        ctx: &TurnContext,
        reference: ConversationReference,
    ) -> BotResult<()>;
}

/// A shared, type-erased adapter.
pub type BoxedAdapter = Arc<dyn BotAdapter>;
