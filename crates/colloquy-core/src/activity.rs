//! Activity data model.
//!
//! An [`Activity`] is the envelope for one inbound or outbound chat message or
//! event. Only the routing and payload fields the turn pipeline and the dialog
//! engine need are modelled here; channel-specific extensions travel in
//! [`Activity::value`].
//!
//! Activities serialize with camelCase field names and skip absent optional
//! fields, so a stored or logged activity stays compact.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of an [`Activity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    /// A plain message.
    #[default]
    Message,
    /// Members joined or left the conversation.
    ConversationUpdate,
    /// A named event.
    Event,
    /// A request that expects a response.
    Invoke,
    /// A pause between outbound activities.
    Delay,
    /// Diagnostic information, never shown to the user.
    Trace,
    /// Typing indicator.
    Typing,
    /// The conversation ended.
    EndOfConversation,
    /// A previously sent message was edited.
    MessageUpdate,
    /// A previously sent message was deleted.
    MessageDelete,
    /// The bot was installed or uninstalled.
    InstallationUpdate,
    /// Conversation handed off to another party.
    Handoff,
}

impl ActivityType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ConversationUpdate => "conversationUpdate",
            Self::Event => "event",
            Self::Invoke => "invoke",
            Self::Delay => "delay",
            Self::Trace => "trace",
            Self::Typing => "typing",
            Self::EndOfConversation => "endOfConversation",
            Self::MessageUpdate => "messageUpdate",
            Self::MessageDelete => "messageDelete",
            Self::InstallationUpdate => "installationUpdate",
            Self::Handoff => "handoff",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user or bot account on a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccount {
    /// Channel-specific account id.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    /// Creates an account with the given id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// The conversation an activity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    /// Channel-specific conversation id.
    pub id: String,
    /// Display name of the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether more than two participants take part.
    #[serde(default)]
    pub is_group: bool,
    /// Channel-specific conversation flavour (e.g. "personal", "channel").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<String>,
}

impl ConversationAccount {
    /// Creates a one-to-one conversation with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// The durable address of a conversation.
///
/// A reference captured from an inbound activity can later be used to send
/// proactive messages into the same conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    /// The activity this reference was taken from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    /// The user side of the conversation.
    pub user: ChannelAccount,
    /// The bot side of the conversation.
    pub bot: ChannelAccount,
    /// The conversation itself.
    pub conversation: ConversationAccount,
    /// Channel id (e.g. "slack", "test").
    pub channel_id: String,
    /// Service endpoint of the channel.
    #[serde(default)]
    pub service_url: String,
    /// Locale of the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl ConversationReference {
    /// Builds an `event` activity named `ContinueConversation` addressed from
    /// this reference, used to start proactive turns.
    pub fn continuation_activity(&self) -> Activity {
        let mut activity = Activity::event("ContinueConversation", None);
        activity.apply_conversation_reference(self, true);
        activity
    }

    /// Returns the key used to serialize turns for this conversation.
    pub fn conversation_key(&self) -> String {
        format!("{}/{}", self.channel_id, self.conversation.id)
    }
}

/// One inbound or outbound message/event envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// The kind of activity.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Channel-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Event or trace name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Schema of [`value`](Self::value) for trace activities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Label of a trace activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Channel id.
    #[serde(default)]
    pub channel_id: String,
    /// Service endpoint of the channel.
    #[serde(default)]
    pub service_url: String,
    /// Sender.
    #[serde(default)]
    pub from: ChannelAccount,
    /// Recipient.
    #[serde(default)]
    pub recipient: ChannelAccount,
    /// Conversation.
    #[serde(default)]
    pub conversation: ConversationAccount,
    /// Id of the activity this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Locale of the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl Activity {
    /// Creates an empty activity of the given type.
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            ..Default::default()
        }
    }

    /// Creates a message activity with the given text.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(ActivityType::Message)
        }
    }

    /// Creates a named event activity.
    pub fn event(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value,
            ..Self::new(ActivityType::Event)
        }
    }

    /// Creates a trace activity.
    pub fn trace(
        name: impl Into<String>,
        value: Option<Value>,
        value_type: Option<String>,
        label: Option<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            value,
            value_type,
            label,
            ..Self::new(ActivityType::Trace)
        }
    }

    /// Creates a typing indicator.
    pub fn typing() -> Self {
        Self::new(ActivityType::Typing)
    }

    /// Creates an end-of-conversation activity.
    pub fn end_of_conversation() -> Self {
        Self::new(ActivityType::EndOfConversation)
    }

    /// Returns `true` if this activity is of the given type.
    pub fn is_type(&self, activity_type: ActivityType) -> bool {
        self.activity_type == activity_type
    }

    /// Returns the message text, or `""` when absent.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Extracts the conversation reference of this (inbound) activity.
    pub fn conversation_reference(&self) -> ConversationReference {
        ConversationReference {
            activity_id: self.id.clone(),
            user: self.from.clone(),
            bot: self.recipient.clone(),
            conversation: self.conversation.clone(),
            channel_id: self.channel_id.clone(),
            service_url: self.service_url.clone(),
            locale: self.locale.clone(),
        }
    }

    /// Stamps routing fields from a conversation reference.
    ///
    /// Incoming activities are addressed from the user to the bot; outgoing
    /// ones from the bot to the user and reply to the referenced activity.
    pub fn apply_conversation_reference(
        &mut self,
        reference: &ConversationReference,
        incoming: bool,
    ) -> &mut Self {
        self.channel_id.clone_from(&reference.channel_id);
        self.service_url.clone_from(&reference.service_url);
        self.conversation.clone_from(&reference.conversation);
        if self.locale.is_none() {
            self.locale.clone_from(&reference.locale);
        }

        if incoming {
            self.from.clone_from(&reference.user);
            self.recipient.clone_from(&reference.bot);
            if reference.activity_id.is_some() {
                self.id.clone_from(&reference.activity_id);
            }
        } else {
            self.from.clone_from(&reference.bot);
            self.recipient.clone_from(&reference.user);
            if reference.activity_id.is_some() {
                self.reply_to_id.clone_from(&reference.activity_id);
            }
        }
        self
    }

    /// Builds a message replying to this activity.
    pub fn create_reply(&self, text: impl Into<String>) -> Activity {
        Activity {
            from: self.recipient.clone(),
            recipient: self.from.clone(),
            conversation: self.conversation.clone(),
            channel_id: self.channel_id.clone(),
            service_url: self.service_url.clone(),
            reply_to_id: self.id.clone(),
            locale: self.locale.clone(),
            ..Activity::message(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound() -> Activity {
        Activity {
            id: Some("a1".into()),
            channel_id: "test".into(),
            service_url: "https://example.test".into(),
            from: ChannelAccount::new("user1", "User"),
            recipient: ChannelAccount::new("bot", "Bot"),
            conversation: ConversationAccount::new("conv1"),
            ..Activity::message("hi")
        }
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(inbound()).unwrap();
        assert_eq!(value["type"], json!("message"));
        assert_eq!(value["channelId"], json!("test"));
        assert_eq!(value["conversation"]["isGroup"], json!(false));
        assert!(value.get("replyToId").is_none());
    }

    #[test]
    fn test_outgoing_reference_swaps_accounts() {
        let reference = inbound().conversation_reference();
        let mut reply = Activity::message("hello");
        reply.apply_conversation_reference(&reference, false);

        assert_eq!(reply.from.id, "bot");
        assert_eq!(reply.recipient.id, "user1");
        assert_eq!(reply.reply_to_id.as_deref(), Some("a1"));
        assert_eq!(reply.conversation.id, "conv1");
    }

    #[test]
    fn test_continuation_activity() {
        let reference = inbound().conversation_reference();
        let activity = reference.continuation_activity();
        assert!(activity.is_type(ActivityType::Event));
        assert_eq!(activity.name.as_deref(), Some("ContinueConversation"));
        assert_eq!(activity.from.id, "user1");
        assert_eq!(reference.conversation_key(), "test/conv1");
    }

    #[test]
    fn test_create_reply() {
        let reply = inbound().create_reply("pong");
        assert_eq!(reply.text.as_deref(), Some("pong"));
        assert_eq!(reply.recipient.id, "user1");
        assert_eq!(reply.reply_to_id.as_deref(), Some("a1"));
    }
}
