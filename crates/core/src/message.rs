use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form metadata bag carried by messages through the pipeline.
pub type Metadata = serde_json::Map<String, Value>;

/// Normalized inbound message, common across all channel adapters.
///
/// Created once per inbound event. Immutable apart from `metadata`, which
/// later pipeline stages use as scratch space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel: String,
    pub channel_conversation_id: String,
    pub channel_message_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        channel_conversation_id: impl Into<String>,
        channel_message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            channel_conversation_id: channel_conversation_id.into(),
            channel_message_id: channel_message_id.into(),
            text: text.into(),
            sender_name: None,
            sender_phone: None,
            timestamp: None,
            metadata: Metadata::new(),
        }
    }
}

/// Agent reply ready to be sent through a channel adapter.
///
/// Produced by the `think` stage; later stages rewrite `text` and extend
/// `metadata` (intent, model identity, usage, violations, automation trace).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub conversation_id: String,
    pub channel_conversation_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl OutgoingMessage {
    pub fn insert_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_round_trips_through_json() {
        let mut msg = IncomingMessage::new("telegram", "chat-9", "42", "привет");
        msg.metadata.insert("telegram_user_id".into(), 77.into());

        let json = serde_json::to_string(&msg).expect("serialize");
        let back: IncomingMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, msg);
    }

    #[test]
    fn outgoing_metadata_insert() {
        let mut out = OutgoingMessage {
            text: "ok".into(),
            conversation_id: "c1".into(),
            channel_conversation_id: "chat-9".into(),
            metadata: Metadata::new(),
        };
        out.insert_meta("model", "gpt-4o");
        assert_eq!(out.metadata["model"], "gpt-4o");
    }
}
