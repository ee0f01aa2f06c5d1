//! Telegram Bot API adapter: webhook update parsing, outbound sends, and the
//! manager-notification sink used for escalations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_agent::{EscalationError, EscalationNotice, EscalationService};
use reservo_core::message::IncomingMessage;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use crate::ChannelError;

const DEFAULT_API: &str = "https://api.telegram.org";

pub struct TelegramChannel {
    client: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl TelegramChannel {
    pub fn new(token: SecretString, base_url: Option<String>) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            token,
            base_url: base_url.unwrap_or_else(|| DEFAULT_API.to_string()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.base_url.trim_end_matches('/'),
            self.token.expose_secret()
        )
    }

    pub async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api { status: status.as_u16(), body });
        }
        debug!(chat_id, "telegram message sent");
        Ok(())
    }
}

/// Normalize a Telegram webhook update into an `IncomingMessage`.
/// Updates without a text message (stickers, edits, joins) yield `None`.
pub fn parse_webhook(update: &Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text")?.as_str()?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;

    let mut incoming = IncomingMessage::new(
        "telegram",
        chat_id.to_string(),
        message_id.to_string(),
        text,
    );
    incoming.sender_name = message
        .get("from")
        .and_then(|from| from.get("first_name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    incoming.timestamp = message
        .get("date")
        .and_then(Value::as_i64)
        .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0));
    if let Some(user_id) = update.pointer("/message/from/id").and_then(Value::as_i64) {
        incoming.metadata.insert("telegram_user_id".to_string(), user_id.into());
    }
    Some(incoming)
}

/// Escalation sink that posts a summary into a fixed manager chat.
pub struct TelegramNotifier {
    channel: TelegramChannel,
    manager_chat_id: String,
}

impl TelegramNotifier {
    pub fn new(channel: TelegramChannel, manager_chat_id: impl Into<String>) -> Self {
        Self { channel, manager_chat_id: manager_chat_id.into() }
    }
}

#[async_trait]
impl EscalationService for TelegramNotifier {
    async fn send_escalation(&self, notice: &EscalationNotice) -> Result<(), EscalationError> {
        let text = format!(
            "⚠️ Требуется менеджер\nПричина: {}\nДиалог: {}\n{}",
            notice.reason, notice.conversation_id, notice.summary
        );
        self.channel
            .send(&self.manager_chat_id, &text)
            .await
            .map_err(|error| EscalationError::Unavailable(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_update_is_normalized() {
        let update = json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "date": 1_771_500_000,
                "chat": { "id": 9001, "type": "private" },
                "from": { "id": 777, "first_name": "Иван" },
                "text": "Хочу зал Карелия"
            }
        });

        let incoming = parse_webhook(&update).expect("message");
        assert_eq!(incoming.channel, "telegram");
        assert_eq!(incoming.channel_conversation_id, "9001");
        assert_eq!(incoming.channel_message_id, "42");
        assert_eq!(incoming.text, "Хочу зал Карелия");
        assert_eq!(incoming.sender_name.as_deref(), Some("Иван"));
        assert_eq!(incoming.metadata["telegram_user_id"], 777);
        assert!(incoming.timestamp.is_some());
    }

    #[test]
    fn non_text_updates_are_skipped() {
        let sticker = json!({
            "update_id": 2,
            "message": {
                "message_id": 43,
                "chat": { "id": 9001 },
                "sticker": { "file_id": "abc" }
            }
        });
        assert!(parse_webhook(&sticker).is_none());

        let edited = json!({ "update_id": 3, "edited_message": { "text": "оп" } });
        assert!(parse_webhook(&edited).is_none());
    }
}
