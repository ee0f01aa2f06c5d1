//! Umnico aggregator adapter, poll-based. Inbound messages are pulled from
//! the inbox endpoint; replies need a manager user id, resolved once and
//! cached for the lifetime of the channel.

use reservo_core::message::IncomingMessage;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::ChannelError;

const DEFAULT_API: &str = "https://api.umnico.com/v1";

pub struct UmnicoChannel {
    client: reqwest::Client,
    token: SecretString,
    base_url: String,
    manager_user_id: Mutex<Option<i64>>,
}

impl UmnicoChannel {
    pub fn new(token: SecretString, base_url: Option<String>) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            token,
            base_url: base_url.unwrap_or_else(|| DEFAULT_API.to_string()),
            manager_user_id: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn get(&self, path: &str) -> Result<Value, ChannelError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api { status: status.as_u16(), body });
        }
        Ok(response.json().await?)
    }

    /// Unanswered inbound messages, one per conversation, oldest first.
    pub async fn receive(&self) -> Result<Vec<IncomingMessage>, ChannelError> {
        let inbox = self.get("/messages/inbox").await?;
        Ok(parse_inbox(&inbox))
    }

    pub async fn send(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        let (lead_id, source_id) = split_conversation_id(conversation_id)?;
        let user_id = self.manager_user_id().await?;

        let response = self
            .client
            .post(self.url("/messages"))
            .bearer_auth(self.token.expose_secret())
            .json(&json!({
                "leadId": lead_id,
                "sourceId": source_id,
                "userId": user_id,
                "text": text,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api { status: status.as_u16(), body });
        }
        debug!(conversation_id, "umnico message sent");
        Ok(())
    }

    /// Sends require a manager identity; take the first one and cache it.
    async fn manager_user_id(&self) -> Result<i64, ChannelError> {
        let mut cached = self.manager_user_id.lock().await;
        if let Some(user_id) = *cached {
            return Ok(user_id);
        }
        let managers = self.get("/managers").await?;
        let user_id = managers
            .as_array()
            .and_then(|list| list.first())
            .and_then(|manager| manager.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| ChannelError::UnexpectedPayload("no managers in account".into()))?;
        *cached = Some(user_id);
        Ok(user_id)
    }
}

/// Conversation ids are `"<lead_id>:<source_id>"`, composed here on receive
/// and split again on send.
fn split_conversation_id(conversation_id: &str) -> Result<(i64, i64), ChannelError> {
    let parse = |part: &str| part.parse::<i64>().ok();
    conversation_id
        .split_once(':')
        .and_then(|(lead, source)| Some((parse(lead)?, parse(source)?)))
        .ok_or_else(|| {
            ChannelError::UnexpectedPayload(format!(
                "malformed umnico conversation id `{conversation_id}`"
            ))
        })
}

fn parse_inbox(inbox: &Value) -> Vec<IncomingMessage> {
    let Some(items) = inbox.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let lead_id = item.pointer("/lead/id")?.as_i64()?;
            let source_id = item.pointer("/source/id")?.as_i64()?;
            let message = item.get("lastMessage")?;
            if message.get("direction")?.as_str()? != "in" {
                return None;
            }
            let text = message.get("text")?.as_str()?;
            let message_id = message.get("id")?.as_i64()?;

            let mut incoming = IncomingMessage::new(
                "umnico",
                format!("{lead_id}:{source_id}"),
                message_id.to_string(),
                text,
            );
            incoming.sender_name = message
                .pointer("/sender/name")
                .and_then(Value::as_str)
                .map(str::to_string);
            incoming.sender_phone = message
                .pointer("/sender/phone")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(incoming)
        })
        .collect()
}
