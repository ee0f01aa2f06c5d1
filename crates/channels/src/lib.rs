//! Channel adapters: how messages get in and replies get out.
//!
//! The set of supported channels is a closed enum. Telegram delivers inbound
//! updates over a webhook; Umnico is fetched by the polling worker.

pub mod poller;
pub mod telegram;
pub mod umnico;

use reservo_core::config::{ChannelKind, ChannelSettings};
use reservo_core::message::{IncomingMessage, OutgoingMessage};
use thiserror::Error;

pub use poller::{DedupCache, MessageHandler, PollWorker};
pub use telegram::{TelegramChannel, TelegramNotifier};
pub use umnico::UmnicoChannel;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel `{0}` is missing its token")]
    MissingToken(&'static str),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),
}

/// One configured channel. Built once at startup from `ChannelSettings`.
pub enum ChannelAdapter {
    Telegram(TelegramChannel),
    Umnico(UmnicoChannel),
}

impl ChannelAdapter {
    pub fn from_settings(settings: &ChannelSettings) -> Result<Self, ChannelError> {
        match settings.kind {
            ChannelKind::Telegram => {
                let token = settings
                    .token
                    .clone()
                    .ok_or(ChannelError::MissingToken("telegram"))?;
                Ok(Self::Telegram(TelegramChannel::new(token, settings.base_url.clone())?))
            }
            ChannelKind::Umnico => {
                let token =
                    settings.token.clone().ok_or(ChannelError::MissingToken("umnico"))?;
                Ok(Self::Umnico(UmnicoChannel::new(token, settings.base_url.clone())?))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Telegram(_) => "telegram",
            Self::Umnico(_) => "umnico",
        }
    }

    /// Poll-based channels return new inbound messages; webhook channels
    /// always return an empty batch.
    pub async fn receive(&self) -> Result<Vec<IncomingMessage>, ChannelError> {
        match self {
            Self::Telegram(_) => Ok(Vec::new()),
            Self::Umnico(channel) => channel.receive().await,
        }
    }

    pub async fn send(&self, outgoing: &OutgoingMessage) -> Result<(), ChannelError> {
        match self {
            Self::Telegram(channel) => {
                channel.send(&outgoing.channel_conversation_id, &outgoing.text).await
            }
            Self::Umnico(channel) => {
                channel.send(&outgoing.channel_conversation_id, &outgoing.text).await
            }
        }
    }

    pub fn is_polling(&self) -> bool {
        matches!(self, Self::Umnico(_))
    }
}
