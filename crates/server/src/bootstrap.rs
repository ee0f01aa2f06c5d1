//! Application wiring: config, agent bundle, brain, collaborators, channel
//! adapters. Everything the binary needs, built once.

use std::sync::Arc;

use reservo_agent::{
    Brain, BrainError, CalendarService, ConversationStore, EscalationService, HttpBrain,
    InMemoryCalendar, InMemoryEscalations, InMemoryStore, Pipeline,
};
use reservo_channels::{ChannelAdapter, ChannelError, TelegramChannel, TelegramNotifier};
use reservo_core::config::{load_agent_bundle, AppConfig, ChannelKind, ConfigError};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub agent_id: String,
    pub pipeline: Arc<Pipeline>,
    pub adapters: Vec<Arc<ChannelAdapter>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("llm client setup failed: {0}")]
    Brain(#[from] BrainError),
    #[error("channel setup failed: {0}")]
    Channel(#[from] ChannelError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let bundle = load_agent_bundle(&config.agent_dir)?;
    let agent_id = bundle.agent.id.clone();
    info!(agent_id = %agent_id, agent_dir = %config.agent_dir.display(), "agent bundle loaded");

    let brain = Arc::new(HttpBrain::new(config.llm.clone())?) as Arc<dyn Brain>;
    let store = Arc::new(InMemoryStore::new()) as Arc<dyn ConversationStore>;
    let calendar = Arc::new(InMemoryCalendar::new()) as Arc<dyn CalendarService>;
    let escalations = build_escalations(&config)?;

    let pipeline = Arc::new(Pipeline::new(bundle, brain, store, calendar, escalations));

    let mut adapters = Vec::new();
    for settings in &config.channels {
        let adapter = ChannelAdapter::from_settings(settings)?;
        info!(channel = adapter.name(), polling = adapter.is_polling(), "channel configured");
        adapters.push(Arc::new(adapter));
    }
    if adapters.is_empty() {
        warn!("no channels configured; only the webhook endpoint will accept messages");
    }

    Ok(Application { config, agent_id, pipeline, adapters })
}

fn build_escalations(config: &AppConfig) -> Result<Arc<dyn EscalationService>, BootstrapError> {
    let telegram = config.channels.iter().find(|c| c.kind == ChannelKind::Telegram);
    match (telegram, &config.escalation.telegram_chat_id) {
        (Some(settings), Some(chat_id)) => {
            let token = settings
                .token
                .clone()
                .ok_or(ChannelError::MissingToken("telegram"))?;
            let channel = TelegramChannel::new(token, settings.base_url.clone())?;
            info!(chat_id = %chat_id, "manager escalations go to telegram");
            Ok(Arc::new(TelegramNotifier::new(channel, chat_id.clone())))
        }
        _ => {
            warn!("no escalation chat configured; escalations are recorded in memory only");
            Ok(Arc::new(InMemoryEscalations::new()))
        }
    }
}
