//! Polling worker for poll-based channels, with a bounded best-effort dedup
//! cache: keyed by `agent:conversation`, remembering only the last message id
//! per key, evicting oldest keys at capacity, and lost entirely on restart.
//! A duplicate that slips through is re-processed, which the pipeline's
//! idempotent booking path tolerates.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reservo_agent::{Pipeline, PipelineError};
use reservo_core::message::{IncomingMessage, OutgoingMessage};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::ChannelAdapter;

/// Something that can turn an inbound message into an optional reply.
/// Implemented by the pipeline; tests plug in scripted handlers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: IncomingMessage) -> Result<OutgoingMessage, PipelineError>;
}

#[async_trait]
impl MessageHandler for Pipeline {
    async fn handle(&self, message: IncomingMessage) -> Result<OutgoingMessage, PipelineError> {
        self.process(message).await
    }
}

/// Bounded last-message-id cache. Insertion-ordered eviction: when full, the
/// oldest tracked conversation is dropped and may be seen again.
pub struct DedupCache {
    capacity: usize,
    last_seen: HashMap<String, String>,
    order: VecDeque<String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), last_seen: HashMap::new(), order: VecDeque::new() }
    }

    /// Record the message id for a key. Returns false when this exact id was
    /// already the last one seen, i.e. the message is a duplicate.
    pub fn observe(&mut self, key: &str, message_id: &str) -> bool {
        if self.last_seen.get(key).is_some_and(|seen| seen == message_id) {
            return false;
        }
        if !self.last_seen.contains_key(key) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.last_seen.remove(&oldest);
                }
            }
            self.order.push_back(key.to_string());
        }
        self.last_seen.insert(key.to_string(), message_id.to_string());
        true
    }
}

/// Drives one poll-based channel: fetch, dedup, handle, reply.
pub struct PollWorker {
    agent_id: String,
    adapter: Arc<ChannelAdapter>,
    handler: Arc<dyn MessageHandler>,
    interval: Duration,
    dedup: Mutex<DedupCache>,
}

impl PollWorker {
    pub fn new(
        agent_id: impl Into<String>,
        adapter: Arc<ChannelAdapter>,
        handler: Arc<dyn MessageHandler>,
        interval_secs: u64,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            adapter,
            handler,
            interval: Duration::from_secs(interval_secs.max(1)),
            dedup: Mutex::new(DedupCache::new(dedup_capacity)),
        }
    }

    /// Poll until `shutdown` flips to true. Errors are logged and the loop
    /// keeps going; a broken tick must not kill the worker.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(channel = self.adapter.name(), "poll worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        warn!(channel = self.adapter.name(), %error, "poll tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(channel = self.adapter.name(), "poll worker stopping");
                        return;
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> Result<(), crate::ChannelError> {
        let batch = self.adapter.receive().await?;
        for message in batch {
            let key = format!("{}:{}", self.agent_id, message.channel_conversation_id);
            let fresh =
                self.dedup.lock().await.observe(&key, &message.channel_message_id);
            if !fresh {
                continue;
            }

            match self.handler.handle(message).await {
                Ok(reply) => {
                    if reply.text.is_empty() {
                        continue;
                    }
                    if let Err(error) = self.adapter.send(&reply).await {
                        error!(%error, conversation = %reply.channel_conversation_id, "reply send failed");
                    }
                }
                Err(error) => {
                    // The dedup entry stays: a handler error is not retried
                    // until the user writes again.
                    error!(%error, "message handling failed");
                }
            }
        }
        Ok(())
    }
}
