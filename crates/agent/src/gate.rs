//! Per-conversation serialization. Messages for different conversations run
//! concurrently; two messages for the same conversation never overlap.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct ConversationGate {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ConversationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for one conversation, waiting behind any in-flight
    /// message for the same conversation.
    pub async fn acquire(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(conversation_id).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_conversation_is_serialized() {
        let gate = Arc::new(ConversationGate::new());
        let conversation = Uuid::new_v4();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let in_flight = Arc::clone(&in_flight);
            handles.push(tokio::spawn(async move {
                let _guard = gate.acquire(conversation).await;
                let concurrent = in_flight.fetch_add(1, Ordering::SeqCst);
                assert_eq!(concurrent, 0);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
    }

    #[tokio::test]
    async fn different_conversations_do_not_block_each_other() {
        let gate = ConversationGate::new();
        let _first = gate.acquire(Uuid::new_v4()).await;
        // Must not deadlock.
        let _second = gate.acquire(Uuid::new_v4()).await;
    }
}
