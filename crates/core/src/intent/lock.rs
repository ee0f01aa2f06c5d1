use crate::config::IntentDef;
use crate::intent::ESCALATE_INTENT;
use crate::state::ConversationState;

/// Priority assigned to intents absent from the configured list.
/// High enough that they can never override an active lock.
const UNKNOWN_PRIORITY: i32 = 999;

/// Default number of turns a fresh lock holds.
pub const DEFAULT_LOCK_TURNS: u32 = 2;

/// Stabilizes the effective intent across turns so the conversation does not
/// flip-flop between topics on every message.
#[derive(Clone, Copy, Debug)]
pub struct IntentLock {
    lock_turns: u32,
}

impl Default for IntentLock {
    fn default() -> Self {
        Self { lock_turns: DEFAULT_LOCK_TURNS }
    }
}

impl IntentLock {
    pub fn new(lock_turns: u32) -> Self {
        Self { lock_turns }
    }

    /// Apply the locking rules, mutating the lock fields in `state`, and
    /// return the effective intent for this turn.
    pub fn apply(
        &self,
        state: &mut ConversationState,
        raw_intent: &str,
        intents: &[IntentDef],
    ) -> String {
        let locked = state.locked_intent.clone();
        let turns_left = state.intent_lock_turns_left;

        if let Some(locked) = locked.as_deref() {
            if turns_left > 0 {
                if raw_intent == locked {
                    state.intent_lock_turns_left = turns_left - 1;
                    return locked.to_string();
                }
                if Self::should_override(raw_intent, locked, intents) {
                    state.locked_intent = Some(raw_intent.to_string());
                    state.intent_lock_turns_left = self.lock_turns;
                    return raw_intent.to_string();
                }
                // Lock holds.
                state.intent_lock_turns_left = turns_left - 1;
                return locked.to_string();
            }
        }

        // No active lock (or it just expired).
        if locked.as_deref() != Some(raw_intent) {
            state.locked_intent = Some(raw_intent.to_string());
            state.intent_lock_turns_left = self.lock_turns;
        } else {
            state.intent_lock_turns_left = 0;
        }
        raw_intent.to_string()
    }

    fn should_override(new_intent: &str, locked_intent: &str, intents: &[IntentDef]) -> bool {
        if new_intent == ESCALATE_INTENT {
            return true;
        }
        let priority = |id: &str| {
            intents
                .iter()
                .find(|intent| intent.id == id)
                .map(|intent| intent.priority)
                .unwrap_or(UNKNOWN_PRIORITY)
        };
        priority(new_intent) < priority(locked_intent)
    }
}
