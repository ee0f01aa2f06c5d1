use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Progress marker for the booking conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Qualify,
    Offer,
    Close,
    Finalize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qualify => "qualify",
            Self::Offer => "offer",
            Self::Close => "close",
            Self::Finalize => "finalize",
        }
    }
}

/// Outcome of the booking decision so far. Serialized as the legacy string
/// values, with the empty string meaning "no attempt yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "pending_manager")]
    PendingManager,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "busy_escalated")]
    BusyEscalated,
    #[serde(rename = "created")]
    Created,
}

impl BookingStatus {
    pub fn is_busy_like(self) -> bool {
        matches!(self, Self::Busy | Self::BusyEscalated)
    }
}

/// Names of the six fields a booking needs before it can be created.
pub const REQUIRED_BOOKING_FIELDS: [&str; 6] =
    ["date", "time", "duration", "room", "name", "phone"];

/// Structured booking fields accumulated across turns.
///
/// A field stays absent until detected; once set it is only replaced by an
/// explicit newer detection, never erased.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<String>,
}

impl BookingData {
    fn required(&self) -> [&Option<String>; 6] {
        [&self.date, &self.time, &self.duration, &self.room, &self.name, &self.phone]
    }

    /// How many of the six required fields are populated.
    pub fn filled_required(&self) -> usize {
        self.required().iter().filter(|f| f.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.filled_required() == REQUIRED_BOOKING_FIELDS.len()
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        self.required()
            .iter()
            .zip(REQUIRED_BOOKING_FIELDS)
            .filter(|(value, _)| value.is_none())
            .map(|(_, name)| name)
            .collect()
    }

    /// Stable lowercase fingerprint of the requested slot/contact tuple,
    /// used to suppress repeated failed attempts for an unchanged request.
    pub fn fingerprint(&self) -> String {
        self.required()
            .iter()
            .map(|f| f.as_deref().unwrap_or("").trim().to_lowercase())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Merge `newer` on top of `self`: an explicit newer detection overrides,
    /// an absent one preserves what we already know.
    pub fn absorb(&mut self, newer: &BookingData) {
        fn take(slot: &mut Option<String>, newer: &Option<String>) {
            if let Some(value) = newer {
                if !value.trim().is_empty() {
                    *slot = Some(value.trim().to_string());
                }
            }
        }
        take(&mut self.date, &newer.date);
        take(&mut self.time, &newer.time);
        take(&mut self.duration, &newer.duration);
        take(&mut self.room, &newer.room);
        take(&mut self.name, &newer.name);
        take(&mut self.phone, &newer.phone);
        take(&mut self.participants, &newer.participants);
    }
}

/// Why the requested slot could not be booked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConflict {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_rooms: Vec<String>,
}

/// The `flow` sub-object of the persisted conversation state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub booking_data: BookingData,
    #[serde(default)]
    pub booking_status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_conflict: Option<BookingConflict>,
    #[serde(default)]
    pub booking_finalized: bool,
    #[serde(default)]
    pub manager_notified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_booking_attempt_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub automations: BTreeMap<String, bool>,
}

/// Persisted conversation state, JSON-shaped and round-trippable.
///
/// The intent-lock fields live beside `flow` rather than inside it: replacing
/// the flow on a booking reset must not implicitly drop the lock — the reset
/// operation clears it explicitly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub flow: FlowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_intent: Option<String>,
    #[serde(default)]
    pub intent_lock_turns_left: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConversationState {
    /// Replace the flow with a fresh one and clear the intent lock.
    /// Used when a finalized booking cycle gives way to a new one.
    pub fn reset_flow(&mut self) {
        self.flow = FlowState::default();
        self.locked_intent = None;
        self.intent_lock_turns_left = 0;
    }

    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Key-level merge: top-level keys of `patch` overwrite, everything else in
/// `current` is preserved. Matches the persistence collaborator's contract of
/// never wholesale-overwriting the state document.
pub fn merge_state_keys(
    current: &mut serde_json::Map<String, Value>,
    patch: serde_json::Map<String, Value>,
) {
    for (key, value) in patch {
        current.insert(key, value);
    }
}
