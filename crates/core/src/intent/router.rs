use crate::config::{IntentDef, IntentContract};

/// Confidence reported for an exact marker hit.
pub const CONFIDENCE_MATCH: f32 = 0.95;
/// Confidence reported when no marker matched and the fallback is used.
pub const CONFIDENCE_FALLBACK: f32 = 0.25;
/// Fallback intent id when the dialogue policy does not name one.
pub const DEFAULT_FALLBACK: &str = "SAFE_FAQ";

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub intent: String,
    pub confidence: f32,
}

/// Maps message text to a symbolic intent by marker-phrase matching.
///
/// Intents are evaluated in ascending priority order (lower number wins) and
/// the first match is returned — a deliberate tie-break, not best-match.
#[derive(Clone, Debug)]
pub struct IntentRouter {
    intents: Vec<IntentDef>,
    fallback: String,
}

impl IntentRouter {
    pub fn new(mut intents: Vec<IntentDef>, fallback: impl Into<String>) -> Self {
        intents.sort_by_key(|intent| intent.priority);
        Self { intents, fallback: fallback.into() }
    }

    pub fn with_default_fallback(intents: Vec<IntentDef>) -> Self {
        Self::new(intents, DEFAULT_FALLBACK)
    }

    /// Detect the intent for a user message.
    pub fn detect(&self, text: &str) -> Detection {
        let lower = text.to_lowercase();
        for intent in &self.intents {
            if Self::matches(&lower, &intent.markers) {
                return Detection { intent: intent.id.clone(), confidence: CONFIDENCE_MATCH };
            }
        }
        Detection { intent: self.fallback.clone(), confidence: CONFIDENCE_FALLBACK }
    }

    /// Pure lookup of the full definition for an intent id.
    pub fn get(&self, intent_id: &str) -> Option<&IntentDef> {
        self.intents.iter().find(|intent| intent.id == intent_id)
    }

    pub fn contract_for(&self, intent_id: &str) -> Option<&IntentContract> {
        self.get(intent_id).and_then(|intent| intent.contract.as_ref())
    }

    pub fn intents(&self) -> &[IntentDef] {
        &self.intents
    }

    fn matches(text_lower: &str, markers: &[String]) -> bool {
        markers.iter().any(|marker| text_lower.contains(&marker.to_lowercase()))
    }
}
