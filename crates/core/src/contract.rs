use crate::config::{AgentStyle, IntentContract};

/// Result of checking a candidate reply. Reported violations never halt the
/// pipeline; they are attached to outgoing metadata for observability.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub violations: Vec<String>,
}

/// Checks a candidate reply against per-intent contract constraints and
/// global style limits. Report-only: never mutates the text.
#[derive(Clone, Debug)]
pub struct ContractValidator {
    max_sentences: usize,
    max_questions: usize,
}

impl ContractValidator {
    pub fn new(style: &AgentStyle) -> Self {
        Self { max_sentences: style.max_sentences, max_questions: style.max_questions }
    }

    pub fn validate(&self, text: &str, contract: Option<&IntentContract>) -> ValidationReport {
        let mut violations = Vec::new();

        let sentences = count_sentences(text);
        if sentences > self.max_sentences {
            violations.push(format!("max_sentences: {sentences} > {}", self.max_sentences));
        }

        let questions = text.matches('?').count();
        if questions > self.max_questions {
            violations.push(format!("max_questions: {questions} > {}", self.max_questions));
        }

        if let Some(contract) = contract {
            // At least one required phrase, case-sensitive.
            if !contract.must_include_any.is_empty() {
                let found = contract.must_include_any.iter().any(|phrase| text.contains(phrase));
                if !found {
                    violations.push(format!(
                        "must_include: none of {:?} found",
                        contract.must_include_any
                    ));
                }
            }

            // Forbidden phrases, case-insensitive, each hit reported.
            let lower = text.to_lowercase();
            for phrase in &contract.forbidden {
                if lower.contains(&phrase.to_lowercase()) {
                    violations.push(format!("forbidden: '{phrase}' found"));
                }
            }
        }

        ValidationReport { ok: violations.is_empty(), violations }
    }
}

/// Sentences are whatever remains non-empty after splitting on `.`, `!`, `?`.
pub(crate) fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?']).filter(|part| !part.trim().is_empty()).count()
}
