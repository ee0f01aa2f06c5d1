//! Declarative automation rules evaluated after every processed message.
//!
//! Rules are data, not code: a `when` block of predicates that must all hold
//! and a `do` list of actions to plan. Evaluation is pure — it decides what
//! should run and why, while execution lives with the pipeline's
//! collaborators.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::state::{ConversationState, Stage};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Once a rule has fired for a conversation it never fires there again.
    #[serde(default = "default_true")]
    pub once_per_conversation: bool,
    #[serde(default)]
    pub when: RuleWhen,
    #[serde(rename = "do")]
    pub actions: Vec<RuleAction>,
}

fn default_true() -> bool {
    true
}

/// Conjunctive match conditions; an omitted predicate always holds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleWhen {
    pub intent: Option<String>,
    pub stage: Option<Stage>,
    pub booking_finalized: Option<bool>,
    pub booking_fields_present: Vec<String>,
    /// Regex applied to the raw incoming text.
    pub text_matches: Option<String>,
}

/// One planned side effect. Serialized in the compact string form used by the
/// policy file: `notify_manager`, `create_calendar_event`,
/// `set_state:key=value`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleAction {
    NotifyManager,
    CreateCalendarEvent,
    SetState { key: String, value: String },
}

impl TryFrom<String> for RuleAction {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match raw.as_str() {
            "notify_manager" => Ok(Self::NotifyManager),
            "create_calendar_event" => Ok(Self::CreateCalendarEvent),
            other => {
                if let Some(assignment) = other.strip_prefix("set_state:") {
                    let (key, value) = assignment
                        .split_once('=')
                        .ok_or_else(|| format!("set_state needs `key=value`, got `{assignment}`"))?;
                    if key.trim().is_empty() {
                        return Err(format!("set_state key must not be empty in `{raw}`"));
                    }
                    Ok(Self::SetState { key: key.trim().to_string(), value: value.trim().to_string() })
                } else {
                    Err(format!("unknown automation action `{other}`"))
                }
            }
        }
    }
}

impl From<RuleAction> for String {
    fn from(action: RuleAction) -> Self {
        match action {
            RuleAction::NotifyManager => "notify_manager".to_string(),
            RuleAction::CreateCalendarEvent => "create_calendar_event".to_string(),
            RuleAction::SetState { key, value } => format!("set_state:{key}={value}"),
        }
    }
}

/// Inputs a rule is matched against for a single turn.
#[derive(Clone, Copy, Debug)]
pub struct AutomationContext<'a> {
    pub intent: &'a str,
    pub text: &'a str,
    pub state: &'a ConversationState,
}

/// A rule that matched this turn, with the actions to execute in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedAutomation {
    pub rule_id: String,
    pub actions: Vec<RuleAction>,
}

/// Audit record for one rule evaluation, attached to outgoing metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AutomationTrace {
    pub rule_id: String,
    #[serde(flatten)]
    pub outcome: AutomationOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum AutomationOutcome {
    Matched,
    SkippedDisabled,
    SkippedAlreadyRun,
    NoMatch(String),
}

/// Evaluate all rules in declaration order. Every rule produces exactly one
/// trace entry; matched rules additionally produce a plan entry.
pub fn evaluate_rules(
    rules: &[AutomationRule],
    context: &AutomationContext<'_>,
) -> (Vec<PlannedAutomation>, Vec<AutomationTrace>) {
    let mut planned = Vec::new();
    let mut trace = Vec::new();

    for rule in rules {
        let outcome = evaluate_rule(rule, context);
        if outcome == AutomationOutcome::Matched {
            planned.push(PlannedAutomation {
                rule_id: rule.id.clone(),
                actions: rule.actions.clone(),
            });
        }
        trace.push(AutomationTrace { rule_id: rule.id.clone(), outcome });
    }

    (planned, trace)
}

fn evaluate_rule(rule: &AutomationRule, context: &AutomationContext<'_>) -> AutomationOutcome {
    if !rule.enabled {
        return AutomationOutcome::SkippedDisabled;
    }
    if rule.once_per_conversation
        && context.state.flow.automations.get(&rule.id).copied().unwrap_or(false)
    {
        return AutomationOutcome::SkippedAlreadyRun;
    }

    let flow = &context.state.flow;

    if let Some(intent) = &rule.when.intent {
        if intent != context.intent {
            return AutomationOutcome::NoMatch(format!(
                "intent is {}, not {intent}",
                context.intent
            ));
        }
    }
    if let Some(stage) = rule.when.stage {
        if stage != flow.stage {
            return AutomationOutcome::NoMatch(format!(
                "stage is {}, not {}",
                flow.stage.as_str(),
                stage.as_str()
            ));
        }
    }
    if let Some(finalized) = rule.when.booking_finalized {
        if finalized != flow.booking_finalized {
            return AutomationOutcome::NoMatch(format!(
                "booking_finalized is {}",
                flow.booking_finalized
            ));
        }
    }
    for field in &rule.when.booking_fields_present {
        let present = match field.as_str() {
            "date" => flow.booking_data.date.is_some(),
            "time" => flow.booking_data.time.is_some(),
            "duration" => flow.booking_data.duration.is_some(),
            "room" => flow.booking_data.room.is_some(),
            "name" => flow.booking_data.name.is_some(),
            "phone" => flow.booking_data.phone.is_some(),
            "participants" => flow.booking_data.participants.is_some(),
            other => {
                return AutomationOutcome::NoMatch(format!("unknown booking field `{other}`"))
            }
        };
        if !present {
            return AutomationOutcome::NoMatch(format!("booking field `{field}` not collected"));
        }
    }
    if let Some(pattern) = &rule.when.text_matches {
        match Regex::new(pattern) {
            Ok(regex) if regex.is_match(context.text) => {}
            Ok(_) => {
                return AutomationOutcome::NoMatch(format!("text does not match `{pattern}`"))
            }
            Err(_) => {
                return AutomationOutcome::NoMatch(format!(
                    "invalid text_matches pattern `{pattern}`"
                ))
            }
        }
    }

    AutomationOutcome::Matched
}
