//! The seven-stage message pipeline: enrich, detect, pre_action, think,
//! validate, postprocess, post_action. Stages run strictly in order; an
//! infrastructure error halts the turn with a `<stage>: <detail>` error,
//! while a model failure only downgrades `think` to the deterministic
//! fallback.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reservo_core::actions::{parse_action_tags, AgentAction};
use reservo_core::automation::{evaluate_rules, AutomationContext, RuleAction};
use reservo_core::config::{config_version, AgentBundle};
use reservo_core::contract::ContractValidator;
use reservo_core::flow::{derive_stage, extract_booking_fields, wants_restart};
use reservo_core::intent::lock::DEFAULT_LOCK_TURNS;
use reservo_core::intent::router::DEFAULT_FALLBACK;
use reservo_core::intent::{IntentLock, IntentRouter, ESCALATE_INTENT};
use reservo_core::message::{IncomingMessage, Metadata, OutgoingMessage};
use reservo_core::postprocess::Postprocessor;
use reservo_core::state::{BookingStatus, ConversationState};
use reservo_core::state_contract;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::booking::{execute_booking, BookingOutcome};
use crate::collab::{CalendarService, EscalationNotice, EscalationService, SlotQuery};
use crate::fallback::{fallback_reply, FALLBACK_MODEL};
use crate::gate::ConversationGate;
use crate::llm::{Brain, ChatMessage, TokenUsage};
use crate::prompt::PromptBuilder;
use crate::store::ConversationStore;

#[derive(Debug, Error)]
#[error("{stage}: {detail}")]
pub struct PipelineError {
    pub stage: &'static str,
    pub detail: String,
}

impl PipelineError {
    fn at(stage: &'static str, error: impl std::fmt::Display) -> Self {
        Self { stage, detail: error.to_string() }
    }
}

/// One agent's message processor. Cheap to share behind an `Arc`; all
/// per-turn state lives on the stack of `process`.
pub struct Pipeline {
    bundle: AgentBundle,
    brain: Arc<dyn Brain>,
    store: Arc<dyn ConversationStore>,
    calendar: Arc<dyn CalendarService>,
    escalations: Arc<dyn EscalationService>,
    gate: ConversationGate,
    router: IntentRouter,
    lock: IntentLock,
    validator: ContractValidator,
    postprocessor: Postprocessor,
    config_version: String,
}

impl Pipeline {
    pub fn new(
        bundle: AgentBundle,
        brain: Arc<dyn Brain>,
        store: Arc<dyn ConversationStore>,
        calendar: Arc<dyn CalendarService>,
        escalations: Arc<dyn EscalationService>,
    ) -> Self {
        let fallback_intent =
            bundle.policy.fallback_intent.clone().unwrap_or_else(|| DEFAULT_FALLBACK.to_string());
        let router = IntentRouter::new(bundle.policy.intents.clone(), fallback_intent);
        let lock = IntentLock::new(bundle.policy.lock_turns.unwrap_or(DEFAULT_LOCK_TURNS));
        let validator = ContractValidator::new(&bundle.agent.style);
        let postprocessor = Postprocessor::new(&bundle.agent.style);
        let config_version = config_version(&bundle.agent, &bundle.policy);

        Self {
            bundle,
            brain,
            store,
            calendar,
            escalations,
            gate: ConversationGate::new(),
            router,
            lock,
            validator,
            postprocessor,
            config_version,
        }
    }

    pub async fn process(
        &self,
        incoming: IncomingMessage,
    ) -> Result<OutgoingMessage, PipelineError> {
        let started = Instant::now();

        // --- enrich --------------------------------------------------------
        let (record, _) = self
            .store
            .get_or_create(&self.bundle.agent.id, &incoming.channel, &incoming.channel_conversation_id)
            .await
            .map_err(|e| PipelineError::at("enrich", e))?;
        let conversation_id = record.id;
        let _turn_guard = self.gate.acquire(conversation_id).await;

        // Re-read under the gate: another message may have just finished.
        let (record, _) = self
            .store
            .get_or_create(&self.bundle.agent.id, &incoming.channel, &incoming.channel_conversation_id)
            .await
            .map_err(|e| PipelineError::at("enrich", e))?;
        let mut state = record.state.clone();

        let today = incoming.timestamp.unwrap_or_else(Utc::now).date_naive();

        if state.flow.booking_finalized
            && wants_restart(&incoming.text, &self.bundle.policy.booking.restart_markers)
        {
            info!(%conversation_id, "finalized booking plus restart marker, starting a new cycle");
            state.reset_flow();
        }

        state.flow.booking_data = extract_booking_fields(
            &state.flow.booking_data,
            &incoming.text,
            today,
            &self.bundle.policy.booking,
        );
        state.flow.stage = derive_stage(&state.flow.booking_data, state.flow.booking_status);

        let lead_name = state
            .flow
            .booking_data
            .name
            .clone()
            .or_else(|| incoming.sender_name.clone());
        let lead_phone = state
            .flow
            .booking_data
            .phone
            .clone()
            .or_else(|| incoming.sender_phone.clone());
        self.store
            .update_lead(conversation_id, lead_name.as_deref(), lead_phone.as_deref())
            .await
            .map_err(|e| PipelineError::at("enrich", e))?;
        self.store
            .append_message(conversation_id, "user", &incoming.text)
            .await
            .map_err(|e| PipelineError::at("enrich", e))?;

        // --- detect --------------------------------------------------------
        let detection = self.router.detect(&incoming.text);
        let intent = self.lock.apply(&mut state, &detection.intent, self.router.intents());
        info!(%conversation_id, raw = %detection.intent, effective = %intent, "intent detected");

        // --- pre_action ----------------------------------------------------
        let availability_hint = self.availability_hint(&state).await;

        // --- think ---------------------------------------------------------
        let mut prompt = PromptBuilder::new(&self.bundle).build(&state, &intent);
        if let Some(hint) = &availability_hint {
            prompt.push_str("\n\n# КАЛЕНДАРЬ\n");
            prompt.push_str(hint);
        }
        let history = self
            .store
            .history(conversation_id, self.bundle.agent.llm.max_history)
            .await
            .map_err(|e| PipelineError::at("think", e))?;
        let mut messages = vec![ChatMessage::system(prompt)];
        messages.extend(
            history.iter().map(|m| ChatMessage { role: m.role.clone(), content: m.content.clone() }),
        );

        let (raw_reply, model, usage): (String, String, Option<TokenUsage>) =
            match self.brain.complete(&messages).await {
                Ok(response) => (response.content, response.model, response.usage),
                Err(error) => {
                    warn!(%conversation_id, %error, "model call failed, using deterministic fallback");
                    (fallback_reply(&self.bundle, &state), FALLBACK_MODEL.to_string(), None)
                }
            };

        // --- validate ------------------------------------------------------
        let parsed = parse_action_tags(&raw_reply);
        if !parsed.unknown_tags.is_empty() {
            warn!(%conversation_id, tags = ?parsed.unknown_tags, "unknown action tags stripped");
        }
        let contract = self.router.contract_for(&intent);
        let report = self.validator.validate(&parsed.clean_text, contract);
        if !report.ok {
            warn!(%conversation_id, violations = ?report.violations, "reply violates its contract");
        }

        // --- postprocess ---------------------------------------------------
        let allow_prepayment = parsed.has(AgentAction::CreateBooking);
        let mut reply = self.postprocessor.process(&parsed.clean_text, contract, allow_prepayment);
        if reply.trim().is_empty() {
            reply = fallback_reply(&self.bundle, &state);
        }

        // --- post_action ---------------------------------------------------
        if parsed.has(AgentAction::Reset) {
            info!(%conversation_id, "reset requested by the model");
            state.reset_flow();
        }
        if let Some(booking) = &parsed.booking {
            state.flow.booking_data.absorb(booking);
        }
        state.flow.stage = derive_stage(&state.flow.booking_data, state.flow.booking_status);

        let mut escalation_reasons: Vec<String> = Vec::new();

        let fingerprint_changed = state.flow.last_booking_attempt_fingerprint.as_deref()
            != Some(state.flow.booking_data.fingerprint().as_str());
        let should_book = !parsed.has(AgentAction::Reset)
            && (parsed.has(AgentAction::CreateBooking)
                || (state.flow.booking_data.is_complete()
                    && state.flow.booking_event_id.is_none()
                    && fingerprint_changed));
        let outcome = if should_book {
            execute_booking(
                self.calendar.as_ref(),
                &self.bundle.policy.booking,
                conversation_id,
                &mut state,
            )
            .await
        } else {
            BookingOutcome::default()
        };
        if let Some(override_text) = outcome.reply_override {
            reply = override_text;
        }
        if let Some(reason) = outcome.escalation_reason {
            escalation_reasons.push(reason);
        }

        if parsed.has(AgentAction::Escalate) {
            escalation_reasons.push("agent_requested".to_string());
        }
        if intent == ESCALATE_INTENT {
            escalation_reasons.push("user_requested".to_string());
        }
        if !self.bundle.policy.rule_engine_enabled()
            && state.flow.booking_finalized
            && !state.flow.manager_notified
        {
            escalation_reasons.push("booking_finalized".to_string());
        }
        if !escalation_reasons.is_empty()
            && !state.flow.manager_notified
            && self.escalate(conversation_id, &state, &escalation_reasons, &incoming.text).await
        {
            state.flow.manager_notified = true;
            if state.flow.booking_status == BookingStatus::Busy {
                state.flow.booking_status = BookingStatus::BusyEscalated;
            }
        }

        let mut automation_trace: Option<Value> = None;
        if self.bundle.policy.rule_engine_enabled() {
            let (planned, trace) = evaluate_rules(
                &self.bundle.policy.automations,
                &AutomationContext { intent: &intent, text: &incoming.text, state: &state },
            );
            automation_trace = serde_json::to_value(&trace).ok();
            for plan in planned {
                let mut completed = true;
                for action in &plan.actions {
                    match action {
                        RuleAction::NotifyManager => {
                            if state.flow.manager_notified {
                                continue;
                            }
                            let reasons = [format!("automation:{}", plan.rule_id)];
                            let sent =
                                self.escalate(conversation_id, &state, &reasons, &incoming.text).await;
                            if sent {
                                state.flow.manager_notified = true;
                                if state.flow.booking_status == BookingStatus::Busy {
                                    state.flow.booking_status = BookingStatus::BusyEscalated;
                                }
                            }
                            completed &= sent;
                        }
                        RuleAction::CreateCalendarEvent => {
                            let booked = execute_booking(
                                self.calendar.as_ref(),
                                &self.bundle.policy.booking,
                                conversation_id,
                                &mut state,
                            )
                            .await;
                            if let Some(override_text) = booked.reply_override {
                                reply = override_text;
                            }
                            completed &= state.flow.booking_event_id.is_some();
                        }
                        RuleAction::SetState { key, value } => {
                            state.extra.insert(key.clone(), Value::String(value.clone()));
                        }
                    }
                }
                if completed {
                    state.flow.automations.insert(plan.rule_id, true);
                }
            }
        }

        state_contract::normalize(&mut state.flow);
        let state_violations = state_contract::validate(&state.flow);
        if !state_violations.is_empty() {
            warn!(%conversation_id, violations = ?state_violations, "flow state is inconsistent");
        }

        self.store
            .merge_state(conversation_id, state.to_json())
            .await
            .map_err(|e| PipelineError::at("post_action", e))?;
        self.store
            .append_message(conversation_id, "assistant", &reply)
            .await
            .map_err(|e| PipelineError::at("post_action", e))?;

        // --- outgoing ------------------------------------------------------
        let mut outgoing = OutgoingMessage {
            text: reply,
            conversation_id: conversation_id.to_string(),
            channel_conversation_id: incoming.channel_conversation_id,
            metadata: Metadata::new(),
        };
        outgoing.insert_meta("intent", intent);
        outgoing.insert_meta("intent_confidence", f64::from(detection.confidence));
        outgoing.insert_meta("model", model);
        if let Some(usage) = usage {
            if let Ok(value) = serde_json::to_value(usage) {
                outgoing.insert_meta("usage", value);
            }
        }
        outgoing.insert_meta("latency_ms", started.elapsed().as_millis() as u64);
        outgoing.insert_meta("config_version", self.config_version.clone());
        if !report.violations.is_empty() {
            outgoing.insert_meta("contract_violations", report.violations.clone());
        }
        if let Some(trace) = automation_trace {
            outgoing.insert_meta("automation_trace", trace);
        }
        if !state_violations.is_empty() {
            outgoing.insert_meta("state_contract_violations", state_violations);
        }
        Ok(outgoing)
    }

    /// Advisory availability check for the prompt. Fails open: when the
    /// calendar is unreachable the model simply gets no hint.
    async fn availability_hint(&self, state: &ConversationState) -> Option<String> {
        if state.flow.booking_event_id.is_some() {
            return None;
        }
        let slot = reservo_core::flow::resolve_slot(
            &state.flow.booking_data,
            self.bundle.policy.booking.default_duration_hours,
        )
        .ok()?;
        let query = SlotQuery {
            start: slot.start,
            duration_hours: slot.duration_hours,
            room: slot.room,
        };
        match self.calendar.check_availability(&query).await {
            Ok(check) if check.available => Some("Запрошенный слот свободен.".to_string()),
            Ok(check) => Some(format!(
                "Запрошенный слот занят (пересечение: {}). Предложи альтернативу.",
                check.conflicting_rooms.join(", ")
            )),
            Err(error) => {
                warn!(%error, "availability hint unavailable");
                None
            }
        }
    }

    async fn escalate(
        &self,
        conversation_id: Uuid,
        state: &ConversationState,
        reasons: &[String],
        last_message: &str,
    ) -> bool {
        let data = &state.flow.booking_data;
        let notice = EscalationNotice {
            conversation_id: conversation_id.to_string(),
            reason: reasons.join(","),
            summary: format!(
                "Клиент: {} ({}). Зал: {}, дата: {}, время: {}. Последнее сообщение: «{last_message}»",
                data.name.as_deref().unwrap_or("не представился"),
                data.phone.as_deref().unwrap_or("телефона нет"),
                data.room.as_deref().unwrap_or("—"),
                data.date.as_deref().unwrap_or("—"),
                data.time.as_deref().unwrap_or("—"),
            ),
        };
        match self.escalations.send_escalation(&notice).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%conversation_id, %error, "escalation delivery failed");
                false
            }
        }
    }
}
