//! End-to-end pipeline scenarios against in-memory collaborators and a
//! scripted model.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use reservo_agent::{
    Brain, BrainError, BrainResponse, CalendarService, ConversationStore, EscalationService,
    InMemoryCalendar, InMemoryEscalations, InMemoryStore, Pipeline, SlotQuery, FALLBACK_MODEL,
};
use reservo_core::automation::{AutomationRule, RuleAction, RuleWhen};
use reservo_core::config::{
    AgentConfig, AgentIdentity, AgentStyle, AgentBundle, DialoguePolicy, IntentDef, LlmSettings,
};
use reservo_core::message::IncomingMessage;
use reservo_core::state::{BookingStatus, Stage};

struct ScriptedBrain {
    replies: Mutex<VecDeque<Result<String, ()>>>,
}

impl ScriptedBrain {
    fn new(replies: Vec<Result<&str, ()>>) -> Self {
        Self {
            replies: Mutex::new(
                replies.into_iter().map(|r| r.map(str::to_string)).collect(),
            ),
        }
    }
}

#[async_trait]
impl Brain for ScriptedBrain {
    async fn complete(
        &self,
        _messages: &[reservo_agent::ChatMessage],
    ) -> Result<BrainResponse, BrainError> {
        match self.replies.lock().await.pop_front() {
            Some(Ok(content)) => Ok(BrainResponse {
                content,
                model: "scripted".to_string(),
                usage: None,
            }),
            Some(Err(())) | None => {
                Err(BrainError::Api { status: 500, body: "scripted failure".into() })
            }
        }
    }
}

fn bundle(automations: Vec<AutomationRule>) -> AgentBundle {
    let intents = vec![
        IntentDef {
            id: "ESCALATE".into(),
            markers: vec!["менеджер".into(), "живой человек".into()],
            priority: 1,
            contract: None,
        },
        IntentDef {
            id: "BOOKING".into(),
            markers: vec!["бронь".into(), "забронировать".into(), "зал".into()],
            priority: 10,
            contract: None,
        },
        IntentDef {
            id: "GREETING".into(),
            markers: vec!["привет".into(), "здравствуйте".into()],
            priority: 50,
            contract: None,
        },
    ];
    AgentBundle {
        agent: AgentConfig {
            id: "hall-bot".into(),
            name: "Hall bot".into(),
            identity: AgentIdentity {
                role: "Администратор студии".into(),
                persona: "Вежливый и краткий".into(),
                fallback_phrase: "Чем могу помочь?".into(),
            },
            style: AgentStyle::default(),
            rules: vec![],
            llm: LlmSettings::default(),
        },
        policy: DialoguePolicy {
            intents,
            fallback_intent: None,
            lock_turns: None,
            booking: Default::default(),
            automations,
        },
        knowledge: BTreeMap::new(),
    }
}

struct Harness {
    pipeline: Pipeline,
    store: Arc<InMemoryStore>,
    calendar: Arc<InMemoryCalendar>,
    escalations: Arc<InMemoryEscalations>,
}

impl Harness {
    fn new(brain: ScriptedBrain, automations: Vec<AutomationRule>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let calendar = Arc::new(InMemoryCalendar::new());
        let escalations = Arc::new(InMemoryEscalations::new());
        let pipeline = Pipeline::new(
            bundle(automations),
            Arc::new(brain) as Arc<dyn Brain>,
            Arc::clone(&store) as Arc<dyn ConversationStore>,
            Arc::clone(&calendar) as Arc<dyn CalendarService>,
            Arc::clone(&escalations) as Arc<dyn EscalationService>,
        );
        Self { pipeline, store, calendar, escalations }
    }

    fn message(&self, text: &str) -> IncomingMessage {
        let mut msg = IncomingMessage::new("telegram", "chat-1", Uuid::new_v4().to_string(), text);
        msg.timestamp = Utc.with_ymd_and_hms(2026, 8, 15, 10, 0, 0).single();
        msg
    }
}

const FULL_REQUEST: &str =
    "Хочу забронировать зал Карелия на 20.08.2026 в 11:00 на 2 часа, имя Иван, телефон 89991234567";
const BOOKING_TAG_REPLY: &str =
    "Бронирую зал. [BOOKING:20.08.2026|11:00|2|Карелия|Иван|89991234567]";

#[tokio::test]
async fn complete_request_books_and_finalizes() {
    let harness = Harness::new(ScriptedBrain::new(vec![Ok(BOOKING_TAG_REPLY)]), vec![]);

    let outgoing = harness.pipeline.process(harness.message(FULL_REQUEST)).await.expect("turn");

    assert_eq!(outgoing.metadata["intent"], "BOOKING");
    assert!(!outgoing.text.contains("[BOOKING"));

    let created = harness.calendar.created_bookings().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].slot.room, "Карелия");

    let conversation_id: Uuid = outgoing.conversation_id.parse().expect("uuid");
    let record = harness.store.record(conversation_id).await.expect("record");
    assert_eq!(record.state.flow.booking_status, BookingStatus::Created);
    assert_eq!(record.state.flow.stage, Stage::Finalize);
    assert!(record.state.flow.booking_finalized);
    assert!(record.state.flow.booking_event_id.is_some());
    assert_eq!(record.lead_phone.as_deref(), Some("89991234567"));
}

#[tokio::test]
async fn busy_slot_yields_busy_reply_and_no_event() {
    let harness = Harness::new(ScriptedBrain::new(vec![Ok(BOOKING_TAG_REPLY)]), vec![]);
    let start = chrono::NaiveDate::from_ymd_opt(2026, 8, 20)
        .and_then(|d| d.and_hms_opt(11, 0, 0))
        .expect("datetime");
    harness
        .calendar
        .mark_busy(SlotQuery { start, duration_hours: 2, room: "Карелия".into() })
        .await;

    let outgoing = harness.pipeline.process(harness.message(FULL_REQUEST)).await.expect("turn");

    assert!(outgoing.text.contains("занят"), "reply was: {}", outgoing.text);
    assert!(harness.calendar.created_bookings().await.is_empty());

    let conversation_id: Uuid = outgoing.conversation_id.parse().expect("uuid");
    let record = harness.store.record(conversation_id).await.expect("record");
    assert_eq!(record.state.flow.booking_status, BookingStatus::Busy);
    assert_eq!(record.state.flow.stage, Stage::Offer);
    assert!(!record.state.flow.booking_finalized);
}

#[tokio::test]
async fn repeated_confirmation_never_books_twice() {
    let harness = Harness::new(
        ScriptedBrain::new(vec![Ok(BOOKING_TAG_REPLY), Ok(BOOKING_TAG_REPLY)]),
        vec![],
    );

    let first = harness.pipeline.process(harness.message(FULL_REQUEST)).await.expect("turn");
    let conversation_id: Uuid = first.conversation_id.parse().expect("uuid");
    let event_id = harness
        .store
        .record(conversation_id)
        .await
        .expect("record")
        .state
        .flow
        .booking_event_id
        .expect("event id");

    harness.pipeline.process(harness.message("подтверждаю бронь")).await.expect("turn");

    assert_eq!(harness.calendar.created_bookings().await.len(), 1);
    let record = harness.store.record(conversation_id).await.expect("record");
    assert_eq!(record.state.flow.booking_event_id.as_deref(), Some(event_id.as_str()));
}

#[tokio::test]
async fn partial_request_stays_in_offer_and_collects_fields() {
    let harness =
        Harness::new(ScriptedBrain::new(vec![Ok("Отлично! На какую дату?")]), vec![]);

    let outgoing =
        harness.pipeline.process(harness.message("Хочу зал Грань")).await.expect("turn");

    assert_eq!(outgoing.text, "На какую дату?");
    assert!(harness.calendar.created_bookings().await.is_empty());

    let conversation_id: Uuid = outgoing.conversation_id.parse().expect("uuid");
    let record = harness.store.record(conversation_id).await.expect("record");
    assert_eq!(record.state.flow.stage, Stage::Offer);
    assert_eq!(record.state.flow.booking_data.room.as_deref(), Some("Грань"));
    assert!(!record.state.flow.booking_finalized);
}

#[tokio::test]
async fn model_failure_falls_back_to_deterministic_reply() {
    let harness = Harness::new(ScriptedBrain::new(vec![Err(())]), vec![]);

    let outgoing =
        harness.pipeline.process(harness.message("Хочу зал Грань")).await.expect("turn");

    assert_eq!(outgoing.metadata["model"], FALLBACK_MODEL);
    assert_eq!(outgoing.text, "На какую дату хотите забронировать?");
}

#[tokio::test]
async fn manager_request_escalates_once() {
    let harness = Harness::new(
        ScriptedBrain::new(vec![
            Ok("Передаю менеджеру. [ACTION:ESCALATE]"),
            Ok("Менеджер уже в курсе."),
        ]),
        vec![],
    );

    let outgoing = harness
        .pipeline
        .process(harness.message("Позовите менеджера, пожалуйста"))
        .await
        .expect("turn");
    assert_eq!(outgoing.metadata["intent"], "ESCALATE");
    assert_eq!(harness.escalations.notices().await.len(), 1);

    harness
        .pipeline
        .process(harness.message("Мне правда нужен менеджер"))
        .await
        .expect("turn");
    assert_eq!(harness.escalations.notices().await.len(), 1, "second notice must be suppressed");
}

#[tokio::test]
async fn finalize_automation_notifies_and_sets_state() {
    let automation = AutomationRule {
        id: "finalize_handoff".into(),
        enabled: true,
        once_per_conversation: true,
        when: RuleWhen {
            stage: Some(Stage::Finalize),
            booking_finalized: Some(true),
            ..RuleWhen::default()
        },
        actions: vec![
            RuleAction::NotifyManager,
            RuleAction::SetState { key: "handoff".into(), value: "done".into() },
        ],
    };
    let harness =
        Harness::new(ScriptedBrain::new(vec![Ok(BOOKING_TAG_REPLY)]), vec![automation]);

    let outgoing = harness.pipeline.process(harness.message(FULL_REQUEST)).await.expect("turn");

    assert!(outgoing.metadata.contains_key("automation_trace"));
    assert_eq!(harness.escalations.notices().await.len(), 1);
    assert!(harness.escalations.notices().await[0].reason.contains("finalize_handoff"));

    let conversation_id: Uuid = outgoing.conversation_id.parse().expect("uuid");
    let record = harness.store.record(conversation_id).await.expect("record");
    assert_eq!(record.state.extra["handoff"], "done");
    assert_eq!(record.state.flow.automations.get("finalize_handoff"), Some(&true));
}

#[tokio::test]
async fn busy_automation_notify_upgrades_the_status() {
    let automation = AutomationRule {
        id: "busy_handoff".into(),
        enabled: true,
        once_per_conversation: true,
        when: RuleWhen {
            stage: Some(Stage::Offer),
            booking_fields_present: vec!["date".into(), "time".into(), "room".into()],
            ..RuleWhen::default()
        },
        actions: vec![RuleAction::NotifyManager],
    };
    let harness =
        Harness::new(ScriptedBrain::new(vec![Ok(BOOKING_TAG_REPLY)]), vec![automation]);
    let start = chrono::NaiveDate::from_ymd_opt(2026, 8, 20)
        .and_then(|d| d.and_hms_opt(11, 0, 0))
        .expect("datetime");
    harness
        .calendar
        .mark_busy(SlotQuery { start, duration_hours: 2, room: "Карелия".into() })
        .await;

    let outgoing = harness.pipeline.process(harness.message(FULL_REQUEST)).await.expect("turn");

    assert_eq!(harness.escalations.notices().await.len(), 1);
    let conversation_id: Uuid = outgoing.conversation_id.parse().expect("uuid");
    let record = harness.store.record(conversation_id).await.expect("record");
    assert_eq!(record.state.flow.booking_status, BookingStatus::BusyEscalated);
    assert!(record.state.flow.manager_notified);
}

#[tokio::test]
async fn finalized_booking_plus_greeting_starts_a_new_cycle() {
    let harness = Harness::new(
        ScriptedBrain::new(vec![Ok(BOOKING_TAG_REPLY), Ok("Здравствуйте! Какой зал хотите?")]),
        vec![],
    );

    let first = harness.pipeline.process(harness.message(FULL_REQUEST)).await.expect("turn");
    let conversation_id: Uuid = first.conversation_id.parse().expect("uuid");

    harness
        .pipeline
        .process(harness.message("Здравствуйте, хочу ещё одну бронь"))
        .await
        .expect("turn");

    let record = harness.store.record(conversation_id).await.expect("record");
    assert!(!record.state.flow.booking_finalized);
    assert!(record.state.flow.booking_event_id.is_none());
    assert_eq!(record.state.flow.booking_status, BookingStatus::None);
}
