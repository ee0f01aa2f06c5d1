//! Domain core for the reservo conversational booking agent.
//!
//! Everything in this crate is deterministic and I/O-free: message shapes,
//! conversation state, intent routing and locking, reply validation and
//! postprocessing, action-tag parsing, booking field extraction with stage
//! derivation, and the automation rule evaluator. The async pipeline that
//! drives these pieces against real collaborators lives in `reservo-agent`.

pub mod actions;
pub mod automation;
pub mod config;
pub mod contract;
pub mod flow;
pub mod intent;
pub mod message;
pub mod postprocess;
pub mod state;
pub mod state_contract;

pub use actions::{parse_action_tags, AgentAction, ParsedActions};
pub use automation::{
    evaluate_rules, AutomationContext, AutomationOutcome, AutomationRule, AutomationTrace,
    PlannedAutomation, RuleAction,
};
pub use config::{
    config_version, load_agent_bundle, AgentBundle, AgentConfig, AgentStyle, AppConfig,
    BookingSettings, ChannelKind, ChannelSettings, ConfigError, DialoguePolicy, IntentContract,
    IntentDef,
};
pub use contract::{ContractValidator, ValidationReport};
pub use flow::{
    busy_reply, derive_stage, extract_booking_fields, resolve_slot, wants_restart, BookingSlot,
    SlotError,
};
pub use intent::{Detection, IntentLock, IntentRouter};
pub use message::{IncomingMessage, Metadata, OutgoingMessage};
pub use postprocess::Postprocessor;
pub use state::{BookingConflict, BookingData, BookingStatus, ConversationState, FlowState, Stage};
