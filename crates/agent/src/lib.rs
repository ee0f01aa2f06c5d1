//! The asynchronous side of the reservo agent: the LLM client, the prompt
//! builder, collaborator traits (calendar, escalation, conversation store)
//! with in-memory implementations, and the seven-stage message pipeline that
//! ties them to the deterministic core.

pub mod booking;
pub mod collab;
pub mod fallback;
pub mod gate;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod store;

pub use booking::{execute_booking, BookingOutcome};
pub use collab::{
    AvailabilityCheck, BookingRequest, CalendarError, CalendarService, CreatedBooking,
    EscalationError, EscalationNotice, EscalationService, InMemoryCalendar, InMemoryEscalations,
    SlotQuery,
};
pub use fallback::{fallback_reply, FALLBACK_MODEL};
pub use gate::ConversationGate;
pub use llm::{Brain, BrainError, BrainResponse, ChatMessage, HttpBrain, TokenUsage};
pub use pipeline::{Pipeline, PipelineError};
pub use prompt::PromptBuilder;
pub use store::{ConversationRecord, ConversationStore, InMemoryStore, StoreError, StoredMessage};
