//! Deterministic reply used whenever the model is unavailable. Keeps the
//! booking flow moving by asking for the next missing field instead of
//! apologizing.

use reservo_core::config::AgentBundle;
use reservo_core::flow::busy_reply;
use reservo_core::state::{BookingStatus, ConversationState};

/// Marker recorded in outgoing metadata when the reply came from this module
/// rather than the model.
pub const FALLBACK_MODEL: &str = "fallback_rule_engine";

pub fn fallback_reply(bundle: &AgentBundle, state: &ConversationState) -> String {
    let flow = &state.flow;

    if flow.booking_status == BookingStatus::Created {
        let data = &flow.booking_data;
        return format!(
            "Бронь подтверждена: зал {} на {} в {}. Ждём вас!",
            data.room.as_deref().unwrap_or("—"),
            data.date.as_deref().unwrap_or("—"),
            data.time.as_deref().unwrap_or("—"),
        );
    }
    if flow.booking_status.is_busy_like() {
        return busy_reply(&flow.booking_data);
    }
    if flow.booking_status == BookingStatus::PendingManager {
        return "Передал вашу заявку менеджеру, он свяжется с вами в ближайшее время.".to_string();
    }

    if flow.booking_data.filled_required() > 0 {
        if let Some(field) = flow.booking_data.missing_required().first() {
            return question_for_field(field, bundle).to_string();
        }
        return "Всё записал, оформляю бронь.".to_string();
    }

    bundle.agent.identity.fallback_phrase.clone()
}

fn question_for_field<'a>(field: &str, bundle: &'a AgentBundle) -> std::borrow::Cow<'a, str> {
    match field {
        "date" => "На какую дату хотите забронировать?".into(),
        "time" => "На какое время вам удобно?".into(),
        "duration" => "На сколько часов планируете аренду?".into(),
        "room" => {
            format!("Какой зал вам подойдёт: {}?", bundle.policy.booking.rooms.join(", ")).into()
        }
        "name" => "Как к вам обращаться?".into(),
        "phone" => "Оставьте, пожалуйста, номер телефона для подтверждения.".into(),
        _ => bundle.agent.identity.fallback_phrase.as_str().into(),
    }
}
