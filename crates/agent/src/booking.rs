//! Booking execution against the calendar: availability check, event
//! creation, and the state transitions that follow. Reads fail open (an
//! unreachable calendar never blocks a booking attempt), writes fail closed
//! (an unconfirmed booking is handed to a manager, never reported as
//! created).

use reservo_core::config::BookingSettings;
use reservo_core::flow::{busy_reply, resolve_slot};
use reservo_core::state::{BookingConflict, BookingStatus, ConversationState, Stage};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collab::{AvailabilityCheck, BookingRequest, CalendarService};

/// What the attempt changed, for the pipeline to fold into the reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookingOutcome {
    pub attempted: bool,
    /// When set, replaces the model's reply entirely.
    pub reply_override: Option<String>,
    pub escalation_reason: Option<String>,
}

/// Try to create the booking described by the accumulated fields.
///
/// Idempotent per conversation: an already-stored event id means the booking
/// exists and no calendar call is made. A repeated attempt with an unchanged
/// field fingerprint after a failure is suppressed; changing any field is
/// the retry path.
pub async fn execute_booking(
    calendar: &dyn CalendarService,
    settings: &BookingSettings,
    conversation_id: Uuid,
    state: &mut ConversationState,
) -> BookingOutcome {
    let flow = &mut state.flow;

    if flow.booking_event_id.is_some() {
        info!(%conversation_id, "booking already created, skipping calendar call");
        return BookingOutcome::default();
    }

    let data = flow.booking_data.clone();
    let fingerprint = data.fingerprint();
    if flow.last_booking_attempt_fingerprint.as_deref() == Some(fingerprint.as_str())
        && flow.booking_status != BookingStatus::None
    {
        info!(%conversation_id, "unchanged booking request after a failed attempt, suppressed");
        let reply_override =
            flow.booking_status.is_busy_like().then(|| busy_reply(&data));
        return BookingOutcome { attempted: false, reply_override, escalation_reason: None };
    }

    let slot = match resolve_slot(&data, settings.default_duration_hours) {
        Ok(slot) => slot,
        Err(error) => {
            warn!(%conversation_id, %error, "booking attempted without a resolvable slot");
            return BookingOutcome::default();
        }
    };
    let query = crate::collab::SlotQuery {
        start: slot.start,
        duration_hours: slot.duration_hours,
        room: slot.room.clone(),
    };

    let availability = match calendar.check_availability(&query).await {
        Ok(check) => check,
        Err(error) => {
            // Fail open: an unreachable calendar must not silently drop the
            // booking; the create below is still authoritative.
            warn!(%conversation_id, %error, "availability check failed, assuming free");
            AvailabilityCheck { success: false, available: true, conflicting_rooms: vec![] }
        }
    };

    if !availability.available {
        flow.booking_status = BookingStatus::Busy;
        flow.booking_conflict = Some(BookingConflict {
            reason: "slot_taken".to_string(),
            conflicting_rooms: availability.conflicting_rooms,
        });
        flow.last_booking_attempt_fingerprint = Some(fingerprint);
        flow.stage = Stage::Offer;
        info!(%conversation_id, room = %slot.room, "requested slot is busy");
        return BookingOutcome {
            attempted: true,
            reply_override: Some(busy_reply(&data)),
            escalation_reason: None,
        };
    }

    let request = BookingRequest {
        slot: query,
        name: data.name.clone().unwrap_or_default(),
        phone: data.phone.clone().unwrap_or_default(),
        participants: data.participants.clone(),
        conversation_id: conversation_id.to_string(),
    };
    match calendar.create_booking(&request).await {
        Ok(created) => {
            flow.booking_event_id = Some(created.event_id.clone());
            flow.booking_status = BookingStatus::Created;
            flow.booking_conflict = None;
            flow.booking_finalized = true;
            flow.stage = Stage::Finalize;
            flow.last_booking_attempt_fingerprint = Some(fingerprint);
            info!(%conversation_id, event_id = %created.event_id, "booking created");
            BookingOutcome { attempted: true, reply_override: None, escalation_reason: None }
        }
        Err(error) => {
            // Fail closed: never report a booking the calendar did not confirm.
            warn!(%conversation_id, %error, "calendar write failed, handing to manager");
            if flow.booking_status == BookingStatus::None {
                flow.booking_status = BookingStatus::PendingManager;
            }
            flow.last_booking_attempt_fingerprint = Some(fingerprint);
            BookingOutcome {
                attempted: true,
                reply_override: Some(
                    "Не получилось подтвердить бронь автоматически — передаю заявку менеджеру, он свяжется с вами."
                        .to_string(),
                ),
                escalation_reason: Some("booking_create_failed".to_string()),
            }
        }
    }
}
