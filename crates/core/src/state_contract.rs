//! Cross-field consistency checks over the flow state, applied right before
//! persistence. `normalize` repairs the combinations that have one obvious
//! fix; `validate` reports the rest as codes for outgoing metadata.

use crate::state::{BookingStatus, FlowState, Stage};

/// Repair internally inconsistent combinations that have a single correct
/// reading: a stored calendar event id is the strongest signal, so it forces
/// the created/finalized shape.
pub fn normalize(flow: &mut FlowState) {
    if flow.booking_event_id.is_some() {
        flow.booking_status = BookingStatus::Created;
        flow.booking_finalized = true;
        flow.stage = Stage::Finalize;
        flow.booking_conflict = None;
    }
    if !flow.booking_status.is_busy_like() && flow.booking_event_id.is_none() {
        flow.booking_conflict = None;
    }
}

/// Report remaining inconsistencies as stable violation codes. Advisory only:
/// the pipeline logs and attaches them, it never halts on them.
pub fn validate(flow: &FlowState) -> Vec<String> {
    let mut violations = Vec::new();

    if flow.booking_event_id.is_some() && flow.booking_status != BookingStatus::Created {
        violations.push("event_id_without_created_status".to_string());
    }
    if flow.booking_status.is_busy_like() && flow.booking_conflict.is_none() {
        violations.push("busy_status_without_conflict".to_string());
    }
    if flow.booking_finalized && flow.stage != Stage::Finalize {
        violations.push("finalized_outside_finalize_stage".to_string());
    }
    // A stored event id vouches for the booking on its own; without one the
    // finalize stage needs at least the slot-defining fields.
    if flow.stage == Stage::Finalize
        && flow.booking_event_id.is_none()
        && !flow.booking_status.is_busy_like()
    {
        let data = &flow.booking_data;
        for (field, value) in
            [("date", &data.date), ("time", &data.time), ("room", &data.room)]
        {
            if value.is_none() {
                violations.push(format!("finalize_missing_field:{field}"));
            }
        }
    }

    violations
}
