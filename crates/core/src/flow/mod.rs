//! Booking-flow state machine: field extraction from free text, stage
//! derivation, slot resolution and the deterministic busy reply.

pub mod extract;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

pub use extract::extract_booking_fields;

use crate::state::{BookingData, BookingStatus, Stage};

/// Derive the stage from how many of the six required fields are known.
///
/// While the booking status is busy the stage is forced back to `offer`, to
/// keep the conversation in negotiation mode until the user changes the slot.
pub fn derive_stage(data: &BookingData, status: BookingStatus) -> Stage {
    if status.is_busy_like() {
        return Stage::Offer;
    }
    match data.filled_required() {
        0 => Stage::Qualify,
        1 | 2 => Stage::Offer,
        3..=5 => Stage::Close,
        _ => Stage::Finalize,
    }
}

/// Does this message explicitly ask to start a new booking cycle?
pub fn wants_restart(text: &str, restart_markers: &[String]) -> bool {
    let lower = text.to_lowercase();
    restart_markers.iter().any(|marker| lower.contains(&marker.to_lowercase()))
}

/// Deterministic reply for a busy slot, proposing an alternative.
pub fn busy_reply(data: &BookingData) -> String {
    let room = data.room.as_deref().unwrap_or("выбранный зал");
    let when = match (data.date.as_deref(), data.time.as_deref()) {
        (Some(date), Some(time)) => format!(" {date} в {time}"),
        (Some(date), None) => format!(" {date}"),
        _ => String::new(),
    };
    format!(
        "К сожалению, зал {room} занят{when}. Могу предложить другое время или другой зал — что вам удобнее?"
    )
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("booking data missing required fields: {0:?}")]
    MissingFields(Vec<&'static str>),
    #[error("unparseable booking start `{date} {time}`")]
    InvalidStart { date: String, time: String },
}

/// Requested booking window resolved from accumulated fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingSlot {
    pub start: NaiveDateTime,
    pub duration_hours: i64,
    pub room: String,
}

/// Resolve the concrete slot from booking data. Expects `date` in
/// `DD.MM.YYYY` and `time` in `HH:MM` as produced by extraction; a missing
/// or unparseable duration falls back to the configured default.
pub fn resolve_slot(data: &BookingData, default_duration_hours: i64) -> Result<BookingSlot, SlotError> {
    let missing: Vec<&'static str> = data
        .missing_required()
        .into_iter()
        .filter(|field| matches!(*field, "date" | "time" | "room"))
        .collect();
    if !missing.is_empty() {
        return Err(SlotError::MissingFields(missing));
    }

    let date = data.date.as_deref().unwrap_or_default();
    let time = data.time.as_deref().unwrap_or_default();
    let parsed_date = NaiveDate::parse_from_str(date, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(date, "%d.%m.%y"));
    let parsed_time = NaiveTime::parse_from_str(time, "%H:%M");
    let (Ok(parsed_date), Ok(parsed_time)) = (parsed_date, parsed_time) else {
        return Err(SlotError::InvalidStart { date: date.to_string(), time: time.to_string() });
    };

    let duration_hours = data
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<i64>().ok())
        .filter(|hours| (1..=24).contains(hours))
        .unwrap_or(default_duration_hours);

    Ok(BookingSlot {
        start: parsed_date.and_time(parsed_time),
        duration_hours,
        room: data.room.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with(count: usize) -> BookingData {
        let mut data = BookingData::default();
        let values: [&mut Option<String>; 6] = [
            &mut data.date,
            &mut data.time,
            &mut data.duration,
            &mut data.room,
            &mut data.name,
            &mut data.phone,
        ];
        for slot in values.into_iter().take(count) {
            *slot = Some("x".into());
        }
        data
    }

    #[test]
    fn stage_follows_field_count() {
        assert_eq!(derive_stage(&data_with(0), BookingStatus::None), Stage::Qualify);
        assert_eq!(derive_stage(&data_with(1), BookingStatus::None), Stage::Offer);
        assert_eq!(derive_stage(&data_with(2), BookingStatus::None), Stage::Offer);
        assert_eq!(derive_stage(&data_with(3), BookingStatus::None), Stage::Close);
        assert_eq!(derive_stage(&data_with(5), BookingStatus::None), Stage::Close);
        assert_eq!(derive_stage(&data_with(6), BookingStatus::None), Stage::Finalize);
    }

    #[test]
    fn busy_status_forces_offer_stage() {
        assert_eq!(derive_stage(&data_with(6), BookingStatus::Busy), Stage::Offer);
        assert_eq!(derive_stage(&data_with(6), BookingStatus::BusyEscalated), Stage::Offer);
    }

    #[test]
    fn busy_reply_names_room_and_slot() {
        let data = BookingData {
            date: Some("20.08.2026".into()),
            time: Some("11:00".into()),
            room: Some("Карелия".into()),
            ..BookingData::default()
        };
        let reply = busy_reply(&data);
        assert!(reply.contains("занят"));
        assert!(reply.contains("Карелия"));
        assert!(reply.contains("20.08.2026 в 11:00"));
    }

    #[test]
    fn restart_marker_matches_case_insensitively() {
        let markers = vec!["новая бронь".to_string()];
        assert!(wants_restart("Хочу НОВАЯ БРОНЬ на пятницу", &markers));
        assert!(!wants_restart("а какой адрес?", &markers));
    }

    #[test]
    fn slot_resolves_with_explicit_duration() {
        let data = BookingData {
            date: Some("20.08.2026".into()),
            time: Some("11:00".into()),
            duration: Some("2".into()),
            room: Some("Карелия".into()),
            name: Some("Иван".into()),
            phone: Some("89991234567".into()),
            participants: None,
        };
        let slot = resolve_slot(&data, 3).expect("slot");
        assert_eq!(slot.duration_hours, 2);
        assert_eq!(slot.room, "Карелия");
        assert_eq!(slot.start.to_string(), "2026-08-20 11:00:00");
    }

    #[test]
    fn slot_without_core_fields_reports_what_is_missing() {
        let data = BookingData { room: Some("Грань".into()), ..BookingData::default() };
        let error = resolve_slot(&data, 2).expect_err("must fail");
        assert_eq!(error, SlotError::MissingFields(vec!["date", "time"]));
    }

    #[test]
    fn unparseable_duration_falls_back_to_default() {
        let data = BookingData {
            date: Some("20.08.2026".into()),
            time: Some("11:00".into()),
            duration: Some("долго".into()),
            room: Some("Грань".into()),
            name: Some("Иван".into()),
            phone: Some("89991234567".into()),
            participants: None,
        };
        assert_eq!(resolve_slot(&data, 2).expect("slot").duration_hours, 2);
    }
}
