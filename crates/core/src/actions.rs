use once_cell::sync::Lazy;
use regex::Regex;

use crate::state::BookingData;

static ACTION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[ACTION:(\w+)\]").expect("action tag pattern"));
static BOOKING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[BOOKING:([^\]]+)\]").expect("booking tag pattern"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("blank pattern"));

/// Machine-readable directive embedded in model output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentAction {
    CreateBooking,
    Reset,
    Escalate,
}

impl AgentAction {
    fn from_tag(name: &str) -> Option<Self> {
        match name {
            "CREATE_BOOKING" => Some(Self::CreateBooking),
            "RESET" => Some(Self::Reset),
            "ESCALATE" => Some(Self::Escalate),
            _ => None,
        }
    }
}

/// Result of extracting action tags out of raw model text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedActions {
    pub clean_text: String,
    pub actions: Vec<AgentAction>,
    pub booking: Option<BookingData>,
    /// Tag names that looked like actions but are not in the vocabulary.
    /// Stripped from the text anyway; surfaced so callers can log them.
    pub unknown_tags: Vec<String>,
}

impl ParsedActions {
    pub fn has(&self, action: AgentAction) -> bool {
        self.actions.contains(&action)
    }
}

/// Extract `[ACTION:NAME]` and `[BOOKING:a|b|...]` tags from model output.
///
/// All recognized tags are removed from the text. A structured booking tag
/// that parses successfully implies `CreateBooking` even when the simple tag
/// is absent; a tag with the wrong field count is ignored entirely.
pub fn parse_action_tags(text: &str) -> ParsedActions {
    let mut actions = Vec::new();
    let mut unknown_tags = Vec::new();

    for capture in ACTION_TAG.captures_iter(text) {
        let name = &capture[1];
        match AgentAction::from_tag(name) {
            Some(action) => {
                if !actions.contains(&action) {
                    actions.push(action);
                }
            }
            None => unknown_tags.push(name.to_string()),
        }
    }

    let booking = BOOKING_TAG
        .captures(text)
        .and_then(|capture| parse_booking_fields(&capture[1]));
    if booking.is_some() && !actions.contains(&AgentAction::CreateBooking) {
        actions.push(AgentAction::CreateBooking);
    }

    let clean = ACTION_TAG.replace_all(text, "");
    let clean = BOOKING_TAG.replace_all(&clean, "");
    let clean_text = BLANK_LINES.replace_all(clean.trim(), "\n\n").trim().to_string();

    ParsedActions { clean_text, actions, booking, unknown_tags }
}

/// Pipe-delimited booking payload, position-significant:
/// 5 fields `date|time|room|name|phone` or 6 fields with `duration` third.
fn parse_booking_fields(raw: &str) -> Option<BookingData> {
    let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
    let mut data = BookingData::default();
    match parts.as_slice() {
        [date, time, room, name, phone] => {
            data.date = Some((*date).to_string());
            data.time = Some((*time).to_string());
            data.room = Some((*room).to_string());
            data.name = Some((*name).to_string());
            data.phone = Some((*phone).to_string());
        }
        [date, time, duration, room, name, phone] => {
            data.date = Some((*date).to_string());
            data.time = Some((*time).to_string());
            data.duration = Some((*duration).to_string());
            data.room = Some((*room).to_string());
            data.name = Some((*name).to_string());
            data.phone = Some((*phone).to_string());
        }
        _ => return None,
    }
    Some(data)
}
