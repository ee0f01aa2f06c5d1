//! Heuristic extraction of booking fields from free-form Russian text.
//!
//! Extraction is additive: it only reports fields it saw in this message,
//! and the caller merges them on top of what the conversation already knows.

use chrono::{Datelike, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::BookingSettings;
use crate::state::BookingData;

static ABSOLUTE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})\.(\d{1,2})(?:\.(\d{2,4}))?\b").expect("date pattern")
});

static TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)\b").expect("time pattern"));

static DURATION_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s*час").expect("duration pattern"));

static DURATION_SPELLED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(один|два|две|три|четыре|пять|шесть|семь|восемь)\s*час")
        .expect("spelled duration pattern")
});

static PARTICIPANTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3})\s*(?:человек|чел\b|гост|участник)").expect("participants pattern")
});

static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s()\-]{6,}\d").expect("phone pattern"));

static NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:меня зовут|мо[её] имя|my name is|имя|name)\b[\s:—–-]*([A-Za-zА-Яа-яЁё][A-Za-zА-Яа-яЁё-]+)",
    )
    .expect("name pattern")
});

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(понедельник|вторник|сред[ауы]|четверг|пятниц[ауы]|суббот[ауы]|воскресень[еяю])",
    )
    .expect("weekday pattern")
});

// Words the name pattern must never accept as a person's name.
const NAME_DENYLIST: [&str; 10] = [
    "привет",
    "здравствуйте",
    "добрый",
    "зал",
    "бронь",
    "хочу",
    "да",
    "нет",
    "спасибо",
    "телефон",
];

/// Extract whatever booking fields this message mentions and merge them on
/// top of `prior`. Relative dates are resolved against `today`.
pub fn extract_booking_fields(
    prior: &BookingData,
    text: &str,
    today: NaiveDate,
    settings: &BookingSettings,
) -> BookingData {
    let lower = text.to_lowercase();
    let detected = BookingData {
        date: extract_date(&lower, today),
        time: extract_time(text),
        duration: extract_duration(&lower),
        room: extract_room(&lower, &settings.rooms),
        name: extract_name(text),
        phone: extract_phone(text),
        participants: PARTICIPANTS.captures(&lower).map(|capture| capture[1].to_string()),
    };

    let mut merged = prior.clone();
    merged.absorb(&detected);
    merged
}

fn extract_date(lower: &str, today: NaiveDate) -> Option<String> {
    for capture in ABSOLUTE_DATE.captures_iter(lower) {
        let day: u32 = capture[1].parse().ok()?;
        let month: u32 = capture[2].parse().ok()?;
        let year: i32 = match capture.get(3) {
            Some(year) => {
                let value: i32 = year.as_str().parse().ok()?;
                if value < 100 { 2000 + value } else { value }
            }
            None => today.year(),
        };
        if NaiveDate::from_ymd_opt(year, month, day).is_some() {
            return Some(format!("{day:02}.{month:02}.{year:04}"));
        }
    }

    // Word order matters here: «послезавтра» contains «завтра».
    if lower.contains("послезавтра") {
        return Some(format_date(today + chrono::Days::new(2)));
    }
    if lower.contains("завтра") {
        return Some(format_date(today + chrono::Days::new(1)));
    }
    if lower.contains("сегодня") {
        return Some(format_date(today));
    }

    if let Some(capture) = WEEKDAY.captures(lower) {
        let target = weekday_from_stem(&capture[1]);
        let ahead = (target.num_days_from_monday() + 7 - today.weekday().num_days_from_monday()) % 7;
        // A bare weekday always means the next one, never today.
        let ahead = if ahead == 0 { 7 } else { ahead };
        return Some(format_date(today + chrono::Days::new(u64::from(ahead))));
    }

    None
}

fn weekday_from_stem(word: &str) -> Weekday {
    if word.starts_with("понедельник") {
        Weekday::Mon
    } else if word.starts_with("вторник") {
        Weekday::Tue
    } else if word.starts_with("сред") {
        Weekday::Wed
    } else if word.starts_with("четверг") {
        Weekday::Thu
    } else if word.starts_with("пятниц") {
        Weekday::Fri
    } else if word.starts_with("суббот") {
        Weekday::Sat
    } else {
        Weekday::Sun
    }
}

fn format_date(date: NaiveDate) -> String {
    format!("{:02}.{:02}.{:04}", date.day(), date.month(), date.year())
}

fn extract_time(text: &str) -> Option<String> {
    TIME.captures(text).map(|capture| {
        let hours: u32 = capture[1].parse().unwrap_or(0);
        format!("{hours:02}:{}", &capture[2])
    })
}

fn extract_duration(lower: &str) -> Option<String> {
    if let Some(capture) = DURATION_NUMERIC.captures(lower) {
        return Some(capture[1].to_string());
    }
    DURATION_SPELLED.captures(lower).map(|capture| {
        let value = match &capture[1] {
            "один" => 1,
            "два" | "две" => 2,
            "три" => 3,
            "четыре" => 4,
            "пять" => 5,
            "шесть" => 6,
            "семь" => 7,
            _ => 8,
        };
        value.to_string()
    })
}

/// Last room mentioned wins, so «не Карелия, давайте Грань» lands on Грань.
/// The canonical casing comes from the vocabulary, not the message.
fn extract_room(lower: &str, rooms: &[String]) -> Option<String> {
    let mut best: Option<(usize, &String)> = None;
    for room in rooms {
        if let Some(position) = lower.rfind(&room.to_lowercase()) {
            if best.map_or(true, |(at, _)| position > at) {
                best = Some((position, room));
            }
        }
    }
    best.map(|(_, room)| room.clone())
}

fn extract_name(text: &str) -> Option<String> {
    let capture = NAME.captures(text)?;
    let candidate = capture[1].to_string();
    let lowered = candidate.to_lowercase();
    if NAME_DENYLIST.contains(&lowered.as_str()) {
        return None;
    }
    Some(candidate)
}

fn extract_phone(text: &str) -> Option<String> {
    for found in PHONE.find_iter(text) {
        let digits: String = found.as_str().chars().filter(char::is_ascii_digit).collect();
        if (8..=15).contains(&digits.len()) {
            return Some(digits);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BookingSettings {
        BookingSettings::default()
    }

    // 15.08.2026 is a Saturday.
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 15).expect("valid date")
    }

    fn extract(text: &str) -> BookingData {
        extract_booking_fields(&BookingData::default(), text, today(), &settings())
    }

    #[test]
    fn full_booking_message_yields_all_six_fields() {
        let data = extract(
            "Хочу зал Карелия на 20.08.2026 в 11:00 на 2 часа, имя Иван, телефон 89991234567",
        );
        assert_eq!(data.date.as_deref(), Some("20.08.2026"));
        assert_eq!(data.time.as_deref(), Some("11:00"));
        assert_eq!(data.duration.as_deref(), Some("2"));
        assert_eq!(data.room.as_deref(), Some("Карелия"));
        assert_eq!(data.name.as_deref(), Some("Иван"));
        assert_eq!(data.phone.as_deref(), Some("89991234567"));
        assert!(data.is_complete());
    }

    #[test]
    fn bare_room_mention_yields_only_the_room() {
        let data = extract("Хочу зал Грань");
        assert_eq!(data.room.as_deref(), Some("Грань"));
        assert_eq!(data.filled_required(), 1);
    }

    #[test]
    fn relative_dates_resolve_against_today() {
        let cases = [
            ("давайте завтра в 10:00", "16.08.2026"),
            ("лучше послезавтра", "17.08.2026"),
            ("можно сегодня?", "15.08.2026"),
        ];
        for (text, expected) in cases {
            assert_eq!(extract(text).date.as_deref(), Some(expected), "{text}");
        }
    }

    #[test]
    fn weekday_resolves_to_next_occurrence_never_today() {
        // Today is Saturday; «в субботу» must mean the following Saturday.
        assert_eq!(extract("в субботу вечером").date.as_deref(), Some("22.08.2026"));
        assert_eq!(extract("в пятницу").date.as_deref(), Some("21.08.2026"));
        assert_eq!(extract("в среду").date.as_deref(), Some("19.08.2026"));
    }

    #[test]
    fn date_without_year_assumes_the_current_one() {
        assert_eq!(extract("на 05.09 в 18:00").date.as_deref(), Some("05.09.2026"));
    }

    #[test]
    fn impossible_calendar_dates_are_ignored() {
        assert!(extract("давайте 32.13.2026").date.is_none());
    }

    #[test]
    fn time_is_zero_padded() {
        assert_eq!(extract("в 9:30 утра").time.as_deref(), Some("09:30"));
        assert_eq!(extract("в 23:45").time.as_deref(), Some("23:45"));
    }

    #[test]
    fn duration_accepts_digits_and_words() {
        assert_eq!(extract("на 3 часа").duration.as_deref(), Some("3"));
        assert_eq!(extract("на два часа").duration.as_deref(), Some("2"));
    }

    #[test]
    fn last_room_mention_wins_with_canonical_casing() {
        let data = extract("не карелия, давайте грань");
        assert_eq!(data.room.as_deref(), Some("Грань"));
    }

    #[test]
    fn name_markers_work_and_greetings_are_rejected() {
        assert_eq!(extract("меня зовут Ольга").name.as_deref(), Some("Ольга"));
        assert_eq!(extract("имя: Иван").name.as_deref(), Some("Иван"));
        assert!(extract("Здравствуйте, хочу зал").name.is_none());
    }

    #[test]
    fn phone_digits_are_normalized() {
        assert_eq!(extract("телефон +7 999 123-45-67").phone.as_deref(), Some("79991234567"));
        assert!(extract("код 1234").phone.is_none());
    }

    #[test]
    fn participants_are_detected_but_not_required() {
        let data = extract("нас будет 12 человек");
        assert_eq!(data.participants.as_deref(), Some("12"));
        assert_eq!(data.filled_required(), 0);
    }

    #[test]
    fn prior_fields_survive_when_the_message_is_silent() {
        let prior = BookingData {
            room: Some("Грань".into()),
            date: Some("20.08.2026".into()),
            ..BookingData::default()
        };
        let merged = extract_booking_fields(&prior, "в 11:00", today(), &settings());
        assert_eq!(merged.room.as_deref(), Some("Грань"));
        assert_eq!(merged.date.as_deref(), Some("20.08.2026"));
        assert_eq!(merged.time.as_deref(), Some("11:00"));
    }

    #[test]
    fn fresh_mention_overrides_a_prior_field() {
        let prior = BookingData { room: Some("Грань".into()), ..BookingData::default() };
        let merged = extract_booking_fields(&prior, "лучше Сфера", today(), &settings());
        assert_eq!(merged.room.as_deref(), Some("Сфера"));
    }
}
