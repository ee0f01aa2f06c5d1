//! Side-effecting collaborators the pipeline talks to through traits:
//! the booking calendar and the manager-escalation channel. In-memory
//! implementations back the tests and local runs; transport-backed ones
//! live in `reservo-channels`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;
use tokio::sync::Mutex;

/// A slot to check before attempting a booking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotQuery {
    pub start: NaiveDateTime,
    pub duration_hours: i64,
    pub room: String,
}

/// Availability verdict. `success` is false when the backend could not be
/// reached and the verdict is an optimistic default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AvailabilityCheck {
    pub success: bool,
    pub available: bool,
    pub conflicting_rooms: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingRequest {
    pub slot: SlotQuery,
    pub name: String,
    pub phone: String,
    pub participants: Option<String>,
    pub conversation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedBooking {
    pub event_id: String,
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar backend unavailable: {0}")]
    Unavailable(String),
    #[error("calendar rejected the request: {0}")]
    Rejected(String),
}

/// Booking calendar. Reads are advisory; writes are authoritative and their
/// failures must surface to the caller.
#[async_trait]
pub trait CalendarService: Send + Sync {
    async fn check_availability(&self, query: &SlotQuery) -> Result<AvailabilityCheck, CalendarError>;
    async fn create_booking(&self, request: &BookingRequest) -> Result<CreatedBooking, CalendarError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationNotice {
    pub conversation_id: String,
    pub reason: String,
    pub summary: String,
}

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation channel unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EscalationService: Send + Sync {
    async fn send_escalation(&self, notice: &EscalationNotice) -> Result<(), EscalationError>;
}

// --- In-memory implementations --------------------------------------------

#[derive(Default)]
struct CalendarInner {
    busy: Vec<SlotQuery>,
    created: Vec<BookingRequest>,
    next_event: u64,
}

/// Calendar over an in-memory busy list. Slots conflict when they name the
/// same room and overlap in time.
#[derive(Default)]
pub struct InMemoryCalendar {
    inner: Mutex<CalendarInner>,
    pub fail_reads: std::sync::atomic::AtomicBool,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_busy(&self, slot: SlotQuery) {
        self.inner.lock().await.busy.push(slot);
    }

    pub async fn created_bookings(&self) -> Vec<BookingRequest> {
        self.inner.lock().await.created.clone()
    }

    fn failing(flag: &std::sync::atomic::AtomicBool) -> bool {
        flag.load(std::sync::atomic::Ordering::Relaxed)
    }
}

fn overlaps(a: &SlotQuery, b: &SlotQuery) -> bool {
    if a.room.to_lowercase() != b.room.to_lowercase() {
        return false;
    }
    let a_end = a.start + chrono::Duration::hours(a.duration_hours);
    let b_end = b.start + chrono::Duration::hours(b.duration_hours);
    a.start < b_end && b.start < a_end
}

#[async_trait]
impl CalendarService for InMemoryCalendar {
    async fn check_availability(&self, query: &SlotQuery) -> Result<AvailabilityCheck, CalendarError> {
        if Self::failing(&self.fail_reads) {
            return Err(CalendarError::Unavailable("simulated read failure".into()));
        }
        let inner = self.inner.lock().await;
        let conflicting: Vec<String> = inner
            .busy
            .iter()
            .filter(|slot| overlaps(slot, query))
            .map(|slot| slot.room.clone())
            .collect();
        Ok(AvailabilityCheck {
            success: true,
            available: conflicting.is_empty(),
            conflicting_rooms: conflicting,
        })
    }

    async fn create_booking(&self, request: &BookingRequest) -> Result<CreatedBooking, CalendarError> {
        if Self::failing(&self.fail_writes) {
            return Err(CalendarError::Unavailable("simulated write failure".into()));
        }
        let mut inner = self.inner.lock().await;
        inner.next_event += 1;
        let event_id = format!("evt-{}", inner.next_event);
        inner.busy.push(request.slot.clone());
        inner.created.push(request.clone());
        Ok(CreatedBooking { event_id })
    }
}

/// Escalation sink that records every notice, for tests and local runs.
#[derive(Default)]
pub struct InMemoryEscalations {
    notices: Mutex<Vec<EscalationNotice>>,
}

impl InMemoryEscalations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notices(&self) -> Vec<EscalationNotice> {
        self.notices.lock().await.clone()
    }
}

#[async_trait]
impl EscalationService for InMemoryEscalations {
    async fn send_escalation(&self, notice: &EscalationNotice) -> Result<(), EscalationError> {
        self.notices.lock().await.push(notice.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn slot(room: &str, hour: u32, duration: i64) -> SlotQuery {
        let start = NaiveDate::from_ymd_opt(2026, 8, 20)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .expect("valid datetime");
        SlotQuery { start, duration_hours: duration, room: room.to_string() }
    }

    #[tokio::test]
    async fn booked_slot_conflicts_with_overlap_in_same_room() {
        let calendar = InMemoryCalendar::new();
        calendar.mark_busy(slot("Карелия", 11, 2)).await;

        let busy = calendar.check_availability(&slot("Карелия", 12, 1)).await.expect("check");
        assert!(!busy.available);
        assert_eq!(busy.conflicting_rooms, vec!["Карелия"]);

        let other_room = calendar.check_availability(&slot("Грань", 12, 1)).await.expect("check");
        assert!(other_room.available);

        let later = calendar.check_availability(&slot("Карелия", 13, 1)).await.expect("check");
        assert!(later.available);
    }

    #[tokio::test]
    async fn create_marks_the_slot_busy_and_returns_an_event_id() {
        let calendar = InMemoryCalendar::new();
        let request = BookingRequest {
            slot: slot("Грань", 18, 2),
            name: "Иван".into(),
            phone: "89991234567".into(),
            participants: None,
            conversation_id: "c1".into(),
        };
        let created = calendar.create_booking(&request).await.expect("create");
        assert_eq!(created.event_id, "evt-1");

        let again = calendar.check_availability(&request.slot).await.expect("check");
        assert!(!again.available);
    }
}
