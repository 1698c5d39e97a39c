use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open rental interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Unlike validated spans elsewhere, a requested span may be inverted;
    /// `rules::validate_span` rejects those before anything is stored.
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `start <= now < end`
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    pub fn ended_before(&self, t: Ms) -> bool {
        self.end < t
    }

    pub fn starts_after(&self, t: Ms) -> bool {
        self.start > t
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Waiting,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Waiting)
    }
}

/// A single booking record. Owned by the item it books.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub item_id: Ulid,
    pub booker_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub description: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: Ulid,
    pub item_id: Ulid,
    pub author_id: Ulid,
    pub text: String,
    pub created: Ms,
}

/// Everything stored under one item: the catalog record, its bookings and its comments.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub item: Item,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
    /// Sorted by creation (ULID order).
    pub comments: Vec<Comment>,
}

impl ItemState {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            bookings: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    /// Equal starts keep insertion order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserCreated {
        id: Ulid,
        name: String,
        email: String,
    },
    UserUpdated {
        id: Ulid,
        name: String,
        email: String,
    },
    ItemCreated {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        available: bool,
    },
    ItemUpdated {
        id: Ulid,
        name: String,
        description: String,
        available: bool,
    },
    BookingRequested {
        id: Ulid,
        item_id: Ulid,
        booker_id: Ulid,
        span: Span,
    },
    BookingDecided {
        id: Ulid,
        item_id: Ulid,
        approved: bool,
    },
    CommentAdded {
        id: Ulid,
        item_id: Ulid,
        author_id: Ulid,
        text: String,
        created: Ms,
    },
}

// ── Query inputs ─────────────────────────────────────────────────

/// Listing filter token. Parsed case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    All,
    Current,
    Past,
    Future,
    Waiting,
    Rejected,
}

impl BookingState {
    pub fn matches(&self, booking: &Booking, now: Ms) -> bool {
        match self {
            BookingState::All => true,
            BookingState::Current => booking.span.contains_instant(now),
            BookingState::Past => booking.span.ended_before(now),
            BookingState::Future => booking.span.starts_after(now),
            BookingState::Waiting => booking.status == BookingStatus::Waiting,
            BookingState::Rejected => booking.status == BookingStatus::Rejected,
        }
    }
}

impl FromStr for BookingState {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" => Ok(BookingState::All),
            "CURRENT" => Ok(BookingState::Current),
            "PAST" => Ok(BookingState::Past),
            "FUTURE" => Ok(BookingState::Future),
            "WAITING" => Ok(BookingState::Waiting),
            "REJECTED" => Ok(BookingState::Rejected),
            other => Err(EngineError::InvalidRequest(format!("Unknown state: {other}"))),
        }
    }
}

/// Page window over an ordered listing.
///
/// The page index is `from / size`, so `from` is expected to be a multiple of
/// `size`; an unaligned `from` is rounded down to the start of its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub from: usize,
    pub size: usize,
}

impl Page {
    pub fn new(from: i64, size: i64) -> Result<Self, EngineError> {
        if from < 0 {
            return Err(EngineError::InvalidRequest(format!(
                "from must not be negative, got {from}"
            )));
        }
        if size <= 0 {
            return Err(EngineError::InvalidRequest(format!(
                "size must be positive, got {size}"
            )));
        }
        if size as u64 > crate::limits::MAX_PAGE_SIZE as u64 {
            return Err(EngineError::LimitExceeded("page size too large"));
        }
        Ok(Self {
            from: from as usize,
            size: size as usize,
        })
    }

    pub fn offset(&self) -> usize {
        (self.from / self.size) * self.size
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRef {
    pub id: Ulid,
    pub name: String,
    pub owner_id: Ulid,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookerRef {
    pub id: Ulid,
    pub name: String,
}

/// A booking with resolved item and booker detail attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: &'static str,
    pub item: ItemRef,
    pub booker: BookerRef,
}

/// Compact booking reference used inside item views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingShort {
    pub id: Ulid,
    pub booker_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

impl From<&Booking> for BookingShort {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            booker_id: b.booker_id,
            start: b.span.start,
            end: b.span.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AvailabilitySnapshot {
    pub last_booking: Option<BookingShort>,
    pub next_booking: Option<BookingShort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentInfo {
    pub id: Ulid,
    pub item_id: Ulid,
    pub text: String,
    pub author_name: String,
    pub created: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    pub item: Item,
    /// `None` unless the caller owns the item.
    pub snapshot: Option<AvailabilitySnapshot>,
    pub comments: Vec<CommentInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_at(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            item_id: Ulid::new(),
            booker_id: Ulid::new(),
            span: Span::new(start, end),
            status: BookingStatus::Waiting,
        }
    }

    fn item_state() -> ItemState {
        ItemState::new(Item {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Drill".into(),
            description: "Cordless".into(),
            available: true,
        })
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
        assert!(s.ended_before(201));
        assert!(!s.ended_before(200));
        assert!(s.starts_after(99));
        assert!(!s.starts_after(100));
    }

    #[test]
    fn bookings_sorted_by_start() {
        let mut st = item_state();
        st.insert_booking(booking_at(300, 400));
        st.insert_booking(booking_at(100, 200));
        st.insert_booking(booking_at(200, 300));
        let starts: Vec<_> = st.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn state_tokens_are_case_sensitive() {
        assert_eq!("ALL".parse::<BookingState>().unwrap(), BookingState::All);
        assert_eq!("REJECTED".parse::<BookingState>().unwrap(), BookingState::Rejected);
        assert!(matches!(
            "waiting".parse::<BookingState>(),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            "APPROVED".parse::<BookingState>(),
            Err(EngineError::InvalidRequest(_))
        ));
        let err = "UNSUPPORTED_STATUS".parse::<BookingState>().unwrap_err();
        assert_eq!(err.to_string(), "invalid request: Unknown state: UNSUPPORTED_STATUS");
    }

    #[test]
    fn state_matches_temporal_windows() {
        let now = 1_000;
        let current = booking_at(500, 1_500);
        let past = booking_at(100, 200);
        let future = booking_at(2_000, 3_000);
        let ends_now = booking_at(500, 1_000);

        assert!(BookingState::Current.matches(&current, now));
        assert!(!BookingState::Current.matches(&ends_now, now));
        assert!(BookingState::Past.matches(&past, now));
        // end == now is neither past nor current
        assert!(!BookingState::Past.matches(&ends_now, now));
        assert!(BookingState::Future.matches(&future, now));
        assert!(!BookingState::Future.matches(&current, now));
        assert!(BookingState::All.matches(&ends_now, now));
    }

    #[test]
    fn state_matches_status() {
        let mut b = booking_at(0, 10);
        assert!(BookingState::Waiting.matches(&b, 0));
        b.status = BookingStatus::Rejected;
        assert!(!BookingState::Waiting.matches(&b, 0));
        assert!(BookingState::Rejected.matches(&b, 0));
        b.status = BookingStatus::Approved;
        assert!(!BookingState::Rejected.matches(&b, 0));
    }

    #[test]
    fn page_validation() {
        assert!(matches!(Page::new(-1, 10), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(Page::new(0, 0), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(Page::new(0, -5), Err(EngineError::InvalidRequest(_))));
        assert!(Page::new(0, 1).is_ok());
    }

    #[test]
    fn page_offset_rounds_down_to_page_start() {
        assert_eq!(Page::new(0, 10).unwrap().offset(), 0);
        assert_eq!(Page::new(20, 10).unwrap().offset(), 20);
        assert_eq!(Page::new(25, 10).unwrap().offset(), 20);
        assert_eq!(Page::new(3, 2).unwrap().offset(), 2);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingRequested {
            id: Ulid::new(),
            item_id: Ulid::new(),
            booker_id: Ulid::new(),
            span: Span::new(1000, 2000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
