use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Absolute instant. Local-zone conversion happens in `calendar`.
pub type Timestamp = DateTime<Utc>;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Assigned by the engine on creation, never reused.
    BookingId
);
id_type!(ResourceId);
id_type!(UserId);

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        crate::engine::overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Released,
    Utilized,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
        BookingStatus::Released,
        BookingStatus::Utilized,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Released => "released",
            BookingStatus::Utilized => "utilized",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown booking status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub span: Span,
    pub purpose: String,
    pub status: BookingStatus,
    /// Admin who decided the request. Set once, when leaving `pending`
    /// towards `approved` or `rejected`.
    pub approved_by: Option<UserId>,
    pub approved_at: Option<Timestamp>,
    /// Set when a rejection or a release closes the booking.
    pub rejection_reason: Option<String>,
    /// Set when a sweep cancels the booking; an owner's cancellation has none.
    pub cancellation_reason: Option<String>,
    pub checked_in_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Booking {
    pub fn start(&self) -> Timestamp {
        self.span.start
    }

    pub fn end(&self) -> Timestamp {
        self.span.end
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.user_id == user
    }
}

/// Bookable unit as seen by the engine. Everything else about a resource
/// lives with the resource catalogue.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: ResourceId,
    pub active: bool,
    /// Carried for the catalogue; every approval is an explicit admin action.
    pub requires_approval: bool,
    /// Every booking ever made on this resource, sorted by `span.start`.
    /// Closed bookings stay for audit history.
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(id: ResourceId, active: bool, requires_approval: bool) -> Self {
        Self {
            id,
            active,
            requires_approval,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn with_status(&self, status: BookingStatus) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(move |b| b.status == status)
    }
}

/// The event types, flat, no nesting. A journal record is an ordered
/// list of these that is applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: ResourceId,
        active: bool,
        requires_approval: bool,
    },
    ResourceUpdated {
        id: ResourceId,
        active: bool,
    },
    /// New request, or the full current state of a booking in a snapshot.
    BookingCreated {
        booking: Booking,
    },
    BookingApproved {
        id: BookingId,
        resource_id: ResourceId,
        approved_by: UserId,
        at: Timestamp,
    },
    BookingRejected {
        id: BookingId,
        resource_id: ResourceId,
        decided_by: UserId,
        at: Timestamp,
        reason: Option<String>,
    },
    BookingCancelled {
        id: BookingId,
        resource_id: ResourceId,
        at: Timestamp,
        reason: Option<String>,
    },
    BookingCheckedIn {
        id: BookingId,
        resource_id: ResourceId,
        at: Timestamp,
    },
    BookingReleased {
        id: BookingId,
        resource_id: ResourceId,
        at: Timestamp,
        reason: String,
    },
}

impl Event {
    pub fn resource_id(&self) -> ResourceId {
        match self {
            Event::ResourceRegistered { id, .. } | Event::ResourceUpdated { id, .. } => *id,
            Event::BookingCreated { booking } => booking.resource_id,
            Event::BookingApproved { resource_id, .. }
            | Event::BookingRejected { resource_id, .. }
            | Event::BookingCancelled { resource_id, .. }
            | Event::BookingCheckedIn { resource_id, .. }
            | Event::BookingReleased { resource_id, .. } => *resource_id,
        }
    }
}

// ── Callers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

/// Identity of an already-authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Member,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ── Requests and query result types ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub resource_id: ResourceId,
    pub start: Timestamp,
    pub end: Timestamp,
    pub purpose: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub resource_id: Option<ResourceId>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.status.is_none_or(|s| booking.status == s)
            && self.resource_id.is_none_or(|r| booking.resource_id == r)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            limit: crate::limits::DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Clamp to page >= 1 and 1 <= limit <= MAX_PAGE_SIZE; zero falls back to defaults.
    pub fn normalized(self) -> Self {
        let page = self.page.max(1);
        let limit = match self.limit {
            0 => crate::limits::DEFAULT_PAGE_SIZE,
            n => n.min(crate::limits::MAX_PAGE_SIZE),
        };
        Self { page, limit }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T: Clone> Paged<T> {
    pub fn from_sorted(all: &[T], page: Page) -> Self {
        let page = page.normalized();
        let total = all.len() as u64;
        let total_pages = total.div_ceil(page.limit as u64) as u32;
        let skip = (page.page as usize - 1).saturating_mul(page.limit as usize);
        let items = all
            .iter()
            .skip(skip)
            .take(page.limit as usize)
            .cloned()
            .collect();
        Self {
            items,
            page: page.page,
            limit: page.limit,
            total,
            total_pages,
        }
    }
}
