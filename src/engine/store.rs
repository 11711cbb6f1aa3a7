use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

use super::SharedResourceState;

/// Per-resource booking state plus the indexes the engine needs to find it.
pub struct Store {
    resources: DashMap<ResourceId, SharedResourceState>,
    booking_to_resource: DashMap<BookingId, ResourceId>,
    last_booking_id: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            booking_to_resource: DashMap::new(),
            last_booking_id: AtomicU64::new(0),
        }
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn get_resource(&self, id: &ResourceId) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn insert_resource(&self, state: ResourceState) -> SharedResourceState {
        let id = state.id;
        let shared = Arc::new(RwLock::new(state));
        self.resources.insert(id, shared.clone());
        shared
    }

    /// Ascending, so sweeps and snapshots visit resources in a stable order.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.resources.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Booking index ────────────────────────────────────────

    pub fn resource_for_booking(&self, id: &BookingId) -> Option<ResourceId> {
        self.booking_to_resource.get(id).map(|e| *e.value())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_resource.len()
    }

    /// Hand out the next booking id. Ids are never reused.
    pub fn next_booking_id(&self) -> BookingId {
        BookingId(self.last_booking_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn observe_booking_id(&self, id: BookingId) {
        self.last_booking_id.fetch_max(id.0, Ordering::Relaxed);
    }

    // ── Event application ────────────────────────────────────

    /// Apply one committed event to the resource it belongs to. The caller
    /// holds the write lock; `ResourceRegistered` is handled by the engine.
    pub fn apply_event(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::ResourceRegistered { .. } => {}
            Event::ResourceUpdated { active, .. } => {
                rs.active = *active;
            }
            Event::BookingCreated { booking } => {
                self.booking_to_resource.insert(booking.id, booking.resource_id);
                self.observe_booking_id(booking.id);
                rs.insert_booking(booking.clone());
            }
            Event::BookingApproved {
                id,
                approved_by,
                at,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::Approved;
                    b.approved_by = Some(*approved_by);
                    b.approved_at = Some(*at);
                    b.updated_at = *at;
                }
            }
            Event::BookingRejected {
                id,
                decided_by,
                at,
                reason,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::Rejected;
                    b.approved_by = Some(*decided_by);
                    b.approved_at = Some(*at);
                    b.rejection_reason = reason.clone();
                    b.updated_at = *at;
                }
            }
            Event::BookingCancelled { id, at, reason, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::Cancelled;
                    b.cancellation_reason = reason.clone();
                    b.updated_at = *at;
                }
            }
            Event::BookingCheckedIn { id, at, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::Utilized;
                    b.checked_in_at = Some(*at);
                    b.updated_at = *at;
                }
            }
            Event::BookingReleased { id, at, reason, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::Released;
                    b.rejection_reason = Some(reason.clone());
                    b.updated_at = *at;
                }
            }
        }
    }
}

/// Record that replays to the given resources: each registration followed
/// by every booking in its present form.
pub fn snapshot<'a>(resources: impl IntoIterator<Item = &'a ResourceState>) -> Vec<Event> {
    let mut events = Vec::new();
    for rs in resources {
        events.push(Event::ResourceRegistered {
            id: rs.id,
            active: rs.active,
            requires_approval: rs.requires_approval,
        });
        events.extend(rs.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, 0, 0).unwrap()
    }

    fn pending(id: u64) -> Booking {
        Booking {
            id: BookingId(id),
            resource_id: ResourceId(7),
            user_id: UserId(1),
            span: Span::new(at(5), at(6)),
            purpose: "review".into(),
            status: BookingStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            cancellation_reason: None,
            checked_in_at: None,
            created_at: at(1),
            updated_at: at(1),
        }
    }

    #[test]
    fn ids_continue_after_replayed_bookings() {
        let store = Store::new();
        let mut rs = ResourceState::new(ResourceId(7), true, false);
        store.apply_event(&mut rs, &Event::BookingCreated { booking: pending(41) });
        assert_eq!(store.next_booking_id(), BookingId(42));
        assert_eq!(store.next_booking_id(), BookingId(43));
        assert_eq!(store.resource_for_booking(&BookingId(41)), Some(ResourceId(7)));
    }

    #[test]
    fn decisions_stamp_approver_and_reason() {
        let store = Store::new();
        let mut rs = ResourceState::new(ResourceId(7), true, false);
        store.apply_event(&mut rs, &Event::BookingCreated { booking: pending(1) });
        store.apply_event(&mut rs, &Event::BookingCreated { booking: pending(2) });
        store.apply_event(
            &mut rs,
            &Event::BookingApproved {
                id: BookingId(1),
                resource_id: ResourceId(7),
                approved_by: UserId(9),
                at: at(2),
            },
        );
        store.apply_event(
            &mut rs,
            &Event::BookingRejected {
                id: BookingId(2),
                resource_id: ResourceId(7),
                decided_by: UserId(9),
                at: at(2),
                reason: Some("full".into()),
            },
        );

        let approved = rs.booking(BookingId(1)).unwrap();
        assert_eq!(approved.status, BookingStatus::Approved);
        assert_eq!(approved.approved_by, Some(UserId(9)));
        assert_eq!(approved.approved_at, Some(at(2)));

        let rejected = rs.booking(BookingId(2)).unwrap();
        assert_eq!(rejected.status, BookingStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("full"));
        assert_eq!(rejected.updated_at, at(2));
    }

    #[test]
    fn snapshot_carries_current_booking_state() {
        let store = Store::new();
        let mut rs = ResourceState::new(ResourceId(7), false, true);
        store.apply_event(&mut rs, &Event::BookingCreated { booking: pending(3) });
        store.apply_event(
            &mut rs,
            &Event::BookingCancelled {
                id: BookingId(3),
                resource_id: ResourceId(7),
                at: at(3),
                reason: Some("not seen by admin".into()),
            },
        );

        let snapshot = snapshot([&rs]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot[0],
            Event::ResourceRegistered {
                id: ResourceId(7),
                active: false,
                requires_approval: true,
            }
        );
        match &snapshot[1] {
            Event::BookingCreated { booking } => {
                assert_eq!(booking.status, BookingStatus::Cancelled);
                assert_eq!(booking.cancellation_reason.as_deref(), Some("not seen by admin"));
                assert_eq!(booking.rejection_reason, None);
                assert_eq!(booking.updated_at, at(3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
