//! Scan-and-bulk-update passes behind the reconciliation jobs. Each pass
//! walks resources one at a time and commits one record per resource, so a
//! failure on one resource is logged and the rest still proceed. All of them
//! are idempotent: a second run over unchanged state finds nothing to do.

use tracing::{debug, info, warn};

use crate::model::*;
use crate::notify::NoticeKind;

use super::lifecycle::Transition;
use super::{Engine, NO_CHECK_IN_REASON, STALE_PENDING_REASON};

impl Engine {
    /// Release approved bookings whose check-in window closed before `now`.
    /// Returns how many were released.
    pub async fn release_unchecked(&self, now: Timestamp) -> usize {
        let deadline = now - self.config.checkin_grace;
        let mut released = 0;
        for resource_id in self.store.resource_ids() {
            let Some(rs) = self.store.get_resource(&resource_id) else {
                continue;
            };
            let mut guard = rs.write().await;
            let record: Vec<Event> = guard
                .with_status(BookingStatus::Approved)
                .filter(|b| b.checked_in_at.is_none() && b.start() < deadline)
                .map(|b| Event::BookingReleased {
                    id: b.id,
                    resource_id,
                    at: now,
                    reason: NO_CHECK_IN_REASON.to_string(),
                })
                .collect();
            if record.is_empty() {
                continue;
            }
            let n = record.len();
            match self.persist_and_apply(&mut guard, record).await {
                Ok(()) => {
                    released += n;
                    debug!("released {n} bookings on resource {resource_id}");
                }
                Err(e) => warn!("auto-release failed on resource {resource_id}: {e}"),
            }
        }
        if released > 0 {
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "transition" => Transition::Release.label())
                .increment(released as u64);
            info!("auto-released {released} bookings with no check-in");
        }
        released
    }

    /// Approved bookings starting exactly at `at`, across all resources.
    pub async fn approved_starting_at(&self, at: Timestamp) -> Vec<Booking> {
        let mut found = Vec::new();
        for resource_id in self.store.resource_ids() {
            let Some(rs) = self.store.get_resource(&resource_id) else {
                continue;
            };
            let guard = rs.read().await;
            found.extend(
                guard
                    .with_status(BookingStatus::Approved)
                    .filter(|b| b.start() == at)
                    .cloned(),
            );
        }
        found
    }

    /// Remind owners of approved bookings starting at the top of the
    /// current local hour. Read-only. Returns how many reminders went out.
    pub async fn send_check_in_reminders(&self, now: Timestamp) -> usize {
        let slot = self.policy().top_of_hour(now);
        let due = self.approved_starting_at(slot).await;
        for b in &due {
            self.notify(NoticeKind::CheckInReminder, b);
        }
        if !due.is_empty() {
            info!("sent {} check-in reminders for {slot}", due.len());
        }
        due.len()
    }

    /// Cancel pending bookings whose start is before `cutoff`. Returns how
    /// many were cancelled.
    pub async fn cancel_stale_pending(&self, cutoff: Timestamp) -> usize {
        let now = self.now();
        let mut cancelled = Vec::new();
        for resource_id in self.store.resource_ids() {
            let Some(rs) = self.store.get_resource(&resource_id) else {
                continue;
            };
            let mut guard = rs.write().await;
            let stale: Vec<BookingId> = guard
                .with_status(BookingStatus::Pending)
                .filter(|b| b.start() < cutoff)
                .map(|b| b.id)
                .collect();
            if stale.is_empty() {
                continue;
            }
            let record = stale
                .iter()
                .map(|&id| Event::BookingCancelled {
                    id,
                    resource_id,
                    at: now,
                    reason: Some(STALE_PENDING_REASON.to_string()),
                })
                .collect();
            match self.persist_and_apply(&mut guard, record).await {
                Ok(()) => cancelled.extend(stale.iter().filter_map(|&id| guard.booking(id).cloned())),
                Err(e) => warn!("stale-pending cancel failed on resource {resource_id}: {e}"),
            }
        }
        for b in &cancelled {
            self.notify(NoticeKind::Cancelled, b);
        }
        if !cancelled.is_empty() {
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "transition" => Transition::Expire.label())
                .increment(cancelled.len() as u64);
            info!("cancelled {} stale pending bookings", cancelled.len());
        }
        cancelled.len()
    }
}
