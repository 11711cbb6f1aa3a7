use std::cmp::Reverse;

use crate::model::*;

use super::conflict;
use super::{Engine, EngineError};

impl Engine {
    /// A booking as seen by its owner or an admin.
    pub async fn get_booking(&self, caller: Caller, id: BookingId) -> Result<Booking, EngineError> {
        let resource_id = self
            .store
            .resource_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !caller.is_admin() && !booking.is_owned_by(caller.user_id) {
            return Err(EngineError::Unauthorized("booking belongs to another user"));
        }
        Ok(booking.clone())
    }

    /// Approved bookings on a resource ending after `after`, ascending by start.
    pub async fn approved_bookings(
        &self,
        resource_id: ResourceId,
        after: Timestamp,
    ) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .with_status(BookingStatus::Approved)
            .filter(|b| b.end() > after)
            .cloned()
            .collect())
    }

    /// Pending bookings on a resource overlapping `span`, other than `exclude`.
    pub async fn pending_conflicts(
        &self,
        resource_id: ResourceId,
        span: Span,
        exclude: BookingId,
    ) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(conflict::pending_conflicts(&guard, &span, exclude)
            .into_iter()
            .filter_map(|id| guard.booking(id).cloned())
            .collect())
    }

    pub async fn has_approved_overlap(&self, resource_id: ResourceId, span: Span) -> Result<bool, EngineError> {
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(conflict::approved_overlap(&guard, &span).is_some())
    }

    /// The caller's own bookings, newest start first.
    pub async fn bookings_for_user(&self, caller: Caller, filter: BookingFilter, page: Page) -> Paged<Booking> {
        let mut found = self
            .collect_bookings(filter, |b| b.is_owned_by(caller.user_id))
            .await;
        found.sort_by_key(|b| (Reverse(b.start()), Reverse(b.id)));
        Paged::from_sorted(&found, page)
    }

    /// Every booking in the system, newest first. Admins only.
    pub async fn all_bookings(
        &self,
        caller: Caller,
        filter: BookingFilter,
        page: Page,
    ) -> Result<Paged<Booking>, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Unauthorized("only admins can list all bookings"));
        }
        let mut found = self.collect_bookings(filter, |_| true).await;
        found.sort_by_key(|b| (Reverse(b.created_at), Reverse(b.id)));
        Ok(Paged::from_sorted(&found, page))
    }

    async fn collect_bookings(&self, filter: BookingFilter, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let resource_ids = match filter.resource_id {
            Some(id) => vec![id],
            None => self.store.resource_ids(),
        };
        let mut found = Vec::new();
        for id in resource_ids {
            let Some(rs) = self.store.get_resource(&id) else {
                continue;
            };
            let guard = rs.read().await;
            found.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|&b| filter.matches(b) && keep(b))
                    .cloned(),
            );
        }
        found
    }
}
