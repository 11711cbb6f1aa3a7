use tracing::{info, warn};

use crate::limits::*;
use crate::model::*;
use crate::notify::NoticeKind;
use crate::observability;

use super::conflict::{approved_overlap, pending_conflicts, validate_reason, validate_request};
use super::lifecycle::{advance, Transition};
use super::suggest::{approved_spans_after, suggest_slots};
use super::{store, Engine, EngineError, CONFLICT_REJECTION_REASON};

/// Result of a committed approval: the approved booking and every pending
/// request it displaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub approved: Booking,
    pub rejected: Vec<Booking>,
}

fn find(rs: &ResourceState, id: BookingId) -> Result<&Booking, EngineError> {
    rs.booking(id).ok_or(EngineError::NotFound(id))
}

fn count_transition(t: Transition, n: u64) {
    metrics::counter!(observability::TRANSITIONS_TOTAL, "transition" => t.label()).increment(n);
}

impl Engine {
    // ── Resource registry ────────────────────────────────────

    pub async fn register_resource(
        &self,
        id: ResourceId,
        active: bool,
        requires_approval: bool,
    ) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        if self.store.contains_resource(&id) {
            return Err(EngineError::invalid_input(format!("resource {id} is already registered")));
        }
        if self.store.resource_count() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let event = Event::ResourceRegistered {
            id,
            active,
            requires_approval,
        };
        if let Err(e) = self.journal().commit(vec![event]).await {
            tracing::error!("journal commit failed registering resource {id}: {e}");
            return Err(EngineError::Internal);
        }
        self.store
            .insert_resource(ResourceState::new(id, active, requires_approval));
        info!("registered resource {id} (active: {active})");
        Ok(())
    }

    pub async fn set_resource_active(&self, id: ResourceId, active: bool) -> Result<(), EngineError> {
        let rs = self
            .store
            .get_resource(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let mut guard = rs.write().await;
        if guard.active == active {
            return Ok(());
        }
        self.persist_and_apply(&mut guard, vec![Event::ResourceUpdated { id, active }])
            .await?;
        info!("resource {id} active: {active}");
        Ok(())
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Create a `pending` booking. An approved overlap fails with `Conflict`
    /// carrying alternative start times; nothing is recorded in that case.
    pub async fn create_booking(&self, caller: Caller, req: BookingRequest) -> Result<Booking, EngineError> {
        let now = self.now();
        let span = validate_request(&req, now)?;
        let policy = self.policy();
        policy.check_window(&span)?;

        let rs = self
            .store
            .get_resource(&req.resource_id)
            .ok_or(EngineError::ResourceNotFound(req.resource_id))?;
        // Held until the booking is applied: creation is serialized per resource.
        let mut guard = rs.write().await;
        if !guard.active {
            return Err(EngineError::ResourceUnavailable(req.resource_id));
        }
        if let Some(existing) = approved_overlap(&guard, &span) {
            return Err(self.conflict_error(&guard, existing.id, span));
        }
        policy.check_alignment(&span)?;

        let booking = Booking {
            id: self.store.next_booking_id(),
            resource_id: req.resource_id,
            user_id: caller.user_id,
            span,
            purpose: req.purpose.trim().to_string(),
            status: BookingStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            cancellation_reason: None,
            checked_in_at: None,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, vec![Event::BookingCreated { booking: booking.clone() }])
            .await?;
        drop(guard);

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booking {} created on resource {} by user {}",
            booking.id, booking.resource_id, booking.user_id
        );
        self.notify(NoticeKind::Created, &booking);
        Ok(booking)
    }

    fn conflict_error(&self, rs: &ResourceState, blocking: BookingId, span: Span) -> EngineError {
        metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        let approved = approved_spans_after(rs, span.start);
        let tz = self.policy().tz();
        let suggestions = suggest_slots(
            self.policy(),
            &approved,
            span.start,
            span.duration(),
            self.config.suggestion_limit,
            self.config.horizon,
        )
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.with_timezone(&tz))
        .collect();
        EngineError::Conflict {
            booking: blocking,
            suggestions,
        }
    }

    /// Approve a pending booking and reject every pending request that
    /// overlaps it, as one journal record. Either all of it is visible
    /// afterwards or none of it is.
    pub async fn approve_booking(&self, caller: Caller, id: BookingId) -> Result<ApprovalOutcome, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Unauthorized("only admins can approve bookings"));
        }
        let mut guard = self.resolve_booking_write(id).await?;
        let now = self.now();
        let target = find(&guard, id)?;
        advance(id, target.status, Transition::Approve)?;
        let span = target.span;
        let resource_id = target.resource_id;

        if let Some(existing) = approved_overlap(&guard, &span) {
            return Err(self.conflict_error(&guard, existing.id, span));
        }

        let losers = pending_conflicts(&guard, &span, id);
        let mut record = Vec::with_capacity(1 + losers.len());
        record.push(Event::BookingApproved {
            id,
            resource_id,
            approved_by: caller.user_id,
            at: now,
        });
        record.extend(losers.iter().map(|&loser| Event::BookingRejected {
            id: loser,
            resource_id,
            decided_by: caller.user_id,
            at: now,
            reason: Some(CONFLICT_REJECTION_REASON.to_string()),
        }));
        self.persist_and_apply(&mut guard, record).await?;

        let approved = find(&guard, id)?.clone();
        let rejected: Vec<Booking> = losers
            .iter()
            .filter_map(|&loser| guard.booking(loser).cloned())
            .collect();
        drop(guard);

        count_transition(Transition::Approve, 1);
        count_transition(Transition::Reject, rejected.len() as u64);
        metrics::counter!(observability::CONFLICT_REJECTIONS_TOTAL).increment(rejected.len() as u64);
        info!(
            "booking {id} approved by {} on resource {resource_id}; {} conflicting requests rejected",
            caller.user_id,
            rejected.len()
        );

        self.notify(NoticeKind::Approved, &approved);
        for b in &rejected {
            self.notify(NoticeKind::ConflictRejected, b);
        }
        Ok(ApprovalOutcome { approved, rejected })
    }

    pub async fn reject_booking(
        &self,
        caller: Caller,
        id: BookingId,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Unauthorized("only admins can reject bookings"));
        }
        let reason = validate_reason(reason)?;
        let mut guard = self.resolve_booking_write(id).await?;
        let now = self.now();
        let target = find(&guard, id)?;
        advance(id, target.status, Transition::Reject)?;
        let resource_id = target.resource_id;

        let event = Event::BookingRejected {
            id,
            resource_id,
            decided_by: caller.user_id,
            at: now,
            reason,
        };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        let booking = find(&guard, id)?.clone();
        drop(guard);

        count_transition(Transition::Reject, 1);
        info!("booking {id} rejected by {} on resource {resource_id}", caller.user_id);
        self.notify(NoticeKind::Rejected, &booking);
        Ok(booking)
    }

    /// Owner cancels a pending or approved booking.
    pub async fn cancel_booking(&self, caller: Caller, id: BookingId) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(id).await?;
        let now = self.now();
        let target = find(&guard, id)?;
        if !target.is_owned_by(caller.user_id) {
            return Err(EngineError::Unauthorized("only the owner can cancel a booking"));
        }
        advance(id, target.status, Transition::Cancel)?;
        let resource_id = target.resource_id;

        let event = Event::BookingCancelled {
            id,
            resource_id,
            at: now,
            reason: None,
        };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        let booking = find(&guard, id)?.clone();
        drop(guard);

        count_transition(Transition::Cancel, 1);
        info!("booking {id} cancelled by owner on resource {resource_id}");
        self.notify(NoticeKind::Cancelled, &booking);
        Ok(booking)
    }

    /// Owner checks in between the start time and the end of the grace window.
    pub async fn check_in(&self, caller: Caller, id: BookingId) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(id).await?;
        let now = self.now();
        let target = find(&guard, id)?;
        if !target.is_owned_by(caller.user_id) {
            return Err(EngineError::Unauthorized("only the owner can check in"));
        }
        advance(id, target.status, Transition::CheckIn)?;
        if now < target.start() {
            return Err(EngineError::invalid_input("check-in opens at the booking's start time"));
        }
        if now > target.start() + self.config.checkin_grace {
            return Err(EngineError::CheckInExpired(id));
        }
        let resource_id = target.resource_id;

        let event = Event::BookingCheckedIn { id, resource_id, at: now };
        self.persist_and_apply(&mut guard, vec![event]).await?;
        let booking = find(&guard, id)?.clone();
        drop(guard);

        count_transition(Transition::CheckIn, 1);
        info!("booking {id} checked in on resource {resource_id}");
        Ok(booking)
    }

    // ── Journal maintenance ──────────────────────────────────

    /// Rewrite the journal as a snapshot of current state. Every resource is
    /// read-locked for the duration, so no commit can slip between the
    /// snapshot and the rewrite.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut guards = Vec::new();
        for id in self.store.resource_ids() {
            if let Some(rs) = self.store.get_resource(&id) {
                guards.push(rs.read_owned().await);
            }
        }
        let snapshot = store::snapshot(guards.iter().map(|g| &**g));
        let len = snapshot.len();
        if let Err(e) = self.journal().compact(snapshot).await {
            tracing::error!("journal compaction failed: {e}");
            return Err(EngineError::Internal);
        }
        info!("journal compacted to {len} events");
        Ok(())
    }

    /// Compact once `threshold` records have been appended since the last
    /// compaction. Returns whether it compacted.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, EngineError> {
        let appended = self.journal().appends_since_compact().await;
        if appended < threshold {
            return Ok(false);
        }
        match self.compact_journal().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("compaction after {appended} records failed");
                Err(e)
            }
        }
    }
}
