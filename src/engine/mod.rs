mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;
mod suggest;
mod sweeps;

pub use conflict::overlaps;
pub use error::{EngineError, ErrorKind};
pub use lifecycle::{advance, Transition};
pub use mutations::ApprovalOutcome;
pub use store::Store;
pub use suggest::suggest_slots;

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};

use crate::calendar::CalendarPolicy;
use crate::clock::Clock;
use crate::journal::{Journal, Record};
use crate::model::*;
use crate::notify::{Notice, NoticeKind, Notifier, UserDirectory};

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Reason stamped on pending requests that lose to an approval.
pub const CONFLICT_REJECTION_REASON: &str = "Slot allocated to another request";
/// Reason stamped by the auto-release sweep.
pub const NO_CHECK_IN_REASON: &str = "auto-released due to no check-in";
/// Reason stamped by the stale-pending sweep.
pub const STALE_PENDING_REASON: &str = "not seen by admin";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: CalendarPolicy,
    /// How long after start a check-in is still accepted.
    pub checkin_grace: Duration,
    /// Suggestions attached to a creation conflict.
    pub suggestion_limit: usize,
    pub horizon: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: CalendarPolicy::default(),
            checkin_grace: Duration::minutes(15),
            suggestion_limit: 4,
            horizon: Duration::days(7),
        }
    }
}

/// External collaborators the engine is wired to.
pub struct Collaborators {
    pub journal: Arc<dyn Journal>,
    pub notifier: Arc<dyn Notifier>,
    pub directory: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
}

pub struct Engine {
    pub(super) store: Store,
    pub(super) config: EngineConfig,
    /// Serializes resource registration against journal compaction.
    pub(super) registry: Mutex<()>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn Notifier>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            journal,
            notifier,
            directory,
            clock,
        } = collaborators;
        Self {
            store: Store::new(),
            config,
            registry: Mutex::new(()),
            journal,
            notifier,
            directory,
            clock,
        }
    }

    /// Rebuild state from committed records, oldest first. Must run before
    /// the engine is shared.
    pub fn replay(&self, records: &[Record]) {
        for event in records.iter().flatten() {
            match event {
                Event::ResourceRegistered {
                    id,
                    active,
                    requires_approval,
                } => {
                    match self.store.get_resource(id) {
                        // A snapshot re-registers resources that already exist.
                        Some(rs) => {
                            if let Ok(mut guard) = rs.try_write() {
                                guard.active = *active;
                                guard.requires_approval = *requires_approval;
                            }
                        }
                        None => {
                            self.store
                                .insert_resource(ResourceState::new(*id, *active, *requires_approval));
                        }
                    }
                }
                other => {
                    let resource_id = other.resource_id();
                    let Some(rs) = self.store.get_resource(&resource_id) else {
                        tracing::warn!("replay: event for unknown resource {resource_id} skipped");
                        continue;
                    };
                    // Sole owner during replay, so the lock is always free.
                    match rs.try_write() {
                        Ok(mut guard) => self.store.apply_event(&mut guard, other),
                        Err(_) => tracing::error!("replay: resource {resource_id} locked, event skipped"),
                    }
                }
            }
        }
        tracing::info!(
            "replayed {} records: {} resources, {} bookings",
            records.len(),
            self.store.resource_count(),
            self.store.booking_count()
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &CalendarPolicy {
        &self.config.policy
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    /// Commit a record, then apply it to the locked resource. Nothing is
    /// applied unless the commit succeeds.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        record: Record,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.journal.commit(record.clone()).await {
            tracing::error!("journal commit failed on resource {}: {e}", rs.id);
            return Err(EngineError::Internal);
        }
        for event in &record {
            self.store.apply_event(rs, event);
        }
        Ok(())
    }

    /// Lookup booking → resource, acquire the resource's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: BookingId,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .store
            .resource_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        Ok(rs.write_owned().await)
    }

    /// Fire-and-forget notice to the booking's owner.
    pub(super) fn notify(&self, kind: NoticeKind, booking: &Booking) {
        self.notifier.notify(Notice {
            kind,
            booking: booking.clone(),
            recipient: self.directory.address_of(booking.user_id),
            tz: self.config.policy.tz(),
        });
    }
}
