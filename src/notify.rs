use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{Booking, ResourceId, UserId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Created,
    Approved,
    Rejected,
    /// Rejected by the approval of an overlapping request.
    ConflictRejected,
    Cancelled,
    CheckInReminder,
}

/// A booking event addressed to the booking's owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub booking: Booking,
    /// `None` when the directory has no address for the owner.
    pub recipient: Option<String>,
    /// Zone the times are rendered in.
    pub tz: Tz,
}

/// Rendered notice, ready for a mailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
}

impl Notice {
    pub fn subject(&self) -> String {
        let id = self.booking.id;
        match self.kind {
            NoticeKind::Created => format!("Booking #{id} received"),
            NoticeKind::Approved => format!("Booking #{id} approved"),
            NoticeKind::Rejected | NoticeKind::ConflictRejected => format!("Booking #{id} rejected"),
            NoticeKind::Cancelled => format!("Booking #{id} cancelled"),
            NoticeKind::CheckInReminder => format!("Booking #{id} starts now: please check in"),
        }
    }

    pub fn body(&self) -> String {
        let b = &self.booking;
        let start = b.start().with_timezone(&self.tz);
        let end = b.end().with_timezone(&self.tz);
        let summary = format!(
            "Resource {} on {} from {} to {}",
            b.resource_id,
            start.format("%a, %d %b %Y"),
            start.format("%H:%M"),
            end.format("%H:%M"),
        );
        let headline = match self.kind {
            NoticeKind::Created => "Your booking request is awaiting approval.".to_string(),
            NoticeKind::Approved => "Your booking has been approved.".to_string(),
            NoticeKind::Rejected => format!(
                "Your booking has been rejected. Reason: {}",
                b.rejection_reason.as_deref().unwrap_or("none given")
            ),
            NoticeKind::ConflictRejected => {
                "Your booking has been rejected because the slot was allocated to another request."
                    .to_string()
            }
            NoticeKind::Cancelled => match &b.cancellation_reason {
                Some(reason) => format!("Your booking has been cancelled. Reason: {reason}"),
                None => "Your booking has been cancelled.".to_string(),
            },
            NoticeKind::CheckInReminder => {
                "Your booking starts now. Check in soon or it will be released.".to_string()
            }
        };
        let mut body = format!("{headline}\n\n{summary}");
        if !b.purpose.is_empty() {
            body.push_str("\nPurpose: ");
            body.push_str(&b.purpose);
        }
        body
    }

    pub fn render(&self) -> Message {
        Message {
            to: self.recipient.clone(),
            subject: self.subject(),
            body: self.body(),
        }
    }
}

/// Receives notices after the state change they describe has committed.
/// Delivery is best effort and never reports back to the engine.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: Notice) {}
}

/// Hands every notice to each inner notifier in turn.
pub struct Fanout(pub Vec<Arc<dyn Notifier>>);

impl Notifier for Fanout {
    fn notify(&self, notice: Notice) {
        for n in &self.0 {
            n.notify(notice.clone());
        }
    }
}

/// Per-resource broadcast of notices.
pub struct NotifyHub {
    channels: DashMap<ResourceId, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notices for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: ResourceId) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, resource_id: ResourceId, notice: &Notice) {
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(notice.clone());
        }
    }

    pub fn remove(&self, resource_id: &ResourceId) {
        self.channels.remove(resource_id);
    }
}

impl Notifier for NotifyHub {
    fn notify(&self, notice: Notice) {
        self.send(notice.booking.resource_id, &notice);
    }
}

// ── Recipient lookup ─────────────────────────────────────

pub trait UserDirectory: Send + Sync {
    fn address_of(&self, user: UserId) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct StaticDirectory {
    addresses: DashMap<UserId, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserId, address: impl Into<String>) {
        self.addresses.insert(user, address.into());
    }
}

impl UserDirectory for StaticDirectory {
    fn address_of(&self, user: UserId) -> Option<String> {
        self.addresses.get(&user).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Asia::Kolkata;

    fn booking() -> Booking {
        let start = Kolkata.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap().with_timezone(&Utc);
        Booking {
            id: BookingId(12),
            resource_id: ResourceId(3),
            user_id: UserId(5),
            span: Span::new(start, start + chrono::Duration::hours(2)),
            purpose: "design review".into(),
            status: BookingStatus::Rejected,
            approved_by: Some(UserId(1)),
            approved_at: Some(start),
            rejection_reason: Some("room under maintenance".into()),
            cancellation_reason: None,
            checked_in_at: None,
            created_at: start,
            updated_at: start,
        }
    }

    fn notice(kind: NoticeKind) -> Notice {
        Notice {
            kind,
            booking: booking(),
            recipient: Some("asha@example.com".into()),
            tz: Kolkata,
        }
    }

    #[test]
    fn body_renders_local_times_and_reason() {
        let n = notice(NoticeKind::Rejected);
        assert_eq!(n.subject(), "Booking #12 rejected");
        let body = n.body();
        assert!(body.contains("Reason: room under maintenance"), "{body}");
        assert!(body.contains("Mon, 02 Jun 2025 from 10:00 to 12:00"), "{body}");
        assert!(body.ends_with("Purpose: design review"), "{body}");
    }

    #[test]
    fn conflict_rejection_mentions_other_request() {
        let body = notice(NoticeKind::ConflictRejected).body();
        assert!(body.contains("allocated to another request"));
    }

    #[test]
    fn sweep_cancellation_carries_its_reason() {
        let mut n = notice(NoticeKind::Cancelled);
        n.booking.status = BookingStatus::Cancelled;
        n.booking.cancellation_reason = Some("not seen by admin".into());
        assert!(n.body().starts_with("Your booking has been cancelled. Reason: not seen by admin"));

        n.booking.cancellation_reason = None;
        assert!(n.body().starts_with("Your booking has been cancelled.\n"));
    }

    #[tokio::test]
    async fn hub_delivers_to_resource_subscribers() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(ResourceId(3));
        let mut other = hub.subscribe(ResourceId(4));

        hub.notify(notice(NoticeKind::Approved));

        assert_eq!(rx.recv().await.unwrap().kind, NoticeKind::Approved);
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(ResourceId(3), &notice(NoticeKind::Created));
        hub.remove(&ResourceId(3));
    }

    #[test]
    fn static_directory_lookup() {
        let dir = StaticDirectory::new();
        dir.insert(UserId(5), "asha@example.com");
        assert_eq!(dir.address_of(UserId(5)).as_deref(), Some("asha@example.com"));
        assert_eq!(dir.address_of(UserId(6)), None);
    }
}
