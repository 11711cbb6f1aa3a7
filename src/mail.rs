use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::notify::{Message, Notice, Notifier};

/// Outbound delivery of rendered notices.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), String>;
}

/// Writes every message to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: Message) -> Result<(), String> {
        let json = serde_json::to_string(&message).map_err(|e| e.to_string())?;
        tracing::info!(target: "allotment::mail", "{json}");
        Ok(())
    }
}

/// Bounded queue in front of a `Mailer`. Notices that do not fit are
/// dropped and counted; the engine never waits on delivery.
pub struct MailQueue {
    tx: mpsc::Sender<Notice>,
}

impl MailQueue {
    /// Start the delivery worker. The worker exits once every `MailQueue`
    /// handle is dropped and the queue has drained.
    pub fn start(capacity: usize, mailer: Arc<dyn Mailer>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(mail_worker_loop(mailer, rx));
        (Self { tx }, worker)
    }
}

impl Notifier for MailQueue {
    fn notify(&self, notice: Notice) {
        if let Err(e) = self.tx.try_send(notice) {
            let notice = match e {
                mpsc::error::TrySendError::Full(n) | mpsc::error::TrySendError::Closed(n) => n,
            };
            metrics::counter!(crate::observability::NOTICES_DROPPED_TOTAL).increment(1);
            warn!("mail queue unavailable, dropped {:?} notice for booking {}", notice.kind, notice.booking.id);
        }
    }
}

async fn mail_worker_loop(mailer: Arc<dyn Mailer>, mut rx: mpsc::Receiver<Notice>) {
    while let Some(notice) = rx.recv().await {
        let Some(ref to) = notice.recipient else {
            debug!("no address for user {}, notice for booking {} skipped", notice.booking.user_id, notice.booking.id);
            continue;
        };
        debug!("delivering {:?} notice to {to}", notice.kind);
        if let Err(e) = mailer.send(notice.render()).await {
            warn!("mail delivery for booking {} failed: {e}", notice.booking.id);
        }
    }
}
