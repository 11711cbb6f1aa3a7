use std::io;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::wal::Wal;

/// Events that become visible together or not at all.
pub type Record = Vec<Event>;

/// Durable home of engine state. The engine applies a record to memory only
/// after `commit` returns `Ok`.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn commit(&self, record: Record) -> io::Result<()>;

    /// Replace history with a snapshot record.
    async fn compact(&self, _snapshot: Record) -> io::Result<()> {
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        0
    }
}

// ── Group-commit WAL journal ─────────────────────────────

enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Journal backed by a `Wal` file and a background writer task.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Replay `path`, then start the writer. Must be called inside a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Record>)> {
        let (wal, records) = Wal::recover(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Ok((Self { tx }, records))
    }

    async fn request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> io::Result<T> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| io::Error::other("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("WAL writer dropped response"))
    }
}

#[async_trait]
impl Journal for WalJournal {
    async fn commit(&self, record: Record) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.request(WalCommand::Append { record, response }, rx).await?
    }

    async fn compact(&self, snapshot: Record) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.request(WalCommand::Compact { snapshot, response }, rx).await?
    }

    async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        self.request(WalCommand::AppendsSinceCompact { response }, rx)
            .await
            .unwrap_or(0)
    }
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type Pending = (Record, oneshot::Sender<io::Result<()>>);

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Write and sync the whole batch, or leave the file as it was before it.
fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(record, _)| wal.append_buffered(record))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // The batch is reported failed, so none of it may replay later.
        // A failed rollback poisons the WAL and later appends fail too.
        let _ = wal.rollback();
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── In-memory journal ────────────────────────────────────

/// Keeps committed records in memory. No durability.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<Record>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn commit(&self, record: Record) -> io::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    async fn compact(&self, snapshot: Record) -> io::Result<()> {
        *self.records.lock().unwrap_or_else(|e| e.into_inner()) = vec![snapshot];
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len() as u64
    }
}
