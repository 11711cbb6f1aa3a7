use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::calendar::CalendarPolicy;
use crate::engine::Engine;
use crate::model::Timestamp;
use crate::observability::{self, sweep_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepKind {
    AutoRelease,
    CheckInReminder,
    StalePending,
}

impl SweepKind {
    pub const ALL: [SweepKind; 3] = [
        SweepKind::AutoRelease,
        SweepKind::CheckInReminder,
        SweepKind::StalePending,
    ];
}

/// When a sweep fires: at `offset` past the top of each local hour, then
/// every `period`. Firings whose local hour falls outside `gate` are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSchedule {
    pub period: Duration,
    pub offset: Duration,
    pub gate: Option<Range<u32>>,
}

impl SweepSchedule {
    pub fn hourly_at(minute: u32, gate: Option<Range<u32>>) -> Self {
        Self {
            period: Duration::hours(1),
            offset: Duration::minutes(minute as i64),
            gate,
        }
    }

    /// First firing strictly after `now`.
    pub fn next_run_after(&self, now: Timestamp, policy: &CalendarPolicy) -> Timestamp {
        let period = self.period.max(Duration::minutes(1));
        let mut next = policy.top_of_hour(now) + self.offset;
        while next - period > now {
            next -= period;
        }
        while next <= now {
            next += period;
        }
        next
    }

    pub fn is_active_at(&self, t: Timestamp, policy: &CalendarPolicy) -> bool {
        self.gate
            .as_ref()
            .is_none_or(|gate| gate.contains(&policy.local_hour(t)))
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub release: SweepSchedule,
    pub reminder: SweepSchedule,
    pub stale: SweepSchedule,
    /// Journal records appended before the compactor rewrites the journal.
    pub compact_threshold: u64,
    pub compact_every: std::time::Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            release: SweepSchedule::hourly_at(16, Some(9..17)),
            reminder: SweepSchedule::hourly_at(10, Some(9..17)),
            stale: SweepSchedule::hourly_at(0, None),
            compact_threshold: 1000,
            compact_every: std::time::Duration::from_secs(60),
        }
    }
}

impl SweepConfig {
    pub fn schedule(&self, kind: SweepKind) -> &SweepSchedule {
        match kind {
            SweepKind::AutoRelease => &self.release,
            SweepKind::CheckInReminder => &self.reminder,
            SweepKind::StalePending => &self.stale,
        }
    }
}

/// Run one sweep now against the engine's clock. Returns rows affected.
pub async fn run_sweep(engine: &Engine, kind: SweepKind) -> usize {
    let label = sweep_label(kind);
    let started = Instant::now();
    let now = engine.now();
    let rows = match kind {
        SweepKind::AutoRelease => engine.release_unchecked(now).await,
        SweepKind::CheckInReminder => engine.send_check_in_reminders(now).await,
        SweepKind::StalePending => engine.cancel_stale_pending(now).await,
    };
    metrics::histogram!(observability::SWEEP_DURATION_SECONDS, "sweep" => label)
        .record(started.elapsed().as_secs_f64());
    metrics::counter!(observability::SWEEP_ROWS_TOTAL, "sweep" => label).increment(rows as u64);
    debug!("sweep {label} touched {rows} rows");
    rows
}

/// Background reconciliation: one task per sweep plus the journal compactor.
pub struct Sweeper;

impl Sweeper {
    pub fn start(engine: Arc<Engine>, config: SweepConfig) -> SweeperHandle {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for kind in SweepKind::ALL {
            let schedule = config.schedule(kind).clone();
            tracker.spawn(run_schedule(engine.clone(), kind, schedule, token.clone()));
        }
        tracker.spawn(run_compactor(
            engine,
            config.compact_threshold,
            config.compact_every,
            token.clone(),
        ));
        tracker.close();

        SweeperHandle { token, tracker }
    }
}

pub struct SweeperHandle {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl SweeperHandle {
    /// Stop every task and wait for in-flight sweeps to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.tracker.wait().await;
        info!("sweeper stopped");
    }
}

async fn run_schedule(engine: Arc<Engine>, kind: SweepKind, schedule: SweepSchedule, token: CancellationToken) {
    let label = sweep_label(kind);
    loop {
        let now = engine.now();
        let next = schedule.next_run_after(now, engine.policy());
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        if !schedule.is_active_at(next, engine.policy()) {
            debug!("sweep {label} skipped at {next}: outside gate");
            continue;
        }
        run_sweep(&engine, kind).await;
    }
    debug!("sweep {label} stopped");
}

/// Periodically compacts the journal once enough records have built up.
async fn run_compactor(
    engine: Arc<Engine>,
    threshold: u64,
    every: std::time::Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(e) = engine.compact_if_needed(threshold).await {
            // Retried on the next tick.
            warn!("compactor: {e}");
        }
    }
}
