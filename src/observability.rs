use std::net::SocketAddr;

use crate::sweeper::SweepKind;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "allotment_bookings_created_total";

/// Counter: creations or approvals refused for an approved overlap.
pub const BOOKING_CONFLICTS_TOTAL: &str = "allotment_booking_conflicts_total";

/// Counter: lifecycle transitions applied. Labels: transition.
pub const TRANSITIONS_TOTAL: &str = "allotment_transitions_total";

/// Counter: pending requests rejected by an approval of an overlapping one.
pub const CONFLICT_REJECTIONS_TOTAL: &str = "allotment_conflict_rejections_total";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: rows touched by a sweep. Labels: sweep.
pub const SWEEP_ROWS_TOTAL: &str = "allotment_sweep_rows_total";

/// Histogram: sweep run time in seconds. Labels: sweep.
pub const SWEEP_DURATION_SECONDS: &str = "allotment_sweep_duration_seconds";

// ── Journal and delivery ────────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "allotment_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "allotment_journal_flush_batch_size";

/// Counter: notices dropped because the mail queue was full.
pub const NOTICES_DROPPED_TOTAL: &str = "allotment_notices_dropped_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a sweep to a short label for metrics.
pub fn sweep_label(kind: SweepKind) -> &'static str {
    match kind {
        SweepKind::AutoRelease => "auto_release",
        SweepKind::CheckInReminder => "check_in_reminder",
        SweepKind::StalePending => "stale_pending",
    }
}
