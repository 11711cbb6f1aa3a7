use std::sync::Arc;

use tracing::info;

use allotment::clock::SystemClock;
use allotment::config::Config;
use allotment::engine::{Collaborators, Engine};
use allotment::journal::WalJournal;
use allotment::mail::{LogMailer, MailQueue};
use allotment::sweeper::Sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    allotment::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("bookings.wal");
    let (journal, records) = WalJournal::open(&wal_path)?;

    let (mail_queue, mail_worker) = MailQueue::start(config.mail_queue, Arc::new(LogMailer));
    let engine = Engine::new(
        config.engine.clone(),
        Collaborators {
            journal: Arc::new(journal),
            notifier: Arc::new(mail_queue),
            directory: Arc::new(config.user_directory()),
            clock: Arc::new(SystemClock),
        },
    );
    engine.replay(&records);
    let engine = Arc::new(engine);

    let policy = engine.policy();
    info!("allotment started");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  calendar: {} {:02}:00-{:02}:00, {} holidays",
        policy.tz(),
        policy.open_hour(),
        policy.close_hour(),
        policy.holidays().len()
    );
    if config.directory.is_empty() {
        tracing::warn!("ALLOTMENT_DIRECTORY is empty: notices have no recipient and no mail will be sent");
    } else {
        info!("  directory: {} users with a mail address", config.directory.len());
    }
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let sweeper = Sweeper::start(engine.clone(), config.sweeps.clone());

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, stopping sweeps");

    sweeper.shutdown().await;
    // Dropping the last engine handle closes the mail queue; let it drain.
    drop(engine);
    let drain = tokio::time::timeout(std::time::Duration::from_secs(10), mail_worker).await;
    if drain.is_err() {
        tracing::warn!("mail queue drain timed out");
    }

    info!("allotment stopped");
    Ok(())
}
