//! Daemon command: the scheduler tick loop plus periodic reconciliation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use miette::Result;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use herald_scheduler::{Scheduler, SyncReconciler, TierPolicy, tick_interval};

use crate::ChannelArgs;
use crate::app::App;

/// Shortest accepted reconciliation interval in seconds.
const MIN_SYNC_INTERVAL_SECS: u64 = 60;

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub state_file: PathBuf,
    pub offset: FixedOffset,
    pub policy: TierPolicy,
    pub channel: ChannelArgs,
    /// Scheduler tick interval in seconds, clamped by the scheduler.
    pub tick_secs: u64,
    pub sync_interval_secs: u64,
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    let app = App::build(&config.state_file, config.offset, config.policy, &config.channel)?;
    info!(
        state_file = %config.state_file.display(),
        offset = %config.offset,
        "starting herald daemon"
    );
    app.verify_credentials().await;

    let scheduler = Arc::new(Scheduler::new(
        app.store.clone(),
        app.store.clone(),
        app.selector.clone(),
        app.gate.clone(),
        app.publisher.clone(),
        tick_interval(config.tick_secs),
    ));
    let reconciler = app.reconciler();

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let sync_interval = Duration::from_secs(config.sync_interval_secs.max(MIN_SYNC_INTERVAL_SECS));
    let sync_handle = tokio::spawn(sync_loop(reconciler, sync_interval, shutdown_rx));

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "scheduler task panicked");
    }
    if let Err(e) = sync_handle.await {
        error!(error = %e, "sync task panicked");
    }

    info!("herald daemon stopped");
    Ok(())
}

async fn sync_loop(
    reconciler: SyncReconciler,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(interval = ?every, "sync loop starting");
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("sync loop received shutdown signal");
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(e) = reconciler.sweep().await {
                    error!(error = %e, "sync sweep failed");
                }
            }
        }
    }
}
