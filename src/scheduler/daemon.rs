//! Foreground loop that keeps every source fresh.
//!
//! Wakes on a fixed interval, triggers the sources that are due and waits
//! for those runs before sleeping again. Stops on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::app::Result;
use crate::config::format_interval;
use crate::scheduler::{wait_all, SyncScheduler};

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Seconds between checks for due sources
    pub check_interval_secs: u64,
    /// Whether to check immediately on start
    pub sync_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 900,
            sync_on_start: true,
        }
    }
}

pub struct Daemon {
    scheduler: Arc<SyncScheduler>,
    config: DaemonConfig,
    shutdown: watch::Sender<bool>,
}

impl Daemon {
    pub fn new(scheduler: Arc<SyncScheduler>, config: DaemonConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduler,
            config,
            shutdown,
        }
    }

    /// Run until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.send_replace(true);
            }
        });
        self.run_until_stopped().await
    }

    /// Run until [`Daemon::stop`] is called.
    pub async fn run_until_stopped(&self) -> Result<()> {
        let mut stopped = self.shutdown.subscribe();
        if *stopped.borrow() {
            return Ok(());
        }

        info!(
            "Folio daemon started (check interval: {}, PID: {})",
            format_interval(self.config.check_interval_secs),
            std::process::id()
        );

        let mut timer = interval(Duration::from_secs(self.config.check_interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.sync_on_start {
            timer.tick().await;
        }

        loop {
            tokio::select! {
                _ = timer.tick() => self.check().await,
                _ = stopped.changed() => break,
            }
            if *stopped.borrow() {
                break;
            }
        }

        info!("Daemon shutting down");
        Ok(())
    }

    /// One pass: sync whatever is due and wait for it.
    pub async fn check(&self) {
        match self.scheduler.sync_due(Utc::now()) {
            Ok(tickets) if tickets.is_empty() => info!("No sources due"),
            Ok(tickets) => {
                info!("Syncing {} due sources", tickets.len());
                wait_all(tickets).await;
            }
            Err(e) => error!("Failed to list sources: {}", e),
        }
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}
