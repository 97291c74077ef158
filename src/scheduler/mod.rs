//! Decides which sources sync and when.
//!
//! Each run is its own tokio task holding one permit of a semaphore sized by
//! `max_concurrent_syncs`; runs beyond that queue on the semaphore. A trigger
//! for a source that already has a run in flight attaches to that run
//! instead of starting another one.

pub mod daemon;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info};

use crate::app::Result;
use crate::config::SyncConfig;
use crate::domain::SyncRun;
use crate::reconciler::Reconciler;

pub use daemon::Daemon;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Requested by a user. Ignores the staleness TTL.
    Manual,
    /// Issued by the periodic check. Only runs when the source is due.
    Scheduled,
}

type InFlight = Arc<Mutex<HashMap<i64, watch::Receiver<Option<SyncRun>>>>>;

/// Removes a source from the in-flight map when dropped, including when
/// the task driving its run panics or is cancelled.
struct InFlightEntry {
    source_id: i64,
    in_flight: InFlight,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.source_id);
    }
}

/// Handle on a run that was started or joined by a trigger.
pub struct SyncTicket {
    source_id: i64,
    coalesced: bool,
    rx: watch::Receiver<Option<SyncRun>>,
}

impl SyncTicket {
    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    /// True when this ticket joined a run that was already in flight.
    pub fn is_coalesced(&self) -> bool {
        self.coalesced
    }

    /// Wait for the run to finish.
    ///
    /// `None` only if the task driving the run was torn down before it
    /// could report, e.g. when the runtime shuts down.
    pub async fn wait(mut self) -> Option<SyncRun> {
        let run = match self.rx.wait_for(|run| run.is_some()).await {
            Ok(run) => run.clone(),
            Err(_) => None,
        };
        run
    }
}

pub struct SyncScheduler {
    reconciler: Arc<Reconciler>,
    permits: Arc<Semaphore>,
    in_flight: InFlight,
    staleness_ttl_secs: u64,
}

impl SyncScheduler {
    pub fn new(reconciler: Arc<Reconciler>, config: &SyncConfig) -> Self {
        Self {
            reconciler,
            permits: Arc::new(Semaphore::new(config.max_concurrent_syncs.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            staleness_ttl_secs: config.staleness_ttl_secs,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn is_in_flight(&self, source_id: i64) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains_key(&source_id))
            .unwrap_or(false)
    }

    /// Start a run for `source_id`, or join the one already running.
    ///
    /// Returns `None` for a scheduled trigger on a source that is not due
    /// yet. A source that does not exist still gets a run, which fails with
    /// `SourceNotFound`.
    pub fn trigger(&self, source_id: i64, trigger: Trigger) -> Result<Option<SyncTicket>> {
        if trigger == Trigger::Scheduled {
            let due = self
                .reconciler
                .store()
                .get_source(source_id)?
                .map(|source| source.is_due(Utc::now(), self.staleness_ttl_secs))
                .unwrap_or(false);
            if !due {
                debug!("Source {} is fresh, skipping", source_id);
                return Ok(None);
            }
        }
        Ok(Some(self.start(source_id)))
    }

    fn start(&self, source_id: i64) -> SyncTicket {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(rx) = in_flight.get(&source_id) {
            debug!("Source {} already syncing, joining the running sync", source_id);
            return SyncTicket {
                source_id,
                coalesced: true,
                rx: rx.clone(),
            };
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(source_id, rx.clone());
        drop(in_flight);

        let reconciler = self.reconciler.clone();
        let permits = self.permits.clone();
        let entry = InFlightEntry {
            source_id,
            in_flight: self.in_flight.clone(),
        };

        tokio::spawn(async move {
            let permit = permits.acquire_owned().await;
            if permit.is_err() {
                error!("Sync permits closed, source {} not synced", source_id);
            }
            let run = reconciler.run(source_id).await;
            drop(permit);

            // Leave the map before reporting so a later trigger starts a fresh run.
            drop(entry);
            tx.send_replace(Some(run));
        });

        SyncTicket {
            source_id,
            coalesced: false,
            rx,
        }
    }

    /// Trigger every source whose last sync is older than its TTL.
    pub fn sync_due(&self, now: DateTime<Utc>) -> Result<Vec<SyncTicket>> {
        let sources = self.reconciler.store().get_all_sources()?;
        let tickets: Vec<SyncTicket> = sources
            .iter()
            .filter(|source| source.is_due(now, self.staleness_ttl_secs))
            .map(|source| self.start(source.id))
            .collect();

        debug!("{} of {} sources due", tickets.len(), sources.len());
        Ok(tickets)
    }

    /// Sync every source regardless of age and wait for all of them.
    pub async fn sync_all(&self) -> Result<Vec<SyncRun>> {
        let tickets: Vec<SyncTicket> = self
            .reconciler
            .store()
            .get_all_sources()?
            .iter()
            .map(|source| self.start(source.id))
            .collect();

        Ok(wait_all(tickets).await)
    }
}

/// Wait on a batch of tickets, logging a one-line summary.
pub async fn wait_all(tickets: Vec<SyncTicket>) -> Vec<SyncRun> {
    if tickets.is_empty() {
        return Vec::new();
    }
    let start = Utc::now();
    let runs: Vec<SyncRun> = join_all(tickets.into_iter().map(SyncTicket::wait))
        .await
        .into_iter()
        .flatten()
        .collect();

    let changed: usize = runs.iter().map(|run| run.counts.changed()).sum();
    let failed = runs.iter().filter(|run| !run.is_success()).count();
    let elapsed = Utc::now().signed_duration_since(start);
    info!(
        "Synced {} sources: {} changes, {} failed ({:.1}s)",
        runs.len(),
        changed,
        failed,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    runs
}
