//! Drives one source through fetch, extract, merge and commit.
//!
//! ```text
//! Idle → Fetching → Extracting → Merging → Committing → Completed
//!           │            │           │           │
//!           └────────────┴───────────┴───────────┴────→ Failed(kind)
//! ```
//!
//! A 304 from the remote skips straight to `Completed`. A failure at any
//! step drops the open transaction, records the failed run on the source
//! and leaves `last_synced_at` where it was.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::app::{ExtractionFailure, FailureKind, FolioError, Result};
use crate::config::{FetchConfig, SyncConfig};
use crate::domain::{
    Candidate, ContentRecord, Source, SourceKind, SourceUpdate, SyncCounts, SyncOutcome, SyncRun,
    Validators,
};
use crate::extractor::{Extraction, Extractor};
use crate::fetcher::{FetchOptions, FetchResult, Fetcher, ResponseMeta};
use crate::notifier::{ChangeEvent, ChangeNotifier};
use crate::store::{RecordChange, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Idle,
    Fetching,
    Extracting,
    Merging,
    Committing,
    Completed,
    Failed(FailureKind),
}

/// What a successful pipeline hands back before it is turned into a [`SyncRun`].
struct Finished {
    outcome: SyncOutcome,
    counts: SyncCounts,
    diagnostics: usize,
    changes: Vec<RecordChange>,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    extractor: Extractor,
    notifier: Arc<ChangeNotifier>,
    sync: SyncConfig,
    fetch: FetchConfig,
    states: Mutex<HashMap<i64, ReconcileState>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        notifier: Arc<ChangeNotifier>,
        sync: SyncConfig,
        fetch: FetchConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            extractor: Extractor::new(),
            notifier,
            sync,
            fetch,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Last observed pipeline state of a source.
    pub fn state(&self, source_id: i64) -> ReconcileState {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(&source_id).copied())
            .unwrap_or(ReconcileState::Idle)
    }

    fn set_state(&self, source_id: i64, state: ReconcileState) {
        debug!("Source {} -> {:?}", source_id, state);
        if let Ok(mut states) = self.states.lock() {
            states.insert(source_id, state);
        }
    }

    /// Run the full pipeline once. Failures are reported on the returned run.
    pub async fn run(&self, source_id: i64) -> SyncRun {
        let started_at = Utc::now();
        let mut diagnostics = 0;

        let result = self.execute(source_id, started_at, &mut diagnostics).await;

        match result {
            Ok(finished) => {
                let run = SyncRun {
                    source_id,
                    started_at,
                    finished_at: Utc::now(),
                    outcome: finished.outcome,
                    counts: finished.counts,
                    diagnostics: finished.diagnostics,
                };
                info!(
                    "Synced source {}: {} new, {} updated, {} unchanged, {} orphaned, {} removed ({:.1}s)",
                    source_id,
                    run.counts.inserted,
                    run.counts.updated,
                    run.counts.unchanged,
                    run.counts.orphaned,
                    run.counts.removed,
                    run.elapsed_secs()
                );
                self.set_state(source_id, ReconcileState::Completed);
                self.notifier.publish_run(finished.changes, &run);
                run
            }
            Err(e) => {
                let kind = e.kind();
                warn!("Sync of source {} failed: {}", source_id, e);

                let run = SyncRun {
                    source_id,
                    started_at,
                    finished_at: Utc::now(),
                    outcome: SyncOutcome::Failed {
                        kind,
                        message: e.to_string(),
                    },
                    counts: SyncCounts::default(),
                    diagnostics,
                };
                // Nothing about the source itself went wrong in these cases.
                if !matches!(
                    kind,
                    FailureKind::SourceNotFound | FailureKind::SyncAlreadyInProgress
                ) {
                    if let Err(e) = self.store.record_sync_failure(source_id, &run) {
                        error!("Could not record failed run for source {}: {}", source_id, e);
                    }
                }
                self.set_state(source_id, ReconcileState::Failed(kind));
                self.notifier.publish(ChangeEvent::SyncCompleted(run.clone()));
                run
            }
        }
    }

    /// `diagnostics` counts dropped entries as they are found, so a run that
    /// fails after extraction still reports them.
    async fn execute(
        &self,
        source_id: i64,
        started_at: DateTime<Utc>,
        diagnostics: &mut usize,
    ) -> Result<Finished> {
        self.set_state(source_id, ReconcileState::Fetching);
        let source = self
            .store
            .get_source(source_id)?
            .ok_or_else(|| FolioError::SourceNotFound(source_id.to_string()))?;

        let options = FetchOptions::from_config(&self.fetch)
            .with_validators(source.etag.as_deref(), source.last_modified.as_deref());

        let (body, meta) = match self.fetcher.fetch(&source.location, &options).await? {
            FetchResult::NotModified => {
                debug!("Source {} not modified", source_id);
                return self.commit_not_modified(&source, started_at);
            }
            FetchResult::Content { body, meta } => (body, meta),
        };

        self.set_state(source_id, ReconcileState::Extracting);
        let mut extraction = self.extract(&source, body, meta.content_type.clone()).await?;
        *diagnostics = extraction.diagnostics.len();

        let mut missing_bodies = 0;
        if source.policy.fetch_bodies {
            let existing = self.store.read_existing(source_id)?;
            missing_bodies = self
                .attach_bodies(&source.kind, &mut extraction.candidates, &existing)
                .await;
            *diagnostics += missing_bodies;
        }

        self.set_state(source_id, ReconcileState::Merging);
        let mut tx = self.store.begin_sync(source_id)?;
        let merged =
            self.store
                .merge_candidates(&mut tx, extraction.candidates, self.sync.orphan_policy);

        self.set_state(source_id, ReconcileState::Committing);
        let outcome = SyncOutcome::Completed;
        let update = self
            .success_update(&source, started_at, &outcome, merged.counts, *diagnostics)
            .with_meta(extraction.meta);
        // A 304 skips body fetching, so missing bodies need the next request to be unconditional.
        let validators = if missing_bodies > 0 {
            Validators::default()
        } else {
            Validators {
                etag: meta.etag.clone(),
                last_modified: meta.last_modified.clone(),
            }
        };
        let update = SourceUpdate {
            validators: Some(validators),
            ..update
        };
        let committed = self.store.commit(tx, &update)?;
        log_response(source_id, &meta);

        Ok(Finished {
            outcome,
            counts: committed.counts,
            diagnostics: *diagnostics,
            changes: committed.changes,
        })
    }

    fn commit_not_modified(&self, source: &Source, started_at: DateTime<Utc>) -> Result<Finished> {
        self.set_state(source.id, ReconcileState::Committing);
        let tx = self.store.begin_sync(source.id)?;
        let outcome = SyncOutcome::NotModified;
        let update =
            self.success_update(source, started_at, &outcome, SyncCounts::default(), 0);
        self.store.commit(tx, &update)?;

        Ok(Finished {
            outcome,
            counts: SyncCounts::default(),
            diagnostics: 0,
            changes: Vec::new(),
        })
    }

    fn success_update(
        &self,
        source: &Source,
        started_at: DateTime<Utc>,
        outcome: &SyncOutcome,
        counts: SyncCounts,
        diagnostics: usize,
    ) -> SourceUpdate {
        let now = Utc::now();
        SourceUpdate {
            last_synced_at: Some(now),
            last_run: Some(SyncRun {
                source_id: source.id,
                started_at,
                finished_at: now,
                outcome: outcome.clone(),
                counts,
                diagnostics,
            }),
            ..SourceUpdate::default()
        }
    }

    /// Parsing is CPU-bound, so it runs off the async workers.
    async fn extract(
        &self,
        source: &Source,
        body: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<Extraction> {
        let extractor = self.extractor.clone();
        let kind = source.kind.clone();
        let location = source.location.clone();

        let extracted = tokio::task::spawn_blocking(move || {
            extractor.extract(&kind, &location, &body, content_type.as_deref())
        })
        .await
        .map_err(|e| FolioError::Other(format!("Extraction task failed: {}", e)))?;

        match extracted {
            Err(FolioError::Extraction(ExtractionFailure::EmptyResult))
                if source.policy.allow_empty =>
            {
                debug!("Source {} is empty, accepted by policy", source.id);
                Ok(Extraction::default())
            }
            other => other,
        }
    }

    /// Fetch bodies for candidates that have none, in the store or in the listing.
    ///
    /// Returns how many bodies could not be fetched.
    async fn attach_bodies(
        &self,
        kind: &SourceKind,
        candidates: &mut [Candidate],
        existing: &BTreeMap<String, ContentRecord>,
    ) -> usize {
        let wanted: Vec<(usize, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.body.is_none())
            .filter(|(_, c)| !existing.get(&c.natural_key).is_some_and(|r| r.has_body()))
            .filter_map(|(i, c)| c.link.clone().map(|link| (i, link)))
            .collect();

        if wanted.is_empty() {
            return 0;
        }
        debug!("Fetching {} record bodies", wanted.len());

        let results: Vec<(usize, Result<String>)> = stream::iter(wanted)
            .map(|(i, link)| async move { (i, self.fetch_body(kind, &link).await) })
            .buffer_unordered(self.fetch.body_concurrency.max(1))
            .collect()
            .await;

        let mut failed = 0;
        for (i, result) in results {
            match result {
                Ok(body) => candidates[i].body = Some(body),
                Err(e) => {
                    warn!(
                        "Could not fetch body for `{}`: {}",
                        candidates[i].natural_key, e
                    );
                    failed += 1;
                }
            }
        }
        failed
    }

    async fn fetch_body(&self, kind: &SourceKind, link: &str) -> Result<String> {
        let options = FetchOptions::from_config(&self.fetch);
        let (raw, meta) = match self.fetcher.fetch(link, &options).await? {
            FetchResult::Content { body, meta } => (body, meta),
            FetchResult::NotModified => return Err(ExtractionFailure::EmptyResult.into()),
        };

        let extractor = self.extractor.clone();
        let kind = kind.clone();
        tokio::task::spawn_blocking(move || {
            extractor.extract_body(&kind, &raw, meta.content_type.as_deref())
        })
            .await
            .map_err(|e| FolioError::Other(format!("Extraction task failed: {}", e)))?
            .ok_or_else(|| ExtractionFailure::EmptyResult.into())
    }

    /// Return a record with its body, fetching and caching the body on first read.
    pub async fn load_body(&self, source_id: i64, natural_key: &str) -> Result<ContentRecord> {
        let source = self
            .store
            .get_source(source_id)?
            .ok_or_else(|| FolioError::SourceNotFound(source_id.to_string()))?;
        let record = self
            .store
            .get_record(source_id, natural_key)?
            .ok_or_else(|| FolioError::RecordNotFound(natural_key.to_string()))?;

        if record.has_body() {
            return Ok(record);
        }
        let Some(link) = record.link.as_deref() else {
            return Ok(record);
        };

        let body = self.fetch_body(&source.kind, link).await?;

        let mut tx = self.store.begin_sync(source_id)?;
        let loaded = tx.stage_body(natural_key, body, Utc::now())?;
        let committed = self.store.commit(tx, &SourceUpdate::default())?;
        for change in committed.changes {
            self.notifier.publish(change.into());
        }

        Ok(loaded)
    }
}

fn log_response(source_id: i64, meta: &ResponseMeta) {
    debug!(
        "Source {} answered {} (etag: {}, content-type: {})",
        source_id,
        meta.status,
        meta.etag.as_deref().unwrap_or("-"),
        meta.content_type.as_deref().unwrap_or("-")
    );
}
