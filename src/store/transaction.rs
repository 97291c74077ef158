use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::{FolioError, Result, SchedulingFailure};
use crate::config::OrphanPolicy;
use crate::domain::{Candidate, ContentRecord, SyncCounts};

/// How a record changed in a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    OrphanFlagged,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub kind: ChangeKind,
    /// State after the change; for removals, the last cached state.
    pub record: ContentRecord,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    pub counts: SyncCounts,
    pub changes: Vec<RecordChange>,
}

/// A write waiting for commit.
#[derive(Debug, Clone)]
pub(crate) enum StagedChange {
    Insert(ContentRecord),
    Update(ContentRecord),
    Touch {
        record_id: i64,
        link: Option<String>,
        last_seen_at: DateTime<Utc>,
    },
    Orphan {
        record_id: i64,
        orphaned_at: DateTime<Utc>,
    },
    Delete {
        record_id: i64,
    },
    ReplaceBody {
        record_id: i64,
        body: Option<String>,
        content_hash: String,
        last_updated_at: DateTime<Utc>,
    },
}

/// Sources with an open sync transaction, shared by every transaction a store hands out.
#[derive(Debug, Clone, Default)]
pub(crate) struct SyncLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl SyncLocks {
    /// Fails fast if the source already has a transaction open.
    pub fn acquire(&self, source_id: i64) -> Result<SyncGuard> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| FolioError::Other(format!("Sync lock poisoned: {}", e)))?;
        if !held.insert(source_id) {
            return Err(SchedulingFailure::SyncAlreadyInProgress(source_id).into());
        }
        Ok(SyncGuard {
            source_id,
            locks: self.clone(),
        })
    }

    pub fn is_held(&self, source_id: i64) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&source_id))
            .unwrap_or(false)
    }
}

/// Releases the source's write slot when dropped, whatever the exit path.
#[derive(Debug)]
pub(crate) struct SyncGuard {
    source_id: i64,
    locks: SyncLocks,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            held.remove(&self.source_id);
        }
    }
}

/// Exclusive write access to one source's records.
///
/// Changes are classified and staged in memory; nothing reaches the
/// database until the store commits the transaction. Dropping it without
/// committing discards the staged changes.
#[derive(Debug)]
pub struct SyncTransaction {
    source_id: i64,
    existing: BTreeMap<String, ContentRecord>,
    pub(crate) staged: Vec<StagedChange>,
    pub(crate) result: MergeResult,
    _guard: SyncGuard,
}

impl SyncTransaction {
    pub(crate) fn new(
        source_id: i64,
        existing: BTreeMap<String, ContentRecord>,
        guard: SyncGuard,
    ) -> Self {
        Self {
            source_id,
            existing,
            staged: Vec::new(),
            result: MergeResult::default(),
            _guard: guard,
        }
    }

    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    /// Classify candidates against the snapshot and stage the resulting writes.
    ///
    /// Replaces anything staged by an earlier merge on this transaction.
    pub fn merge_candidates(
        &mut self,
        candidates: Vec<Candidate>,
        policy: OrphanPolicy,
        now: DateTime<Utc>,
    ) -> &MergeResult {
        self.staged.clear();
        self.result = MergeResult::default();

        let mut seen = HashSet::new();
        for candidate in candidates {
            if !seen.insert(candidate.natural_key.clone()) {
                debug!(
                    "Ignoring repeated key `{}` for source {}",
                    candidate.natural_key, self.source_id
                );
                continue;
            }

            match self.existing.get(&candidate.natural_key) {
                None => {
                    let record = ContentRecord::from_candidate(self.source_id, candidate, now);
                    self.stage(ChangeKind::Inserted, StagedChange::Insert(record.clone()), record);
                }
                Some(cached) => {
                    let body = candidate.body.or_else(|| cached.body.clone());
                    let hash = ContentRecord::compute_hash(&candidate.title, body.as_deref());

                    if hash == cached.content_hash
                        && candidate.position == cached.position
                        && !cached.is_orphaned()
                    {
                        self.result.counts.unchanged += 1;
                        self.staged.push(StagedChange::Touch {
                            record_id: cached.id,
                            link: candidate.link.or_else(|| cached.link.clone()),
                            last_seen_at: now,
                        });
                        continue;
                    }

                    let mut record = cached.clone();
                    record.title = candidate.title;
                    record.position = candidate.position;
                    record.link = candidate.link.or(record.link);
                    record.body = body;
                    record.orphaned_at = None;
                    record.last_seen_at = now;
                    if hash != cached.content_hash {
                        record.content_hash = hash;
                        record.last_updated_at = now;
                    }
                    self.stage(ChangeKind::Updated, StagedChange::Update(record.clone()), record);
                }
            }
        }

        let missing: Vec<ContentRecord> = self
            .existing
            .values()
            .filter(|r| !seen.contains(&r.natural_key))
            .cloned()
            .collect();

        for mut record in missing {
            match policy {
                OrphanPolicy::Mark if record.is_orphaned() => {}
                OrphanPolicy::Mark => {
                    record.orphaned_at = Some(now);
                    let change = StagedChange::Orphan {
                        record_id: record.id,
                        orphaned_at: now,
                    };
                    self.stage(ChangeKind::OrphanFlagged, change, record);
                }
                OrphanPolicy::Delete => {
                    let change = StagedChange::Delete {
                        record_id: record.id,
                    };
                    self.stage(ChangeKind::Removed, change, record);
                }
            }
        }

        &self.result
    }

    /// Stage a body for one record. Returns the record as it will be after commit.
    pub fn stage_body(
        &mut self,
        natural_key: &str,
        body: String,
        now: DateTime<Utc>,
    ) -> Result<ContentRecord> {
        let cached = self.existing.get(natural_key).ok_or_else(|| {
            FolioError::RecordNotFound(format!("{} in source {}", natural_key, self.source_id))
        })?;

        let mut record = cached.clone();
        record.replace_body(Some(body));
        if record.content_hash == cached.content_hash {
            return Ok(record);
        }
        record.last_updated_at = now;

        let change = StagedChange::ReplaceBody {
            record_id: record.id,
            body: record.body.clone(),
            content_hash: record.content_hash.clone(),
            last_updated_at: now,
        };
        self.stage(ChangeKind::Updated, change, record.clone());
        Ok(record)
    }

    fn stage(&mut self, kind: ChangeKind, change: StagedChange, record: ContentRecord) {
        match kind {
            ChangeKind::Inserted => self.result.counts.inserted += 1,
            ChangeKind::Updated => self.result.counts.updated += 1,
            ChangeKind::OrphanFlagged => self.result.counts.orphaned += 1,
            ChangeKind::Removed => self.result.counts.removed += 1,
        }
        self.staged.push(change);
        self.result.changes.push(RecordChange { kind, record });
    }
}
