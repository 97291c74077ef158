pub mod sqlite;
pub mod transaction;

use std::collections::BTreeMap;

use chrono::Utc;

use crate::app::Result;
use crate::config::OrphanPolicy;
use crate::domain::{Candidate, ContentRecord, Source, SourceUpdate, SyncRun};

pub use sqlite::SqliteStore;
pub use transaction::{ChangeKind, MergeResult, RecordChange, SyncTransaction};

pub trait Store: Send + Sync {
    // Source operations
    fn add_source(&self, source: &Source) -> Result<i64>;
    fn get_source(&self, id: i64) -> Result<Option<Source>>;
    fn get_source_by_location(&self, location: &str) -> Result<Option<Source>>;
    fn get_all_sources(&self) -> Result<Vec<Source>>;
    /// Removes the source together with its records and their local state.
    fn delete_source(&self, id: i64) -> Result<()>;
    /// Store a run that ended before commit. Leaves `last_synced_at` alone.
    fn record_sync_failure(&self, id: i64, run: &SyncRun) -> Result<()>;

    // Sync transactions
    /// Take exclusive write access to one source's records.
    ///
    /// Fails with `SyncAlreadyInProgress` if a transaction for the source is open.
    fn begin_sync(&self, source_id: i64) -> Result<SyncTransaction>;
    fn read_existing(&self, source_id: i64) -> Result<BTreeMap<String, ContentRecord>>;
    /// Persist everything staged on the transaction plus the source update, atomically.
    fn commit(&self, tx: SyncTransaction, update: &SourceUpdate) -> Result<MergeResult>;

    fn merge_candidates(
        &self,
        tx: &mut SyncTransaction,
        candidates: Vec<Candidate>,
        policy: OrphanPolicy,
    ) -> MergeResult {
        tx.merge_candidates(candidates, policy, Utc::now()).clone()
    }

    fn rollback(&self, tx: SyncTransaction) {
        drop(tx);
    }

    // Record operations
    /// Records of a source ordered by position.
    fn get_records(&self, source_id: i64) -> Result<Vec<ContentRecord>>;
    fn get_record(&self, source_id: i64, natural_key: &str) -> Result<Option<ContentRecord>>;

    // Local state operations
    fn set_read(&self, record_id: i64, is_read: bool) -> Result<()>;
    fn set_note(&self, record_id: i64, note: Option<&str>) -> Result<()>;
    fn get_unread_count(&self, source_id: i64) -> Result<i64>;
}
