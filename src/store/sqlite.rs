use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::app::{CacheFailure, FolioError, Result};
use crate::domain::{ContentRecord, Source, SourceUpdate, SyncPolicy, SyncRun};
use crate::store::transaction::{ChangeKind, MergeResult, StagedChange, SyncLocks};
use crate::store::{Store, SyncTransaction};

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const SOURCE_COLUMNS: &str = "id, location, kind, title, author, description, etag, last_modified,
     last_synced_at, staleness_ttl_secs, allow_empty, fetch_bodies, last_run, created_at";

const RECORD_COLUMNS: &str = "r.id, r.source_id, r.natural_key, r.title, r.position, r.link, r.body,
     r.content_hash, r.first_seen_at, r.last_updated_at, r.last_seen_at, r.orphaned_at,
     s.is_read, s.read_at, s.note";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    locks: SyncLocks,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Readers outside a sync see either the old or the new state, never a mix.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            locks: SyncLocks::default(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| CacheFailure::Migration(e.to_string()))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FolioError::Other(format!("Database lock poisoned: {}", e)))
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
        row.get::<_, Option<String>>(idx)?
            .map(|s| {
                Self::parse_datetime(&s).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        idx,
                        Type::Text,
                        format!("invalid timestamp `{}`", s).into(),
                    )
                })
            })
            .transpose()
    }

    fn required_datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
        Self::datetime_column(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
            idx,
            "timestamp".into(),
            Type::Null,
        ))
    }

    fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
        let text: String = row.get(idx)?;
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn source_from_row(row: &Row) -> rusqlite::Result<Source> {
        Ok(Source {
            id: row.get(0)?,
            location: row.get(1)?,
            kind: Self::json_column(row, 2)?,
            title: row.get(3)?,
            author: row.get(4)?,
            description: row.get(5)?,
            etag: row.get(6)?,
            last_modified: row.get(7)?,
            last_synced_at: Self::datetime_column(row, 8)?,
            policy: SyncPolicy {
                staleness_ttl_secs: row
                    .get::<_, Option<i64>>(9)?
                    .and_then(|v| u64::try_from(v).ok()),
                allow_empty: row.get::<_, i32>(10)? != 0,
                fetch_bodies: row.get::<_, i32>(11)? != 0,
            },
            last_run: row
                .get::<_, Option<String>>(12)?
                .and_then(|s| serde_json::from_str::<SyncRun>(&s).ok()),
            created_at: Self::required_datetime_column(row, 13)?,
        })
    }

    fn record_from_row(row: &Row) -> rusqlite::Result<ContentRecord> {
        Ok(ContentRecord {
            id: row.get(0)?,
            source_id: row.get(1)?,
            natural_key: row.get(2)?,
            title: row.get(3)?,
            position: row.get(4)?,
            link: row.get(5)?,
            body: row.get(6)?,
            content_hash: row.get(7)?,
            first_seen_at: Self::required_datetime_column(row, 8)?,
            last_updated_at: Self::required_datetime_column(row, 9)?,
            last_seen_at: Self::required_datetime_column(row, 10)?,
            orphaned_at: Self::datetime_column(row, 11)?,
            is_read: row.get::<_, Option<i32>>(12)?.unwrap_or(0) != 0,
            read_at: Self::datetime_column(row, 13)?,
            note: row.get(14)?,
        })
    }

    fn apply_staged(conn: &Connection, change: &StagedChange) -> Result<Option<i64>> {
        match change {
            StagedChange::Insert(r) => {
                conn.execute(
                    "INSERT INTO records (source_id, natural_key, title, position, link, body,
                         content_hash, first_seen_at, last_updated_at, last_seen_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        r.source_id,
                        r.natural_key,
                        r.title,
                        r.position,
                        r.link,
                        r.body,
                        r.content_hash,
                        r.first_seen_at.to_rfc3339(),
                        r.last_updated_at.to_rfc3339(),
                        r.last_seen_at.to_rfc3339()
                    ],
                )?;
                return Ok(Some(conn.last_insert_rowid()));
            }
            StagedChange::Update(r) => {
                conn.execute(
                    "UPDATE records SET title = ?1, position = ?2, link = ?3, body = ?4,
                         content_hash = ?5, last_updated_at = ?6, last_seen_at = ?7,
                         orphaned_at = NULL
                     WHERE id = ?8",
                    params![
                        r.title,
                        r.position,
                        r.link,
                        r.body,
                        r.content_hash,
                        r.last_updated_at.to_rfc3339(),
                        r.last_seen_at.to_rfc3339(),
                        r.id
                    ],
                )?;
            }
            StagedChange::Touch {
                record_id,
                link,
                last_seen_at,
            } => {
                conn.execute(
                    "UPDATE records SET link = ?1, last_seen_at = ?2 WHERE id = ?3",
                    params![link, last_seen_at.to_rfc3339(), record_id],
                )?;
            }
            StagedChange::Orphan {
                record_id,
                orphaned_at,
            } => {
                conn.execute(
                    "UPDATE records SET orphaned_at = ?1 WHERE id = ?2",
                    params![orphaned_at.to_rfc3339(), record_id],
                )?;
            }
            StagedChange::Delete { record_id } => {
                conn.execute("DELETE FROM records WHERE id = ?1", params![record_id])?;
            }
            StagedChange::ReplaceBody {
                record_id,
                body,
                content_hash,
                last_updated_at,
            } => {
                conn.execute(
                    "UPDATE records SET body = ?1, content_hash = ?2, last_updated_at = ?3
                     WHERE id = ?4",
                    params![body, content_hash, last_updated_at.to_rfc3339(), record_id],
                )?;
            }
        }
        Ok(None)
    }

    fn apply_source_update(conn: &Connection, id: i64, update: &SourceUpdate) -> Result<()> {
        let last_run = update
            .last_run
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let validators = update.validators.as_ref();
        let changed = conn.execute(
            "UPDATE sources SET
                 title = COALESCE(?1, title),
                 author = COALESCE(?2, author),
                 description = COALESCE(?3, description),
                 etag = CASE WHEN ?4 THEN ?5 ELSE etag END,
                 last_modified = CASE WHEN ?4 THEN ?6 ELSE last_modified END,
                 last_synced_at = COALESCE(?7, last_synced_at),
                 last_run = COALESCE(?8, last_run)
             WHERE id = ?9",
            params![
                update.title,
                update.author,
                update.description,
                validators.is_some(),
                validators.and_then(|v| v.etag.as_deref()),
                validators.and_then(|v| v.last_modified.as_deref()),
                update.last_synced_at.map(|dt| dt.to_rfc3339()),
                last_run,
                id
            ],
        )?;

        if changed == 0 {
            return Err(FolioError::SourceNotFound(id.to_string()));
        }
        Ok(())
    }

    fn record_exists(conn: &Connection, record_id: i64) -> Result<()> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE id = ?1",
            params![record_id],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(FolioError::RecordNotFound(record_id.to_string()));
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn add_source(&self, source: &Source) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO sources (location, kind, staleness_ttl_secs, allow_empty, fetch_bodies, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                source.location,
                serde_json::to_string(&source.kind)?,
                source
                    .policy
                    .staleness_ttl_secs
                    .and_then(|v| i64::try_from(v).ok()),
                source.policy.allow_empty as i32,
                source.policy.fetch_bodies as i32,
                source.created_at.to_rfc3339()
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!("SELECT {} FROM sources WHERE id = ?1", SOURCE_COLUMNS),
                params![id],
                Self::source_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn get_source_by_location(&self, location: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!("SELECT {} FROM sources WHERE location = ?1", SOURCE_COLUMNS),
                params![location],
                Self::source_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn get_all_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sources ORDER BY title, location",
            SOURCE_COLUMNS
        ))?;

        let sources = stmt
            .query_map([], Self::source_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sources)
    }

    fn delete_source(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;

        let changed = conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(FolioError::SourceNotFound(id.to_string()));
        }
        Ok(())
    }

    fn record_sync_failure(&self, id: i64, run: &SyncRun) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE sources SET last_run = ?1 WHERE id = ?2",
            params![serde_json::to_string(run)?, id],
        )?;
        Ok(())
    }

    fn begin_sync(&self, source_id: i64) -> Result<SyncTransaction> {
        if self.get_source(source_id)?.is_none() {
            return Err(FolioError::SourceNotFound(source_id.to_string()));
        }
        let guard = self.locks.acquire(source_id)?;
        let existing = self.read_existing(source_id)?;
        debug!(
            "Opened sync transaction for source {} ({} cached records)",
            source_id,
            existing.len()
        );
        Ok(SyncTransaction::new(source_id, existing, guard))
    }

    fn read_existing(&self, source_id: i64) -> Result<BTreeMap<String, ContentRecord>> {
        Ok(self
            .get_records(source_id)?
            .into_iter()
            .map(|r| (r.natural_key.clone(), r))
            .collect())
    }

    fn commit(&self, mut tx: SyncTransaction, update: &SourceUpdate) -> Result<MergeResult> {
        let mut conn = self.conn()?;
        let db = conn.transaction()?;

        let mut inserted = HashMap::new();
        for change in &tx.staged {
            if let Some(id) = Self::apply_staged(&db, change)? {
                if let StagedChange::Insert(record) = change {
                    inserted.insert(record.natural_key.clone(), id);
                }
            }
        }
        Self::apply_source_update(&db, tx.source_id(), update)?;
        db.commit()?;

        let mut result = std::mem::take(&mut tx.result);
        for change in &mut result.changes {
            if change.kind == ChangeKind::Inserted {
                if let Some(id) = inserted.get(&change.record.natural_key) {
                    change.record.id = *id;
                }
            }
        }

        debug!(
            "Committed {} staged writes for source {}",
            tx.staged.len(),
            tx.source_id()
        );
        Ok(result)
    }

    fn get_records(&self, source_id: i64) -> Result<Vec<ContentRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records r
             LEFT JOIN record_state s ON s.record_id = r.id
             WHERE r.source_id = ?1
             ORDER BY r.position, r.id",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![source_id], Self::record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn get_record(&self, source_id: i64, natural_key: &str) -> Result<Option<ContentRecord>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM records r
                     LEFT JOIN record_state s ON s.record_id = r.id
                     WHERE r.source_id = ?1 AND r.natural_key = ?2",
                    RECORD_COLUMNS
                ),
                params![source_id, natural_key],
                Self::record_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn set_read(&self, record_id: i64, is_read: bool) -> Result<()> {
        let conn = self.conn()?;
        Self::record_exists(&conn, record_id)?;

        let read_at = if is_read {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };

        conn.execute(
            "INSERT INTO record_state (record_id, is_read, read_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(record_id) DO UPDATE SET is_read = ?2, read_at = ?3",
            params![record_id, is_read as i32, read_at],
        )?;

        Ok(())
    }

    fn set_note(&self, record_id: i64, note: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        Self::record_exists(&conn, record_id)?;

        conn.execute(
            "INSERT INTO record_state (record_id, note) VALUES (?1, ?2)
             ON CONFLICT(record_id) DO UPDATE SET note = ?2",
            params![record_id, note],
        )?;

        Ok(())
    }

    fn get_unread_count(&self, source_id: i64) -> Result<i64> {
        let conn = self.conn()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records r
             LEFT JOIN record_state s ON r.id = s.record_id
             WHERE r.source_id = ?1 AND r.orphaned_at IS NULL
               AND (s.is_read IS NULL OR s.is_read = 0)",
            params![source_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{FailureKind, SchedulingFailure};
    use crate::config::OrphanPolicy;
    use crate::domain::{Candidate, SourceKind, SyncCounts, SyncOutcome, Validators};

    fn store_with_source() -> (SqliteStore, i64) {
        let store = SqliteStore::in_memory().unwrap();
        let source = Source::new("https://example.com/book/1/".into(), SourceKind::Feed);
        let id = store.add_source(&source).unwrap();
        (store, id)
    }

    fn sync(store: &SqliteStore, source_id: i64, candidates: Vec<Candidate>) -> MergeResult {
        let mut tx = store.begin_sync(source_id).unwrap();
        store.merge_candidates(&mut tx, candidates, OrphanPolicy::Mark);
        let update = SourceUpdate {
            last_synced_at: Some(Utc::now()),
            ..SourceUpdate::default()
        };
        store.commit(tx, &update).unwrap()
    }

    fn abc() -> Vec<Candidate> {
        vec![
            Candidate::new("a", "Chapter A", 0),
            Candidate::new("b", "Chapter B", 1),
            Candidate::new("c", "Chapter C", 2),
        ]
    }

    fn keys(records: &[ContentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.natural_key.as_str()).collect()
    }

    #[test]
    fn test_add_and_get_source() {
        let store = SqliteStore::in_memory().unwrap();
        let mut source = Source::new(
            "https://example.com/book/2/".into(),
            SourceKind::Catalog(Default::default()),
        );
        source.policy.staleness_ttl_secs = Some(600);
        source.policy.fetch_bodies = true;
        let id = store.add_source(&source).unwrap();

        let stored = store.get_source(id).unwrap().unwrap();
        assert_eq!(stored.location, "https://example.com/book/2/");
        assert_eq!(stored.kind, source.kind);
        assert_eq!(stored.policy, source.policy);
        assert!(stored.last_synced_at.is_none());

        let by_location = store
            .get_source_by_location("https://example.com/book/2/")
            .unwrap()
            .unwrap();
        assert_eq!(by_location.id, id);
        assert!(store.add_source(&source).is_err());
    }

    #[test]
    fn test_commit_inserts_and_assigns_ids() {
        let (store, id) = store_with_source();
        let result = sync(&store, id, abc());

        assert_eq!(result.counts.inserted, 3);
        assert!(result.changes.iter().all(|c| c.record.id > 0));

        let records = store.get_records(id).unwrap();
        assert_eq!(keys(&records), vec!["a", "b", "c"]);
        assert!(store.get_source(id).unwrap().unwrap().last_synced_at.is_some());
    }

    #[test]
    fn test_orphan_flagging() {
        let (store, id) = store_with_source();
        sync(&store, id, abc());

        let result = sync(
            &store,
            id,
            vec![
                Candidate::new("a", "Chapter A", 0),
                Candidate::new("b", "Chapter B", 1),
                Candidate::new("d", "Chapter D", 3),
            ],
        );
        assert_eq!(
            result.counts,
            SyncCounts {
                inserted: 1,
                updated: 0,
                unchanged: 2,
                orphaned: 1,
                removed: 0,
            }
        );

        let c = store.get_record(id, "c").unwrap().unwrap();
        assert!(c.is_orphaned());
        assert_eq!(store.get_records(id).unwrap().len(), 4);
        // Orphans don't count as unread.
        assert_eq!(store.get_unread_count(id).unwrap(), 3);
    }

    #[test]
    fn test_local_state_survives_content_update() {
        let (store, id) = store_with_source();
        sync(&store, id, abc());

        let a = store.get_record(id, "a").unwrap().unwrap();
        store.set_read(a.id, true).unwrap();
        store.set_note(a.id, Some("reread later")).unwrap();

        let result = sync(
            &store,
            id,
            vec![
                Candidate::new("a", "Chapter A (revised)", 0).with_body("New text"),
                Candidate::new("b", "Chapter B", 1),
                Candidate::new("c", "Chapter C", 2),
            ],
        );
        assert_eq!(result.counts.updated, 1);

        let a = store.get_record(id, "a").unwrap().unwrap();
        assert_eq!(a.title, "Chapter A (revised)");
        assert_eq!(a.body.as_deref(), Some("New text"));
        assert!(a.is_read);
        assert!(a.read_at.is_some());
        assert_eq!(a.note.as_deref(), Some("reread later"));
    }

    #[test]
    fn test_failed_commit_leaves_store_untouched() {
        let (store, id) = store_with_source();
        sync(&store, id, abc());
        let before = store.get_records(id).unwrap();
        let source_before = store.get_source(id).unwrap().unwrap();

        store
            .conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_on_boom BEFORE INSERT ON records
                 WHEN NEW.natural_key = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();

        let mut tx = store.begin_sync(id).unwrap();
        store.merge_candidates(
            &mut tx,
            vec![
                Candidate::new("a", "Changed A", 0),
                Candidate::new("boom", "Boom", 1),
            ],
            OrphanPolicy::Mark,
        );
        let update = SourceUpdate {
            title: Some("Should not stick".into()),
            last_synced_at: Some(Utc::now()),
            ..SourceUpdate::default()
        };
        assert!(store.commit(tx, &update).is_err());

        assert_eq!(store.get_records(id).unwrap(), before);
        let source_after = store.get_source(id).unwrap().unwrap();
        assert_eq!(source_after.title, None);
        assert_eq!(source_after.last_synced_at, source_before.last_synced_at);

        // The failed commit released the source.
        assert!(store.begin_sync(id).is_ok());
    }

    #[test]
    fn test_rollback_discards_staged_changes() {
        let (store, id) = store_with_source();
        let mut tx = store.begin_sync(id).unwrap();
        store.merge_candidates(&mut tx, abc(), OrphanPolicy::Mark);
        store.rollback(tx);

        assert!(store.get_records(id).unwrap().is_empty());
        assert!(store.begin_sync(id).is_ok());
    }

    #[test]
    fn test_second_transaction_fails_fast() {
        let (store, id) = store_with_source();
        let other = store
            .add_source(&Source::new("https://example.com/other/".into(), SourceKind::Feed))
            .unwrap();

        let _tx = store.begin_sync(id).unwrap();
        let err = store.begin_sync(id).unwrap_err();
        assert!(matches!(
            err,
            FolioError::Scheduling(SchedulingFailure::SyncAlreadyInProgress(_))
        ));
        assert!(store.begin_sync(other).is_ok());
    }

    #[test]
    fn test_begin_sync_unknown_source() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.begin_sync(42),
            Err(FolioError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_delete_policy_drops_local_state() {
        let (store, id) = store_with_source();
        sync(&store, id, abc());
        let c = store.get_record(id, "c").unwrap().unwrap();
        store.set_read(c.id, true).unwrap();

        let mut tx = store.begin_sync(id).unwrap();
        store.merge_candidates(&mut tx, abc()[..2].to_vec(), OrphanPolicy::Delete);
        let result = store.commit(tx, &SourceUpdate::default()).unwrap();
        assert_eq!(result.counts.removed, 1);

        assert!(store.get_record(id, "c").unwrap().is_none());
        let orphaned_state: i64 = store
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM record_state WHERE record_id = ?1",
                params![c.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphaned_state, 0);
    }

    #[test]
    fn test_sync_failure_keeps_synced_at() {
        let (store, id) = store_with_source();
        sync(&store, id, abc());
        let synced_at = store.get_source(id).unwrap().unwrap().last_synced_at;

        let now = Utc::now();
        let run = SyncRun {
            source_id: id,
            started_at: now,
            finished_at: now,
            outcome: SyncOutcome::Failed {
                kind: FailureKind::Timeout,
                message: "Request timed out".into(),
            },
            counts: SyncCounts::default(),
            diagnostics: 0,
        };
        store.record_sync_failure(id, &run).unwrap();

        let source = store.get_source(id).unwrap().unwrap();
        assert_eq!(source.last_synced_at, synced_at);
        assert_eq!(source.last_run, Some(run));
    }

    #[test]
    fn test_validators_replaced_only_when_given() {
        let (store, id) = store_with_source();
        let commit = |validators: Option<Validators>| {
            let tx = store.begin_sync(id).unwrap();
            let update = SourceUpdate {
                validators,
                ..SourceUpdate::default()
            };
            store.commit(tx, &update).unwrap();
            let source = store.get_source(id).unwrap().unwrap();
            (source.etag, source.last_modified)
        };

        let v1 = Validators {
            etag: Some("\"v1\"".into()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
        };
        assert_eq!(
            commit(Some(v1.clone())),
            (v1.etag.clone(), v1.last_modified.clone())
        );
        assert_eq!(commit(None), (v1.etag.clone(), v1.last_modified.clone()));
        assert_eq!(commit(Some(Validators::default())), (None, None));
    }

    #[test]
    fn test_unparsable_timestamp_is_an_error() {
        let (store, id) = store_with_source();
        sync(&store, id, abc());
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE records SET first_seen_at = 'last tuesday' WHERE natural_key = 'b'",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.get_records(id),
            Err(FolioError::Cache(CacheFailure::StorageIo(_)))
        ));
        assert!(matches!(
            store.get_record(id, "b"),
            Err(FolioError::Cache(CacheFailure::StorageIo(_)))
        ));
        assert!(store.get_record(id, "a").unwrap().is_some());

        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE sources SET last_synced_at = 'soon' WHERE id = ?1",
                params![id],
            )
            .unwrap();
        assert!(store.get_source(id).is_err());
    }

    #[test]
    fn test_delete_source_cascades() {
        let (store, id) = store_with_source();
        sync(&store, id, abc());
        store.delete_source(id).unwrap();

        assert!(store.get_source(id).unwrap().is_none());
        assert!(store.get_records(id).unwrap().is_empty());
        assert!(matches!(
            store.delete_source(id),
            Err(FolioError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_set_read_unknown_record() {
        let (store, _) = store_with_source();
        assert!(matches!(
            store.set_read(999, true),
            Err(FolioError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.db");

        let id = {
            let store = SqliteStore::new(&path).unwrap();
            let id = store
                .add_source(&Source::new("https://example.com/book/1/".into(), SourceKind::Feed))
                .unwrap();
            sync(&store, id, abc());
            id
        };

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(keys(&store.get_records(id).unwrap()), vec!["a", "b", "c"]);
    }
}
