//! `rusqlite`-backed [`StateStore`] — the default, single-file embedded
//! database deployment.
//!
//! `rusqlite::Connection` is not `Send` across an `.await`, so the store
//! holds it behind a `tokio::sync::Mutex` and every method locks, does
//! synchronous SQLite work, and unlocks before returning. Each lock
//! scope is at most one transaction — never a network call — so this
//! never becomes a throughput bottleneck across the store's actual
//! callers (engine, sweeper, ingress, worker).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::timestamp;

use super::model::{
    ClaimOutcome, ConflictRecord, EventAction, EventRow, NewConflictRecord, NewEvent, NewSyncLog,
    ReapStats, ReleasePatch, Side, SyncRecord, SyncStatus,
};
use super::StateStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if absent) the single-file database at `path` and
    /// ensure the schema exists.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An ephemeral in-process store, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_record (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                doctype         TEXT NOT NULL,
                docname         TEXT NOT NULL,
                cloud_modified  TEXT,
                local_modified  TEXT,
                last_synced     TEXT,
                sync_hash_cloud TEXT,
                sync_hash_local TEXT,
                is_syncing      INTEGER NOT NULL DEFAULT 0,
                sync_status     TEXT NOT NULL DEFAULT 'pending',
                error_message   TEXT,
                retry_count     INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_record_doctype_docname
                ON sync_record(doctype, docname);

            CREATE TABLE IF NOT EXISTS sync_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                doctype     TEXT NOT NULL,
                docname     TEXT NOT NULL,
                action      TEXT NOT NULL,
                direction   TEXT NOT NULL,
                status      TEXT NOT NULL,
                message     TEXT,
                changes_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sync_log_timestamp ON sync_log(timestamp);

            CREATE TABLE IF NOT EXISTS conflict_record (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                doctype        TEXT NOT NULL,
                docname        TEXT NOT NULL,
                cloud_data     TEXT NOT NULL,
                local_data     TEXT NOT NULL,
                cloud_modified TEXT NOT NULL,
                local_modified TEXT NOT NULL,
                resolved       INTEGER NOT NULL DEFAULT 0,
                resolution     TEXT,
                resolved_at    TEXT,
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS event_queue (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                source        TEXT NOT NULL,
                doctype       TEXT NOT NULL,
                docname       TEXT NOT NULL,
                action        TEXT NOT NULL,
                payload       TEXT NOT NULL,
                processed     INTEGER NOT NULL DEFAULT 0,
                processing    INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                processed_at  TEXT,
                error_message TEXT,
                retry_count   INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_event_queue_processed_processing_created
                ON event_queue(processed, processing, created_at);
            "#,
        )?;
        Ok(())
    }

    fn fetch_record_by_id(conn: &Connection, id: i64) -> Result<SyncRecord, StoreError> {
        conn.query_row(
            "SELECT id, doctype, docname, cloud_modified, local_modified, last_synced,
                    sync_hash_cloud, sync_hash_local, is_syncing, sync_status, error_message,
                    retry_count, created_at, updated_at
             FROM sync_record WHERE id = ?1",
            params![id],
            row_to_sync_record,
        )
        .map_err(StoreError::from)
    }

    fn fetch_record_by_name(
        conn: &Connection,
        doctype: &str,
        docname: &str,
    ) -> Result<SyncRecord, StoreError> {
        conn.query_row(
            "SELECT id, doctype, docname, cloud_modified, local_modified, last_synced,
                    sync_hash_cloud, sync_hash_local, is_syncing, sync_status, error_message,
                    retry_count, created_at, updated_at
             FROM sync_record WHERE doctype = ?1 AND docname = ?2",
            params![doctype, docname],
            row_to_sync_record,
        )
        .map_err(StoreError::from)
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn dt_to_sql(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn opt_dt_to_sql(dt: &Option<NaiveDateTime>) -> Option<String> {
    dt.as_ref().map(dt_to_sql)
}

fn sql_to_dt(s: &str) -> NaiveDateTime {
    timestamp::parse(Some(s))
}

fn row_to_sync_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
    let cloud_modified: Option<String> = row.get(3)?;
    let local_modified: Option<String> = row.get(4)?;
    let last_synced: Option<String> = row.get(5)?;
    let sync_status: String = row.get(9)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(SyncRecord {
        id: row.get(0)?,
        doctype: row.get(1)?,
        docname: row.get(2)?,
        cloud_modified: cloud_modified.map(|s| sql_to_dt(&s)),
        local_modified: local_modified.map(|s| sql_to_dt(&s)),
        last_synced: last_synced.map(|s| sql_to_dt(&s)),
        sync_hash_cloud: row.get(6)?,
        sync_hash_local: row.get(7)?,
        is_syncing: row.get::<_, i64>(8)? != 0,
        sync_status: sync_status.parse().unwrap_or(SyncStatus::Pending),
        error_message: row.get(10)?,
        retry_count: row.get(11)?,
        created_at: sql_to_dt(&created_at),
        updated_at: sql_to_dt(&updated_at),
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    let source: String = row.get(1)?;
    let action: String = row.get(4)?;
    let created_at: String = row.get(8)?;
    let processed_at: Option<String> = row.get(9)?;

    Ok(EventRow {
        id: row.get(0)?,
        source: source.parse().unwrap_or(Side::Cloud),
        doctype: row.get(2)?,
        docname: row.get(3)?,
        action: action.parse().unwrap_or(EventAction::Update),
        payload: row.get(5)?,
        processed: row.get::<_, i64>(6)? != 0,
        processing: row.get::<_, i64>(7)? != 0,
        created_at: sql_to_dt(&created_at),
        processed_at: processed_at.map(|s| sql_to_dt(&s)),
        error_message: row.get(10)?,
        retry_count: row.get(11)?,
    })
}

fn row_to_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRecord> {
    let cloud_modified: String = row.get(5)?;
    let local_modified: String = row.get(6)?;
    let resolved_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;

    Ok(ConflictRecord {
        id: row.get(0)?,
        doctype: row.get(1)?,
        docname: row.get(2)?,
        cloud_data: row.get(3)?,
        local_data: row.get(4)?,
        cloud_modified: sql_to_dt(&cloud_modified),
        local_modified: sql_to_dt(&local_modified),
        resolved: row.get::<_, i64>(7)? != 0,
        resolution: row.get(8)?,
        resolved_at: resolved_at.map(|s| sql_to_dt(&s)),
        created_at: sql_to_dt(&created_at),
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn claim(&self, doctype: &str, docname: &str) -> Result<ClaimOutcome, StoreError> {
        let conn = self.conn.lock().await;
        let now_s = dt_to_sql(&now());

        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO sync_record
                (doctype, docname, is_syncing, sync_status, retry_count, created_at, updated_at)
             VALUES (?1, ?2, 1, 'pending', 0, ?3, ?3)",
            params![doctype, docname, now_s],
        )?;

        if tx.changes() > 0 {
            let record = Self::fetch_record_by_name(&tx, doctype, docname)?;
            tx.commit()?;
            return Ok(ClaimOutcome::Claimed(record));
        }

        tx.execute(
            "UPDATE sync_record SET is_syncing = 1, updated_at = ?1
             WHERE doctype = ?2 AND docname = ?3 AND is_syncing = 0",
            params![now_s, doctype, docname],
        )?;

        if tx.changes() > 0 {
            let record = Self::fetch_record_by_name(&tx, doctype, docname)?;
            tx.commit()?;
            return Ok(ClaimOutcome::Claimed(record));
        }

        tx.commit()?;
        Ok(ClaimOutcome::Busy)
    }

    async fn release(&self, record_id: i64, patch: ReleasePatch) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        let mut record = Self::fetch_record_by_id(&tx, record_id)?;

        if let Some(v) = patch.sync_status {
            record.sync_status = v;
        }
        if let Some(v) = patch.error_message {
            record.error_message = v;
        }
        if let Some(v) = patch.retry_count {
            record.retry_count = v;
        }
        if let Some(v) = patch.last_synced {
            record.last_synced = Some(v);
        }
        if let Some(v) = patch.sync_hash_cloud {
            record.sync_hash_cloud = v;
        }
        if let Some(v) = patch.sync_hash_local {
            record.sync_hash_local = v;
        }
        if let Some(v) = patch.cloud_modified {
            record.cloud_modified = v;
        }
        if let Some(v) = patch.local_modified {
            record.local_modified = v;
        }
        record.is_syncing = false;
        record.updated_at = now();

        tx.execute(
            "UPDATE sync_record SET
                cloud_modified = ?1, local_modified = ?2, last_synced = ?3,
                sync_hash_cloud = ?4, sync_hash_local = ?5, is_syncing = 0,
                sync_status = ?6, error_message = ?7, retry_count = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                opt_dt_to_sql(&record.cloud_modified),
                opt_dt_to_sql(&record.local_modified),
                opt_dt_to_sql(&record.last_synced),
                record.sync_hash_cloud,
                record.sync_hash_local,
                record.sync_status.to_string(),
                record.error_message,
                record.retry_count,
                dt_to_sql(&record.updated_at),
                record_id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn log_sync(&self, entry: NewSyncLog) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sync_log (timestamp, doctype, docname, action, direction, status, message, changes_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                dt_to_sql(&now()),
                entry.doctype,
                entry.docname,
                entry.action,
                entry.direction.to_string(),
                entry.status.to_string(),
                entry.message,
                entry.changes_json,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn record_conflict(&self, entry: NewConflictRecord) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO conflict_record
                (doctype, docname, cloud_data, local_data, cloud_modified, local_modified, resolved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                entry.doctype,
                entry.docname,
                entry.cloud_data,
                entry.local_data,
                dt_to_sql(&entry.cloud_modified),
                dt_to_sql(&entry.local_modified),
                dt_to_sql(&now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn resolve_conflict(&self, conflict_id: i64, resolution: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE conflict_record SET resolved = 1, resolution = ?1, resolved_at = ?2 WHERE id = ?3",
            params![resolution, dt_to_sql(&now()), conflict_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("conflict_record {conflict_id}")));
        }
        Ok(())
    }

    async fn enqueue_event(&self, entry: NewEvent) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO event_queue (source, doctype, docname, action, payload, processed, processing, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)",
            params![
                entry.source.to_string(),
                entry.doctype,
                entry.docname,
                entry.action.to_string(),
                entry.payload,
                dt_to_sql(&now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn claim_events(&self, max: usize) -> Result<Vec<EventRow>, StoreError> {
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM event_queue
                 WHERE processed = 0 AND processing = 0
                 ORDER BY created_at ASC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![max as i64], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()?
        };

        for id in &ids {
            tx.execute("UPDATE event_queue SET processing = 1 WHERE id = ?1", params![id])?;
        }

        let mut events = Vec::with_capacity(ids.len());
        for id in &ids {
            events.push(tx.query_row(
                "SELECT id, source, doctype, docname, action, payload, processed, processing,
                        created_at, processed_at, error_message, retry_count
                 FROM event_queue WHERE id = ?1",
                params![id],
                row_to_event,
            )?);
        }

        tx.commit()?;
        Ok(events)
    }

    async fn complete_event(&self, event_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE event_queue SET processed = 1, processing = 0, processed_at = ?1 WHERE id = ?2",
            params![dt_to_sql(&now()), event_id],
        )?;
        Ok(())
    }

    async fn fail_event(&self, event_id: i64, error: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE event_queue SET processing = 0, error_message = ?1, retry_count = retry_count + 1
             WHERE id = ?2",
            params![error, event_id],
        )?;
        Ok(())
    }

    async fn reap_stuck(&self, threshold: Duration) -> Result<ReapStats, StoreError> {
        let conn = self.conn.lock().await;
        let cutoff = dt_to_sql(&(now() - chrono::Duration::from_std(threshold).unwrap_or_default()));

        let records_reaped = conn.execute(
            "UPDATE sync_record SET is_syncing = 0, updated_at = ?1
             WHERE is_syncing = 1 AND updated_at < ?2",
            params![dt_to_sql(&now()), cutoff],
        )?;

        // `event_queue` has no dedicated claim timestamp; `created_at`
        // is the best available proxy for "how long has this event been
        // in flight".
        let events_reaped = conn.execute(
            "UPDATE event_queue SET processing = 0
             WHERE processing = 1 AND processed = 0 AND created_at < ?1",
            params![cutoff],
        )?;

        Ok(ReapStats {
            records_reaped,
            events_reaped,
        })
    }

    async fn pending_event_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM event_queue WHERE processed = 0 AND processing = 0",
            [],
            |row| row.get(0),
        )?)
    }

    async fn processing_event_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM event_queue WHERE processing = 1",
            [],
            |row| row.get(0),
        )?)
    }

    async fn get_conflict(&self, conflict_id: i64) -> Result<Option<ConflictRecord>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT id, doctype, docname, cloud_data, local_data, cloud_modified, local_modified,
                        resolved, resolution, resolved_at, created_at
                 FROM conflict_record WHERE id = ?1",
                params![conflict_id],
                row_to_conflict,
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{EventAction, NewEvent, NewSyncLog, Side};
    use crate::direction::Direction;
    use crate::store::model::LogStatus;

    #[tokio::test]
    async fn open_creates_a_usable_file_backed_store() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        let store = SqliteStore::open(path).unwrap();

        let claimed = store.claim("Customer", "ACME-01").await.unwrap();
        assert!(matches!(claimed, ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn claim_then_busy_then_release_then_claim_again() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store.claim("Customer", "ACME-01").await.unwrap();
        let record_id = match first {
            ClaimOutcome::Claimed(r) => r.id,
            ClaimOutcome::Busy => panic!("expected claim to succeed"),
        };

        let second = store.claim("Customer", "ACME-01").await.unwrap();
        assert!(matches!(second, ClaimOutcome::Busy));

        store.release(record_id, ReleasePatch::default()).await.unwrap();

        let third = store.claim("Customer", "ACME-01").await.unwrap();
        assert!(matches!(third, ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn claim_events_is_fifo_and_exclusive() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .enqueue_event(NewEvent {
                    source: Side::Cloud,
                    doctype: "Customer".into(),
                    docname: format!("C-{i}"),
                    action: EventAction::Update,
                    payload: "{}".into(),
                })
                .await
                .unwrap();
        }

        let batch = store.claim_events(3).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].docname, "C-0");
        assert_eq!(batch[2].docname, "C-2");
        assert!(batch.iter().all(|e| e.processing));

        // Already-claimed rows aren't returned again.
        let next_batch = store.claim_events(10).await.unwrap();
        assert_eq!(next_batch.len(), 2);
        assert_eq!(next_batch[0].docname, "C-3");
    }

    #[tokio::test]
    async fn reap_stuck_clears_old_claims() {
        let store = SqliteStore::open_in_memory().unwrap();
        let claimed = store.claim("Customer", "ACME-01").await.unwrap();
        let record_id = match claimed {
            ClaimOutcome::Claimed(r) => r.id,
            ClaimOutcome::Busy => unreachable!(),
        };

        // Backdate `updated_at` past the watchdog threshold.
        {
            let conn = store.conn.lock().await;
            let old = dt_to_sql(&(now() - chrono::Duration::hours(1)));
            conn.execute(
                "UPDATE sync_record SET updated_at = ?1 WHERE id = ?2",
                params![old, record_id],
            )
            .unwrap();
        }

        let stats = store.reap_stuck(Duration::from_secs(600)).await.unwrap();
        assert_eq!(stats.records_reaped, 1);

        // The record is claimable again.
        let reclaimed = store.claim("Customer", "ACME-01").await.unwrap();
        assert!(matches!(reclaimed, ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn log_sync_and_conflict_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .log_sync(NewSyncLog {
                doctype: "Customer".into(),
                docname: "ACME-01".into(),
                action: "sync".into(),
                direction: Direction::CloudToLocal,
                status: LogStatus::Success,
                message: "created on local from cloud".into(),
                changes_json: None,
            })
            .await
            .unwrap();

        let conflict_id = store
            .record_conflict(NewConflictRecord {
                doctype: "Customer".into(),
                docname: "ACME-01".into(),
                cloud_data: "{}".into(),
                local_data: "{}".into(),
                cloud_modified: now(),
                local_modified: now(),
            })
            .await
            .unwrap();

        let conflict = store.get_conflict(conflict_id).await.unwrap().unwrap();
        assert!(!conflict.resolved);

        store.resolve_conflict(conflict_id, "local_wins (latest)").await.unwrap();
        let resolved = store.get_conflict(conflict_id).await.unwrap().unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolution.as_deref(), Some("local_wins (latest)"));
    }
}
