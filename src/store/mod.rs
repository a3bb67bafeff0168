//! The State Store: durable tables and atomic claim/release primitives
//! that mediate all cross-worker coordination.

pub mod model;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use model::{
    ClaimOutcome, ConflictRecord, EventRow, NewConflictRecord, NewEvent, NewSyncLog, ReapStats,
    ReleasePatch,
};

pub use sqlite::SqliteStore;

/// The durable store backing the replication engine. All mutations are
/// transactional; `claim`/`release` is the mutual-exclusion primitive
/// that keeps two workers from ever syncing the same document at once.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically set `is_syncing` from `false` to `true`, inserting the
    /// record if absent. Returns [`ClaimOutcome::Busy`] if already held.
    async fn claim(&self, doctype: &str, docname: &str) -> Result<ClaimOutcome, StoreError>;

    /// Write `patch`'s `Some` fields and clear `is_syncing`.
    async fn release(&self, record_id: i64, patch: ReleasePatch) -> Result<(), StoreError>;

    /// Append one `sync_log` row.
    async fn log_sync(&self, entry: NewSyncLog) -> Result<i64, StoreError>;

    /// Persist a new `conflict_record`, `resolved=false`.
    async fn record_conflict(&self, entry: NewConflictRecord) -> Result<i64, StoreError>;

    /// Mark a conflict record resolved. Callers must only invoke this
    /// after the chosen direction's transfer succeeds.
    async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: &str,
    ) -> Result<(), StoreError>;

    /// Append one `event_queue` row, enqueued by Ingress.
    async fn enqueue_event(&self, entry: NewEvent) -> Result<i64, StoreError>;

    /// Atomically claim up to `max` unclaimed events, oldest first.
    async fn claim_events(&self, max: usize) -> Result<Vec<EventRow>, StoreError>;

    /// Mark an event processed.
    async fn complete_event(&self, event_id: i64) -> Result<(), StoreError>;

    /// Return a claimed event to the ready pool, recording the failure.
    async fn fail_event(&self, event_id: i64, error: &str) -> Result<(), StoreError>;

    /// Crash recovery: clear `is_syncing` and `processing` flags older
    /// than `threshold`.
    async fn reap_stuck(&self, threshold: Duration) -> Result<ReapStats, StoreError>;

    /// Count of events with `processed=false, processing=false`, for
    /// `GET /status`.
    async fn pending_event_count(&self) -> Result<i64, StoreError>;

    /// Count of events with `processing=true`, for `GET /status`.
    async fn processing_event_count(&self) -> Result<i64, StoreError>;

    /// Fetch a conflict record by id (used by tests and operator tooling).
    async fn get_conflict(&self, conflict_id: i64) -> Result<Option<ConflictRecord>, StoreError>;
}
