//! Row types for the four tables backing the state store:
//! `sync_record`, `sync_log`, `conflict_record`, `event_queue`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::direction::Direction;

/// `sync_record.sync_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Conflict,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for SyncStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown sync_status: {other}")),
        }
    }
}

/// `sync_log.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
    Conflict,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// Which side an event or a side-config applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Cloud,
    Local,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cloud => "cloud",
            Self::Local => "local",
        };
        f.write_str(s)
    }
}

impl FromStr for Side {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cloud" => Ok(Self::Cloud),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown event source: {other}")),
        }
    }
}

impl Side {
    /// The direction a webhook from this side pins a sync to.
    pub fn pinned_direction(self) -> Direction {
        match self {
            Self::Cloud => Direction::CloudToLocal,
            Self::Local => Direction::LocalToCloud,
        }
    }
}

/// `event_queue.action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for EventAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            // Frappe's webhook payload sends `save` for both creates and
            // updates; treat anything unrecognized as `update`.
            _ => Ok(Self::Update),
        }
    }
}

/// A `sync_record` row.
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub id: i64,
    pub doctype: String,
    pub docname: String,
    pub cloud_modified: Option<NaiveDateTime>,
    pub local_modified: Option<NaiveDateTime>,
    pub last_synced: Option<NaiveDateTime>,
    pub sync_hash_cloud: Option<String>,
    pub sync_hash_local: Option<String>,
    pub is_syncing: bool,
    pub sync_status: SyncStatus,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// The outcome of [`crate::store::StateStore::claim`].
pub enum ClaimOutcome {
    Claimed(SyncRecord),
    Busy,
}

/// Fields [`crate::store::StateStore::release`] may update. Every
/// `Some` field is written; `None` fields are left unchanged. `is_syncing`
/// is always cleared and `updated_at` always bumped by `release` itself.
#[derive(Debug, Clone, Default)]
pub struct ReleasePatch {
    pub sync_status: Option<SyncStatus>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<i64>,
    pub last_synced: Option<NaiveDateTime>,
    pub sync_hash_cloud: Option<Option<String>>,
    pub sync_hash_local: Option<Option<String>>,
    pub cloud_modified: Option<Option<NaiveDateTime>>,
    pub local_modified: Option<Option<NaiveDateTime>>,
}

/// A new `sync_log` row to append.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub doctype: String,
    pub docname: String,
    pub action: String,
    pub direction: Direction,
    pub status: LogStatus,
    pub message: String,
    pub changes_json: Option<String>,
}

/// A new `conflict_record` row.
#[derive(Debug, Clone)]
pub struct NewConflictRecord {
    pub doctype: String,
    pub docname: String,
    pub cloud_data: String,
    pub local_data: String,
    pub cloud_modified: NaiveDateTime,
    pub local_modified: NaiveDateTime,
}

/// A persisted `conflict_record` row.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub id: i64,
    pub doctype: String,
    pub docname: String,
    pub cloud_data: String,
    pub local_data: String,
    pub cloud_modified: NaiveDateTime,
    pub local_modified: NaiveDateTime,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// A new `event_queue` row, enqueued by Ingress.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub source: Side,
    pub doctype: String,
    pub docname: String,
    pub action: EventAction,
    pub payload: String,
}

/// A persisted `event_queue` row.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub source: Side,
    pub doctype: String,
    pub docname: String,
    pub action: EventAction,
    pub payload: String,
    pub processed: bool,
    pub processing: bool,
    pub created_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub retry_count: i64,
}

/// Outcome of a `reapStuck` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub records_reaped: usize,
    pub events_reaped: usize,
}
