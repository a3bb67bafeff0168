//! The Sync Engine: per-document orchestrator. Acquires the claim,
//! resolves direction, executes the transfer, updates the record, and
//! writes exactly one `sync_log` row.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tracing::instrument;

use crate::adapter::RemoteAdapter;
use crate::conflict::{self, Resolution};
use crate::config::ConflictResolutionPolicy;
use crate::direction::{self, Direction, DirectionHint};
use crate::document::{self, fingerprint, sanitize, Document};
use crate::error::EngineError;
use crate::store::model::{
    ClaimOutcome, LogStatus, NewConflictRecord, NewSyncLog, ReleasePatch, SyncRecord, SyncStatus,
};
use crate::store::StateStore;
use crate::timestamp;

/// The result of [`SyncEngine::sync_document`]: a success flag plus a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub ok: bool,
    pub message: String,
}

impl SyncOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// What a completed (or failed) transfer attempt resolves to — enough to
/// build both the `release` patch and the `sync_log` row.
struct TransferResult {
    outcome: SyncOutcome,
    direction: Direction,
    log_status: LogStatus,
    sync_status: SyncStatus,
    sync_hash_cloud: Option<Option<String>>,
    sync_hash_local: Option<Option<String>>,
    cloud_modified: Option<Option<NaiveDateTime>>,
    local_modified: Option<Option<NaiveDateTime>>,
    last_synced: Option<NaiveDateTime>,
}

impl TransferResult {
    fn no_op(message: impl Into<String>, direction: Direction) -> Self {
        Self {
            outcome: SyncOutcome::ok(message),
            direction,
            log_status: LogStatus::Success,
            sync_status: SyncStatus::Synced,
            sync_hash_cloud: None,
            sync_hash_local: None,
            cloud_modified: None,
            local_modified: None,
            last_synced: Some(now()),
        }
    }
}

pub struct SyncEngine<A: RemoteAdapter, S: StateStore> {
    cloud: Arc<A>,
    local: Arc<A>,
    store: Arc<S>,
    conflict_resolution: ConflictResolutionPolicy,
    exclude_fields: Vec<String>,
}

impl<A: RemoteAdapter, S: StateStore> Clone for SyncEngine<A, S> {
    fn clone(&self) -> Self {
        Self {
            cloud: self.cloud.clone(),
            local: self.local.clone(),
            store: self.store.clone(),
            conflict_resolution: self.conflict_resolution,
            exclude_fields: self.exclude_fields.clone(),
        }
    }
}

impl<A: RemoteAdapter, S: StateStore> SyncEngine<A, S> {
    pub fn new(
        cloud: Arc<A>,
        local: Arc<A>,
        store: Arc<S>,
        conflict_resolution: ConflictResolutionPolicy,
        exclude_fields: Vec<String>,
    ) -> Self {
        Self {
            cloud,
            local,
            store,
            conflict_resolution,
            exclude_fields,
        }
    }

    /// Claim, resolve direction, transfer, release, log.
    #[instrument(skip(self), fields(doctype = %doctype, docname = %docname))]
    pub async fn sync_document(
        &self,
        doctype: &str,
        docname: &str,
        hint: DirectionHint,
    ) -> SyncOutcome {
        let record = match self.store.claim(doctype, docname).await {
            Ok(ClaimOutcome::Claimed(record)) => record,
            Ok(ClaimOutcome::Busy) => {
                return SyncOutcome::err("document is already being synced");
            }
            Err(e) => return SyncOutcome::err(format!("claim failed: {e}")),
        };

        match self.run(doctype, docname, hint, &record).await {
            Ok(result) => {
                self.finish(doctype, docname, &record, Ok(&result)).await;
                result.outcome
            }
            Err(e) => {
                let outcome = SyncOutcome::err(format!("sync failed: {e}"));
                self.finish(doctype, docname, &record, Err(&outcome)).await;
                outcome
            }
        }
    }

    async fn finish(
        &self,
        doctype: &str,
        docname: &str,
        record: &SyncRecord,
        result: Result<&TransferResult, &SyncOutcome>,
    ) {
        let patch = match result {
            Ok(r) => ReleasePatch {
                sync_status: Some(r.sync_status),
                error_message: Some(None),
                retry_count: Some(0),
                last_synced: r.last_synced,
                sync_hash_cloud: r.sync_hash_cloud.clone(),
                sync_hash_local: r.sync_hash_local.clone(),
                cloud_modified: r.cloud_modified,
                local_modified: r.local_modified,
            },
            Err(outcome) => ReleasePatch {
                sync_status: Some(SyncStatus::Error),
                error_message: Some(Some(outcome.message.clone())),
                retry_count: Some(record.retry_count + 1),
                ..Default::default()
            },
        };

        if let Err(e) = self.store.release(record.id, patch).await {
            tracing::error!(doctype, docname, error = %e, "failed to release claim");
        }

        let (direction, log_status, message) = match result {
            Ok(r) => (r.direction, r.log_status, r.outcome.message.clone()),
            Err(outcome) => (Direction::None, LogStatus::Failed, outcome.message.clone()),
        };

        let log = NewSyncLog {
            doctype: doctype.to_string(),
            docname: docname.to_string(),
            action: "sync".to_string(),
            direction,
            status: log_status,
            message,
            changes_json: None,
        };
        if let Err(e) = self.store.log_sync(log).await {
            tracing::error!(doctype, docname, error = %e, "failed to append sync log");
        }
    }

    async fn run(
        &self,
        doctype: &str,
        docname: &str,
        hint: DirectionHint,
        record: &SyncRecord,
    ) -> Result<TransferResult, EngineError> {
        let cloud_doc = self.cloud.get(doctype, docname).await?;
        let local_doc = self.local.get(doctype, docname).await?;

        let direction = match hint {
            DirectionHint::Auto => {
                let resolved = direction::resolve(
                    cloud_doc.as_ref(),
                    local_doc.as_ref(),
                    record.sync_hash_cloud.as_deref(),
                    record.sync_hash_local.as_deref(),
                    &self.exclude_fields,
                );

                // A fresh record whose two documents already fingerprint
                // equal needs no transfer.
                if resolved == Direction::Conflict
                    && record.sync_hash_cloud.is_none()
                    && record.sync_hash_local.is_none()
                {
                    if let (Some(cloud), Some(local)) = (&cloud_doc, &local_doc) {
                        let hc = fingerprint(cloud, &self.exclude_fields);
                        let hl = fingerprint(local, &self.exclude_fields);
                        if hc == hl {
                            return Ok(TransferResult {
                                outcome: SyncOutcome::ok("already in sync (content matches)"),
                                direction: Direction::None,
                                log_status: LogStatus::Success,
                                sync_status: SyncStatus::Synced,
                                sync_hash_cloud: Some(Some(hc.clone())),
                                sync_hash_local: Some(Some(hc)),
                                cloud_modified: Some(Some(timestamp::parse(document::modified_of(cloud)))),
                                local_modified: Some(Some(timestamp::parse(document::modified_of(local)))),
                                last_synced: Some(now()),
                            });
                        }
                    }
                }
                resolved
            }
            DirectionHint::CloudToLocal => Direction::CloudToLocal,
            DirectionHint::LocalToCloud => Direction::LocalToCloud,
        };

        match direction {
            Direction::None => Ok(TransferResult::no_op("no changes to sync", Direction::None)),
            Direction::Conflict => self.execute_conflict(doctype, docname, cloud_doc, local_doc).await,
            Direction::CloudToLocal => {
                self.execute_cloud_to_local(doctype, docname, cloud_doc, local_doc).await
            }
            Direction::LocalToCloud => {
                self.execute_local_to_cloud(doctype, docname, cloud_doc, local_doc).await
            }
        }
    }

    async fn execute_cloud_to_local(
        &self,
        doctype: &str,
        docname: &str,
        cloud_doc: Option<Document>,
        local_doc: Option<Document>,
    ) -> Result<TransferResult, EngineError> {
        match (cloud_doc, local_doc) {
            (None, Some(_)) => {
                self.local.delete(doctype, docname).await?;
                Ok(TransferResult {
                    outcome: SyncOutcome::ok("deleted from local (deleted on cloud)"),
                    direction: Direction::CloudToLocal,
                    log_status: LogStatus::Success,
                    sync_status: SyncStatus::Synced,
                    sync_hash_cloud: Some(None),
                    sync_hash_local: Some(None),
                    cloud_modified: Some(None),
                    local_modified: Some(None),
                    last_synced: Some(now()),
                })
            }
            (None, None) => Ok(TransferResult::no_op("no changes to sync", Direction::CloudToLocal)),
            (Some(cloud), local_doc) => {
                let clean = sanitize(&cloud, &self.exclude_fields);
                let existed = local_doc.is_some();
                if existed {
                    self.local.update(doctype, docname, &clean, true).await?;
                } else {
                    self.local.create(doctype, &clean).await?;
                }

                let hc = fingerprint(&cloud, &self.exclude_fields);
                let hl = fingerprint(&clean, &self.exclude_fields);
                let message = if existed {
                    "updated on local from cloud"
                } else {
                    "created on local from cloud"
                };

                Ok(TransferResult {
                    outcome: SyncOutcome::ok(message),
                    direction: Direction::CloudToLocal,
                    log_status: LogStatus::Success,
                    sync_status: SyncStatus::Synced,
                    sync_hash_cloud: Some(Some(hc)),
                    sync_hash_local: Some(Some(hl)),
                    cloud_modified: Some(Some(timestamp::parse(document::modified_of(&cloud)))),
                    local_modified: Some(Some(now())),
                    last_synced: Some(now()),
                })
            }
        }
    }

    async fn execute_local_to_cloud(
        &self,
        doctype: &str,
        docname: &str,
        cloud_doc: Option<Document>,
        local_doc: Option<Document>,
    ) -> Result<TransferResult, EngineError> {
        match (local_doc, cloud_doc) {
            (None, Some(_)) => {
                self.cloud.delete(doctype, docname).await?;
                Ok(TransferResult {
                    outcome: SyncOutcome::ok("deleted from cloud (deleted on local)"),
                    direction: Direction::LocalToCloud,
                    log_status: LogStatus::Success,
                    sync_status: SyncStatus::Synced,
                    sync_hash_cloud: Some(None),
                    sync_hash_local: Some(None),
                    cloud_modified: Some(None),
                    local_modified: Some(None),
                    last_synced: Some(now()),
                })
            }
            (None, None) => Ok(TransferResult::no_op("no changes to sync", Direction::LocalToCloud)),
            (Some(local), cloud_doc) => {
                let clean = sanitize(&local, &self.exclude_fields);
                let existed = cloud_doc.is_some();
                if existed {
                    self.cloud.update(doctype, docname, &clean, true).await?;
                } else {
                    self.cloud.create(doctype, &clean).await?;
                }

                let hl = fingerprint(&local, &self.exclude_fields);
                let hc = fingerprint(&clean, &self.exclude_fields);
                let message = if existed {
                    "updated on cloud from local"
                } else {
                    "created on cloud from local"
                };

                Ok(TransferResult {
                    outcome: SyncOutcome::ok(message),
                    direction: Direction::LocalToCloud,
                    log_status: LogStatus::Success,
                    sync_status: SyncStatus::Synced,
                    sync_hash_cloud: Some(Some(hc)),
                    sync_hash_local: Some(Some(hl)),
                    cloud_modified: Some(Some(now())),
                    local_modified: Some(Some(timestamp::parse(document::modified_of(&local)))),
                    last_synced: Some(now()),
                })
            }
        }
    }

    /// Persist the conflict first, then — only if the chosen direction's
    /// transfer actually succeeds — mark it resolved. A transfer failure
    /// here leaves the `ConflictRecord` parked with `resolved=false`.
    async fn execute_conflict(
        &self,
        doctype: &str,
        docname: &str,
        cloud_doc: Option<Document>,
        local_doc: Option<Document>,
    ) -> Result<TransferResult, EngineError> {
        let (cloud, local) = match (&cloud_doc, &local_doc) {
            (Some(c), Some(l)) => (c.clone(), l.clone()),
            _ => {
                // The resolver only emits `conflict` when both sides hold
                // a document; this branch is unreachable in practice.
                return Ok(TransferResult::no_op(
                    "no changes to sync",
                    Direction::Conflict,
                ));
            }
        };

        let cloud_modified = timestamp::parse(document::modified_of(&cloud));
        let local_modified = timestamp::parse(document::modified_of(&local));

        let conflict_id = self
            .store
            .record_conflict(NewConflictRecord {
                doctype: doctype.to_string(),
                docname: docname.to_string(),
                cloud_data: serde_json::to_string(&cloud).map_err(crate::error::StoreError::from)?,
                local_data: serde_json::to_string(&local).map_err(crate::error::StoreError::from)?,
                cloud_modified,
                local_modified,
            })
            .await?;

        match conflict::resolve_conflict(self.conflict_resolution, cloud_modified, local_modified) {
            Resolution::Manual => Ok(TransferResult {
                outcome: SyncOutcome::err("conflict detected - manual resolution required"),
                direction: Direction::Conflict,
                log_status: LogStatus::Conflict,
                sync_status: SyncStatus::Conflict,
                sync_hash_cloud: None,
                sync_hash_local: None,
                cloud_modified: None,
                local_modified: None,
                last_synced: None,
            }),
            Resolution::Automatic { direction, resolution } => {
                let mut result = match direction {
                    Direction::CloudToLocal => {
                        self.execute_cloud_to_local(doctype, docname, cloud_doc, local_doc).await?
                    }
                    Direction::LocalToCloud => {
                        self.execute_local_to_cloud(doctype, docname, cloud_doc, local_doc).await?
                    }
                    Direction::None | Direction::Conflict => unreachable!(
                        "conflict::resolve_conflict only yields cloud_to_local or local_to_cloud"
                    ),
                };

                if result.outcome.ok {
                    self.store.resolve_conflict(conflict_id, resolution).await?;
                    result.outcome.message = format!("conflict resolved ({resolution}): {}", result.outcome.message);
                    result.log_status = LogStatus::Conflict;
                }

                Ok(result)
            }
        }
    }
}
