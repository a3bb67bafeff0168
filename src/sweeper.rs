//! The Batch Sweeper: enumerates configured doctypes on both sides and
//! drives the Sync Engine over the union of names observed. Makes no
//! ordering guarantees between documents.

use std::collections::BTreeSet;

use crate::adapter::{ListOptions, RemoteAdapter};
use crate::direction::DirectionHint;
use crate::engine::SyncEngine;
use crate::store::StateStore;

/// Per-doctype or aggregate sweep statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub failed: usize,
}

impl SweepStats {
    fn classify(&mut self, message: &str, ok: bool) {
        self.total += 1;
        if !ok {
            // A conflict outcome is classified as `conflicts`, never
            // both `conflicts` and `failed`.
            if message.contains("conflict") {
                self.conflicts += 1;
            } else {
                self.failed += 1;
            }
            return;
        }
        if message.contains("conflict") {
            self.conflicts += 1;
        } else if message.contains("no changes") || message.contains("already in sync") {
            self.skipped += 1;
        } else {
            self.success += 1;
        }
    }

    fn add(&mut self, other: SweepStats) {
        self.total += other.total;
        self.success += other.success;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
    }
}

pub struct Sweeper<A: RemoteAdapter, S: StateStore> {
    engine: SyncEngine<A, S>,
    doctypes: Vec<String>,
}

impl<A: RemoteAdapter, S: StateStore> Sweeper<A, S> {
    pub fn new(engine: SyncEngine<A, S>, doctypes: Vec<String>) -> Self {
        Self { engine, doctypes }
    }

    /// List up to `limit` documents from each side, union the `name`
    /// sets, and invoke `sync_document(doctype, name, auto)` per name.
    pub async fn sync_doctype(
        &self,
        cloud: &A,
        local: &A,
        doctype: &str,
        limit: u32,
    ) -> SweepStats {
        let cloud_docs = cloud
            .list(doctype, ListOptions { page_len: limit, ..Default::default() })
            .await
            .unwrap_or_default();
        let local_docs = local
            .list(doctype, ListOptions { page_len: limit, ..Default::default() })
            .await
            .unwrap_or_default();

        let mut names: BTreeSet<String> = BTreeSet::new();
        for doc in &cloud_docs {
            if let Some(name) = crate::document::name_of(doc) {
                names.insert(name.to_string());
            }
        }
        for doc in &local_docs {
            if let Some(name) = crate::document::name_of(doc) {
                names.insert(name.to_string());
            }
        }

        let mut stats = SweepStats::default();
        for name in names {
            let outcome = self.engine.sync_document(doctype, &name, DirectionHint::Auto).await;
            stats.classify(&outcome.message, outcome.ok);
        }
        stats
    }

    /// Iterate the configured doctype list and sum statistics.
    pub async fn sync_all_doctypes(&self, cloud: &A, local: &A, limit: u32) -> SweepStats {
        let mut total = SweepStats::default();
        for doctype in &self.doctypes {
            let stats = self.sync_doctype(cloud, local, doctype, limit).await;
            total.add(stats);
        }
        total
    }
}
