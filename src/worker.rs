//! The Queue Worker: a long-running loop that claims events, invokes the
//! Sync Engine with the event's pinned direction, and marks the
//! outcome. Runs the periodic watchdog sweep.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::adapter::RemoteAdapter;
use crate::direction::DirectionHint;
use crate::engine::SyncEngine;
use crate::store::StateStore;

const EVENTS_PER_CLAIM: usize = 10;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_WATCHDOG_THRESHOLD: Duration = Duration::from_secs(600);

pub struct Worker<A: RemoteAdapter, S: StateStore> {
    engine: SyncEngine<A, S>,
    store: Arc<S>,
    poll_interval: Duration,
    watchdog_interval: Duration,
    watchdog_threshold: Duration,
}

impl<A: RemoteAdapter, S: StateStore> Worker<A, S> {
    pub fn new(engine: SyncEngine<A, S>, store: Arc<S>) -> Self {
        Self {
            engine,
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            watchdog_threshold: DEFAULT_WATCHDOG_THRESHOLD,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_watchdog(mut self, interval: Duration, threshold: Duration) -> Self {
        self.watchdog_interval = interval;
        self.watchdog_threshold = threshold;
        self
    }

    /// Run until `shutdown` resolves. Each tick claims up to
    /// [`EVENTS_PER_CLAIM`] events, processes them serially, then sleeps.
    /// A separate interval drives `reapStuck`.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.poll_interval);
        let mut watchdog = tokio::time::interval(self.watchdog_interval);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.drain_once().await;
                }
                _ = watchdog.tick() => {
                    self.reap().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("worker shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One claim-and-process pass, exposed separately so callers (and
    /// tests) can drive the worker without a full `select!` loop.
    pub async fn drain_once(&self) {
        let events = match self.store.claim_events(EVENTS_PER_CLAIM).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "failed to claim events");
                return;
            }
        };

        for event in events {
            let hint = match event.source.pinned_direction() {
                crate::direction::Direction::CloudToLocal => DirectionHint::CloudToLocal,
                _ => DirectionHint::LocalToCloud,
            };

            let outcome = self
                .engine
                .sync_document(&event.doctype, &event.docname, hint)
                .await;

            let result = if outcome.ok {
                self.store.complete_event(event.id).await
            } else {
                self.store.fail_event(event.id, &outcome.message).await
            };

            if let Err(e) = result {
                warn!(event_id = event.id, error = %e, "failed to record event outcome");
            }
        }
    }

    async fn reap(&self) {
        match self.store.reap_stuck(self.watchdog_threshold).await {
            Ok(stats) if stats.records_reaped > 0 || stats.events_reaped > 0 => {
                info!(
                    records_reaped = stats.records_reaped,
                    events_reaped = stats.events_reaped,
                    "watchdog reclaimed stuck work"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "watchdog sweep failed"),
        }
    }
}
