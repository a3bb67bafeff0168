//! End-to-end replication scenarios, against in-memory test doubles.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use replisync::adapter::mock::MockRemoteAdapter;
use replisync::config::ConflictResolutionPolicy;
use replisync::direction::DirectionHint;
use replisync::store::model::{ClaimOutcome, ReapStats};
use replisync::store::StateStore;
use replisync::{ingress, Document, IngressState, SqliteStore, SyncEngine, Worker};

fn doc(v: serde_json::Value) -> Document {
    v.as_object().unwrap().clone()
}

fn engine() -> (SyncEngine<MockRemoteAdapter, SqliteStore>, Arc<MockRemoteAdapter>, Arc<MockRemoteAdapter>, Arc<SqliteStore>) {
    let cloud = Arc::new(MockRemoteAdapter::new("cloud"));
    let local = Arc::new(MockRemoteAdapter::new("local"));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = SyncEngine::new(
        cloud.clone(),
        local.clone(),
        store.clone(),
        ConflictResolutionPolicy::LatestTimestamp,
        vec![],
    );
    (engine, cloud, local, store)
}

#[tokio::test]
async fn fresh_propagation() {
    let (engine, cloud, local, _store) = engine();
    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Acme", "modified": "2024-01-01 10:00:00"})),
        )
        .await;

    let outcome = engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;
    assert!(outcome.ok);
    assert_eq!(outcome.message, "created on local from cloud");

    let created = local.get_raw("Customer", "ACME-01").await.unwrap();
    assert_eq!(created.get("customer_name").unwrap(), "Acme");
}

#[tokio::test]
async fn one_sided_edit_propagates() {
    let (engine, cloud, local, _store) = engine();
    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Acme", "modified": "2024-01-01 10:00:00"})),
        )
        .await;
    engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;

    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Acme Inc", "modified": "2024-01-02 10:00:00"})),
        )
        .await;

    let outcome = engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;
    assert!(outcome.ok);
    assert_eq!(outcome.message, "updated on local from cloud");
    assert_eq!(
        local.get_raw("Customer", "ACME-01").await.unwrap().get("customer_name").unwrap(),
        "Acme Inc"
    );
}

#[tokio::test]
async fn conflict_with_latest_timestamp_policy() {
    let (engine, cloud, local, store) = engine();
    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Acme", "modified": "2024-01-01 10:00:00"})),
        )
        .await;
    engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;

    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Cloud Edit", "modified": "2024-02-01 09:00:00"})),
        )
        .await;
    local
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Local Edit", "modified": "2024-02-01 10:00:00"})),
        )
        .await;

    let outcome = engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;
    assert!(outcome.ok);
    assert!(outcome.message.contains("local_wins (latest)"));
    assert_eq!(
        cloud.get_raw("Customer", "ACME-01").await.unwrap().get("customer_name").unwrap(),
        "Local Edit"
    );

    match store.claim("Customer", "ACME-01").await.unwrap() {
        ClaimOutcome::Claimed(record) => {
            assert_eq!(record.sync_status.to_string(), "synced");
        }
        ClaimOutcome::Busy => panic!("record should be claimable after release"),
    }
}

#[tokio::test]
async fn delete_propagation() {
    let (engine, cloud, local, _store) = engine();
    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Acme", "modified": "2024-01-01 10:00:00"})),
        )
        .await;
    engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;

    cloud.remove("Customer", "ACME-01").await;
    let outcome = engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;
    assert!(outcome.ok);
    assert_eq!(outcome.message, "deleted from local (deleted on cloud)");
    assert!(local.get_raw("Customer", "ACME-01").await.is_none());

    let second = engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;
    assert!(second.ok);
    assert_eq!(second.message, "no changes to sync");
}

#[tokio::test]
async fn stale_timestamp_retry_is_transparent_to_the_engine() {
    let (engine, cloud, local, _store) = engine();
    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Acme", "modified": "2024-01-01 10:00:00"})),
        )
        .await;
    engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;

    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-01", "customer_name": "Acme Inc", "modified": "2024-01-02 10:00:00"})),
        )
        .await;
    // Two stale-timestamp rejections before the third attempt succeeds —
    // within the adapter's 3-attempt budget.
    local.fail_next_updates_with_stale_timestamp(2).await;

    let outcome = engine.sync_document("Customer", "ACME-01", DirectionHint::Auto).await;
    assert!(outcome.ok);
    assert_eq!(outcome.message, "updated on local from cloud");
    assert_eq!(
        local.get_raw("Customer", "ACME-01").await.unwrap().get("customer_name").unwrap(),
        "Acme Inc"
    );
}

#[tokio::test]
async fn webhook_driven_pipeline() {
    let (engine, cloud, _local, store) = engine();
    cloud
        .seed(
            "Customer",
            doc(json!({"name": "ACME-02", "customer_name": "Acme Two", "modified": "2024-01-01 10:00:00"})),
        )
        .await;

    let secret = "shared-secret";
    let ingress_state = IngressState::new(store.clone(), secret, "replisyncd");
    let app = ingress::router(ingress_state);

    let body = r#"{"doctype":"Customer","name":"ACME-02","action":"save"}"#;
    let signature = replisync::signature::sign(body.as_bytes(), secret);

    let response = app
        .oneshot(
            Request::post("/webhook/cloud")
                .header("content-type", "application/json")
                .header("X-Frappe-Webhook-Signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.pending_event_count().await.unwrap(), 1);

    let worker = Worker::new(engine, store.clone());
    worker.drain_once().await;

    assert_eq!(store.pending_event_count().await.unwrap(), 0);
    assert_eq!(store.processing_event_count().await.unwrap(), 0);

    let events = store.claim_events(10).await.unwrap();
    assert!(events.is_empty(), "the webhook event should already be processed");
}

#[tokio::test]
async fn reap_stuck_is_exposed_for_operator_tooling() {
    let (_engine, _cloud, _local, store) = engine();
    let stats: ReapStats = store.reap_stuck(std::time::Duration::from_secs(600)).await.unwrap();
    assert_eq!(stats, ReapStats::default());
}
