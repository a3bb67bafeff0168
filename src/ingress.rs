//! Ingress: the two webhook HTTP endpoints that authenticate an inbound
//! payload and enqueue it for the Queue Worker. Returns a composable
//! `axum::Router` — no process-wide engine slot.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::signature;
use crate::store::model::{EventAction, NewEvent, Side};
use crate::store::StateStore;

const SIGNATURE_HEADER: &str = "X-Frappe-Webhook-Signature";

#[derive(Clone)]
pub struct IngressState<S: StateStore> {
    pub store: Arc<S>,
    pub webhook_secret: String,
    pub service_name: String,
}

impl<S: StateStore> IngressState<S> {
    pub fn new(store: Arc<S>, webhook_secret: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            store,
            webhook_secret: webhook_secret.into(),
            service_name: service_name.into(),
        }
    }
}

/// `{doctype, name, action?, ...}`. Extra fields are archived verbatim
/// in the queued event's payload, so this is deliberately not
/// exhaustive — it exists only to validate the two required fields.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    doctype: Option<String>,
    name: Option<String>,
    #[serde(default)]
    action: Option<String>,
}

/// Build the ingress router: `/webhook/cloud`, `/webhook/local`,
/// `/health`, `/status`.
pub fn router<S: StateStore + 'static>(state: IngressState<S>) -> Router {
    Router::new()
        .route("/webhook/cloud", post(webhook_cloud::<S>))
        .route("/webhook/local", post(webhook_local::<S>))
        .route("/health", get(health::<S>))
        .route("/status", get(status::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn webhook_cloud<S: StateStore + 'static>(
    State(state): State<IngressState<S>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    handle_webhook(state, Side::Cloud, headers, body).await
}

async fn webhook_local<S: StateStore + 'static>(
    State(state): State<IngressState<S>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    handle_webhook(state, Side::Local, headers, body).await
}

async fn handle_webhook<S: StateStore + 'static>(
    state: IngressState<S>,
    source: Side,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if let Some(provided) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        if !signature::verify(&body, provided, &state.webhook_secret) {
            return error_response(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("malformed payload: {e}")),
    };

    let Some(doctype) = payload.doctype else {
        return error_response(StatusCode::BAD_REQUEST, "missing required field: doctype");
    };
    let Some(name) = payload.name else {
        return error_response(StatusCode::BAD_REQUEST, "missing required field: name");
    };
    let action: EventAction = payload
        .action
        .as_deref()
        .unwrap_or("update")
        .parse()
        .unwrap_or(EventAction::Update);

    let raw_payload = String::from_utf8_lossy(&body).into_owned();

    match state
        .store
        .enqueue_event(NewEvent {
            source,
            doctype,
            docname: name,
            action,
            payload: raw_payload,
        })
        .await
    {
        Ok(id) => (StatusCode::OK, Json(json!({"status": "success", "id": id}))).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e}")),
    }
}

async fn health<S: StateStore + 'static>(State(state): State<IngressState<S>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": state.service_name,
            "timestamp": unix_timestamp(),
        })),
    )
        .into_response()
}

async fn status<S: StateStore + 'static>(State(state): State<IngressState<S>>) -> Response {
    let pending = state.store.pending_event_count().await.unwrap_or(0);
    let processing = state.store.processing_event_count().await.unwrap_or(0);

    (
        StatusCode::OK,
        Json(json!({
            "status": "running",
            "pending_webhooks": pending,
            "processing_webhooks": processing,
            "timestamp": unix_timestamp(),
        })),
    )
        .into_response()
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"status": "error", "message": message}) as Value)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> IngressState<SqliteStore> {
        IngressState::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            "shared-secret",
            "replisyncd",
        )
    }

    #[tokio::test]
    async fn accepts_well_formed_unsigned_webhook_with_no_signature_header() {
        let app = router(state());
        let body = r#"{"doctype":"Customer","name":"ACME-01","action":"update"}"#;

        let response = app
            .oneshot(
                Request::post("/webhook/cloud")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_forged_signature_when_no_webhook_secret_env_var_was_set() {
        use crate::config::DEFAULT_WEBHOOK_SECRET;

        let state = IngressState::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            DEFAULT_WEBHOOK_SECRET,
            "replisyncd",
        );
        let app = router(state);
        let body = r#"{"doctype":"Customer","name":"ACME-01"}"#;

        let response = app
            .oneshot(
                Request::post("/webhook/cloud")
                    .header("content-type", "application/json")
                    .header(SIGNATURE_HEADER, "deadbeef")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_invalid_signature() {
        let app = router(state());
        let body = r#"{"doctype":"Customer","name":"ACME-01"}"#;

        let response = app
            .oneshot(
                Request::post("/webhook/local")
                    .header("content-type", "application/json")
                    .header(SIGNATURE_HEADER, "deadbeef")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_correctly_signed_webhook_and_enqueues() {
        let state = state();
        let store = state.store.clone();
        let app = router(state);
        let body = r#"{"doctype":"Customer","name":"ACME-01","action":"update"}"#;
        let sig = signature::sign(body.as_bytes(), "shared-secret");

        let response = app
            .oneshot(
                Request::post("/webhook/cloud")
                    .header("content-type", "application/json")
                    .header(SIGNATURE_HEADER, sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.pending_event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let app = router(state());

        let response = app
            .oneshot(Request::post("/webhook/cloud").body(Body::from("not json")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_status_respond() {
        let app = router(state());
        let health_resp = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health_resp.status(), StatusCode::OK);

        let status_resp = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(status_resp.status(), StatusCode::OK);
    }
}
