use thiserror::Error;

/// Error surfaced by a [`crate::adapter::RemoteAdapter`].
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request to {side} failed: {verb} {url}: {source}")]
    Transport {
        side: String,
        verb: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{side} responded {status} to {verb} {url}: {body_excerpt}")]
    Status {
        side: String,
        verb: &'static str,
        url: String,
        status: u16,
        body_excerpt: String,
    },

    #[error("failed to decode response body from {side}: {0}")]
    Decode {
        side: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("update to {doctype}/{docname} on {side} failed after 3 attempts due to stale timestamp")]
    StaleTimestampExhausted {
        side: String,
        doctype: String,
        docname: String,
    },
}

/// Error surfaced by a [`crate::store::StateStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Crate-wide error type. Composes the per-component error enums so
/// callers that cross component boundaries (the engine calling both an
/// adapter and the store) have one error type to propagate with `?`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
