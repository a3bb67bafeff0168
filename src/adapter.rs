//! The Remote Adapter: typed document CRUD against one remote instance,
//! plus the optimistic-concurrency retry on `update`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::document::Document;
use crate::error::AdapterError;

/// Filters and paging for [`RemoteAdapter::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filters: Option<Value>,
    pub fields: Option<Vec<String>>,
    pub offset: u32,
    pub page_len: u32,
}

/// Substrings Frappe uses in an optimistic-concurrency failure body,
/// matched case-insensitively.
const STALE_TIMESTAMP_MARKERS: &[&str] = &[
    "timestamp mismatch",
    "document has been modified",
    "has been modified after you have opened it",
];

const MAX_UPDATE_ATTEMPTS: u32 = 3;

fn is_stale_timestamp_error(body: &str) -> bool {
    let lower = body.to_lowercase();
    STALE_TIMESTAMP_MARKERS.iter().any(|m| lower.contains(m))
}

/// Truncate a response body for display in an error, independent of
/// whatever the caller checked the full body for.
fn excerpt(body: &str) -> String {
    body.chars().take(512).collect()
}

/// Represents one side of the replication.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// The human name this adapter was configured with (`"cloud"`/`"local"`,
    /// or any operator-chosen label), used in log messages and errors.
    fn name(&self) -> &str;

    /// Single document fetch. Absence (HTTP 404) is not an error.
    async fn get(&self, doctype: &str, docname: &str) -> Result<Option<Document>, AdapterError>;

    /// Pageable list.
    async fn list(&self, doctype: &str, opts: ListOptions) -> Result<Vec<Document>, AdapterError>;

    /// Create a new document.
    async fn create(&self, doctype: &str, doc: &Document) -> Result<Document, AdapterError>;

    /// Update an existing document. When `retry_on_stale_timestamp` is set
    /// and the response is a stale-timestamp failure, re-fetches the
    /// document, copies its current `modified` into the payload, and
    /// retries — up to [`MAX_UPDATE_ATTEMPTS`] total attempts.
    async fn update(
        &self,
        doctype: &str,
        docname: &str,
        doc: &Document,
        retry_on_stale_timestamp: bool,
    ) -> Result<Document, AdapterError>;

    /// Delete a document.
    async fn delete(&self, doctype: &str, docname: &str) -> Result<(), AdapterError>;

    /// Lightweight reachability/auth check.
    async fn test_connection(&self) -> Result<bool, AdapterError>;
}

/// A [`RemoteAdapter`] backed by a Frappe/ERPNext-shaped REST API over
/// `reqwest`, using the `/api/resource/{doctype}/{docname}` surface.
pub struct HttpRemoteAdapter {
    client: Client,
    base_url: String,
    auth_header: String,
    name: String,
}

impl HttpRemoteAdapter {
    pub fn new(base_url: impl Into<String>, api_key: &str, api_secret: &str, name: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            auth_header: format!("token {api_key}:{api_secret}"),
            name: name.into(),
        }
    }

    fn resource_url(&self, doctype: &str, docname: &str) -> String {
        format!("{}/api/resource/{}/{}", self.base_url, doctype, docname)
    }

    fn list_url(&self, doctype: &str) -> String {
        format!("{}/api/resource/{}", self.base_url, doctype)
    }

    async fn body_text(response: reqwest::Response) -> String {
        response.text().await.unwrap_or_default()
    }

    async fn body_excerpt(response: reqwest::Response) -> String {
        excerpt(&Self::body_text(response).await)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AdapterError> {
        let bytes = response.bytes().await.map_err(|source| AdapterError::Transport {
            side: self.name.clone(),
            verb: "GET",
            url: self.base_url.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| AdapterError::Decode {
            side: self.name.clone(),
            source,
        })
    }
}

#[async_trait]
impl RemoteAdapter for HttpRemoteAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, doctype: &str, docname: &str) -> Result<Option<Document>, AdapterError> {
        let url = self.resource_url(doctype, docname);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|source| AdapterError::Transport {
                side: self.name.clone(),
                verb: "GET",
                url: url.clone(),
                source,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_excerpt = Self::body_excerpt(response).await;
            return Err(AdapterError::Status {
                side: self.name.clone(),
                verb: "GET",
                url,
                status,
                body_excerpt,
            });
        }

        let envelope: DocEnvelope = self.decode(response).await?;
        Ok(Some(envelope.data))
    }

    async fn list(&self, doctype: &str, opts: ListOptions) -> Result<Vec<Document>, AdapterError> {
        let url = self.list_url(doctype);
        let mut request = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .query(&[
                ("limit_start", opts.offset.to_string()),
                ("limit_page_length", opts.page_len.to_string()),
            ]);
        if let Some(filters) = &opts.filters {
            request = request.query(&[("filters", filters.to_string())]);
        }
        if let Some(fields) = &opts.fields {
            request = request.query(&[("fields", serde_json::to_string(fields).unwrap_or_default())]);
        }

        let response = request.send().await.map_err(|source| AdapterError::Transport {
            side: self.name.clone(),
            verb: "GET",
            url: url.clone(),
            source,
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_excerpt = Self::body_excerpt(response).await;
            return Err(AdapterError::Status {
                side: self.name.clone(),
                verb: "GET",
                url,
                status,
                body_excerpt,
            });
        }

        let envelope: ListEnvelope = self.decode(response).await?;
        Ok(envelope.data)
    }

    async fn create(&self, doctype: &str, doc: &Document) -> Result<Document, AdapterError> {
        let url = self.list_url(doctype);
        let mut payload = doc.clone();
        payload.insert("doctype".to_string(), Value::String(doctype.to_string()));

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|source| AdapterError::Transport {
                side: self.name.clone(),
                verb: "POST",
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_excerpt = Self::body_excerpt(response).await;
            return Err(AdapterError::Status {
                side: self.name.clone(),
                verb: "POST",
                url,
                status,
                body_excerpt,
            });
        }

        let envelope: DocEnvelope = self.decode(response).await?;
        Ok(envelope.data)
    }

    async fn update(
        &self,
        doctype: &str,
        docname: &str,
        doc: &Document,
        retry_on_stale_timestamp: bool,
    ) -> Result<Document, AdapterError> {
        let url = self.resource_url(doctype, docname);
        let mut payload = doc.clone();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = self
                .client
                .put(&url)
                .header("Authorization", &self.auth_header)
                .header("Content-Type", "application/json")
                .json(&payload)
                .send()
                .await
                .map_err(|source| AdapterError::Transport {
                    side: self.name.clone(),
                    verb: "PUT",
                    url: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                let envelope: DocEnvelope = self.decode(response).await?;
                return Ok(envelope.data);
            }

            let status = response.status().as_u16();
            let body = Self::body_text(response).await;
            let is_stale = retry_on_stale_timestamp && is_stale_timestamp_error(&body);

            let can_retry = is_stale && attempt < MAX_UPDATE_ATTEMPTS;

            if !can_retry {
                let body_excerpt = excerpt(&body);
                if is_stale && attempt >= MAX_UPDATE_ATTEMPTS {
                    return Err(AdapterError::StaleTimestampExhausted {
                        side: self.name.clone(),
                        doctype: doctype.to_string(),
                        docname: docname.to_string(),
                    });
                }
                return Err(AdapterError::Status {
                    side: self.name.clone(),
                    verb: "PUT",
                    url,
                    status,
                    body_excerpt,
                });
            }

            if let Some(latest) = self.get(doctype, docname).await? {
                if let Some(modified) = latest.get("modified") {
                    payload.insert("modified".to_string(), modified.clone());
                }
            }
        }
    }

    async fn delete(&self, doctype: &str, docname: &str) -> Result<(), AdapterError> {
        let url = self.resource_url(doctype, docname);
        let response = self
            .client
            .delete(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|source| AdapterError::Transport {
                side: self.name.clone(),
                verb: "DELETE",
                url: url.clone(),
                source,
            })?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }

        let status = response.status().as_u16();
        let body_excerpt = Self::body_excerpt(response).await;
        Err(AdapterError::Status {
            side: self.name.clone(),
            verb: "DELETE",
            url,
            status,
            body_excerpt,
        })
    }

    async fn test_connection(&self) -> Result<bool, AdapterError> {
        let url = format!("{}/api/method/frappe.auth.get_logged_user", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|source| AdapterError::Transport {
                side: self.name.clone(),
                verb: "GET",
                url,
                source,
            })?;
        Ok(response.status().is_success())
    }
}

#[derive(serde::Deserialize)]
struct DocEnvelope {
    data: Document,
}

#[derive(serde::Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    data: Vec<Document>,
}

/// In-memory test double for [`RemoteAdapter`]. Not behind `#[cfg(test)]`
/// so integration tests under `tests/` can depend on it too.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// An in-memory [`RemoteAdapter`] for engine/sweeper/worker tests.
    /// Can be configured to fail the next `update` with a stale-timestamp
    /// error, to exercise the retry path without a network.
    pub struct MockRemoteAdapter {
        name: String,
        docs: Mutex<HashMap<(String, String), Document>>,
        stale_timestamp_failures_remaining: Mutex<u32>,
    }

    impl MockRemoteAdapter {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                docs: Mutex::new(HashMap::new()),
                stale_timestamp_failures_remaining: Mutex::new(0),
            }
        }

        pub async fn seed(&self, doctype: &str, doc: Document) {
            let docname = doc.get("name").and_then(Value::as_str).unwrap().to_string();
            self.docs
                .lock()
                .await
                .insert((doctype.to_string(), docname), doc);
        }

        pub async fn remove(&self, doctype: &str, docname: &str) {
            self.docs
                .lock()
                .await
                .remove(&(doctype.to_string(), docname.to_string()));
        }

        pub async fn get_raw(&self, doctype: &str, docname: &str) -> Option<Document> {
            self.docs
                .lock()
                .await
                .get(&(doctype.to_string(), docname.to_string()))
                .cloned()
        }

        /// The next `n` `update` calls fail with a stale-timestamp error
        /// before succeeding, to exercise the adapter's retry loop.
        pub async fn fail_next_updates_with_stale_timestamp(&self, n: u32) {
            *self.stale_timestamp_failures_remaining.lock().await = n;
        }
    }

    #[async_trait]
    impl RemoteAdapter for MockRemoteAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get(&self, doctype: &str, docname: &str) -> Result<Option<Document>, AdapterError> {
            Ok(self.get_raw(doctype, docname).await)
        }

        async fn list(&self, doctype: &str, _opts: ListOptions) -> Result<Vec<Document>, AdapterError> {
            let docs = self.docs.lock().await;
            Ok(docs
                .iter()
                .filter(|((dt, _), _)| dt == doctype)
                .map(|(_, d)| d.clone())
                .collect())
        }

        async fn create(&self, doctype: &str, doc: &Document) -> Result<Document, AdapterError> {
            self.seed(doctype, doc.clone()).await;
            Ok(doc.clone())
        }

        async fn update(
            &self,
            doctype: &str,
            docname: &str,
            doc: &Document,
            retry_on_stale_timestamp: bool,
        ) -> Result<Document, AdapterError> {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let mut remaining = self.stale_timestamp_failures_remaining.lock().await;
                if *remaining == 0 {
                    drop(remaining);
                    self.seed(doctype, doc.clone()).await;
                    return Ok(doc.clone());
                }

                if !retry_on_stale_timestamp || attempt >= MAX_UPDATE_ATTEMPTS {
                    if attempt >= MAX_UPDATE_ATTEMPTS && retry_on_stale_timestamp {
                        return Err(AdapterError::StaleTimestampExhausted {
                            side: self.name.clone(),
                            doctype: doctype.to_string(),
                            docname: docname.to_string(),
                        });
                    }
                    return Err(AdapterError::Status {
                        side: self.name.clone(),
                        verb: "PUT",
                        url: format!("mock://{doctype}/{docname}"),
                        status: 409,
                        body_excerpt: "document has been modified".to_string(),
                    });
                }

                *remaining -= 1;
            }
        }

        async fn delete(&self, doctype: &str, docname: &str) -> Result<(), AdapterError> {
            self.remove(doctype, docname).await;
            Ok(())
        }

        async fn test_connection(&self) -> Result<bool, AdapterError> {
            Ok(true)
        }
    }
}
