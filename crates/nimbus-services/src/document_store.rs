//! REST document store client for preference records.
//!
//! Documents live at `{base_url}/{collection}/{owner_handle}`. `GET` returns
//! the record or 404 when absent; `PUT` replaces the whole document.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::backend::{PersistenceError, PersistenceResult, PreferenceBackend};
use crate::preference::PreferenceRecord;

pub const DEFAULT_COLLECTION: &str = "userConfig";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Connection settings for [`DocumentStoreClient`].
#[derive(Debug, Clone)]
pub struct DocumentStoreConfig {
    pub base_url: String,
    pub collection: String,
    /// Bearer token sent with every request, if the store requires one.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl DocumentStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            collection: DEFAULT_COLLECTION.to_string(),
            token: None,
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// HTTP implementation of [`PreferenceBackend`].
#[derive(Debug, Clone)]
pub struct DocumentStoreClient {
    client: Arc<Client>,
    base_url: String,
    collection: String,
    token: Option<String>,
}

impl DocumentStoreClient {
    /// # Errors
    /// Returns `PersistenceError::Storage` if the base URL is not an http(s)
    /// URL, or `PersistenceError::Network` if the HTTP client cannot be built.
    pub fn new(config: DocumentStoreConfig) -> PersistenceResult<Self> {
        let url = Url::parse(&config.base_url).map_err(|e| {
            PersistenceError::storage(format!("Invalid document store URL: {}", e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(PersistenceError::storage(format!(
                "Document store URL must use http or https, got: {}",
                url.scheme()
            )));
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            collection: config.collection,
            token: config.token,
        })
    }

    fn document_url(&self, owner_handle: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.collection,
            urlencoding::encode(owner_handle)
        )
    }

    fn build_request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => req.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => req,
        }
    }

    /// Turn a non-success response into an error, preferring the message the
    /// store put in its body.
    async fn remote_error(response: reqwest::Response) -> PersistenceError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error.or(body.message))
            .unwrap_or(text);

        PersistenceError::Remote {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl PreferenceBackend for DocumentStoreClient {
    #[instrument(skip(self), level = "debug")]
    async fn read(&self, owner_handle: &str) -> PersistenceResult<Option<PreferenceRecord>> {
        let url = self.document_url(owner_handle);
        let response = self.build_request(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("No preference record for {}", owner_handle);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }

        let mut record: PreferenceRecord = response
            .json()
            .await
            .map_err(|e| PersistenceError::InvalidRecord(e.to_string()))?;

        // The document key is authoritative for ownership
        if record.owner_handle != owner_handle {
            if !record.owner_handle.is_empty() {
                tracing::warn!(
                    "Preference record for {} carries owner {}; using the key",
                    owner_handle,
                    record.owner_handle
                );
            }
            record.owner_handle = owner_handle.to_string();
        }

        Ok(Some(record))
    }

    #[instrument(skip(self, record), fields(owner = %record.owner_handle), level = "debug")]
    async fn write(&self, record: &PreferenceRecord) -> PersistenceResult<()> {
        let url = self.document_url(&record.owner_handle);
        let response = self
            .build_request(self.client.put(&url))
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::remote_error(response).await);
        }
        Ok(())
    }
}
