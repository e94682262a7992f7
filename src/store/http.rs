//! Grid web API client
//!
//! Speaks the `/uri` endpoints the engine needs: `PUT /uri?format=CHK`,
//! `POST /uri?t=mkdir-immutable` and `GET /uri?uri=<cap>` for immutable
//! objects, plus `POST /uri?t=mkdir`, `PUT /uri/<dir>/<name>?t=uri` and
//! `DELETE /uri/<dir>/<name>` for the mutable directories of a collective.
//! Every request carries the node's bearer token.

use crate::error::StoreError;
use crate::store::{
    encode_linked_directory, listing_read_cap, LinkedDirectory, MutableDirectory, ObjectStore,
};
use crate::types::{Capability, Timestamp};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Map transport-level reqwest failures. Everything here is retryable.
fn map_http_error(error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Unavailable(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        StoreError::Unavailable(format!("Connection error: {}", error))
    } else {
        StoreError::Unavailable(format!("HTTP error: {}", error))
    }
}

/// Map a non-success response. Server-side failures are transient; anything
/// else is the grid refusing the request.
async fn map_status(response: Response, capability: Option<&Capability>) -> StoreError {
    let status = response.status();
    let detail = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match (status, capability) {
        (StatusCode::NOT_FOUND | StatusCode::GONE, Some(cap)) => StoreError::NotFound(cap.clone()),
        (s, _) if s.is_server_error() => {
            StoreError::Unavailable(format!("Grid node returned {}: {}", s, detail))
        }
        (s, _) => StoreError::Rejected {
            status: s.as_u16(),
            detail,
        },
    }
}

/// HTTP client for a grid node's web API.
pub struct GridClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GridClient {
    pub fn new(base_url: &str, token: String) -> Result<Self, StoreError> {
        Self::with_timeouts(base_url, token, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: &str,
        token: String,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                StoreError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn uri_endpoint(&self) -> String {
        format!("{}/uri", self.base_url)
    }

    /// `/uri/<directory>/<name>`, with both segments percent-encoded.
    fn link_url(&self, directory: &Capability, name: &str) -> Result<Url, StoreError> {
        let invalid = |reason: String| StoreError::Encoding(format!("node URL {}: {}", self.base_url, reason));
        let mut url = Url::parse(&self.uri_endpoint()).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot carry a path".to_string()))?
            .push(directory.as_str())
            .push(name);
        Ok(url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn read_capability(response: Response) -> Result<Capability, StoreError> {
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to read response: {}", e)))?;
        Ok(Capability::new(text))
    }
}

#[async_trait]
impl ObjectStore for GridClient {
    async fn put_immutable(&self, content: &[u8]) -> Result<Capability, StoreError> {
        debug!(size = content.len(), "PUT immutable content");
        let response = self
            .client
            .put(self.uri_endpoint())
            .query(&[("format", "CHK")])
            .header("Authorization", self.bearer())
            .body(content.to_vec())
            .send()
            .await
            .map_err(map_http_error)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Self::read_capability(response).await,
            _ => Err(map_status(response, None).await),
        }
    }

    async fn put_linked_directory(
        &self,
        entries: &LinkedDirectory,
        timestamp: Timestamp,
    ) -> Result<Capability, StoreError> {
        debug!(entries = entries.len(), timestamp, "POST mkdir-immutable");
        let body = encode_linked_directory(entries, timestamp)?;
        let response = self
            .client
            .post(self.uri_endpoint())
            .query(&[("t", "mkdir-immutable")])
            .header("Authorization", self.bearer())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_http_error)?;

        if response.status() != StatusCode::OK {
            return Err(map_status(response, None).await);
        }
        Self::read_capability(response).await
    }

    async fn get(&self, capability: &Capability) -> Result<Vec<u8>, StoreError> {
        debug!(capability = %capability, "GET capability");
        let mut request = self
            .client
            .get(self.uri_endpoint())
            .query(&[("uri", capability.as_str())])
            .header("Authorization", self.bearer());
        if capability.is_directory() {
            request = request.query(&[("t", "json")]);
        }

        let response = request.send().await.map_err(map_http_error)?;
        if !response.status().is_success() {
            return Err(map_status(response, Some(capability)).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to read response: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn create_mutable_directory(&self) -> Result<MutableDirectory, StoreError> {
        debug!("POST mkdir");
        let response = self
            .client
            .post(self.uri_endpoint())
            .query(&[("t", "mkdir")])
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(map_http_error)?;

        let write = match response.status() {
            StatusCode::OK | StatusCode::CREATED => Self::read_capability(response).await?,
            _ => return Err(map_status(response, None).await),
        };
        let listing = self.get(&write).await?;
        let read = listing_read_cap(&write, &listing)?;
        Ok(MutableDirectory { write, read })
    }

    async fn set_link(
        &self,
        directory: &Capability,
        name: &str,
        target: &Capability,
    ) -> Result<(), StoreError> {
        debug!(name, target = %target, "PUT link");
        let response = self
            .client
            .put(self.link_url(directory, name)?)
            .query(&[("t", "uri")])
            .header("Authorization", self.bearer())
            .body(target.as_str().to_string())
            .send()
            .await
            .map_err(map_http_error)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            _ => Err(map_status(response, Some(directory)).await),
        }
    }

    async fn remove_link(&self, directory: &Capability, name: &str) -> Result<(), StoreError> {
        debug!(name, "DELETE link");
        let response = self
            .client
            .delete(self.link_url(directory, name)?)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(map_http_error)?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(map_status(response, Some(directory)).await),
        }
    }
}
