use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use super::error::{BackendError, BackendResult};
use crate::config::{ConfigError, EngineConfig};
use crate::utils::validate_backend_url;

/// Default per-request timeout.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client for the application backend.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct BackendClient {
    base_url: Url,
    api_key: Option<Zeroizing<String>>,
    timeout: Duration,
    http: reqwest::Client,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BackendClient {
    pub fn new(base_url: &str) -> BackendResult<Self> {
        let base_url =
            validate_backend_url(base_url).map_err(|e| BackendError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            base_url,
            api_key: None,
            timeout: DEFAULT_BACKEND_TIMEOUT,
            http: reqwest::Client::new(),
        })
    }

    /// Build a client from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let base_url = config.require_backend_url()?;
        let client = Self::new(base_url).map_err(|e| ConfigError::InvalidValue {
            key: "backend_url".to_string(),
            reason: e.to_string(),
        })?;

        Ok(match config.backend_api_key() {
            Some(key) => client.with_api_key(key),
            None => client,
        })
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(Zeroizing::new(api_key.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append percent-encoded path segments to the base URL.
    pub fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url).timeout(self.timeout);
        match &self.api_key {
            Some(key) => request.bearer_auth(key.as_str()),
            None => request,
        }
    }

    /// GET a JSON document. A 404 is `Ok(None)`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> BackendResult<Option<T>> {
        debug!(url = %url, "Backend GET");

        let response = self.request(reqwest::Method::GET, url).query(query).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;

        let body = response.json::<T>().await.map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Some(body))
    }

    /// POST a JSON body, ignoring the response body.
    pub async fn post_json<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> BackendResult<()> {
        debug!(url = %url, "Backend POST");

        let response = self
            .request(reqwest::Method::POST, url)
            .json(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}
