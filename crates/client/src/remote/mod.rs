//! Remote build client.
//!
//! Delegates a database build to a peer warmdb instance.
//!
//! ### Protocol
//!
//! - **Endpoint**: `POST <base>/warmdb/remote-build`
//! - **Request**: form-encoded, one field carrying the JSON build specification
//!   (with the caller's build checksum attached).
//! - **Response**: the peer's resolved settings as JSON on 2xx; anything else
//!   is a failure whose body is kept for diagnostics.
//! - **Retries**: none. The timeout is generous because a cold build runs real
//!   migrations.

pub mod error;

pub use error::RemoteError;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header;
use url::Url;
use warmdb_core::remote::{REMOTE_BUILD_PATH, REMOTE_FORM_FIELD, RemoteBuilder, encode_request};
use warmdb_core::{AppConfig, BuildSpec, ResolvedSettings};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(240);

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "warmdb/0.1";

/// Remote build client configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Request timeout (default: 240s).
    pub timeout: Duration,
    /// User-agent string (default: warmdb/0.x).
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, user_agent: DEFAULT_USER_AGENT.to_string() }
    }
}

impl RemoteConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self { timeout: config.remote_timeout(), ..Default::default() }
    }
}

/// HTTP implementation of [`RemoteBuilder`].
#[derive(Debug, Clone)]
pub struct HttpRemoteBuilder {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemoteBuilder {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { http, config })
    }

    /// The build endpoint under a peer's base URL.
    pub fn endpoint(base: &str) -> Result<Url, RemoteError> {
        let mut base = Url::parse(base).map_err(|e| RemoteError::InvalidUrl(format!("{base}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RemoteError::InvalidUrl(format!("unsupported scheme: {}", base.scheme())));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(REMOTE_BUILD_PATH)
            .map_err(|e| RemoteError::InvalidUrl(e.to_string()))
    }

    async fn post(&self, base: &str, spec: &BuildSpec) -> Result<ResolvedSettings, RemoteError> {
        let endpoint = Self::endpoint(base)?;
        let form_value = encode_request(spec).map_err(|e| RemoteError::Encode(e.to_string()))?;
        let start = Instant::now();

        tracing::debug!("requesting remote build: url={}", endpoint);

        let response = self
            .http
            .post(endpoint)
            .header(header::ACCEPT, "application/json")
            .form(&[(REMOTE_FORM_FIELD, form_value)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!("remote build response status: {}", status);

        if !status.is_success() {
            return Err(RemoteError::HttpError { status: status.as_u16(), body });
        }

        let settings: ResolvedSettings = serde_json::from_str(&body).map_err(|e| RemoteError::Parse(e.to_string()))?;
        tracing::debug!(
            "remote build completed in {:?} (timeout {:?}), reused={}",
            start.elapsed(),
            self.config.timeout,
            settings.reused
        );
        Ok(settings)
    }
}

#[async_trait]
impl RemoteBuilder for HttpRemoteBuilder {
    async fn build(&self, url: &str, spec: &BuildSpec) -> Result<ResolvedSettings, warmdb_core::Error> {
        self.post(url, spec).await.map_err(|e| e.into_build_error(url))
    }
}
