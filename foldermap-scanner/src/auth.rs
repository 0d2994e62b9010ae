//! Bearer tokens for the Google APIs.
//!
//! Acquiring credentials is not this crate's job; these sources cover the two
//! cases a deployment needs: a token handed in from outside, or the metadata
//! server of the instance the binary runs on.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the metadata server says the token expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Token endpoint returned status {0}")]
    StatusError(u16),

    #[error("No access token available")]
    Missing,
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::HttpError(e) => e.is_timeout() || e.is_connect(),
            AuthError::StatusError(status) => *status >= 500,
            AuthError::Missing => false,
        }
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

/// A token supplied up front, e.g. from `ACCESS_TOKEN`.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::Missing);
        }
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Fetches the default service account's token from the instance metadata
/// server and caches it until shortly before expiry.
pub struct MetadataServerToken {
    client: Client,
    endpoint: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl MetadataServerToken {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, METADATA_TOKEN_URL)
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenSource for MetadataServerToken {
    async fn token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, valid_until)) = cached.as_ref()
            && Instant::now() < *valid_until
        {
            return Ok(token.clone());
        }

        debug!("Requesting access token from metadata server");
        let response = self
            .client
            .get(&self.endpoint)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::StatusError(status.as_u16()));
        }

        let body: MetadataToken = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some((body.access_token.clone(), Instant::now() + lifetime));
        Ok(body.access_token)
    }
}
