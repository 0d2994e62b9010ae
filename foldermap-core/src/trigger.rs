//! The post-commit signal to whatever processes the table next.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{SecondsFormat, Utc};
use foldermap_scanner::{AuthError, RetryConfig, Retryable, TokenSource, with_retry};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const DATA_TRANSFER_URL: &str = "https://bigquerydatatransfer.googleapis.com/";
pub const PUBSUB_URL: &str = "https://pubsub.googleapis.com/";

/// Body of the message published after a successful load.
pub const SUCCESS_PAYLOAD: &[u8] = b"success";

/// Which downstream signal a deployment fires. Exactly one is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerTarget {
    /// Start a manual run of a scheduled transfer config,
    /// e.g. `projects/p/locations/us/transferConfigs/123`.
    ManualRun { parent: String },
    /// Publish `payload` to a topic, e.g. `projects/p/topics/folders-loaded`.
    Publish { topic: String, payload: Vec<u8> },
}

impl TriggerTarget {
    pub fn manual_run(parent: impl Into<String>) -> Self {
        TriggerTarget::ManualRun {
            parent: parent.into(),
        }
    }

    pub fn publish(topic: impl Into<String>) -> Self {
        TriggerTarget::Publish {
            topic: topic.into(),
            payload: SUCCESS_PAYLOAD.to_vec(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriggerTarget::ManualRun { .. } => "manual_run",
            TriggerTarget::Publish { .. } => "publish",
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            TriggerTarget::ManualRun { parent } => parent,
            TriggerTarget::Publish { topic, .. } => topic,
        }
    }
}

/// What the remote service confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    RunsStarted(Vec<String>),
    Published { message_id: String },
}

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{target} returned status {status}: {body}")]
    StatusError {
        target: String,
        status: u16,
        body: String,
    },

    #[error("Publish to {0} returned no message id")]
    MissingMessageId(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    AuthError(#[from] AuthError),
}

impl Retryable for TriggerError {
    fn is_retryable(&self) -> bool {
        match self {
            TriggerError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TriggerError::StatusError { status, .. } => *status == 429 || *status >= 500,
            TriggerError::AuthError(e) => e.is_retryable(),
            TriggerError::MissingMessageId(_)
            | TriggerError::DecodeError(_)
            | TriggerError::InvalidUrl(_) => false,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire the signal once and wait for the service to acknowledge it.
    async fn fire(&self, target: &TriggerTarget) -> Result<Acknowledgement, TriggerError>;
}

#[derive(Deserialize)]
struct StartRunsResponse {
    #[serde(default)]
    runs: Vec<TransferRun>,
}

#[derive(Deserialize)]
struct TransferRun {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// [`Notifier`] backed by the Data Transfer and Pub/Sub REST APIs.
pub struct GoogleNotifier {
    client: Client,
    transfer_url: Url,
    pubsub_url: Url,
    tokens: Arc<dyn TokenSource>,
    retry: RetryConfig,
}

impl GoogleNotifier {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self, TriggerError> {
        Self::with_base_urls(tokens, DATA_TRANSFER_URL, PUBSUB_URL)
    }

    pub fn with_base_urls(
        tokens: Arc<dyn TokenSource>,
        transfer_url: &str,
        pubsub_url: &str,
    ) -> Result<Self, TriggerError> {
        let client = Client::builder()
            .user_agent(concat!("foldermap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            transfer_url: parse_base(transfer_url)?,
            pubsub_url: parse_base(pubsub_url)?,
            tokens,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post(
        &self,
        base: &Url,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Response, TriggerError> {
        let url = base
            .join(path)
            .map_err(|e| TriggerError::InvalidUrl(format!("{}: {}", path, e)))?;
        let token = self.tokens.token().await?;
        debug!(url = %url, "Posting trigger request");
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TriggerError::StatusError {
            target: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn start_manual_runs(&self, parent: &str) -> Result<Acknowledgement, TriggerError> {
        let requested = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let body = json!({ "requestedRunTime": requested });
        let path = format!("v1/{}:startManualRuns", parent);

        let response = self.post(&self.transfer_url, &path, &body).await?;
        let started: StartRunsResponse = response
            .json()
            .await
            .map_err(|e| TriggerError::DecodeError(e.to_string()))?;

        let runs: Vec<String> = started.runs.into_iter().map(|r| r.name).collect();
        info!(parent = parent, requested_run_time = %requested, runs = ?runs, "Started manual transfer runs");
        Ok(Acknowledgement::RunsStarted(runs))
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<Acknowledgement, TriggerError> {
        let body = json!({ "messages": [{ "data": STANDARD.encode(payload) }] });
        let path = format!("v1/{}:publish", topic);

        let response = self.post(&self.pubsub_url, &path, &body).await?;
        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| TriggerError::DecodeError(e.to_string()))?;

        let message_id = published
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| TriggerError::MissingMessageId(topic.to_string()))?;
        info!(topic = topic, message_id = %message_id, "Published completion message");
        Ok(Acknowledgement::Published { message_id })
    }
}

#[async_trait]
impl Notifier for GoogleNotifier {
    async fn fire(&self, target: &TriggerTarget) -> Result<Acknowledgement, TriggerError> {
        with_retry(&self.retry, target.kind(), move || async move {
            match target {
                TriggerTarget::ManualRun { parent } => self.start_manual_runs(parent).await,
                TriggerTarget::Publish { topic, payload } => self.publish(topic, payload).await,
            }
        })
        .await
    }
}

fn parse_base(base_url: &str) -> Result<Url, TriggerError> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    Url::parse(&normalized).map_err(|e| TriggerError::InvalidUrl(format!("{}: {}", base_url, e)))
}
