//! Persisting flattened records.

use async_trait::async_trait;
use foldermap_scanner::{AuthError, TokenSource};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::flatten::FlatRecord;

pub const BIGQUERY_URL: &str = "https://bigquery.googleapis.com/";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{table} returned status {status}: {body}")]
    StatusError {
        table: String,
        status: u16,
        body: String,
    },

    #[error("{failed} of {total} rows were rejected; first error: {first}")]
    RowErrors {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Invalid table name {0:?}")]
    InvalidTable(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    AuthError(#[from] AuthError),
}

/// Destination for one run's records. A save is a single batch: it either
/// commits every record or reports an error.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn save(&self, records: Vec<FlatRecord>) -> Result<usize, SinkError>;

    /// Human readable destination, for logs.
    fn destination(&self) -> String;
}

#[async_trait]
impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    async fn save(&self, records: Vec<FlatRecord>) -> Result<usize, SinkError> {
        (**self).save(records).await
    }

    fn destination(&self) -> String {
        (**self).destination()
    }
}

/// Table names shared by both stores: letters, digits and underscores.
pub fn validate_table_name(table: &str) -> Result<(), SinkError> {
    let valid = !table.is_empty()
        && table.len() <= 1024
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidTable(table.to_string()))
    }
}

#[derive(Serialize)]
struct InsertRow<'a> {
    json: &'a FlatRecord,
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    kind: &'static str,
    rows: Vec<InsertRow<'a>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertError>,
}

#[derive(Deserialize)]
struct InsertError {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Appends records to a BigQuery table with one streaming insert.
pub struct BigQuerySink {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    project: String,
    dataset: String,
    table: String,
}

impl BigQuerySink {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Self, SinkError> {
        Self::with_base_url(tokens, BIGQUERY_URL, project, dataset, table)
    }

    pub fn with_base_url(
        tokens: Arc<dyn TokenSource>,
        base_url: &str,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<Self, SinkError> {
        validate_table_name(table)?;
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| SinkError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        let client = Client::builder()
            .user_agent(concat!("foldermap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url,
            tokens,
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }

    fn insert_url(&self) -> Result<Url, SinkError> {
        let path = format!(
            "bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.project, self.dataset, self.table
        );
        self.base_url
            .join(&path)
            .map_err(|e| SinkError::InvalidUrl(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl RecordSink for BigQuerySink {
    async fn save(&self, records: Vec<FlatRecord>) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let total = records.len();
        let request = InsertAllRequest {
            kind: "bigquery#tableDataInsertAllRequest",
            rows: records.iter().map(|record| InsertRow { json: record }).collect(),
        };

        let url = self.insert_url()?;
        let token = self.tokens.token().await?;
        debug!(rows = total, url = %url, "Streaming rows");

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::StatusError {
                table: self.destination(),
                status: status.as_u16(),
                body,
            });
        }

        let result: InsertAllResponse = response
            .json()
            .await
            .map_err(|e| SinkError::DecodeError(e.to_string()))?;

        if let Some(first) = result.insert_errors.first() {
            let detail = first
                .errors
                .first()
                .map(|e| format!("row {}: {} ({})", first.index, e.message, e.reason))
                .unwrap_or_else(|| format!("row {}", first.index));
            return Err(SinkError::RowErrors {
                failed: result.insert_errors.len(),
                total,
                first: detail,
            });
        }

        info!(rows = total, table = %self.destination(), "Inserted rows");
        Ok(total)
    }

    fn destination(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }
}
