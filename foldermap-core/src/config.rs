//! Run configuration, read once at the start of a run and never mutated.

use foldermap_scanner::{FetchConfig, RetryConfig, lister::resource_name};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::sink::validate_table_name;
use crate::trigger::TriggerTarget;

pub const DEFAULT_MAX_DEPTH: usize = 4;
pub const DEFAULT_TABLE: &str = "folders";
pub const DEFAULT_FAN_OUT: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 540;

/// Setting names, as environment variables.
pub mod keys {
    pub const ROOT: &str = "ROOT";
    pub const MAX_DEPTH: &str = "MAX_DEPTH";
    pub const DATASET: &str = "DATASET";
    pub const TABLE: &str = "TABLE";
    pub const PROJECT: &str = "PROJECT";
    pub const PARENT: &str = "PARENT";
    pub const TOPIC: &str = "TOPIC";
    pub const SINK: &str = "SINK";
    pub const FAN_OUT: &str = "FAN_OUT";
    pub const TIMEOUT_SECS: &str = "TIMEOUT_SECS";
    pub const VERBOSE: &str = "VERBOSE";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable required")]
    Missing(&'static str),

    #[error("Invalid {key} {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Exactly one of PARENT or TOPIC must be set")]
    TriggerConflict,
}

/// Where flattened records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    BigQuery,
    /// A local SQLite file, for dry runs and offline inspection.
    Sqlite(PathBuf),
}

impl SinkTarget {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        if value.eq_ignore_ascii_case("bigquery") {
            return Ok(SinkTarget::BigQuery);
        }
        match value.strip_prefix("sqlite:") {
            Some(path) if !path.is_empty() => Ok(SinkTarget::Sqlite(PathBuf::from(path))),
            _ => Err(ConfigError::Invalid {
                key: keys::SINK,
                value: value.to_string(),
                reason: "expected `bigquery` or `sqlite:<path>`".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Resource name of the root, e.g. `folders/123` or `organizations/1`.
    pub root: String,
    pub max_depth: usize,
    pub dataset: String,
    pub table: String,
    pub project: String,
    pub trigger: TriggerTarget,
    pub sink: SinkTarget,
    pub fan_out: usize,
    /// Deadline for one whole run.
    pub timeout: Duration,
    pub verbose: bool,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = non_empty(&lookup);
        let (root, fetch) = fetch_settings(&lookup)?;
        let dataset = get(keys::DATASET).ok_or(ConfigError::Missing(keys::DATASET))?;
        let project = get(keys::PROJECT).ok_or(ConfigError::Missing(keys::PROJECT))?;
        let table = get(keys::TABLE).unwrap_or_else(|| DEFAULT_TABLE.to_string());
        if validate_table_name(&table).is_err() {
            return Err(ConfigError::Invalid {
                key: keys::TABLE,
                value: table,
                reason: "only letters, digits and underscores are allowed".to_string(),
            });
        }

        let trigger = match (get(keys::PARENT), get(keys::TOPIC)) {
            (Some(parent), None) => TriggerTarget::manual_run(parent),
            (None, Some(topic)) => TriggerTarget::publish(qualify_topic(&project, &topic)),
            _ => return Err(ConfigError::TriggerConflict),
        };

        let sink = match get(keys::SINK) {
            Some(value) => SinkTarget::parse(&value)?,
            None => SinkTarget::BigQuery,
        };

        let timeout_secs: u64 =
            parse_or(get(keys::TIMEOUT_SECS), keys::TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: keys::TIMEOUT_SECS,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            root,
            max_depth: fetch.max_depth,
            dataset,
            table,
            project,
            trigger,
            sink,
            fan_out: fetch.fan_out,
            timeout: Duration::from_secs(timeout_secs),
            verbose: fetch.verbose,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::new(self.max_depth)
            .with_verbose(self.verbose)
            .with_fan_out(self.fan_out)
    }

    /// Log every effective setting once.
    pub fn log_summary(&self) {
        for line in self.summary() {
            info!("{}", line);
        }
    }

    /// One `KEY is value` line per effective setting.
    pub fn summary(&self) -> Vec<String> {
        let trigger = match &self.trigger {
            TriggerTarget::ManualRun { parent } => format!("PARENT is {}", parent),
            TriggerTarget::Publish { topic, .. } => format!("TOPIC is {}", topic),
        };
        let sink = match &self.sink {
            SinkTarget::BigQuery => "SINK is bigquery".to_string(),
            SinkTarget::Sqlite(path) => format!("SINK is sqlite:{}", path.display()),
        };
        vec![
            format!("ROOT is {}", self.root),
            format!("MAX_DEPTH is {}", self.max_depth),
            format!("DATASET is {}", self.dataset),
            format!("PROJECT is {}", self.project),
            format!("TABLE is {}", self.table),
            trigger,
            sink,
            format!("FAN_OUT is {}", self.fan_out),
            format!("TIMEOUT_SECS is {}", self.timeout.as_secs()),
            format!("VERBOSE is {}", self.verbose),
        ]
    }
}

/// The subset of settings a fetch needs: the normalized root and its
/// [`FetchConfig`]. Used on its own when nothing is saved.
pub fn fetch_settings<F>(lookup: &F) -> Result<(String, FetchConfig), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = non_empty(lookup);
    let root = resource_name(&get(keys::ROOT).ok_or(ConfigError::Missing(keys::ROOT))?);
    let max_depth = parse_or(get(keys::MAX_DEPTH), keys::MAX_DEPTH, DEFAULT_MAX_DEPTH)?;

    let fan_out: usize = parse_or(get(keys::FAN_OUT), keys::FAN_OUT, DEFAULT_FAN_OUT)?;
    if fan_out == 0 {
        return Err(ConfigError::Invalid {
            key: keys::FAN_OUT,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let verbose = match get(keys::VERBOSE) {
        Some(value) => parse_bool(&value)?,
        None => false,
    };

    let fetch = FetchConfig::new(max_depth)
        .with_fan_out(fan_out)
        .with_verbose(verbose);
    Ok((root, fetch))
}

fn non_empty<F>(lookup: &F) -> impl Fn(&str) -> Option<String> + '_
where
    F: Fn(&str) -> Option<String>,
{
    move |key| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Accept either a full topic name or a short one within `project`.
pub fn qualify_topic(project: &str, topic: &str) -> String {
    if topic.starts_with("projects/") {
        topic.to_string()
    } else {
        format!("projects/{}/topics/{}", project, topic)
    }
}

fn parse_or<T>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: keys::VERBOSE,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
