use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use foldermap_core::config::keys;
use foldermap_core::sink::BIGQUERY_URL;
use foldermap_core::trigger::{DATA_TRANSFER_URL, PUBSUB_URL};
use foldermap_core::{
    BigQuerySink, Config, ConfigError, GoogleNotifier, RecordSink, RunError, RunOutcome,
    SinkError, SinkTarget, SqliteSink, execute_run, fetch_settings, flatten,
    generate_tree_report,
};
use foldermap_scanner::lister::RESOURCE_MANAGER_URL;
use foldermap_scanner::{
    FetchConfig, Fetcher, MetadataServerToken, ProgressCallback, ResourceManagerLister,
    StaticToken, TokenSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::server::{self, AppState};

/// Base URLs of the remote APIs. Overridable so runs can target emulators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub resource_manager: String,
    pub bigquery: String,
    pub data_transfer: String,
    pub pubsub: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            resource_manager: RESOURCE_MANAGER_URL.to_string(),
            bigquery: BIGQUERY_URL.to_string(),
            data_transfer: DATA_TRANSFER_URL.to_string(),
            pubsub: PUBSUB_URL.to_string(),
        }
    }
}

impl Endpoints {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let defaults = Self::default();
        Self {
            resource_manager: string_arg(matches, "resource-manager-url")
                .unwrap_or(defaults.resource_manager),
            bigquery: string_arg(matches, "bigquery-url").unwrap_or(defaults.bigquery),
            data_transfer: string_arg(matches, "data-transfer-url")
                .unwrap_or(defaults.data_transfer),
            pubsub: string_arg(matches, "pubsub-url").unwrap_or(defaults.pubsub),
        }
    }
}

// Subcommands define different subsets of arguments.
fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

/// Resolve a setting by its environment name. Parsed arguments already fall
/// back to the environment, so this is the only source consulted.
fn lookup_setting(matches: &ArgMatches, key: &str) -> Option<String> {
    match key {
        keys::VERBOSE => matches
            .try_get_one::<bool>("verbose")
            .ok()
            .flatten()
            .map(|verbose| verbose.to_string()),
        keys::SINK => string_arg(matches, "sqlite")
            .map(|path| format!("sqlite:{}", path))
            .or_else(|| string_arg(matches, "sink")),
        _ => string_arg(matches, &key.to_ascii_lowercase().replace('_', "-")),
    }
}

pub fn config_from_matches(matches: &ArgMatches) -> Result<Config, ConfigError> {
    Config::from_lookup(|key| lookup_setting(matches, key))
}

pub fn fetch_settings_from_matches(
    matches: &ArgMatches,
) -> Result<(String, FetchConfig), ConfigError> {
    fetch_settings(&|key: &str| lookup_setting(matches, key))
}

/// A static token when one was given, otherwise the metadata server.
pub fn token_source(matches: &ArgMatches) -> Result<Arc<dyn TokenSource>> {
    match string_arg(matches, "access-token") {
        Some(token) => Ok(Arc::new(StaticToken::new(token))),
        None => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("Failed to build metadata server client")?;
            Ok(Arc::new(MetadataServerToken::new(client)))
        }
    }
}

pub fn build_sink(
    config: &Config,
    tokens: Arc<dyn TokenSource>,
    endpoints: &Endpoints,
) -> Result<Box<dyn RecordSink>, SinkError> {
    match &config.sink {
        SinkTarget::BigQuery => Ok(Box::new(BigQuerySink::with_base_url(
            tokens,
            &endpoints.bigquery,
            &config.project,
            &config.dataset,
            &config.table,
        )?)),
        SinkTarget::Sqlite(path) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            Ok(Box::new(SqliteSink::new(expanded, &config.table)?))
        }
    }
}

/// Wire the remote collaborators for `config` and execute one run. Failing to
/// build any of them is a setup error, reported before anything is fetched.
pub async fn run_once(
    config: &Config,
    tokens: Arc<dyn TokenSource>,
    endpoints: &Endpoints,
) -> Result<RunOutcome, RunError> {
    let lister = ResourceManagerLister::with_base_url(tokens.clone(), &endpoints.resource_manager)
        .map_err(RunError::setup)?;
    let sink = build_sink(config, tokens.clone(), endpoints).map_err(RunError::setup)?;
    let notifier = GoogleNotifier::with_base_urls(tokens, &endpoints.data_transfer, &endpoints.pubsub)
        .map_err(RunError::setup)?
        .with_retry(config.retry.clone());

    execute_run(config, lister, sink.as_ref(), &notifier).await
}

/// Render an error and all of its sources on one line.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub async fn handle_run(sub_matches: &ArgMatches, quiet: bool) -> Result<()> {
    if let Some(payload) = string_arg(sub_matches, "payload") {
        debug!(bytes = payload.len(), "Ignoring invocation payload");
    }

    let config = config_from_matches(sub_matches).map_err(RunError::from)?;
    config.log_summary();

    let tokens = token_source(sub_matches)?;
    let endpoints = Endpoints::from_matches(sub_matches);
    let outcome = run_once(&config, tokens, &endpoints).await?;

    if !quiet {
        print_divider();
        println!(
            "{} Saved {} of {} folders under {}",
            "✓".bright_green().bold(),
            outcome.records_saved,
            outcome.records_fetched,
            config.root.bright_white()
        );
        println!(
            "{} Fired {} on {}",
            "→".bright_cyan(),
            config.trigger.kind(),
            config.trigger.resource()
        );
        print_divider();
    }
    Ok(())
}

pub async fn handle_tree(sub_matches: &ArgMatches, quiet: bool) -> Result<()> {
    let as_json = sub_matches.get_flag("json");
    let (root, fetch_config) = fetch_settings_from_matches(sub_matches)?;

    let tokens = token_source(sub_matches)?;
    let endpoints = Endpoints::from_matches(sub_matches);
    let lister = ResourceManagerLister::with_base_url(tokens, &endpoints.resource_manager)?;

    let spinner = if quiet || as_json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Walking {}", root));

    let bar = spinner.clone();
    let progress: ProgressCallback = Arc::new(move |depth: usize, id: &str| {
        bar.set_message(format!("depth {}: {}", depth, id));
    });

    let fetcher = Fetcher::new(lister, fetch_config).with_progress_callback(progress);
    let fetched = fetcher.fetch(&root).await;
    spinner.finish_and_clear();

    let records = flatten(fetched.map_err(RunError::from)?);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", generate_tree_report(&records));
    }
    Ok(())
}

pub async fn handle_serve(sub_matches: &ArgMatches) -> Result<()> {
    let config = config_from_matches(sub_matches).map_err(RunError::from)?;
    config.log_summary();

    let port = sub_matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let state = AppState::new(
        config,
        token_source(sub_matches)?,
        Endpoints::from_matches(sub_matches),
    );
    server::serve(state, port).await
}
