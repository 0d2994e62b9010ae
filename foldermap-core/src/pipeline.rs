//! One complete run: fetch, flatten, save, then signal downstream.

use foldermap_scanner::{FetchError, Fetcher, FolderLister};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::{Config, ConfigError};
use crate::flatten::flatten;
use crate::sink::{RecordSink, SinkError};
use crate::trigger::{Acknowledgement, Notifier, TriggerError};

/// Summary of a successful run, for logs and the serve endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub records_fetched: usize,
    pub records_saved: usize,
    pub trigger_fired: bool,
}

/// A failed run, tagged with the stage that failed.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration stage failed")]
    Config(#[from] ConfigError),

    /// A collaborator could not be built; no request was sent.
    #[error("setup failed before any request was sent")]
    Setup(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("fetch stage failed")]
    Fetch(#[from] FetchError),

    #[error("sink stage failed")]
    Sink(#[from] SinkError),

    /// The records were committed before this failed; re-running appends them again.
    #[error("trigger stage failed after records were saved")]
    Trigger(#[from] TriggerError),

    #[error("run exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

impl RunError {
    pub fn setup(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RunError::Setup(Box::new(err))
    }

    pub fn stage(&self) -> &'static str {
        match self {
            RunError::Config(_) => "config",
            RunError::Setup(_) => "setup",
            RunError::Fetch(_) => "fetch",
            RunError::Sink(_) => "sink",
            RunError::Trigger(_) => "trigger",
            RunError::Timeout(_) => "timeout",
        }
    }
}

/// Execute one run under the config's deadline.
///
/// The sink only sees records once the whole tree has been fetched, and the
/// notifier is called at most once, only after the sink succeeded.
pub async fn execute_run<L, S, N>(
    config: &Config,
    lister: L,
    sink: &S,
    notifier: &N,
) -> Result<RunOutcome, RunError>
where
    L: FolderLister,
    S: RecordSink + ?Sized,
    N: Notifier + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("run", run_id = %run_id, root = %config.root);

    let stages = run_stages(config, lister, sink, notifier).instrument(span);
    match tokio::time::timeout(config.timeout, stages).await {
        Ok(result) => result,
        Err(_) => Err(RunError::Timeout(config.timeout)),
    }
}

async fn run_stages<L, S, N>(
    config: &Config,
    lister: L,
    sink: &S,
    notifier: &N,
) -> Result<RunOutcome, RunError>
where
    L: FolderLister,
    S: RecordSink + ?Sized,
    N: Notifier + ?Sized,
{
    let fetcher = Fetcher::new(lister, config.fetch_config()).with_retry(config.retry.clone());
    let tree = fetcher.fetch(&config.root).await?;

    let records = flatten(tree);
    let records_fetched = records.len();
    info!(records = records_fetched, "Flattened hierarchy");

    let records_saved = sink.save(records).await?;
    info!(
        records = records_saved,
        destination = %sink.destination(),
        "Saved records"
    );

    match notifier.fire(&config.trigger).await? {
        Acknowledgement::RunsStarted(runs) => {
            info!(runs = runs.len(), "Manual transfer run requested");
        }
        Acknowledgement::Published { message_id } => {
            info!(message_id = %message_id, "Completion message published");
        }
    }

    let outcome = RunOutcome {
        records_fetched,
        records_saved,
        trigger_fired: true,
    };
    info!(
        records_fetched = outcome.records_fetched,
        records_saved = outcome.records_saved,
        "Run complete"
    );
    Ok(outcome)
}
