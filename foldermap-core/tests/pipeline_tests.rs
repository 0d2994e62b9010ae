// Tests for the run pipeline, against in-memory collaborators

use async_trait::async_trait;
use foldermap_core::config::Config;
use foldermap_core::flatten::FlatRecord;
use foldermap_core::pipeline::{RunError, execute_run};
use foldermap_core::scanner::lister::{FolderLister, FolderPage, ListedFolder};
use foldermap_core::scanner::{FetchError, RetryConfig};
use foldermap_core::sink::{RecordSink, SinkError};
use foldermap_core::trigger::{Acknowledgement, Notifier, TriggerError, TriggerTarget};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Default)]
struct TreeLister {
    children: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
}

impl TreeLister {
    fn with(mut self, parent: &str, children: &[&str]) -> Self {
        self.children.insert(
            parent.to_string(),
            children.iter().map(|c| c.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl FolderLister for TreeLister {
    async fn describe(&self, id: &str) -> Result<ListedFolder, FetchError> {
        Ok(ListedFolder {
            name: id.to_string(),
            display_name: id.to_uppercase(),
            parent: String::new(),
        })
    }

    async fn list_page(
        &self,
        parent: &str,
        _page_token: Option<&str>,
    ) -> Result<FolderPage, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let folders = self
            .children
            .get(parent)
            .map(|ids| {
                ids.iter()
                    .map(|id| ListedFolder {
                        name: id.clone(),
                        display_name: id.to_uppercase(),
                        parent: parent.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(FolderPage {
            folders,
            next_page_token: None,
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<FlatRecord>>>,
    fail: bool,
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn save(&self, records: Vec<FlatRecord>) -> Result<usize, SinkError> {
        if self.fail {
            return Err(SinkError::RowErrors {
                failed: records.len(),
                total: records.len(),
                first: "schema mismatch".to_string(),
            });
        }
        let count = records.len();
        self.batches.lock().unwrap().push(records);
        Ok(count)
    }

    fn destination(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<TriggerTarget>>,
    fail: bool,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<TriggerTarget> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn fire(&self, target: &TriggerTarget) -> Result<Acknowledgement, TriggerError> {
        self.calls.lock().unwrap().push(target.clone());
        if self.fail {
            return Err(TriggerError::MissingMessageId(target.resource().to_string()));
        }
        Ok(match target {
            TriggerTarget::ManualRun { .. } => Acknowledgement::RunsStarted(vec!["run-1".into()]),
            TriggerTarget::Publish { .. } => Acknowledgement::Published {
                message_id: "msg-1".into(),
            },
        })
    }
}

fn config(pairs: &[(&str, &str)]) -> Config {
    let mut map: HashMap<String, String> = [
        ("ROOT", "r"),
        ("DATASET", "inventory"),
        ("PROJECT", "acme"),
        ("PARENT", "projects/acme/locations/us/transferConfigs/7"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|key| map.get(key).cloned())
        .unwrap()
        .with_retry(RetryConfig::new().with_initial_backoff_ms(1).with_jitter(false))
}

fn sample_lister() -> TreeLister {
    TreeLister::default()
        .with("r", &["a", "b"])
        .with("a", &["c"])
}

fn pairs(records: &[FlatRecord]) -> Vec<(&str, usize)> {
    records.iter().map(|r| (r.id.as_str(), r.depth)).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_depth_one_excludes_grandchild() {
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier::default();

    let outcome = execute_run(&config(&[("MAX_DEPTH", "1")]), sample_lister(), &sink, &notifier)
        .await
        .unwrap();

    let batches = sink.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(pairs(&batches[0]), vec![("r", 0), ("a", 1), ("b", 1)]);
    assert_eq!(outcome.records_fetched, 3);
    assert_eq!(outcome.records_saved, 3);
    assert!(outcome.trigger_fired);
}

#[tokio::test]
async fn test_depth_zero_saves_only_root() {
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier::default();

    execute_run(&config(&[("MAX_DEPTH", "0")]), sample_lister(), &sink, &notifier)
        .await
        .unwrap();

    let batches = sink.batches.lock().unwrap();
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].id, "r");
    assert_eq!(batches[0][0].parent_id, "");
    assert_eq!(batches[0][0].depth, 0);
}

#[tokio::test]
async fn test_manual_run_fired_exactly_once() {
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier::default();

    execute_run(&config(&[]), sample_lister(), &sink, &notifier)
        .await
        .unwrap();

    assert_eq!(
        notifier.calls(),
        vec![TriggerTarget::manual_run(
            "projects/acme/locations/us/transferConfigs/7"
        )]
    );
}

#[tokio::test]
async fn test_publish_fired_exactly_once_with_success_payload() {
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier::default();

    execute_run(
        &config(&[("PARENT", ""), ("TOPIC", "folders-loaded")]),
        sample_lister(),
        &sink,
        &notifier,
    )
    .await
    .unwrap();

    let calls = notifier.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        TriggerTarget::Publish { topic, payload } => {
            assert_eq!(topic, "projects/acme/topics/folders-loaded");
            assert_eq!(payload, b"success");
        }
        other => panic!("expected publish, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sink_failure_prevents_trigger() {
    let sink = RecordingSink {
        fail: true,
        ..Default::default()
    };
    let notifier = RecordingNotifier::default();

    let err = execute_run(&config(&[]), sample_lister(), &sink, &notifier)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Sink(SinkError::RowErrors { .. })));
    assert_eq!(err.stage(), "sink");
    assert!(notifier.calls().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_prevents_sink_and_trigger() {
    let lister = TreeLister::default().with("r", &["a"]).with("a", &["r"]);
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier::default();

    let err = execute_run(&config(&[]), lister, &sink, &notifier)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Fetch(FetchError::CycleDetected { .. })
    ));
    assert!(sink.batches.lock().unwrap().is_empty());
    assert!(notifier.calls().is_empty());
}

#[tokio::test]
async fn test_trigger_failure_reported_after_commit() {
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier {
        fail: true,
        ..Default::default()
    };

    let err = execute_run(&config(&[]), sample_lister(), &sink, &notifier)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), "trigger");
    // The sink committed exactly once and is not retried
    assert_eq!(sink.batches.lock().unwrap().len(), 1);
    assert_eq!(notifier.calls().len(), 1);
}

#[tokio::test]
async fn test_deadline_aborts_before_sink() {
    let lister = TreeLister {
        delay: Some(Duration::from_millis(200)),
        ..sample_lister()
    };
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier::default();
    let mut config = config(&[]);
    config.timeout = Duration::from_millis(20);

    let err = execute_run(&config, lister, &sink, &notifier)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Timeout(_)));
    assert!(sink.batches.lock().unwrap().is_empty());
    assert!(notifier.calls().is_empty());
}

#[tokio::test]
async fn test_runs_are_independent() {
    let sink = RecordingSink::default();
    let notifier = RecordingNotifier::default();
    let config = config(&[("MAX_DEPTH", "2")]);

    execute_run(&config, sample_lister(), &sink, &notifier)
        .await
        .unwrap();
    execute_run(&config, sample_lister(), &sink, &notifier)
        .await
        .unwrap();

    let batches = sink.batches.lock().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], batches[1]);
    assert_eq!(pairs(&batches[0]), vec![("r", 0), ("a", 1), ("c", 2), ("b", 1)]);
    assert_eq!(notifier.calls().len(), 2);
}
