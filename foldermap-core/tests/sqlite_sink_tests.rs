// Tests for the SQLite sink

use foldermap_core::data::SqliteSink;
use foldermap_core::flatten::FlatRecord;
use foldermap_core::sink::{RecordSink, SinkError};
use tempfile::TempDir;

fn create_test_sink() -> (TempDir, SqliteSink) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("folders.db");
    let sink = SqliteSink::new(&db_path, "folders").unwrap();
    (temp_dir, sink)
}

fn record(id: &str, parent: &str, depth: usize) -> FlatRecord {
    FlatRecord {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        parent_id: parent.to_string(),
        depth,
    }
}

// ============================================================================
// Save Tests
// ============================================================================

#[tokio::test]
async fn test_save_creates_file_and_table() {
    let (_temp_dir, sink) = create_test_sink();

    let written = sink
        .save(vec![record("r", "", 0), record("a", "r", 1)])
        .await
        .unwrap();

    assert_eq!(written, 2);
    assert!(sink.path().exists());
    assert_eq!(sink.row_count().unwrap(), 2);
}

#[tokio::test]
async fn test_save_preserves_order() {
    let (_temp_dir, sink) = create_test_sink();
    let records = vec![
        record("r", "", 0),
        record("b", "r", 1),
        record("a", "r", 1),
        record("c", "a", 2),
    ];

    sink.save(records.clone()).await.unwrap();

    assert_eq!(sink.latest_load().unwrap(), records);
}

#[tokio::test]
async fn test_saves_append() {
    let (_temp_dir, sink) = create_test_sink();

    sink.save(vec![record("r", "", 0)]).await.unwrap();
    sink.save(vec![record("r", "", 0)]).await.unwrap();

    // No dedup across runs
    assert_eq!(sink.row_count().unwrap(), 2);
}

#[tokio::test]
async fn test_latest_load_separates_saves_within_one_second() {
    let (_temp_dir, sink) = create_test_sink();

    sink.save(vec![record("first", "", 0)]).await.unwrap();
    sink.save(vec![record("second", "", 0)]).await.unwrap();

    assert_eq!(sink.latest_load().unwrap(), vec![record("second", "", 0)]);
    assert_eq!(sink.row_count().unwrap(), 2);
}

#[tokio::test]
async fn test_empty_save() {
    let (_temp_dir, sink) = create_test_sink();
    assert_eq!(sink.save(Vec::new()).await.unwrap(), 0);
    assert_eq!(sink.row_count().unwrap(), 0);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_invalid_table_name_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let result = SqliteSink::new(temp_dir.path().join("x.db"), "folders; DROP TABLE x");
    assert!(matches!(result, Err(SinkError::InvalidTable(_))));
}

#[tokio::test]
async fn test_unwritable_path_fails() {
    let temp_dir = TempDir::new().unwrap();
    let sink = SqliteSink::new(temp_dir.path().join("missing/dir/x.db"), "folders").unwrap();

    let result = sink.save(vec![record("r", "", 0)]).await;
    assert!(matches!(result, Err(SinkError::DatabaseError(_))));
}

#[tokio::test]
async fn test_destination_names_file_and_table() {
    let (_temp_dir, sink) = create_test_sink();
    assert!(sink.destination().ends_with("folders.db#folders"));
}
