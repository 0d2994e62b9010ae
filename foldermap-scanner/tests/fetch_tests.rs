// End-to-end fetches against a mocked Resource Manager API

use foldermap_scanner::{
    FetchConfig, FetchError, Fetcher, ResourceManagerLister, RetryConfig, StaticToken,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param, query_param_is_missing},
};

async fn mount_root(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v2/folders/100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "folders/100",
            "displayName": "Company",
            "parent": "organizations/1"
        })))
        .mount(server)
        .await;
}

async fn mount_children(server: &MockServer, parent: &str, children: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v2/folders"))
        .and(query_param("parent", parent))
        .respond_with(ResponseTemplate::new(200).set_body_json(children))
        .mount(server)
        .await;
}

fn fetcher(server: &MockServer, config: FetchConfig) -> Fetcher<ResourceManagerLister> {
    let lister =
        ResourceManagerLister::with_base_url(Arc::new(StaticToken::new("token")), &server.uri())
            .unwrap();
    Fetcher::new(lister, config).with_retry(
        RetryConfig::new()
            .with_initial_backoff_ms(1)
            .with_jitter(false),
    )
}

#[tokio::test]
async fn test_fetch_paginated_hierarchy() {
    let mock_server = MockServer::start().await;
    mount_root(&mock_server).await;

    // First page of the root's children, then the second page
    Mock::given(method("GET"))
        .and(path("/v2/folders"))
        .and(query_param("parent", "folders/100"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folders": [
                {"name": "folders/200", "displayName": "Engineering", "parent": "folders/100"}
            ],
            "nextPageToken": "page-2"
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/folders"))
        .and(query_param("parent", "folders/100"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folders": [
                {"name": "folders/300", "displayName": "Finance", "parent": "folders/100"}
            ]
        })))
        .mount(&mock_server)
        .await;

    mount_children(
        &mock_server,
        "folders/200",
        json!({"folders": [
            {"name": "folders/210", "displayName": "Platform", "parent": "folders/200"}
        ]}),
    )
    .await;
    mount_children(&mock_server, "folders/300", json!({})).await;
    mount_children(&mock_server, "folders/210", json!({})).await;

    let tree = fetcher(&mock_server, FetchConfig::new(4))
        .fetch("100")
        .await
        .unwrap();

    assert_eq!(tree.id, "folders/100");
    assert_eq!(tree.display_name, "Company");
    assert_eq!(tree.parent_id, "");
    assert_eq!(tree.children.len(), 2);
    assert_eq!(tree.children[0].display_name, "Engineering");
    assert_eq!(tree.children[1].display_name, "Finance");
    assert_eq!(tree.children[0].children[0].id, "folders/210");
    assert_eq!(tree.node_count(), 4);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mock_server = MockServer::start().await;
    mount_root(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/v2/folders"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_children(
        &mock_server,
        "folders/100",
        json!({"folders": [
            {"name": "folders/200", "displayName": "Engineering", "parent": "folders/100"}
        ]}),
    )
    .await;

    let tree = fetcher(&mock_server, FetchConfig::new(1))
        .fetch("folders/100")
        .await
        .unwrap();

    assert_eq!(tree.children.len(), 1);
}

#[tokio::test]
async fn test_permission_denied_fails_without_retry() {
    let mock_server = MockServer::start().await;
    mount_root(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/v2/folders"))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = fetcher(&mock_server, FetchConfig::new(2))
        .fetch("folders/100")
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::StatusError { status: 403, .. }));
}

#[tokio::test]
async fn test_missing_root_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/folders/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let err = fetcher(&mock_server, FetchConfig::new(2))
        .fetch("folders/404")
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
}
