//! Streaming adapter behaviour against a mocked HTTP backend

#![cfg(feature = "streaming")]

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use canvas_sync::{
    AdapterError, AdapterRegistry, Connection, FailureKind, GraphAdapter, GraphStore, Properties, QueryMode,
    StreamingAdapter, StreamingConfig, SyncOutcome,
};

const QUERY_PATH: &str = "/api/graph/canvas/query";

/// Helper function to start a mock server and create an adapter pointing to it
async fn setup_test_adapter() -> (MockServer, StreamingAdapter) {
    let mock_server = MockServer::start().await;
    let adapter = StreamingAdapter::new(StreamingConfig {
        service_url: mock_server.uri(),
        username: "tester".into(),
        password: "secret".into(),
        graph: "canvas".into(),
        timeout_secs: 5,
    })
    .expect("client builds");
    (mock_server, adapter)
}

async fn mount_login(mock_server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
        .mount(mock_server)
        .await;
}

fn result_stream(rows: Value) -> ResponseTemplate {
    let body = format!("event: result\ndata: {}\n\n", json!({ "data": rows }));
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn error_stream(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(format!("event: err\ndata: {}\n\n", message))
}

fn node(internal: i64, app_id: &str) -> Value {
    json!({ "id": internal, "labels": ["Person"], "properties": { "id": app_id, "name": app_id } })
}

#[tokio::test]
async fn test_failed_migration_is_reported_and_not_restored() {
    let (mock_server, adapter) = setup_test_adapter().await;
    mount_login(&mock_server, "t1").await;

    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_string_contains("RETURN a, r, b"))
        .respond_with(result_stream(json!([
            {
                "a": node(1, "a"),
                "r": { "id": 10, "relationshipType": "KNOWS", "sourceId": 1, "destinationId": 2,
                       "properties": { "id": "r1", "since": 2020 } },
                "b": node(2, "b")
            },
            { "a": node(3, "c") }
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_string_contains("RETURN type(r) AS type"))
        .respond_with(result_stream(json!([
            { "type": "KNOWS", "props": { "id": "r1", "since": 2020 }, "source": "a", "target": "b" }
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_string_contains("DELETE r"))
        .respond_with(result_stream(json!([{ "touched": 1 }])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_string_contains("CREATE (a)-[r:KNOWS"))
        .respond_with(error_stream("Neo.DatabaseError.General.UnknownError: storage failure"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = GraphStore::new(Arc::new(AdapterRegistry::new()));
    store.connect_with(Arc::new(adapter)).await.unwrap();
    store
        .run_query("MATCH (a)-[r]->(b) RETURN a, r, b", QueryMode::Replace)
        .await
        .unwrap();
    assert_eq!(store.snapshot().nodes.len(), 3);

    let outcome = store
        .reconnect_edge("r1", Connection::new("a", "c"))
        .unwrap()
        .settled()
        .await;
    let SyncOutcome::RolledBack(notice) = outcome else {
        panic!("a half-applied migration must not be reported as success");
    };
    assert_eq!(notice.kind, FailureKind::PartialFailure);
    assert!(notice.message.contains("not recreated"));

    let edge = store.edge("r1").unwrap();
    assert_eq!((edge.source.as_str(), edge.target.as_str()), ("a", "c"));
    assert!(edge.is_draft());
    assert!(edge.data.sync_error.is_some());
}

#[tokio::test]
async fn test_expired_token_triggers_single_relogin() {
    let (mock_server, adapter) = setup_test_adapter().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "stale" })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "fresh" })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(result_stream(json!([{ "x": 1 }])))
        .expect(2)
        .mount(&mock_server)
        .await;

    adapter.initialize().await.unwrap();
    let rows = adapter.execute_query("RETURN 1 AS x", Properties::new()).await.unwrap();
    assert_eq!(rows[0]["x"], json!(1));
    // The fresh token is kept for later calls.
    adapter.execute_query("RETURN 1 AS x", Properties::new()).await.unwrap();
}

#[tokio::test]
async fn test_second_unauthorized_is_authentication_error() {
    let (mock_server, adapter) = setup_test_adapter().await;
    mount_login(&mock_server, "t1").await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&mock_server)
        .await;

    adapter.initialize().await.unwrap();
    let result = adapter.execute_query("RETURN 1", Properties::new()).await;
    assert!(matches!(result, Err(AdapterError::Authentication(_))));
}

#[tokio::test]
async fn test_invalid_labels_never_reach_the_server() {
    let (mock_server, adapter) = setup_test_adapter().await;
    mount_login(&mock_server, "t1").await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(result_stream(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    adapter.initialize().await.unwrap();
    for result in [
        adapter.add_node_label("n1", "Person`) DETACH DELETE n //").await,
        adapter.remove_node_label("n1", "has space").await,
        adapter.update_relationship_label("r1", "KNOWS-WELL").await,
    ] {
        assert!(matches!(result, Err(AdapterError::InvalidInput(_))));
    }
    let created = adapter
        .create_relationship("a", "b", "", Properties::new())
        .await;
    assert!(matches!(created, Err(AdapterError::InvalidInput(_))));
}

#[tokio::test]
async fn test_constraint_errors_are_classified() {
    let (mock_server, adapter) = setup_test_adapter().await;
    mount_login(&mock_server, "t1").await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(error_stream(
            "Neo.ClientError.Schema.ConstraintValidationFailed: Node(1) already exists with label `Person`",
        ))
        .mount(&mock_server)
        .await;

    adapter.initialize().await.unwrap();
    let result = adapter.rename_node("n1", "Alice").await;
    assert!(matches!(result, Err(AdapterError::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_dashboards_are_listed_in_position_order() {
    let (mock_server, adapter) = setup_test_adapter().await;
    mount_login(&mock_server, "t1").await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_string_contains("MATCH (d:_CanvasDashboard)"))
        .respond_with(result_stream(json!([
            { "id": "d1", "name": "Overview", "position": 0, "updatedAt": "2024-05-01T10:00:00Z" },
            { "id": "d2", "name": "Team", "position": 1, "updatedAt": null }
        ])))
        .mount(&mock_server)
        .await;

    adapter.initialize().await.unwrap();
    let dashboards = adapter.list_dashboards().await.unwrap();
    let names: Vec<_> = dashboards.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Overview", "Team"]);
    assert_eq!(dashboards[1].position, 1);
    assert!(dashboards[0].updated_at.is_some());
}
