//! Integration tests for the Varve HTTP API.
//!
//! Uses axum-test to test the API handlers without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
// Allow holding MutexGuard across await in auth tests - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum_test::TestServer;
use serde_json::json;
use std::sync::Mutex;
use varve::api::{
    create_router, AppState, ExportResponse, HealthResponse, QueryRequest, QueryResponse,
    StatusResponse, TransactRequest, TransactResponse,
};
use varve_core::query::{Query, Term};
use varve_core::schema::Cardinality;
use varve_core::transact::{AttributeDef, EntityRef, TxOp};
use varve_core::{Database, Value, ValueType};

/// Mutex to serialize auth tests since they modify env vars.
static AUTH_TEST_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Guard wrapper that holds the mutex and ensures cleanup on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("VARVE_API_KEY") };
    }
}

/// Create a test server with a fresh in-memory database.
/// Returns a guard that must be kept alive during the test.
fn create_test_server() -> (TestServer, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::remove_var("VARVE_API_KEY") };
    let db = Database::in_memory();
    let state = AppState::new(db);
    let router = create_router(state);
    (
        TestServer::new(router).unwrap(),
        TestGuard { _guard: guard },
    )
}

/// Create a test server with a person schema and one seeded entity.
/// Returns a guard that must be kept alive during the test.
fn create_populated_test_server() -> (TestServer, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::remove_var("VARVE_API_KEY") };

    let mut db = Database::in_memory();
    db.transact(vec![
        AttributeDef::new("person/name", ValueType::String, Cardinality::One).build(),
        AttributeDef::new("person/code", ValueType::Int, Cardinality::One)
            .unique_identity()
            .build(),
    ])
    .unwrap();
    db.transact(vec![
        TxOp::assert(EntityRef::tempid("ada"), "person/name", Value::string("ada")),
        TxOp::assert(EntityRef::tempid("ada"), "person/code", Value::Int(1)),
    ])
    .unwrap();

    let state = AppState::new(db);
    let router = create_router(state);
    (
        TestServer::new(router).unwrap(),
        TestGuard { _guard: guard },
    )
}

fn name_query() -> Query {
    Query::find_rel(&["name"]).pattern(
        Term::var("e"),
        Term::ident("person/name"),
        Term::var("name"),
    )
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

#[tokio::test]
async fn health_returns_ok() {
    let (server, _guard) = create_test_server();

    let response = server.get("/health").await;
    response.assert_status_ok();

    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}

#[tokio::test]
async fn status_reports_bootstrap_counts() {
    let (server, _guard) = create_test_server();

    let response = server.get("/status").await;
    response.assert_status_ok();

    let status: StatusResponse = response.json();
    assert_eq!(status.attribute_count, 7);
    assert!(status.fact_count > 0);
    assert!(!status.persistent);
}

// =============================================================================
// TRANSACT
// =============================================================================

#[tokio::test]
async fn transact_commits_and_reports_tempids() {
    let (server, _guard) = create_populated_test_server();

    let request = TransactRequest {
        ops: vec![
            TxOp::assert(EntityRef::tempid("p"), "person/name", Value::string("grace")),
            TxOp::assert(EntityRef::tempid("p"), "person/code", Value::Int(2)),
        ],
    };
    let response = server.post("/transact").json(&request).await;
    response.assert_status_ok();

    let body: TransactResponse = response.json();
    assert!(body.success);
    assert!(body.tx.is_some());
    assert!(body.tempids.contains_key("p"));
    assert_eq!(body.facts.len(), 3, "two data facts plus the tx instant");
}

#[tokio::test]
async fn transact_unknown_attribute_is_bad_request() {
    let (server, _guard) = create_populated_test_server();

    let request = TransactRequest {
        ops: vec![TxOp::assert(
            EntityRef::tempid("p"),
            "person/age",
            Value::Int(3),
        )],
    };
    let response = server.post("/transact").json(&request).await;
    response.assert_status_bad_request();

    let body: TransactResponse = response.json();
    assert!(!body.success);
    assert!(body.error.unwrap().contains("unknown identifier"));
}

#[tokio::test]
async fn transact_empty_ops_is_bad_request() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/transact")
        .json(&json!({ "ops": [] }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn compare_and_set_conflict_is_conflict_status() {
    let (server, _guard) = create_populated_test_server();

    let request = TransactRequest {
        ops: vec![TxOp::compare_and_set(
            EntityRef::lookup("person/code", Value::Int(1)),
            "person/name",
            Some(Value::string("wrong")),
            Value::string("new"),
        )],
    };
    let response = server.post("/transact").json(&request).await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn raw_json_transaction_with_tagged_values() {
    let (server, _guard) = create_populated_test_server();

    // The wire format distinguishes refs from ints by tag.
    let response = server
        .post("/transact")
        .json(&json!({
            "ops": [
                { "assert": {
                    "e": { "temp_id": "p" },
                    "a": "person/name",
                    "v": { "value": { "str": "edith" } }
                } },
                { "assert": {
                    "e": { "temp_id": "p" },
                    "a": "person/code",
                    "v": { "value": { "int": 3 } }
                } }
            ]
        }))
        .await;
    response.assert_status_ok();

    let body: TransactResponse = response.json();
    assert!(body.success);
    assert!(body.tempids.contains_key("p"));
}

// =============================================================================
// QUERY
// =============================================================================

#[tokio::test]
async fn query_roundtrip_finds_seeded_entity() {
    let (server, _guard) = create_populated_test_server();

    let request = QueryRequest {
        query: name_query(),
        inputs: vec![],
    };
    let response = server.post("/query").json(&request).await;
    response.assert_status_ok();

    let body: QueryResponse = response.json();
    assert!(body.success);
    let result = body.result.unwrap();
    assert_eq!(result.rows().len(), 1);
}

#[tokio::test]
async fn query_sees_previous_transactions() {
    let (server, _guard) = create_populated_test_server();

    let transact = TransactRequest {
        ops: vec![
            TxOp::assert(EntityRef::tempid("p"), "person/name", Value::string("grace")),
            TxOp::assert(EntityRef::tempid("p"), "person/code", Value::Int(2)),
        ],
    };
    server
        .post("/transact")
        .json(&transact)
        .await
        .assert_status_ok();

    let request = QueryRequest {
        query: name_query(),
        inputs: vec![],
    };
    let body: QueryResponse = server.post("/query").json(&request).await.json();
    assert_eq!(body.result.unwrap().rows().len(), 2);
}

#[tokio::test]
async fn malformed_query_is_bad_request() {
    let (server, _guard) = create_populated_test_server();

    // No where clauses: structural error, caught before evaluation.
    let request = QueryRequest {
        query: Query::find_scalar("e"),
        inputs: vec![],
    };
    let response = server.post("/query").json(&request).await;
    response.assert_status_bad_request();

    let body: QueryResponse = response.json();
    assert!(!body.success);
    assert!(body.error.unwrap().contains("malformed query"));
}

// =============================================================================
// EXPORT
// =============================================================================

#[tokio::test]
async fn export_returns_decodable_log() {
    let (server, _guard) = create_populated_test_server();

    let response = server.post("/export").await;
    response.assert_status_ok();

    let body: ExportResponse = response.json();
    assert!(body.success);
    let data = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        body.data.unwrap(),
    )
    .unwrap();
    let facts = varve_core::log_from_bytes(&data).unwrap();
    assert!(!facts.is_empty());
    assert_eq!(
        varve_core::formats::persistence::log_checksum(&facts),
        body.checksum.unwrap()
    );
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// Create a test server with API key authentication enabled.
///
/// The key must be in the environment BEFORE the router is built, since
/// `create_router` only attaches the auth layer when a key is configured.
fn create_auth_test_server(key: &str) -> (TestServer, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::set_var("VARVE_API_KEY", key) };
    let state = AppState::new(Database::in_memory());
    let router = create_router(state);
    (
        TestServer::new(router).unwrap(),
        TestGuard { _guard: guard },
    )
}

#[tokio::test]
async fn auth_rejects_missing_key() {
    let (server, _guard) = create_auth_test_server("secret");

    let response = server.get("/status").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_accepts_bearer_key() {
    let (server, _guard) = create_auth_test_server("secret");

    let response = server
        .get("/status")
        .add_header("Authorization", "Bearer secret")
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn auth_always_allows_health() {
    let (server, _guard) = create_auth_test_server("secret");

    let response = server.get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn auth_rejects_wrong_key() {
    let (server, _guard) = create_auth_test_server("secret");

    let response = server
        .get("/status")
        .add_header("Authorization", "Bearer wrong")
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}
