//! Unit tests for API types serialization/deserialization.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use varve::api::{
    ExportResponse, HealthResponse, QueryRequest, StatusResponse, TransactRequest,
    TransactResponse,
};
use varve_core::query::{Query, Term};
use varve_core::transact::{EntityRef, TxOp};
use varve_core::Value;

// =============================================================================
// HEALTH RESPONSE TESTS
// =============================================================================

#[test]
fn test_health_response_default() {
    let health = HealthResponse::default();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}

#[test]
fn test_health_response_serialization() {
    let health = HealthResponse {
        status: "ok".to_string(),
        version: "0.4.2".to_string(),
    };

    let json = serde_json::to_string(&health).unwrap();
    assert!(json.contains("\"status\":\"ok\""));
    assert!(json.contains("\"version\":\"0.4.2\""));
}

// =============================================================================
// STATUS RESPONSE TESTS
// =============================================================================

#[test]
fn test_status_response_roundtrip() {
    let status = StatusResponse {
        fact_count: 100,
        attribute_count: 9,
        basis: 42,
        next_entity: 50,
        persistent: true,
    };

    let json = serde_json::to_string(&status).unwrap();
    let back: StatusResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(back.fact_count, 100);
    assert_eq!(back.basis, 42);
    assert!(back.persistent);
}

// =============================================================================
// VALUE WIRE FORMAT TESTS
// =============================================================================

#[test]
fn test_ref_and_int_have_distinct_tags() {
    let reference = serde_json::to_string(&Value::Ref(varve_core::EntityId(5))).unwrap();
    let literal = serde_json::to_string(&Value::Int(5)).unwrap();

    assert_eq!(reference, r#"{"ref":5}"#);
    assert_eq!(literal, r#"{"int":5}"#);
    assert_ne!(reference, literal);
}

#[test]
fn test_value_wire_tags() {
    assert_eq!(
        serde_json::to_string(&Value::Bool(true)).unwrap(),
        r#"{"bool":true}"#
    );
    assert_eq!(
        serde_json::to_string(&Value::string("x")).unwrap(),
        r#"{"str":"x"}"#
    );
    assert_eq!(
        serde_json::to_string(&Value::float(1.5)).unwrap(),
        r#"{"float":1.5}"#
    );
    assert_eq!(
        serde_json::to_string(&Value::Tuple(vec![Value::Int(1), Value::string("a")])).unwrap(),
        r#"{"tuple":[{"int":1},{"str":"a"}]}"#
    );
}

#[test]
fn test_value_wire_roundtrip() {
    let values = vec![
        Value::Bool(false),
        Value::Int(-3),
        Value::float(2.25),
        Value::string("hello"),
        Value::Ref(varve_core::EntityId(9)),
        Value::Tuple(vec![Value::Int(1), Value::Int(2)]),
    ];
    for value in values {
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }
}

// =============================================================================
// TRANSACT REQUEST TESTS
// =============================================================================

#[test]
fn test_transact_request_roundtrip() {
    let request = TransactRequest {
        ops: vec![
            TxOp::assert(EntityRef::tempid("p"), "person/name", Value::string("ada")),
            TxOp::assert_ref(
                EntityRef::tempid("p"),
                "person/friend",
                EntityRef::lookup("person/code", Value::Int(1)),
            ),
        ],
    };

    let json = serde_json::to_string(&request).unwrap();
    let back: TransactRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(request.ops, back.ops);
}

#[test]
fn test_transact_request_wire_shape() {
    let request = TransactRequest {
        ops: vec![TxOp::assert(
            EntityRef::tempid("p"),
            "person/name",
            Value::string("ada"),
        )],
    };
    let json = serde_json::to_string(&request).unwrap();

    assert!(json.contains(r#""temp_id":"p""#));
    assert!(json.contains(r#""a":"person/name""#));
    assert!(json.contains(r#""str":"ada""#));
}

#[test]
fn test_transact_request_validation() {
    let empty = TransactRequest { ops: vec![] };
    assert!(empty.validate().is_err());

    let ok = TransactRequest {
        ops: vec![TxOp::assert(
            EntityRef::tempid("p"),
            "person/name",
            Value::string("ada"),
        )],
    };
    assert!(ok.validate().is_ok());
}

#[test]
fn test_transact_response_error_shape() {
    let response = TransactResponse::error("boom");
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("boom"));
    assert!(response.tempids.is_empty());

    let json = serde_json::to_string(&response).unwrap();
    // Empty maps and lists stay off the wire.
    assert!(!json.contains("tempids"));
    assert!(!json.contains("facts"));
}

// =============================================================================
// QUERY REQUEST TESTS
// =============================================================================

#[test]
fn test_query_request_roundtrip() {
    let request = QueryRequest {
        query: Query::find_rel(&["e", "name"]).pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::var("name"),
        ),
        inputs: vec![],
    };

    let json = serde_json::to_string(&request).unwrap();
    let back: QueryRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(request.query, back.query);
}

#[test]
fn test_query_request_parses_raw_json() {
    let raw = r#"{
        "query": {
            "find": { "rel": [ { "var": "name" } ] },
            "clauses": [
                { "pattern": {
                    "e": { "var": "e" },
                    "a": { "ident": "person/name" },
                    "v": { "var": "name" }
                } }
            ]
        }
    }"#;
    let request: QueryRequest = serde_json::from_str(raw).unwrap();
    assert!(request.inputs.is_empty());
    assert_eq!(request.query.clauses.len(), 1);
    assert!(request.validate().is_ok());
}

// =============================================================================
// EXPORT RESPONSE TESTS
// =============================================================================

#[test]
fn test_export_response_encodes_base64() {
    let response = ExportResponse::success(vec![1, 2, 3], 99);
    assert!(response.success);
    assert_eq!(response.checksum, Some(99));

    let decoded = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        response.data.unwrap(),
    )
    .unwrap();
    assert_eq!(decoded, vec![1, 2, 3]);
}

#[test]
fn test_export_response_error() {
    let response = ExportResponse::error("disk full");
    assert!(!response.success);
    assert!(response.data.is_none());
    assert_eq!(response.error.as_deref(), Some("disk full"));
}
