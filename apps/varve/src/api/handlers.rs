//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Writes take the state's write lock, so concurrent submissions queue
//! and commit in a total order. Queries clone a snapshot under the read
//! lock and then evaluate without holding any lock, so a long-running
//! query never blocks writers.

use super::{
    types::{
        ExportResponse, HealthResponse, QueryRequest, QueryResponse, StatusResponse,
        TransactRequest, TransactResponse,
    },
    AppState,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use varve_core::formats::persistence::{log_checksum, log_to_bytes};
use varve_core::VarveError;

/// Map a core error to the HTTP status it should surface as.
fn status_for(error: &VarveError) -> StatusCode {
    match error {
        VarveError::SchemaViolation { .. }
        | VarveError::UnknownIdentifier(_)
        | VarveError::UnresolvedLookup { .. }
        | VarveError::MalformedQuery(_) => StatusCode::BAD_REQUEST,
        VarveError::CompareAndSetMismatch { .. } => StatusCode::CONFLICT,
        VarveError::QueryTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
        VarveError::FunctionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        VarveError::Serialization(_) | VarveError::Storage(_) | VarveError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Get database status.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db = state.db.read().await;

    let response = StatusResponse {
        fact_count: db.fact_count(),
        attribute_count: db.attribute_count(),
        basis: db.basis().0,
        next_entity: db.next_entity().0,
        persistent: db.is_persistent(),
    };

    (StatusCode::OK, Json(response))
}

// =============================================================================
// TRANSACT HANDLER
// =============================================================================

/// Submit a transaction.
pub async fn transact_handler(
    State(state): State<AppState>,
    Json(request): Json<TransactRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(TransactResponse::error(format!("Invalid request: {}", e))),
        );
    }

    // Write lock: submissions queue here and commit in a total order.
    let mut db = state.db.write().await;
    match db.transact(request.ops) {
        Ok(report) => {
            tracing::info!(
                tx = report.tx.map(|t| t.0),
                facts = report.facts.len(),
                "transaction committed"
            );
            (StatusCode::OK, Json(TransactResponse::success(&report)))
        }
        Err(e) => (
            status_for(&e),
            Json(TransactResponse::error(format!("Transaction failed: {}", e))),
        ),
    }
}

// =============================================================================
// QUERY HANDLER
// =============================================================================

/// Execute a query against the current snapshot.
pub async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(QueryResponse::error(format!("Invalid request: {}", e))),
        );
    }

    // Snapshot under the read lock, evaluate without it.
    let snapshot = {
        let db = state.db.read().await;
        db.current_snapshot()
    };

    match varve_core::execute(&snapshot, &request.query, &request.inputs) {
        Ok(result) => (
            StatusCode::OK,
            Json(QueryResponse::success(snapshot.basis().0, result)),
        ),
        Err(e) => (
            status_for(&e),
            Json(QueryResponse::error(format!("Query failed: {}", e))),
        ),
    }
}

// =============================================================================
// EXPORT HANDLER
// =============================================================================

/// Export the fact log in canonical format.
pub async fn export_handler(State(state): State<AppState>) -> impl IntoResponse {
    let log = {
        let db = state.db.read().await;
        db.export_log()
    };

    match log_to_bytes(&log) {
        Ok(data) => {
            let checksum = log_checksum(&log);
            (
                StatusCode::OK,
                Json(ExportResponse::success(data, checksum)),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ExportResponse::error(format!("Export failed: {}", e))),
        ),
    }
}
