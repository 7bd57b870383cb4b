//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.
//!
//! The typed value model crosses the wire with explicit tags — `{"ref": 5}`
//! is an entity reference, `{"int": 5}` a literal integer — so references
//! are never confused with scalars of the same representation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use varve_core::primitives::{MAX_QUERY_CLAUSES, MAX_TX_OPERATIONS};
use varve_core::query::{InputValue, Query, QueryResult};
use varve_core::transact::{TxOp, TxReport};
use varve_core::{Fact, Snapshot, Value, VarveError};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Database status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub fact_count: usize,
    pub attribute_count: usize,
    pub basis: u64,
    pub next_entity: u64,
    pub persistent: bool,
}

// =============================================================================
// TRANSACT REQUEST/RESPONSE
// =============================================================================

/// Transaction request: an ordered list of operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactRequest {
    pub ops: Vec<TxOp>,
}

impl TransactRequest {
    /// Boundary validation before the operations reach the core
    /// processor. This rejects oversized payloads at the API edge.
    pub fn validate(&self) -> Result<(), VarveError> {
        if self.ops.is_empty() {
            return Err(VarveError::Storage(
                "transaction has no operations".to_string(),
            ));
        }
        if self.ops.len() > MAX_TX_OPERATIONS {
            return Err(VarveError::Storage(format!(
                "operation count {} exceeds maximum {}",
                self.ops.len(),
                MAX_TX_OPERATIONS
            )));
        }
        Ok(())
    }
}

/// One committed fact, with the attribute rendered as its ident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactJson {
    pub entity: u64,
    pub attribute: String,
    pub value: Value,
    pub tx: u64,
    pub asserted: bool,
}

impl FactJson {
    fn from_fact(fact: &Fact, snapshot: &Snapshot) -> Self {
        let attribute = snapshot
            .attribute_by_id(fact.attribute)
            .map(|s| s.ident.as_str().to_string())
            .unwrap_or_else(|| fact.attribute.0.to_string());
        Self {
            entity: fact.entity.0,
            attribute,
            value: fact.value.clone(),
            tx: fact.tx.0,
            asserted: fact.is_assertion(),
        }
    }
}

/// Transaction response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactResponse {
    pub success: bool,
    /// Allocated transaction id; absent when everything elided.
    pub tx: Option<u64>,
    /// Basis of the snapshot after the submission.
    pub basis: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tempids: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facts: Vec<FactJson>,
    pub error: Option<String>,
}

impl TransactResponse {
    pub fn success(report: &TxReport) -> Self {
        Self {
            success: true,
            tx: report.tx.map(|t| t.0),
            basis: Some(report.snapshot.basis().0),
            tempids: report
                .tempids
                .iter()
                .map(|(name, id)| (name.clone(), id.0))
                .collect(),
            facts: report
                .facts
                .iter()
                .map(|f| FactJson::from_fact(f, &report.snapshot))
                .collect(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            tx: None,
            basis: None,
            tempids: BTreeMap::new(),
            facts: Vec::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// QUERY REQUEST/RESPONSE
// =============================================================================

/// Query request: the typed query AST plus its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: Query,
    #[serde(default)]
    pub inputs: Vec<InputValue>,
}

impl QueryRequest {
    /// Boundary validation; structural validation happens in the core.
    pub fn validate(&self) -> Result<(), VarveError> {
        if self.query.clauses.len() > MAX_QUERY_CLAUSES {
            return Err(VarveError::MalformedQuery(format!(
                "clause count {} exceeds maximum {}",
                self.query.clauses.len(),
                MAX_QUERY_CLAUSES
            )));
        }
        Ok(())
    }
}

/// Query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    /// Basis the query ran against.
    pub basis: Option<u64>,
    pub result: Option<QueryResult>,
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn success(basis: u64, result: QueryResult) -> Self {
        Self {
            success: true,
            basis: Some(basis),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            basis: None,
            result: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// EXPORT RESPONSE
// =============================================================================

/// Export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub data: Option<String>, // Base64 encoded
    pub checksum: Option<u64>,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(data: Vec<u8>, checksum: u64) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                &data,
            )),
            checksum: Some(checksum),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            checksum: None,
            error: Some(msg.into()),
        }
    }
}
