//! # varve-core
//!
//! The immutable fact database engine for Varve - THE LOGIC.
//!
//! A varve is an annual layer of lake sediment: deposits accumulate in
//! strictly ordered, never-rewritten layers. So does this store. Facts
//! are 5-tuples `(entity, attribute, value, tx, op)` that are only ever
//! appended; a retraction is itself a new fact, and every transaction
//! lays down the next layer and yields a frozen snapshot.
//!
//! ## Components
//!
//! - Fact store & index layer: four sorted orderings (EAVT/AEVT/AVET/VAET)
//!   over the full history, with copy-on-write snapshot sharing
//! - Unification engine: backtracking evaluation of typed find/in/where
//!   queries, with aggregates and pull projection
//! - Transaction processor: entity maps, tempids, lookup refs, upserts,
//!   compare-and-set, transactor functions, atomic commit
//! - Schema: attribute definitions installed by ordinary transactions
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Deterministic: `BTreeMap`/`BTreeSet` only, no `HashMap`, no randomness
//! - The CORE never panics; all errors are recoverable `VarveError`s

// =============================================================================
// MODULES
// =============================================================================

pub mod database;
pub mod formats;
pub mod functions;
pub mod index;
pub mod primitives;
pub mod pull;
pub mod query;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod transact;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{EntityId, Fact, Float, Ident, Op, TxId, Value, ValueType, VarveError};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use database::Database;
pub use functions::{FunctionRegistry, TxFunction};
pub use pull::{pull, PullAttr, PullPattern, PullSpec, PullValue};
pub use query::{
    execute, AggregateFn, CallFn, Clause, FindElement, FindSpec, InputSpec, InputValue, Pattern,
    Query, QueryResult, ResultItem, Term, Var,
};
pub use schema::{builtin, AttributeSchema, Cardinality, SchemaCache, Uniqueness};
pub use snapshot::Snapshot;
pub use storage::RedbLog;
pub use transact::{AttributeDef, EntityMap, EntityRef, TxOp, TxReport, TxValue};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{log_from_bytes, log_to_bytes, verify_log_bytes, PersistenceHeader};
