//! # Database Handle
//!
//! The client-owned entry point: an explicit handle with an open/close
//! lifecycle, never a process-wide registry.
//!
//! ## Storage Backends
//!
//! - `InMemory`: volatile store, fast, lost on drop unless exported.
//! - `Persistent`: redb-backed durable log; every committed batch is
//!   appended in one write transaction and the log is replayed on open.
//!
//! ## Concurrency Discipline
//!
//! `transact` takes `&mut self`, so all mutation funnels through a single
//! writer; the app layer wraps the handle in `Arc<RwLock<_>>` and commits
//! queue on the write lock in a total order. Snapshots are handed out in
//! O(1) and stay frozen: the store state lives behind a copy-on-write
//! `Arc`, so a commit never disturbs a snapshot someone is reading.

use crate::functions::{FunctionRegistry, TxFunction};
use crate::query::{execute, InputValue, Query, QueryResult};
use crate::snapshot::{Snapshot, Store};
use crate::storage::{LogCounters, RedbLog};
use crate::transact::{process, TxOp, TxReport};
use crate::types::{EntityId, Fact, TxId, Value, VarveError};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// BACKEND
// =============================================================================

/// Storage backend for a database handle.
#[derive(Debug)]
enum Backend {
    /// Volatile in-memory store.
    InMemory,
    /// Disk-backed durable log using redb.
    Persistent(RedbLog),
}

// =============================================================================
// DATABASE
// =============================================================================

/// An immutable fact database.
///
/// Not `Clone`: the handle is the single writer. Share snapshots instead,
/// they are cheap and frozen.
#[derive(Debug)]
pub struct Database {
    store: Arc<Store>,
    backend: Backend,
    functions: FunctionRegistry,
}

impl Database {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Create a fresh in-memory database with the bootstrap schema
    /// installed.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(Store::bootstrap(Utc::now())),
            backend: Backend::InMemory,
            functions: FunctionRegistry::new(),
        }
    }

    /// Open or create a durable database at the given path.
    ///
    /// A fresh file is seeded with the bootstrap transaction; an existing
    /// log is replayed to rebuild the indexes and schema cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VarveError> {
        let log = RedbLog::open(path)?;
        match log.counters()? {
            None => {
                let store = Store::bootstrap(Utc::now());
                log.append(
                    store.indexes.log(),
                    LogCounters {
                        next_entity: store.next_entity,
                        basis: store.basis,
                        fact_count: store.indexes.fact_count() as u64,
                    },
                )?;
                Ok(Self {
                    store: Arc::new(store),
                    backend: Backend::Persistent(log),
                    functions: FunctionRegistry::new(),
                })
            }
            Some(counters) => {
                let facts = log.replay()?;
                let store = rebuild(facts, counters.next_entity, counters.basis);
                Ok(Self {
                    store: Arc::new(store),
                    backend: Backend::Persistent(log),
                    functions: FunctionRegistry::new(),
                })
            }
        }
    }

    /// Reconstruct an in-memory database from an exported fact log.
    ///
    /// Counters are derived from the log itself: the next entity id is
    /// one past the largest id mentioned anywhere, the basis is the last
    /// transaction.
    pub fn from_log(facts: Vec<Fact>) -> Result<Self, VarveError> {
        if facts.is_empty() {
            return Ok(Self::in_memory());
        }
        let mut max_id: u64 = 0;
        let mut basis = TxId(0);
        for fact in &facts {
            max_id = max_id.max(fact.entity.0).max(fact.attribute.0).max(fact.tx.0);
            if let Value::Ref(r) = &fact.value {
                max_id = max_id.max(r.0);
            }
            basis = basis.max(fact.tx);
        }
        Ok(Self {
            store: Arc::new(rebuild(facts, max_id.saturating_add(1), basis)),
            backend: Backend::InMemory,
            functions: FunctionRegistry::new(),
        })
    }

    /// Close the handle, dropping the backend explicitly.
    pub fn close(self) {
        drop(self);
    }

    /// Whether this database persists to disk.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Persistent(_))
    }

    /// Register a transactor function under an invocation name.
    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        function: impl TxFunction + 'static,
    ) {
        self.functions.register(name, function);
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// The latest committed snapshot.
    #[must_use]
    pub fn current_snapshot(&self) -> Snapshot {
        Snapshot::new(Arc::clone(&self.store), self.store.basis)
    }

    /// A snapshot of the database as of an earlier transaction.
    ///
    /// Reads the same frozen state with a tighter visibility basis, so
    /// point-in-time queries need no extra storage.
    #[must_use]
    pub fn snapshot_at(&self, basis: TxId) -> Snapshot {
        Snapshot::new(Arc::clone(&self.store), basis.min(self.store.basis))
    }

    /// The latest committed transaction.
    #[must_use]
    pub fn basis(&self) -> TxId {
        self.store.basis
    }

    /// Total number of committed facts.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.store.indexes.fact_count()
    }

    /// Number of installed attribute definitions (including built-ins).
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.store.schema.len()
    }

    /// Next entity id that would be allocated.
    #[must_use]
    pub fn next_entity(&self) -> EntityId {
        EntityId(self.store.next_entity)
    }

    /// The full fact log in commit order, for export.
    #[must_use]
    pub fn export_log(&self) -> Vec<Fact> {
        self.store.indexes.log().to_vec()
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Process and commit a transaction, stamping it with the current
    /// wall clock.
    pub fn transact(&mut self, ops: Vec<TxOp>) -> Result<TxReport, VarveError> {
        self.transact_at(ops, Utc::now())
    }

    /// Process and commit a transaction with an explicit instant.
    ///
    /// This is the deterministic entry point: identical operation
    /// sequences with identical instants produce identical fact logs.
    pub fn transact_at(
        &mut self,
        ops: Vec<TxOp>,
        instant: DateTime<Utc>,
    ) -> Result<TxReport, VarveError> {
        let basis = self.current_snapshot();
        let processed = process(
            &basis,
            &self.functions,
            ops,
            self.store.next_entity,
            instant,
        )?;

        let Some(tx) = processed.tx else {
            // Everything elided: the snapshot chain is untouched.
            return Ok(TxReport {
                snapshot: basis.clone(),
                basis,
                tx: None,
                facts: Vec::new(),
                tempids: processed.tempids,
            });
        };

        // Durable append first: if the backend fails, in-memory state is
        // left exactly as it was.
        if let Backend::Persistent(log) = &self.backend {
            log.append(
                &processed.facts,
                LogCounters {
                    next_entity: processed.next_entity,
                    basis: tx,
                    fact_count: (self.store.indexes.fact_count() + processed.facts.len()) as u64,
                },
            )?;
        }

        let store = Arc::make_mut(&mut self.store);
        for fact in &processed.facts {
            store.indexes.insert(fact.clone());
        }
        store.schema.apply_facts(&processed.facts, tx);
        store.next_entity = processed.next_entity;
        store.basis = tx;

        Ok(TxReport {
            basis,
            snapshot: self.current_snapshot(),
            tx: Some(tx),
            facts: processed.facts,
            tempids: processed.tempids,
        })
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Evaluate a query against the current snapshot.
    ///
    /// Callers that must observe their own writes should query the
    /// snapshot returned in their `TxReport` instead.
    pub fn query(
        &self,
        query: &Query,
        inputs: &[InputValue],
    ) -> Result<QueryResult, VarveError> {
        execute(&self.current_snapshot(), query, inputs)
    }
}

/// Rebuild store state from a replayed log.
fn rebuild(facts: Vec<Fact>, next_entity: u64, basis: TxId) -> Store {
    let mut store = Store {
        indexes: crate::index::Indexes::new(),
        schema: crate::schema::SchemaCache::bootstrap(),
        next_entity,
        basis,
    };
    // Facts of one transaction are contiguous in commit order; fold them
    // into the schema cache batch by batch.
    let mut batch: Vec<Fact> = Vec::new();
    let mut batch_tx: Option<TxId> = None;
    for fact in facts {
        if batch_tx != Some(fact.tx) {
            if let Some(tx) = batch_tx {
                store.schema.apply_facts(&batch, tx);
            }
            batch.clear();
            batch_tx = Some(fact.tx);
        }
        batch.push(fact.clone());
        store.indexes.insert(fact);
    }
    if let Some(tx) = batch_tx {
        store.schema.apply_facts(&batch, tx);
    }
    store
}

// =============================================================================
// TESTS
// =============================================================================
