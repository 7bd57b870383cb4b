//! # redb-backed Fact Log
//!
//! A durable append-only fact log on the redb embedded database.
//!
//! Using redb instead of a custom WAL provides:
//! - ACID transactions (one write transaction per committed batch)
//! - Crash safety (copy-on-write B-trees)
//! - Zero configuration
//!
//! The log stores one postcard-encoded fact per sequence number plus a
//! small metadata table of counters. Opening a database replays the log
//! to rebuild the in-memory indexes and schema cache; the backend itself
//! never serves point reads.

use crate::types::{Fact, TxId, VarveError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for facts: sequence number -> postcard-encoded Fact.
const FACTS: TableDefinition<u64, &[u8]> = TableDefinition::new("facts");

/// Table for metadata: key string -> value u64.
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const META_NEXT_ENTITY: &str = "next_entity";
const META_BASIS: &str = "basis";
const META_FACT_COUNT: &str = "fact_count";

fn storage_err(e: impl std::fmt::Display) -> VarveError {
    VarveError::Storage(e.to_string())
}

/// Counters recorded alongside the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCounters {
    pub next_entity: u64,
    pub basis: TxId,
    pub fact_count: u64,
}

/// A durable fact log handle.
pub struct RedbLog {
    db: Database,
}

impl std::fmt::Debug for RedbLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbLog").finish_non_exhaustive()
    }
}

impl RedbLog {
    /// Open or create a log database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VarveError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist.
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(FACTS).map_err(storage_err)?;
            let _ = write_txn.open_table(METADATA).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        Ok(Self { db })
    }

    /// Read the counters, `None` for a freshly created log.
    pub fn counters(&self) -> Result<Option<LogCounters>, VarveError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(METADATA).map_err(storage_err)?;

        let get = |key: &str| -> Result<Option<u64>, VarveError> {
            Ok(table.get(key).map_err(storage_err)?.map(|v| v.value()))
        };

        let (Some(next_entity), Some(basis), Some(fact_count)) = (
            get(META_NEXT_ENTITY)?,
            get(META_BASIS)?,
            get(META_FACT_COUNT)?,
        ) else {
            return Ok(None);
        };

        Ok(Some(LogCounters {
            next_entity,
            basis: TxId(basis),
            fact_count,
        }))
    }

    /// Replay the full log in commit order.
    pub fn replay(&self) -> Result<Vec<Fact>, VarveError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(FACTS).map_err(storage_err)?;

        let mut facts = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, bytes) = entry.map_err(storage_err)?;
            let fact: Fact = postcard::from_bytes(bytes.value())
                .map_err(|e| VarveError::Serialization(e.to_string()))?;
            facts.push(fact);
        }
        Ok(facts)
    }

    /// Append one committed batch and its counters in a single write
    /// transaction. Either everything lands or nothing does; on failure
    /// the in-memory state must not be advanced.
    pub fn append(&self, facts: &[Fact], counters: LogCounters) -> Result<(), VarveError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut fact_table = write_txn.open_table(FACTS).map_err(storage_err)?;
            let start = counters.fact_count - facts.len() as u64;
            for (offset, fact) in facts.iter().enumerate() {
                let bytes = postcard::to_stdvec(fact)
                    .map_err(|e| VarveError::Serialization(e.to_string()))?;
                fact_table
                    .insert(start + offset as u64, bytes.as_slice())
                    .map_err(storage_err)?;
            }

            let mut meta_table = write_txn.open_table(METADATA).map_err(storage_err)?;
            meta_table
                .insert(META_NEXT_ENTITY, counters.next_entity)
                .map_err(storage_err)?;
            meta_table
                .insert(META_BASIS, counters.basis.0)
                .map_err(storage_err)?;
            meta_table
                .insert(META_FACT_COUNT, counters.fact_count)
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
