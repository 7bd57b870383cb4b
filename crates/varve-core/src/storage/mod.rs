//! # Storage Backends
//!
//! Durable persistence for the fact log. The in-memory index layer is
//! always authoritative for reads; the backend is a crash-safe record of
//! the committed log, replayed on open.

mod redb_log;

pub use redb_log::{LogCounters, RedbLog};
