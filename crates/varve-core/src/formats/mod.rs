//! # Interchange Formats
//!
//! Pure serialization of the fact log; file I/O lives in the app layer.

pub mod persistence;

pub use persistence::{log_checksum, log_from_bytes, log_to_bytes, verify_log_bytes, PersistenceHeader};
