//! # Innate Primitives
//!
//! Hardcoded runtime constants for the Varve CORE.
//!
//! A fresh database starts with zero facts but fixed logic. These
//! primitives are compiled into the binary and are immutable at runtime.

/// Magic bytes for the Varve binary interchange format.
///
/// - File Header = Magic Bytes ("VARV") + Version (u8) + flags (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"VARV";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum recursion depth for pull (nested-entity projection) patterns.
///
/// All reads must be computationally bounded. This caps wildcard and
/// component expansion through deeply nested (or cyclic) reference chains.
pub const MAX_PULL_DEPTH: usize = 16;

/// Maximum expansion rounds for transactor functions within one transaction.
///
/// A transactor function may return operations that invoke further
/// functions; expansion beyond this depth aborts the transaction.
pub const MAX_FUNCTION_EXPANSION: usize = 8;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for attribute ident strings.
///
/// Idents longer than this are rejected during transaction validation.
/// This prevents memory exhaustion from malicious or malformed input.
pub const MAX_IDENT_LENGTH: usize = 256;

/// Maximum length for string values.
///
/// Values longer than this (64KB) are rejected during transaction
/// validation. This prevents memory exhaustion from malicious input.
pub const MAX_STRING_VALUE_LENGTH: usize = 65536;

/// Maximum arity for tuple values.
pub const MAX_TUPLE_ARITY: usize = 8;

/// Maximum number of operations in a single transaction request
/// (measured after entity-map and function expansion).
///
/// Larger batches are rejected to prevent DoS.
pub const MAX_TX_OPERATIONS: usize = 10000;

/// Maximum number of clauses in a single query.
///
/// Limits the computational cost of the backtracking search.
pub const MAX_QUERY_CLAUSES: usize = 64;

/// Maximum allowed payload size for the interchange format.
///
/// This limit is validated BEFORE attempting deserialization to prevent
/// allocation-based DoS attacks. 500 MB is a reasonable upper bound for a
/// fact log.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 500 * 1024 * 1024; // 500 MB
