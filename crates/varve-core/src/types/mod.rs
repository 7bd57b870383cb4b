//! # Core Type Definitions
//!
//! This module contains all core types for the Varve immutable fact store:
//! - Entity and transaction identifiers (`EntityId`, `TxId`)
//! - Symbolic attribute names (`Ident`)
//! - The typed value model (`Value`, `ValueType`, `Float`)
//! - The atomic storage unit (`Fact`, `Op`)
//! - Error types (`VarveError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Order floats by the IEEE 754 total order so `Value` is totally ordered
//! - Use saturating arithmetic for counters to prevent overflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// ENTITY & TRANSACTION IDENTIFIERS
// =============================================================================

/// Unique identifier for an entity.
///
/// Entity ids are allocated monotonically by the transaction processor and
/// are never reused. Attribute definitions and transactions are themselves
/// entities and draw from the same id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Identifier of a committed transaction.
///
/// Transaction entities are allocated from the monotonic entity counter at
/// commit time, so `TxId` values are totally ordered by commit order: for
/// transactions `t1`, `t2`, `t1 < t2` iff `t1` committed first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TxId(pub u64);

impl TxId {
    /// The transaction entity behind this id.
    #[must_use]
    pub const fn entity(self) -> EntityId {
        EntityId(self.0)
    }
}

// =============================================================================
// IDENT
// =============================================================================

/// Symbolic name for an attribute or enum entity, e.g. `person/name`.
///
/// Idents are resolved to entity ids through the built-in `db/ident`
/// identity attribute. They are namespaced by convention: everything before
/// the final `/` is the namespace, the rest is the name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ident(pub String);

impl Ident {
    /// Create a new ident from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the ident as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into (namespace, name). The namespace is empty for bare names.
    #[must_use]
    pub fn split(&self) -> (&str, &str) {
        match self.0.rsplit_once('/') {
            Some((ns, name)) => (ns, name),
            None => ("", &self.0),
        }
    }

    /// Whether this ident uses the reverse-traversal notation: a name
    /// segment starting with `_`, e.g. `order/_items` navigates from a
    /// referenced entity back to the orders referencing it.
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.split().1.starts_with('_')
    }

    /// The forward counterpart of a reverse ident (`order/_items` ->
    /// `order/items`). Returns a clone for forward idents.
    #[must_use]
    pub fn forward(&self) -> Self {
        let (ns, name) = self.split();
        let stripped = name.strip_prefix('_').unwrap_or(name);
        if ns.is_empty() {
            Self(stripped.to_string())
        } else {
            Self(format!("{}/{}", ns, stripped))
        }
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// FLOAT (total order)
// =============================================================================

/// An `f64` wrapper ordered by the IEEE 754 total order.
///
/// This makes float values usable as keys in the sorted fact indexes.
/// Equality follows the total order exactly: `-0.0 != 0.0`, and NaN values
/// with different payloads are distinct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Float(pub f64);

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for Float {}

impl PartialOrd for Float {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Float {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for Float {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Consistent with total_cmp equality: equal iff identical bits.
        self.0.to_bits().hash(state);
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// Declared type of an attribute's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Instant,
    String,
    Ref,
    Tuple,
}

impl ValueType {
    /// The ident string used in schema facts, e.g. `"string"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Instant => "instant",
            Self::String => "string",
            Self::Ref => "ref",
            Self::Tuple => "tuple",
        }
    }

    /// Parse a schema fact value back into a `ValueType`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "instant" => Some(Self::Instant),
            "string" => Some(Self::String),
            "ref" => Some(Self::Ref),
            "tuple" => Some(Self::Tuple),
            _ => None,
        }
    }
}

/// Typed value payload of a fact.
///
/// The variant order defines the cross-type total order used by the sorted
/// indexes; `Value::least()` relies on `Bool(false)` being the minimum.
///
/// A `Ref` is distinct from an `Int` even when both hold the same number:
/// references participate in the reverse (VAET) index and in component
/// cascades, literal integers do not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(Float),
    Instant(DateTime<Utc>),
    Str(String),
    Ref(EntityId),
    Tuple(Vec<Value>),
}

impl Value {
    /// The least value in the total order, used as a range-scan sentinel.
    #[must_use]
    pub const fn least() -> Self {
        Self::Bool(false)
    }

    /// Runtime type of this value.
    #[must_use]
    pub fn type_of(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Instant(_) => ValueType::Instant,
            Self::Str(_) => ValueType::String,
            Self::Ref(_) => ValueType::Ref,
            Self::Tuple(_) => ValueType::Tuple,
        }
    }

    /// The referenced entity, if this is a `Ref`.
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Self::Ref(e) => Some(*e),
            _ => None,
        }
    }

    /// Convenience constructor for string values.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Convenience constructor for float values.
    #[must_use]
    pub const fn float(f: f64) -> Self {
        Self::Float(Float(f))
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl.0),
            Self::Instant(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Ref(e) => write!(f, "#{}", e.0),
            Self::Tuple(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

// =============================================================================
// FACT
// =============================================================================

/// Assertion flag of a fact.
///
/// `Retract` orders before `Assert` so it is the range-scan minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Retract,
    Assert,
}

/// A Fact is the atomic, immutable storage unit: an ordered 5-tuple.
///
/// Facts are never mutated or deleted. A retraction is itself a new fact
/// with `op = Retract` for the same `(entity, attribute, value)` triple;
/// the visible state at a point in time is the net effect of all facts
/// ordered by transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fact {
    /// The entity this fact is about.
    pub entity: EntityId,
    /// The attribute-definition entity.
    pub attribute: EntityId,
    /// The typed payload.
    pub value: Value,
    /// The transaction that introduced this fact.
    pub tx: TxId,
    /// Asserted or retracted.
    pub op: Op,
}

impl Fact {
    /// Create a new fact.
    #[must_use]
    pub const fn new(entity: EntityId, attribute: EntityId, value: Value, tx: TxId, op: Op) -> Self {
        Self {
            entity,
            attribute,
            value,
            tx,
            op,
        }
    }

    /// Create an assertion fact.
    #[must_use]
    pub const fn assertion(entity: EntityId, attribute: EntityId, value: Value, tx: TxId) -> Self {
        Self::new(entity, attribute, value, tx, Op::Assert)
    }

    /// Create a retraction fact.
    #[must_use]
    pub const fn retraction(entity: EntityId, attribute: EntityId, value: Value, tx: TxId) -> Self {
        Self::new(entity, attribute, value, tx, Op::Retract)
    }

    /// Whether this fact asserts.
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self.op, Op::Assert)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Varve system.
///
/// - No silent failures
/// - Use `Result<T, VarveError>` for fallible operations
/// - The CORE never panics; all errors are recoverable
/// - Every rejected transaction leaves the snapshot chain exactly as it was
#[derive(Debug, Clone, Error)]
pub enum VarveError {
    /// A value did not match its attribute's declared type, or a
    /// cardinality/uniqueness constraint was violated.
    #[error("schema violation on {attribute}: {detail}")]
    SchemaViolation {
        attribute: Ident,
        detail: String,
    },

    /// A lookup reference did not resolve to a live entity.
    #[error("unresolved lookup [{attribute} {value}]")]
    UnresolvedLookup {
        attribute: Ident,
        value: String,
    },

    /// A compare-and-set found a different current value than expected.
    #[error("compare-and-set mismatch on {attribute}: expected {expected}, found {actual}")]
    CompareAndSetMismatch {
        attribute: Ident,
        expected: String,
        actual: String,
    },

    /// A symbolic identifier could not be resolved via `db/ident`.
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// Query evaluation exceeded its wall-clock budget.
    #[error("query timed out after {elapsed_ms} ms")]
    QueryTimeout {
        elapsed_ms: u64,
    },

    /// Structural error in a query, detected before evaluation begins.
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// A transactor function aborted the transaction.
    #[error("transactor function {name} failed: {detail}")]
    FunctionFailed {
        name: String,
        detail: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_total_order() {
        let mut values = vec![
            Float(f64::NAN),
            Float(1.5),
            Float(f64::NEG_INFINITY),
            Float(-0.0),
            Float(0.0),
        ];
        values.sort();
        assert_eq!(values[0], Float(f64::NEG_INFINITY));
        assert_eq!(values[1], Float(-0.0));
        assert_eq!(values[2], Float(0.0));
        assert_eq!(values[3], Float(1.5));
        // NaN sorts last under the total order
        assert!(values[4].0.is_nan());
    }

    #[test]
    fn value_least_is_minimum() {
        let samples = [
            Value::Bool(true),
            Value::Int(i64::MIN),
            Value::float(f64::NEG_INFINITY),
            Value::string(""),
            Value::Ref(EntityId(0)),
            Value::Tuple(vec![]),
        ];
        for v in &samples {
            assert!(Value::least() <= *v, "least() must not exceed {:?}", v);
        }
    }

    #[test]
    fn ref_and_int_are_distinct() {
        assert_ne!(Value::Ref(EntityId(5)), Value::Int(5));
        assert_eq!(Value::Ref(EntityId(5)).type_of(), ValueType::Ref);
    }

    #[test]
    fn ident_reverse_notation() {
        let fwd = Ident::new("order/items");
        let rev = Ident::new("order/_items");
        assert!(!fwd.is_reverse());
        assert!(rev.is_reverse());
        assert_eq!(rev.forward(), fwd);
    }

    #[test]
    fn ident_split_without_namespace() {
        let bare = Ident::new("name");
        assert_eq!(bare.split(), ("", "name"));
    }

    #[test]
    fn value_type_roundtrip() {
        for vt in [
            ValueType::Bool,
            ValueType::Int,
            ValueType::Float,
            ValueType::Instant,
            ValueType::String,
            ValueType::Ref,
            ValueType::Tuple,
        ] {
            assert_eq!(ValueType::parse(vt.as_str()), Some(vt));
        }
        assert_eq!(ValueType::parse("keyword"), None);
    }

    #[test]
    fn op_retract_orders_first() {
        assert!(Op::Retract < Op::Assert);
    }
}
