//! # Schema Module
//!
//! Attribute definitions and the schema cache.
//!
//! Schema is data: an attribute definition is an entity carrying facts
//! under the built-in `db/*` attributes, installed by an ordinary
//! transaction. There is no separate DDL channel.
//!
//! Definitions are install-only. Retracting facts under the built-in
//! schema attributes is rejected by the transaction processor, so the
//! cache only ever grows and each definition records the transaction that
//! installed it; point-in-time snapshots filter on that transaction.
//!
//! An attribute must be installed in a transaction strictly before the
//! first transaction that uses it.

use crate::types::{EntityId, Fact, Ident, TxId, Value, ValueType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CARDINALITY & UNIQUENESS
// =============================================================================

/// How many live values an entity/attribute pair may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one live value; a new assertion implicitly retracts the old.
    One,
    /// A growing set of live values.
    Many,
}

impl Cardinality {
    /// The ident string used in schema facts.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "one",
            Self::Many => "many",
        }
    }

    /// Parse a schema fact value back into a `Cardinality`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one" => Some(Self::One),
            "many" => Some(Self::Many),
            _ => None,
        }
    }
}

/// Uniqueness constraint on an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uniqueness {
    /// No two entities may hold the same live value.
    Value,
    /// Like `Value`, and additionally usable as an upsert key and in
    /// lookup references.
    Identity,
}

impl Uniqueness {
    /// The ident string used in schema facts.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Identity => "identity",
        }
    }

    /// Parse a schema fact value back into a `Uniqueness`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "value" => Some(Self::Value),
            "identity" => Some(Self::Identity),
            _ => None,
        }
    }
}

// =============================================================================
// ATTRIBUTE SCHEMA
// =============================================================================

/// Fully installed definition of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// The attribute-definition entity.
    pub id: EntityId,
    /// Symbolic name, unique across the database.
    pub ident: Ident,
    /// Declared type of all values under this attribute.
    pub value_type: ValueType,
    /// One live value, or a growing set.
    pub cardinality: Cardinality,
    /// Optional uniqueness constraint.
    pub unique: Option<Uniqueness>,
    /// Component references own their target entity: recursive pull
    /// expands them, and entity retraction cascades through them.
    pub component: bool,
    /// Optional docstring.
    pub doc: Option<String>,
    /// Transaction in which the definition became complete.
    pub installed_tx: TxId,
}

impl AttributeSchema {
    /// Whether this attribute may serve as an upsert key / lookup target.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.unique == Some(Uniqueness::Identity)
    }
}

// =============================================================================
// BUILT-IN ATTRIBUTES
// =============================================================================

/// Built-in attribute entity ids and the bootstrap transaction.
///
/// These ids are fixed constants so that schema facts can be interpreted
/// without consulting the schema they define.
pub mod builtin {
    use super::{
        AttributeSchema, Cardinality, DateTime, EntityId, Fact, Ident, TxId, Uniqueness, Utc,
        Value, ValueType,
    };

    /// `db/ident` — unique-identity symbolic name of an entity.
    pub const DB_IDENT: EntityId = EntityId(1);
    /// `db/value-type` — declared value type of an attribute.
    pub const DB_VALUE_TYPE: EntityId = EntityId(2);
    /// `db/cardinality` — `one` or `many`.
    pub const DB_CARDINALITY: EntityId = EntityId(3);
    /// `db/unique` — `value` or `identity`.
    pub const DB_UNIQUE: EntityId = EntityId(4);
    /// `db/component` — ownership flag on ref attributes.
    pub const DB_COMPONENT: EntityId = EntityId(5);
    /// `db/doc` — docstring.
    pub const DB_DOC: EntityId = EntityId(6);
    /// `db/tx-instant` — wall-clock instant stamped on transaction entities.
    pub const DB_TX_INSTANT: EntityId = EntityId(7);

    /// The transaction entity that installs the built-ins.
    pub const BOOTSTRAP_TX: TxId = TxId(8);

    /// First id handed out to user entities.
    pub const FIRST_USER_ENTITY: u64 = 9;

    /// All built-in attribute ids.
    pub const ALL: [EntityId; 7] = [
        DB_IDENT,
        DB_VALUE_TYPE,
        DB_CARDINALITY,
        DB_UNIQUE,
        DB_COMPONENT,
        DB_DOC,
        DB_TX_INSTANT,
    ];

    /// Whether `attribute` is one of the built-in schema attributes.
    #[must_use]
    pub fn is_schema_attribute(attribute: EntityId) -> bool {
        ALL.contains(&attribute)
    }

    fn def(
        id: EntityId,
        ident: &str,
        value_type: ValueType,
        cardinality: Cardinality,
        unique: Option<Uniqueness>,
    ) -> AttributeSchema {
        AttributeSchema {
            id,
            ident: Ident::new(ident),
            value_type,
            cardinality,
            unique,
            component: false,
            doc: None,
            installed_tx: BOOTSTRAP_TX,
        }
    }

    /// Definitions of the built-in attributes.
    #[must_use]
    pub fn definitions() -> Vec<AttributeSchema> {
        vec![
            def(
                DB_IDENT,
                "db/ident",
                ValueType::String,
                Cardinality::One,
                Some(Uniqueness::Identity),
            ),
            def(
                DB_VALUE_TYPE,
                "db/value-type",
                ValueType::String,
                Cardinality::One,
                None,
            ),
            def(
                DB_CARDINALITY,
                "db/cardinality",
                ValueType::String,
                Cardinality::One,
                None,
            ),
            def(
                DB_UNIQUE,
                "db/unique",
                ValueType::String,
                Cardinality::One,
                None,
            ),
            def(
                DB_COMPONENT,
                "db/component",
                ValueType::Bool,
                Cardinality::One,
                None,
            ),
            def(DB_DOC, "db/doc", ValueType::String, Cardinality::One, None),
            def(
                DB_TX_INSTANT,
                "db/tx-instant",
                ValueType::Instant,
                Cardinality::One,
                None,
            ),
        ]
    }

    /// The facts laid down by the bootstrap transaction.
    #[must_use]
    pub fn bootstrap_facts(instant: DateTime<Utc>) -> Vec<Fact> {
        let mut facts = Vec::new();
        for d in definitions() {
            facts.push(Fact::assertion(
                d.id,
                DB_IDENT,
                Value::string(d.ident.as_str()),
                BOOTSTRAP_TX,
            ));
            facts.push(Fact::assertion(
                d.id,
                DB_VALUE_TYPE,
                Value::string(d.value_type.as_str()),
                BOOTSTRAP_TX,
            ));
            facts.push(Fact::assertion(
                d.id,
                DB_CARDINALITY,
                Value::string(d.cardinality.as_str()),
                BOOTSTRAP_TX,
            ));
            if let Some(u) = d.unique {
                facts.push(Fact::assertion(
                    d.id,
                    DB_UNIQUE,
                    Value::string(u.as_str()),
                    BOOTSTRAP_TX,
                ));
            }
        }
        facts.push(Fact::assertion(
            BOOTSTRAP_TX.entity(),
            DB_TX_INSTANT,
            Value::Instant(instant),
            BOOTSTRAP_TX,
        ));
        facts
    }
}

// =============================================================================
// SCHEMA CACHE
// =============================================================================

/// Partially assembled definition, promoted once the mandatory facts
/// (`db/ident`, `db/value-type`, `db/cardinality`) are all present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PartialDef {
    ident: Option<Ident>,
    value_type: Option<ValueType>,
    cardinality: Option<Cardinality>,
    unique: Option<Uniqueness>,
    component: bool,
    doc: Option<String>,
}

/// Derived cache over the schema facts in the store.
///
/// Maintained incrementally on every commit and shared with snapshots via
/// the store's copy-on-write state. Uses `BTreeMap` exclusively for
/// deterministic ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaCache {
    /// Installed definitions by attribute entity.
    by_id: BTreeMap<EntityId, AttributeSchema>,
    /// Reverse mapping from ident to attribute entity.
    by_ident: BTreeMap<Ident, EntityId>,
    /// Definitions still missing mandatory facts.
    partial: BTreeMap<EntityId, PartialDef>,
}

impl SchemaCache {
    /// Cache pre-populated with the built-in attributes.
    #[must_use]
    pub fn bootstrap() -> Self {
        let mut cache = Self::default();
        for d in builtin::definitions() {
            cache.by_ident.insert(d.ident.clone(), d.id);
            cache.by_id.insert(d.id, d);
        }
        cache
    }

    /// Fold one committed transaction's facts into the cache.
    ///
    /// Only assertions under the built-in schema attributes are relevant.
    /// The transaction processor has already validated their shape, so
    /// unparseable metadata is skipped rather than reported here.
    pub fn apply_facts(&mut self, facts: &[Fact], tx: TxId) {
        for fact in facts {
            if !fact.is_assertion() || !builtin::is_schema_attribute(fact.attribute) {
                continue;
            }
            // Idents may also name non-attribute entities (enum members);
            // those stay partial forever, which is fine.
            if self.by_id.contains_key(&fact.entity) {
                continue;
            }
            let partial = self.partial.entry(fact.entity).or_default();
            match (fact.attribute, &fact.value) {
                (builtin::DB_IDENT, Value::Str(s)) => partial.ident = Some(Ident::new(s)),
                (builtin::DB_VALUE_TYPE, Value::Str(s)) => {
                    partial.value_type = ValueType::parse(s);
                }
                (builtin::DB_CARDINALITY, Value::Str(s)) => {
                    partial.cardinality = Cardinality::parse(s);
                }
                (builtin::DB_UNIQUE, Value::Str(s)) => partial.unique = Uniqueness::parse(s),
                (builtin::DB_COMPONENT, Value::Bool(b)) => partial.component = *b,
                (builtin::DB_DOC, Value::Str(s)) => partial.doc = Some(s.clone()),
                _ => {}
            }
        }

        // Promote definitions that became complete in this transaction.
        let complete: Vec<EntityId> = self
            .partial
            .iter()
            .filter(|(_, p)| {
                p.ident.is_some() && p.value_type.is_some() && p.cardinality.is_some()
            })
            .map(|(id, _)| *id)
            .collect();
        for id in complete {
            if let Some(p) = self.partial.remove(&id)
                && let (Some(ident), Some(value_type), Some(cardinality)) =
                    (p.ident, p.value_type, p.cardinality)
            {
                self.by_ident.insert(ident.clone(), id);
                self.by_id.insert(
                    id,
                    AttributeSchema {
                        id,
                        ident,
                        value_type,
                        cardinality,
                        unique: p.unique,
                        component: p.component,
                        doc: p.doc,
                        installed_tx: tx,
                    },
                );
            }
        }
    }

    /// Definition of an attribute as of the given basis.
    #[must_use]
    pub fn attribute(&self, id: EntityId, as_of: TxId) -> Option<&AttributeSchema> {
        self.by_id.get(&id).filter(|d| d.installed_tx <= as_of)
    }

    /// Resolve an attribute ident as of the given basis.
    #[must_use]
    pub fn resolve(&self, ident: &Ident, as_of: TxId) -> Option<&AttributeSchema> {
        self.by_ident
            .get(ident)
            .and_then(|id| self.attribute(*id, as_of))
    }

    /// All definitions installed as of the given basis, in id order.
    pub fn attributes(&self, as_of: TxId) -> impl Iterator<Item = &AttributeSchema> {
        self.by_id
            .values()
            .filter(move |d| d.installed_tx <= as_of)
    }

    /// Number of installed definitions (including built-ins).
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether only the built-ins are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_cache_resolves_builtins() {
        let cache = SchemaCache::bootstrap();
        let ident = cache
            .resolve(&Ident::new("db/ident"), builtin::BOOTSTRAP_TX)
            .expect("db/ident installed");
        assert_eq!(ident.id, builtin::DB_IDENT);
        assert!(ident.is_identity());
        assert_eq!(ident.cardinality, Cardinality::One);
    }

    #[test]
    fn builtins_invisible_before_bootstrap() {
        let cache = SchemaCache::bootstrap();
        assert!(cache.attribute(builtin::DB_IDENT, TxId(0)).is_none());
    }

    #[test]
    fn user_definition_promotes_when_complete() {
        let mut cache = SchemaCache::bootstrap();
        let attr = EntityId(100);
        let tx = TxId(101);

        // Ident alone is not a complete definition.
        cache.apply_facts(
            &[Fact::assertion(
                attr,
                builtin::DB_IDENT,
                Value::string("person/name"),
                tx,
            )],
            tx,
        );
        assert!(cache.attribute(attr, tx).is_none());

        let tx2 = TxId(102);
        cache.apply_facts(
            &[
                Fact::assertion(
                    attr,
                    builtin::DB_VALUE_TYPE,
                    Value::string("string"),
                    tx2,
                ),
                Fact::assertion(attr, builtin::DB_CARDINALITY, Value::string("one"), tx2),
            ],
            tx2,
        );

        let def = cache.attribute(attr, tx2).expect("definition complete");
        assert_eq!(def.ident, Ident::new("person/name"));
        assert_eq!(def.value_type, ValueType::String);
        assert_eq!(def.installed_tx, tx2);
        // Visible at its install basis, not before.
        assert!(cache.attribute(attr, tx).is_none());
    }

    #[test]
    fn enum_entities_stay_partial() {
        let mut cache = SchemaCache::bootstrap();
        let color = EntityId(200);
        let tx = TxId(201);
        cache.apply_facts(
            &[Fact::assertion(
                color,
                builtin::DB_IDENT,
                Value::string("color/red"),
                tx,
            )],
            tx,
        );
        assert!(cache.attribute(color, tx).is_none());
        assert!(cache.resolve(&Ident::new("color/red"), tx).is_none());
    }

    #[test]
    fn bootstrap_facts_cover_all_builtins() {
        let facts = builtin::bootstrap_facts(chrono::Utc::now());
        for id in builtin::ALL {
            assert!(
                facts
                    .iter()
                    .any(|f| f.entity == id && f.attribute == builtin::DB_IDENT),
                "missing ident fact for {:?}",
                id
            );
        }
        // The bootstrap transaction is itself reified with an instant.
        assert!(
            facts
                .iter()
                .any(|f| f.entity == builtin::BOOTSTRAP_TX.entity()
                    && f.attribute == builtin::DB_TX_INSTANT)
        );
    }
}
