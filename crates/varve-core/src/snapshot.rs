//! # Snapshot Module
//!
//! Immutable point-in-time views over the fact store.
//!
//! A `Snapshot` is shared ownership of the frozen store state plus a
//! visibility basis. The database hands out snapshots in O(1) and commits
//! through `Arc::make_mut`, so a snapshot keeps exactly the state it
//! observed without any locking, and repeated evaluation of a query
//! against one snapshot yields the same solutions regardless of later
//! transactions.
//!
//! All reads fold raw history into live facts: for each
//! `(entity, attribute, value)` triple, the latest fact at or before the
//! basis wins, and the triple is visible iff that fact asserts.

use crate::index::Indexes;
use crate::schema::{builtin, AttributeSchema, SchemaCache};
use crate::types::{EntityId, Fact, Ident, TxId, Value, VarveError};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// STORE STATE
// =============================================================================

/// The copy-on-write state shared between a database handle and its
/// snapshots: indexes, schema cache, and allocation counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Store {
    pub(crate) indexes: Indexes,
    pub(crate) schema: SchemaCache,
    /// Next entity id to allocate (also the source of transaction ids).
    pub(crate) next_entity: u64,
    /// Latest committed transaction.
    pub(crate) basis: TxId,
}

impl Store {
    /// Fresh state holding only the bootstrap transaction.
    pub(crate) fn bootstrap(instant: chrono::DateTime<chrono::Utc>) -> Self {
        let mut indexes = Indexes::new();
        for fact in builtin::bootstrap_facts(instant) {
            indexes.insert(fact);
        }
        Self {
            indexes,
            schema: SchemaCache::bootstrap(),
            next_entity: builtin::FIRST_USER_ENTITY,
            basis: builtin::BOOTSTRAP_TX,
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// An immutable, point-in-time readable view over the fact store.
///
/// Cloning is cheap (shared ownership); every accessor is read-only.
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: Arc<Store>,
    as_of: TxId,
}

impl Snapshot {
    pub(crate) fn new(store: Arc<Store>, as_of: TxId) -> Self {
        Self { store, as_of }
    }

    /// The transaction this snapshot is based on.
    #[must_use]
    pub fn basis(&self) -> TxId {
        self.as_of
    }

    /// Total number of facts visible in the history at this basis.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.store
            .indexes
            .log()
            .iter()
            .filter(|f| f.tx <= self.as_of)
            .count()
    }

    /// The fact log up to this basis, in commit order.
    #[must_use]
    pub fn fact_log(&self) -> Vec<Fact> {
        self.store
            .indexes
            .log()
            .iter()
            .filter(|f| f.tx <= self.as_of)
            .cloned()
            .collect()
    }

    // =========================================================================
    // SCHEMA ACCESS
    // =========================================================================

    /// Definition of an attribute entity, if installed at this basis.
    #[must_use]
    pub fn attribute_by_id(&self, id: EntityId) -> Option<&AttributeSchema> {
        self.store.schema.attribute(id, self.as_of)
    }

    /// Resolve an attribute ident to its definition.
    pub fn attribute(&self, ident: &Ident) -> Result<&AttributeSchema, VarveError> {
        self.store
            .schema
            .resolve(ident, self.as_of)
            .ok_or_else(|| VarveError::UnknownIdentifier(ident.as_str().to_string()))
    }

    /// All attribute definitions installed at this basis.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.store.schema.attributes(self.as_of)
    }

    // =========================================================================
    // FACT ACCESS
    // =========================================================================

    /// All live facts matching the component pattern; any position may be
    /// a wildcard. The index layer picks the ordering matching the bound
    /// prefix, then history is folded into net-of-retraction facts.
    #[must_use]
    pub fn facts_matching(
        &self,
        e: Option<EntityId>,
        a: Option<EntityId>,
        v: Option<&Value>,
    ) -> Vec<Fact> {
        let mut live = Vec::new();
        let mut current: Option<Fact> = None;
        for fact in self.store.indexes.matching(e, a, v) {
            if fact.tx > self.as_of {
                continue;
            }
            match current.take() {
                Some(prev)
                    if prev.entity == fact.entity
                        && prev.attribute == fact.attribute
                        && prev.value == fact.value =>
                {
                    // Same triple, later transaction wins.
                    current = Some(fact);
                }
                Some(prev) => {
                    if prev.is_assertion() {
                        live.push(prev);
                    }
                    current = Some(fact);
                }
                None => current = Some(fact),
            }
        }
        if let Some(last) = current
            && last.is_assertion()
        {
            live.push(last);
        }
        live
    }

    /// All history facts matching the component pattern, including
    /// retractions, up to this basis.
    #[must_use]
    pub fn history_matching(
        &self,
        e: Option<EntityId>,
        a: Option<EntityId>,
        v: Option<&Value>,
    ) -> Vec<Fact> {
        self.store
            .indexes
            .matching(e, a, v)
            .filter(|f| f.tx <= self.as_of)
            .collect()
    }

    /// Live attribute -> values map for an entity. An entity with no live
    /// facts is indistinguishable from one that never existed.
    #[must_use]
    pub fn entity(&self, e: EntityId) -> BTreeMap<EntityId, Vec<Value>> {
        let mut attrs: BTreeMap<EntityId, Vec<Value>> = BTreeMap::new();
        for fact in self.facts_matching(Some(e), None, None) {
            attrs.entry(fact.attribute).or_default().push(fact.value);
        }
        attrs
    }

    /// Live values for one entity/attribute pair.
    #[must_use]
    pub fn live_values(&self, e: EntityId, a: EntityId) -> Vec<Value> {
        self.facts_matching(Some(e), Some(a), None)
            .into_iter()
            .map(|f| f.value)
            .collect()
    }

    /// The live value for a cardinality-one entity/attribute pair.
    #[must_use]
    pub fn live_value(&self, e: EntityId, a: EntityId) -> Option<Value> {
        self.live_values(e, a).into_iter().next()
    }

    /// Entities that reference `target` through `attribute` (reverse scan).
    #[must_use]
    pub fn referencing(&self, target: EntityId, attribute: EntityId) -> Vec<EntityId> {
        self.facts_matching(None, Some(attribute), Some(&Value::Ref(target)))
            .into_iter()
            .map(|f| f.entity)
            .collect()
    }

    // =========================================================================
    // IDENTITY RESOLUTION
    // =========================================================================

    /// Resolve a symbolic identifier through the `db/ident` identity
    /// attribute. Works for attribute definitions and enum entities alike.
    pub fn resolve_ident(&self, ident: &Ident) -> Result<EntityId, VarveError> {
        self.facts_matching(
            None,
            Some(builtin::DB_IDENT),
            Some(&Value::string(ident.as_str())),
        )
        .into_iter()
        .map(|f| f.entity)
        .next()
        .ok_or_else(|| VarveError::UnknownIdentifier(ident.as_str().to_string()))
    }

    /// The ident of an entity, if it has one.
    #[must_use]
    pub fn ident_of(&self, e: EntityId) -> Option<Ident> {
        match self.live_value(e, builtin::DB_IDENT) {
            Some(Value::Str(s)) => Some(Ident::new(s)),
            _ => None,
        }
    }

    /// The entity holding `value` under a unique attribute, if any.
    ///
    /// Callers must have checked that the attribute is declared unique;
    /// with a non-unique attribute this returns the first match in index
    /// order, which is not meaningful.
    #[must_use]
    pub fn entity_with_value(&self, attribute: EntityId, value: &Value) -> Option<EntityId> {
        self.facts_matching(None, Some(attribute), Some(value))
            .into_iter()
            .map(|f| f.entity)
            .next()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Op;

    /// Store with two user entities and one retraction, on top of bootstrap.
    fn sample_store() -> Store {
        let mut store = Store::bootstrap(chrono::Utc::now());
        let name = EntityId(20);
        // Minimal user attribute installed at tx 30.
        for fact in [
            Fact::assertion(name, builtin::DB_IDENT, Value::string("person/name"), TxId(30)),
            Fact::assertion(
                name,
                builtin::DB_VALUE_TYPE,
                Value::string("string"),
                TxId(30),
            ),
            Fact::assertion(
                name,
                builtin::DB_CARDINALITY,
                Value::string("one"),
                TxId(30),
            ),
        ] {
            store.indexes.insert(fact);
        }
        let schema_facts: Vec<Fact> = store.indexes.log()[store.indexes.log().len() - 3..].to_vec();
        store.schema.apply_facts(&schema_facts, TxId(30));

        // tx 31: alice asserted; tx 32: renamed to alicia.
        store
            .indexes
            .insert(Fact::assertion(EntityId(40), name, Value::string("alice"), TxId(31)));
        store
            .indexes
            .insert(Fact::retraction(EntityId(40), name, Value::string("alice"), TxId(32)));
        store
            .indexes
            .insert(Fact::assertion(EntityId(40), name, Value::string("alicia"), TxId(32)));
        store.basis = TxId(32);
        store.next_entity = 41;
        store
    }

    fn snapshot_at(store: &Store, tx: u64) -> Snapshot {
        Snapshot::new(Arc::new(store.clone()), TxId(tx))
    }

    #[test]
    fn live_fold_applies_retraction() {
        let store = sample_store();
        let snap = snapshot_at(&store, 32);
        let values = snap.live_values(EntityId(40), EntityId(20));
        assert_eq!(values, vec![Value::string("alicia")]);
    }

    #[test]
    fn earlier_basis_sees_earlier_value() {
        let store = sample_store();
        let snap = snapshot_at(&store, 31);
        let values = snap.live_values(EntityId(40), EntityId(20));
        assert_eq!(values, vec![Value::string("alice")]);
    }

    #[test]
    fn basis_before_assertion_sees_nothing() {
        let store = sample_store();
        let snap = snapshot_at(&store, 30);
        assert!(snap.live_values(EntityId(40), EntityId(20)).is_empty());
        assert!(snap.entity(EntityId(40)).is_empty());
    }

    #[test]
    fn history_keeps_retractions() {
        let store = sample_store();
        let snap = snapshot_at(&store, 32);
        let history = snap.history_matching(Some(EntityId(40)), Some(EntityId(20)), None);
        assert_eq!(history.len(), 3);
        assert!(history.iter().any(|f| f.op == Op::Retract));
    }

    #[test]
    fn resolve_ident_finds_attribute_entity() {
        let store = sample_store();
        let snap = snapshot_at(&store, 32);
        let resolved = snap
            .resolve_ident(&Ident::new("person/name"))
            .expect("resolve");
        assert_eq!(resolved, EntityId(20));
    }

    #[test]
    fn resolve_unknown_ident_errors() {
        let store = sample_store();
        let snap = snapshot_at(&store, 32);
        let err = snap.resolve_ident(&Ident::new("person/age"));
        assert!(matches!(err, Err(VarveError::UnknownIdentifier(_))));
    }

    #[test]
    fn attribute_schema_respects_basis() {
        let store = sample_store();
        assert!(
            snapshot_at(&store, 32)
                .attribute(&Ident::new("person/name"))
                .is_ok()
        );
        assert!(
            snapshot_at(&store, 29)
                .attribute(&Ident::new("person/name"))
                .is_err()
        );
    }

    #[test]
    fn entity_with_value_resolves_unique_hit() {
        let store = sample_store();
        let snap = snapshot_at(&store, 32);
        assert_eq!(
            snap.entity_with_value(builtin::DB_IDENT, &Value::string("person/name")),
            Some(EntityId(20))
        );
        assert_eq!(
            snap.entity_with_value(EntityId(20), &Value::string("alice")),
            None
        );
    }
}
