//! # Index Layer
//!
//! Sorted orderings over the full fact history.
//!
//! Every committed fact is inserted into each applicable ordering:
//!
//! - **EAVT** `(entity, attribute, value, tx, op)` — per-entity reads
//! - **AEVT** `(attribute, entity, value, tx, op)` — per-attribute scans
//! - **AVET** `(attribute, value, entity, tx, op)` — value lookups,
//!   uniqueness checks, `db/ident` resolution
//! - **VAET** `(value, attribute, entity, tx, op)` — reverse traversal,
//!   maintained for `Ref` values only
//!
//! All structures are `BTreeSet`s of reordered key tuples, so iteration is
//! deterministic and a partially bound lookup is a range scan over the
//! index whose sort order matches the bound prefix. Facts are only ever
//! added; retraction is itself an added fact.

use crate::types::{EntityId, Fact, Op, TxId, Value};
use std::collections::BTreeSet;

/// Key tuple for the EAVT ordering.
type EavtKey = (EntityId, EntityId, Value, TxId, Op);
/// Key tuple for the AEVT ordering.
type AevtKey = (EntityId, EntityId, Value, TxId, Op);
/// Key tuple for the AVET ordering.
type AvetKey = (EntityId, Value, EntityId, TxId, Op);
/// Key tuple for the VAET ordering.
type VaetKey = (Value, EntityId, EntityId, TxId, Op);

// =============================================================================
// INDEXES
// =============================================================================

/// The four sorted fact orderings plus the commit-ordered log.
///
/// Shared between the database handle and its snapshots through a
/// copy-on-write `Arc`; nothing here is ever removed or rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indexes {
    eavt: BTreeSet<EavtKey>,
    aevt: BTreeSet<AevtKey>,
    avet: BTreeSet<AvetKey>,
    vaet: BTreeSet<VaetKey>,
    /// All facts in commit order, for export and history access.
    log: Vec<Fact>,
}

impl Indexes {
    /// Create an empty index set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one fact into every applicable ordering.
    pub fn insert(&mut self, fact: Fact) {
        self.eavt.insert((
            fact.entity,
            fact.attribute,
            fact.value.clone(),
            fact.tx,
            fact.op,
        ));
        self.aevt.insert((
            fact.attribute,
            fact.entity,
            fact.value.clone(),
            fact.tx,
            fact.op,
        ));
        self.avet.insert((
            fact.attribute,
            fact.value.clone(),
            fact.entity,
            fact.tx,
            fact.op,
        ));
        if matches!(fact.value, Value::Ref(_)) {
            self.vaet.insert((
                fact.value.clone(),
                fact.attribute,
                fact.entity,
                fact.tx,
                fact.op,
            ));
        }
        self.log.push(fact);
    }

    /// Total number of facts ever committed.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.log.len()
    }

    /// The full fact log in commit order.
    #[must_use]
    pub fn log(&self) -> &[Fact] {
        &self.log
    }

    // =========================================================================
    // RANGE SCANS
    // =========================================================================

    /// Scan the EAVT ordering by bound prefix.
    ///
    /// Bound terms must form a prefix: `a` requires `e`, `v` requires `a`.
    pub fn scan_eavt(
        &self,
        e: Option<EntityId>,
        a: Option<EntityId>,
        v: Option<&Value>,
    ) -> impl Iterator<Item = Fact> + '_ {
        let start: EavtKey = (
            e.unwrap_or(EntityId(0)),
            a.unwrap_or(EntityId(0)),
            v.cloned().unwrap_or_else(Value::least),
            TxId(0),
            Op::Retract,
        );
        let v = v.cloned();
        self.eavt
            .range(start..)
            .take_while(move |k| {
                e.is_none_or(|e| k.0 == e)
                    && a.is_none_or(|a| k.1 == a)
                    && v.as_ref().is_none_or(|v| &k.2 == v)
            })
            .map(|k| Fact::new(k.0, k.1, k.2.clone(), k.3, k.4))
    }

    /// Scan the AEVT ordering for one attribute, optionally one entity.
    pub fn scan_aevt(
        &self,
        a: EntityId,
        e: Option<EntityId>,
    ) -> impl Iterator<Item = Fact> + '_ {
        let start: AevtKey = (
            a,
            e.unwrap_or(EntityId(0)),
            Value::least(),
            TxId(0),
            Op::Retract,
        );
        self.aevt
            .range(start..)
            .take_while(move |k| k.0 == a && e.is_none_or(|e| k.1 == e))
            .map(|k| Fact::new(k.1, k.0, k.2.clone(), k.3, k.4))
    }

    /// Scan the AVET ordering for one attribute, optionally one value.
    pub fn scan_avet(
        &self,
        a: EntityId,
        v: Option<&Value>,
    ) -> impl Iterator<Item = Fact> + '_ {
        let start: AvetKey = (
            a,
            v.cloned().unwrap_or_else(Value::least),
            EntityId(0),
            TxId(0),
            Op::Retract,
        );
        let v = v.cloned();
        self.avet
            .range(start..)
            .take_while(move |k| k.0 == a && v.as_ref().is_none_or(|v| &k.1 == v))
            .map(|k| Fact::new(k.2, k.0, k.1.clone(), k.3, k.4))
    }

    /// Scan the VAET ordering for one referenced entity, optionally one
    /// attribute. Only `Ref` values are present in this ordering.
    pub fn scan_vaet(
        &self,
        target: EntityId,
        a: Option<EntityId>,
    ) -> impl Iterator<Item = Fact> + '_ {
        let v = Value::Ref(target);
        let start: VaetKey = (
            v.clone(),
            a.unwrap_or(EntityId(0)),
            EntityId(0),
            TxId(0),
            Op::Retract,
        );
        self.vaet
            .range(start..)
            .take_while(move |k| k.0 == v && a.is_none_or(|a| k.1 == a))
            .map(|k| Fact::new(k.2, k.1, k.0.clone(), k.3, k.4))
    }

    // =========================================================================
    // INDEX SELECTION
    // =========================================================================

    /// Enumerate all history facts matching the given component pattern,
    /// choosing the ordering whose sort order matches the bound prefix so
    /// the smallest candidate range is scanned.
    ///
    /// Components not covered by the chosen prefix are applied as a
    /// residual filter. Results are grouped: facts with equal
    /// `(entity, attribute, value)` are adjacent with ascending `tx`.
    pub fn matching(
        &self,
        e: Option<EntityId>,
        a: Option<EntityId>,
        v: Option<&Value>,
    ) -> Box<dyn Iterator<Item = Fact> + '_> {
        match (e, a, v) {
            // Entity bound: EAVT with the longest contiguous prefix.
            (Some(e), a, v) => {
                if a.is_some() {
                    Box::new(self.scan_eavt(Some(e), a, v))
                } else {
                    let v = v.cloned();
                    Box::new(
                        self.scan_eavt(Some(e), None, None)
                            .filter(move |f| v.as_ref().is_none_or(|v| &f.value == v)),
                    )
                }
            }
            // Attribute and value bound: AVET.
            (None, Some(a), Some(v)) => Box::new(self.scan_avet(a, Some(v))),
            // Attribute bound: AEVT.
            (None, Some(a), None) => Box::new(self.scan_aevt(a, None)),
            // Value bound alone: VAET for refs, filtered EAVT scan otherwise.
            (None, None, Some(v)) => match v.as_entity() {
                Some(target) => Box::new(self.scan_vaet(target, None)),
                None => {
                    let v = v.clone();
                    Box::new(
                        self.scan_eavt(None, None, None)
                            .filter(move |f| f.value == v),
                    )
                }
            },
            // Nothing bound: full EAVT scan.
            (None, None, None) => Box::new(self.scan_eavt(None, None, None)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
