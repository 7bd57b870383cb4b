//! # Transaction Processor
//!
//! Turns a client-submitted list of operations into a validated, atomic
//! batch of facts.
//!
//! Pipeline:
//! 1. Expand transactor-function invocations (bounded recursion).
//! 2. Expand entity-map shorthand into primitive assertions.
//! 3. Resolve temporary identifiers, idents, and lookup references;
//!    tempids asserting an existing unique-identity value resolve to the
//!    existing entity (upsert).
//! 4. Merge against the basis snapshot: implicit cardinality-one
//!    retraction, duplicate elision, uniqueness checks.
//! 5. Validate schema constraints and compare-and-set expectations.
//! 6. Allocate a transaction entity, stamp every fact, and hand the batch
//!    to the store as one atomic append.
//!
//! Everything is all-or-nothing: a rejected transaction leaves the
//! snapshot chain exactly as it was before submission.

use crate::functions::FunctionRegistry;
use crate::primitives::{
    MAX_FUNCTION_EXPANSION, MAX_IDENT_LENGTH, MAX_STRING_VALUE_LENGTH, MAX_TUPLE_ARITY,
    MAX_TX_OPERATIONS,
};
use crate::schema::{builtin, AttributeSchema, Cardinality, Uniqueness};
use crate::snapshot::Snapshot;
use crate::types::{EntityId, Fact, Ident, Op, TxId, Value, ValueType, VarveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Prefix for tempids generated for anonymous nested entity maps.
/// These are excluded from the report's resolution map.
const INTERNAL_TEMPID_PREFIX: &str = "varve.tmp/";

// =============================================================================
// ENTITY REFERENCES
// =============================================================================

/// A reference to an entity within a transaction request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    /// A real entity id.
    Id(EntityId),
    /// A client-supplied placeholder, resolved once per transaction:
    /// repeated occurrences of the same string resolve identically.
    TempId(String),
    /// A symbolic identifier resolved through `db/ident`.
    Ident(Ident),
    /// `[unique-attribute value]`, resolved to the existing entity
    /// holding that value; `UnresolvedLookup` if none does.
    Lookup(Ident, Value),
}

impl EntityRef {
    /// Real-id reference helper.
    #[must_use]
    pub const fn id(id: EntityId) -> Self {
        Self::Id(id)
    }

    /// Tempid reference helper.
    #[must_use]
    pub fn tempid(name: impl Into<String>) -> Self {
        Self::TempId(name.into())
    }

    /// Ident reference helper.
    #[must_use]
    pub fn ident(ident: impl Into<String>) -> Self {
        Self::Ident(Ident::new(ident))
    }

    /// Lookup reference helper.
    #[must_use]
    pub fn lookup(attribute: impl Into<String>, value: Value) -> Self {
        Self::Lookup(Ident::new(attribute), value)
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// A value position within a transaction operation.
///
/// Ref-typed attributes accept entity references (including tempids and
/// lookups) and nested entity maps in value position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxValue {
    /// A concrete value.
    Value(Value),
    /// A reference to resolve.
    Ref(EntityRef),
    /// A nested entity map; expands recursively.
    Map(EntityMap),
}

/// Entity-map shorthand: one assertion per key/value pair, expanded
/// recursively for nested maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMap {
    /// Target entity; an anonymous map gets an internal tempid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityRef>,
    /// Attribute assertions; a key maps to one or more values.
    pub attrs: BTreeMap<Ident, Vec<TxValue>>,
}

impl EntityMap {
    /// Anonymous map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map targeting a client tempid.
    #[must_use]
    pub fn named(tempid: impl Into<String>) -> Self {
        Self {
            id: Some(EntityRef::tempid(tempid)),
            attrs: BTreeMap::new(),
        }
    }

    /// Map targeting an explicit reference.
    #[must_use]
    pub fn with_id(id: EntityRef) -> Self {
        Self {
            id: Some(id),
            attrs: BTreeMap::new(),
        }
    }

    /// Add one value under an attribute.
    #[must_use]
    pub fn set(mut self, attribute: impl Into<String>, value: TxValue) -> Self {
        self.attrs
            .entry(Ident::new(attribute))
            .or_default()
            .push(value);
        self
    }

    /// Add several values under a cardinality-many attribute.
    #[must_use]
    pub fn set_many(mut self, attribute: impl Into<String>, values: Vec<TxValue>) -> Self {
        self.attrs
            .entry(Ident::new(attribute))
            .or_default()
            .extend(values);
        self
    }
}

/// One operation of a transaction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxOp {
    /// Assert one fact.
    Assert {
        e: EntityRef,
        a: Ident,
        v: TxValue,
    },
    /// Retract one fact.
    Retract {
        e: EntityRef,
        a: Ident,
        v: TxValue,
    },
    /// Retract every live fact of an entity, cascading through component
    /// references and incoming references.
    RetractEntity {
        e: EntityRef,
    },
    /// Entity-map shorthand.
    Entity(EntityMap),
    /// The attribute's current live value must equal `expected` (or be
    /// absent when `expected` is `None`), else the whole transaction
    /// fails with `CompareAndSetMismatch`.
    CompareAndSet {
        e: EntityRef,
        a: Ident,
        expected: Option<Value>,
        new: Value,
    },
    /// Invoke a registered transactor function; its returned operations
    /// merge into this transaction.
    Invoke {
        func: String,
        args: Vec<Value>,
    },
}

impl TxOp {
    /// Assertion helper for concrete values.
    #[must_use]
    pub fn assert(e: EntityRef, a: impl Into<String>, v: Value) -> Self {
        Self::Assert {
            e,
            a: Ident::new(a),
            v: TxValue::Value(v),
        }
    }

    /// Assertion helper for reference values.
    #[must_use]
    pub fn assert_ref(e: EntityRef, a: impl Into<String>, target: EntityRef) -> Self {
        Self::Assert {
            e,
            a: Ident::new(a),
            v: TxValue::Ref(target),
        }
    }

    /// Retraction helper.
    #[must_use]
    pub fn retract(e: EntityRef, a: impl Into<String>, v: Value) -> Self {
        Self::Retract {
            e,
            a: Ident::new(a),
            v: TxValue::Value(v),
        }
    }

    /// Compare-and-set helper.
    #[must_use]
    pub fn compare_and_set(
        e: EntityRef,
        a: impl Into<String>,
        expected: Option<Value>,
        new: Value,
    ) -> Self {
        Self::CompareAndSet {
            e,
            a: Ident::new(a),
            expected,
            new,
        }
    }
}

// =============================================================================
// ATTRIBUTE DEFINITION BUILDER
// =============================================================================

/// Builder for attribute-definition transactions.
///
/// Schema registration is an ordinary transaction asserting facts under
/// the built-in attributes; this builder just assembles the entity map.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    ident: Ident,
    value_type: ValueType,
    cardinality: Cardinality,
    unique: Option<Uniqueness>,
    component: bool,
    doc: Option<String>,
}

impl AttributeDef {
    /// Start a definition.
    #[must_use]
    pub fn new(ident: impl Into<String>, value_type: ValueType, cardinality: Cardinality) -> Self {
        Self {
            ident: Ident::new(ident),
            value_type,
            cardinality,
            unique: None,
            component: false,
            doc: None,
        }
    }

    /// Mark as unique-identity (upsert key).
    #[must_use]
    pub fn unique_identity(mut self) -> Self {
        self.unique = Some(Uniqueness::Identity);
        self
    }

    /// Mark as unique-value.
    #[must_use]
    pub fn unique_value(mut self) -> Self {
        self.unique = Some(Uniqueness::Value);
        self
    }

    /// Mark as a component reference.
    #[must_use]
    pub fn component(mut self) -> Self {
        self.component = true;
        self
    }

    /// Attach a docstring.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Finish into a transaction operation.
    #[must_use]
    pub fn build(self) -> TxOp {
        let mut map = EntityMap::new()
            .set("db/ident", TxValue::Value(Value::string(self.ident.as_str())))
            .set(
                "db/value-type",
                TxValue::Value(Value::string(self.value_type.as_str())),
            )
            .set(
                "db/cardinality",
                TxValue::Value(Value::string(self.cardinality.as_str())),
            );
        if let Some(unique) = self.unique {
            map = map.set("db/unique", TxValue::Value(Value::string(unique.as_str())));
        }
        if self.component {
            map = map.set("db/component", TxValue::Value(Value::Bool(true)));
        }
        if let Some(doc) = self.doc {
            map = map.set("db/doc", TxValue::Value(Value::string(doc)));
        }
        TxOp::Entity(map)
    }
}

// =============================================================================
// PROCESSED BATCH
// =============================================================================

/// Outcome of processing one transaction request, before commit.
#[derive(Debug, Clone)]
pub(crate) struct Processed {
    /// Fully stamped facts, empty when everything elided.
    pub facts: Vec<Fact>,
    /// Resolution of every client-supplied tempid.
    pub tempids: BTreeMap<String, EntityId>,
    /// Entity counter after allocations (unchanged for empty batches).
    pub next_entity: u64,
    /// The allocated transaction, `None` for empty batches.
    pub tx: Option<TxId>,
}

// =============================================================================
// PRIMITIVE OPERATIONS (post-expansion)
// =============================================================================

#[derive(Debug, Clone)]
enum PrimValue {
    Val(Value),
    Ref(EntityRef),
}

#[derive(Debug, Clone)]
enum Prim {
    Assert {
        e: EntityRef,
        a: Ident,
        v: PrimValue,
    },
    Retract {
        e: EntityRef,
        a: Ident,
        v: PrimValue,
    },
    RetractEntity {
        e: EntityRef,
    },
    Cas {
        e: EntityRef,
        a: Ident,
        expected: Option<Value>,
        new: Value,
    },
}

// =============================================================================
// PHASE 1: FUNCTION EXPANSION
// =============================================================================

fn expand_functions(
    snapshot: &Snapshot,
    registry: &FunctionRegistry,
    mut ops: Vec<TxOp>,
) -> Result<Vec<TxOp>, VarveError> {
    for _ in 0..MAX_FUNCTION_EXPANSION {
        if !ops.iter().any(|op| matches!(op, TxOp::Invoke { .. })) {
            return Ok(ops);
        }
        let mut expanded = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxOp::Invoke { func, args } => {
                    let function = registry
                        .get(&func)
                        .ok_or_else(|| VarveError::UnknownIdentifier(func.clone()))?;
                    let produced =
                        function
                            .invoke(snapshot, &args)
                            .map_err(|e| VarveError::FunctionFailed {
                                name: func.clone(),
                                detail: e.to_string(),
                            })?;
                    expanded.extend(produced);
                }
                other => expanded.push(other),
            }
        }
        ops = expanded;
    }
    if let Some(TxOp::Invoke { func, .. }) = ops.iter().find(|op| matches!(op, TxOp::Invoke { .. }))
    {
        return Err(VarveError::FunctionFailed {
            name: func.clone(),
            detail: format!("expansion exceeded {} rounds", MAX_FUNCTION_EXPANSION),
        });
    }
    Ok(ops)
}

// =============================================================================
// PHASE 2: MAP EXPANSION
// =============================================================================

struct MapExpander {
    prims: Vec<Prim>,
    internal_counter: u64,
}

impl MapExpander {
    fn fresh_tempid(&mut self) -> EntityRef {
        let tempid = format!("{}{}", INTERNAL_TEMPID_PREFIX, self.internal_counter);
        self.internal_counter += 1;
        EntityRef::TempId(tempid)
    }

    fn expand_value(&mut self, value: TxValue) -> Result<PrimValue, VarveError> {
        match value {
            TxValue::Value(v) => Ok(PrimValue::Val(v)),
            TxValue::Ref(r) => Ok(PrimValue::Ref(r)),
            TxValue::Map(map) => {
                let target = self.expand_map(map)?;
                Ok(PrimValue::Ref(target))
            }
        }
    }

    fn expand_map(&mut self, map: EntityMap) -> Result<EntityRef, VarveError> {
        let target = map.id.unwrap_or_else(|| self.fresh_tempid());
        for (attribute, values) in map.attrs {
            for value in values {
                let v = self.expand_value(value)?;
                self.prims.push(Prim::Assert {
                    e: target.clone(),
                    a: attribute.clone(),
                    v,
                });
            }
        }
        Ok(target)
    }

    fn expand(mut self, ops: Vec<TxOp>) -> Result<Vec<Prim>, VarveError> {
        for op in ops {
            match op {
                TxOp::Assert { e, a, v } => {
                    let v = self.expand_value(v)?;
                    self.prims.push(Prim::Assert { e, a, v });
                }
                TxOp::Retract { e, a, v } => match v {
                    TxValue::Map(_) => {
                        return Err(VarveError::SchemaViolation {
                            attribute: a,
                            detail: "cannot retract a nested entity map".to_string(),
                        });
                    }
                    TxValue::Value(v) => self.prims.push(Prim::Retract {
                        e,
                        a,
                        v: PrimValue::Val(v),
                    }),
                    TxValue::Ref(r) => self.prims.push(Prim::Retract {
                        e,
                        a,
                        v: PrimValue::Ref(r),
                    }),
                },
                TxOp::RetractEntity { e } => self.prims.push(Prim::RetractEntity { e }),
                TxOp::Entity(map) => {
                    self.expand_map(map)?;
                }
                TxOp::CompareAndSet {
                    e,
                    a,
                    expected,
                    new,
                } => self.prims.push(Prim::Cas {
                    e,
                    a,
                    expected,
                    new,
                }),
                TxOp::Invoke { func, .. } => {
                    // Phase 1 removed these; reaching here is a pipeline bug.
                    return Err(VarveError::FunctionFailed {
                        name: func,
                        detail: "invocation survived expansion".to_string(),
                    });
                }
            }
            if self.prims.len() > MAX_TX_OPERATIONS {
                return Err(VarveError::Storage(format!(
                    "transaction expands to more than {} operations",
                    MAX_TX_OPERATIONS
                )));
            }
        }
        Ok(self.prims)
    }
}

// =============================================================================
// PHASE 3: RESOLUTION
// =============================================================================

struct Resolver<'a> {
    snapshot: &'a Snapshot,
    schemas: BTreeMap<Ident, AttributeSchema>,
    tempids: BTreeMap<String, EntityId>,
    next_entity: u64,
}

impl<'a> Resolver<'a> {
    fn new(snapshot: &'a Snapshot, next_entity: u64) -> Self {
        Self {
            snapshot,
            schemas: BTreeMap::new(),
            tempids: BTreeMap::new(),
            next_entity,
        }
    }

    /// Resolve and cache the schema for an attribute ident.
    fn schema(&mut self, ident: &Ident) -> Result<AttributeSchema, VarveError> {
        if let Some(schema) = self.schemas.get(ident) {
            return Ok(schema.clone());
        }
        let schema = self.snapshot.attribute(ident)?.clone();
        self.schemas.insert(ident.clone(), schema.clone());
        Ok(schema)
    }

    /// Resolve a non-tempid reference against the basis snapshot.
    fn resolve_existing(&mut self, r: &EntityRef) -> Result<EntityId, VarveError> {
        match r {
            EntityRef::Id(id) => Ok(*id),
            EntityRef::Ident(ident) => self.snapshot.resolve_ident(ident),
            EntityRef::Lookup(attribute, value) => {
                let schema = self.schema(attribute)?;
                if schema.unique.is_none() {
                    return Err(VarveError::SchemaViolation {
                        attribute: attribute.clone(),
                        detail: "lookup reference requires a unique attribute".to_string(),
                    });
                }
                self.snapshot
                    .entity_with_value(schema.id, value)
                    .ok_or_else(|| VarveError::UnresolvedLookup {
                        attribute: attribute.clone(),
                        value: value.to_string(),
                    })
            }
            EntityRef::TempId(t) => self.tempids.get(t).copied().ok_or_else(|| {
                VarveError::Storage(format!("tempid {} resolved out of order", t))
            }),
        }
    }

    /// Upsert scan: a tempid asserting an existing unique-identity value
    /// resolves to the existing entity. Conflicting resolutions abort.
    fn scan_upserts(&mut self, prims: &[Prim]) -> Result<(), VarveError> {
        for prim in prims {
            let Prim::Assert {
                e: EntityRef::TempId(tempid),
                a,
                v,
            } = prim
            else {
                continue;
            };
            let schema = self.schema(a)?;
            if !schema.is_identity() {
                continue;
            }
            let value = match v {
                PrimValue::Val(value) => value.clone(),
                PrimValue::Ref(EntityRef::TempId(_)) => continue,
                PrimValue::Ref(r) => Value::Ref(self.resolve_existing(r)?),
            };
            let Some(existing) = self.snapshot.entity_with_value(schema.id, &value) else {
                continue;
            };
            if let Some(previous) = self.tempids.get(tempid)
                && *previous != existing
            {
                return Err(VarveError::SchemaViolation {
                    attribute: a.clone(),
                    detail: format!(
                        "tempid {} upserts to both entity {} and entity {}",
                        tempid, previous.0, existing.0
                    ),
                });
            }
            self.tempids.insert(tempid.clone(), existing);
        }
        Ok(())
    }

    /// Allocate fresh ids for tempids that did not upsert, in first
    /// occurrence order.
    fn allocate_fresh(&mut self, prims: &[Prim]) {
        let mut visit = |r: &EntityRef| {
            if let EntityRef::TempId(t) = r
                && !self.tempids.contains_key(t)
            {
                let id = EntityId(self.next_entity);
                self.next_entity += 1;
                self.tempids.insert(t.clone(), id);
            }
        };
        for prim in prims {
            match prim {
                Prim::Assert { e, v, .. } | Prim::Retract { e, v, .. } => {
                    visit(e);
                    if let PrimValue::Ref(r) = v {
                        visit(r);
                    }
                }
                Prim::RetractEntity { e } | Prim::Cas { e, .. } => visit(e),
            }
        }
    }
}

/// A primitive operation with every reference resolved.
#[derive(Debug, Clone)]
enum Resolved {
    Assert {
        e: EntityId,
        schema: AttributeSchema,
        v: Value,
    },
    Retract {
        e: EntityId,
        schema: AttributeSchema,
        v: Value,
    },
    RetractEntity {
        e: EntityId,
    },
    Cas {
        e: EntityId,
        schema: AttributeSchema,
        expected: Option<Value>,
        new: Value,
    },
}

fn resolve_prims(
    resolver: &mut Resolver<'_>,
    prims: Vec<Prim>,
) -> Result<Vec<Resolved>, VarveError> {
    resolver.scan_upserts(&prims)?;
    resolver.allocate_fresh(&prims);

    let mut resolved = Vec::with_capacity(prims.len());
    for prim in prims {
        resolved.push(match prim {
            Prim::Assert { e, a, v } => {
                let schema = resolver.schema(&a)?;
                let e = resolver.resolve_existing(&e)?;
                let v = match v {
                    PrimValue::Val(v) => v,
                    PrimValue::Ref(r) => Value::Ref(resolver.resolve_existing(&r)?),
                };
                Resolved::Assert { e, schema, v }
            }
            Prim::Retract { e, a, v } => {
                let schema = resolver.schema(&a)?;
                let e = resolver.resolve_existing(&e)?;
                let v = match v {
                    PrimValue::Val(v) => v,
                    PrimValue::Ref(r) => Value::Ref(resolver.resolve_existing(&r)?),
                };
                Resolved::Retract { e, schema, v }
            }
            Prim::RetractEntity { e } => Resolved::RetractEntity {
                e: resolver.resolve_existing(&e)?,
            },
            Prim::Cas {
                e,
                a,
                expected,
                new,
            } => Resolved::Cas {
                e: resolver.resolve_existing(&e)?,
                schema: resolver.schema(&a)?,
                expected,
                new,
            },
        });
    }
    Ok(resolved)
}

// =============================================================================
// PHASE 4: MERGE & VALIDATION
// =============================================================================

#[derive(Debug, Default)]
struct Pending {
    asserted: BTreeSet<Value>,
    retracted: BTreeSet<Value>,
}

struct Merger<'a> {
    snapshot: &'a Snapshot,
    pending: BTreeMap<(EntityId, EntityId), Pending>,
    /// Unique values claimed within this transaction.
    unique_claims: BTreeMap<(EntityId, Value), EntityId>,
    out: Vec<(EntityId, EntityId, Value, Op)>,
}

impl<'a> Merger<'a> {
    fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            pending: BTreeMap::new(),
            unique_claims: BTreeMap::new(),
            out: Vec::new(),
        }
    }

    /// Shape checks on an asserted value against the declared type.
    fn check_value(schema: &AttributeSchema, v: &Value) -> Result<(), VarveError> {
        let violation = |detail: String| VarveError::SchemaViolation {
            attribute: schema.ident.clone(),
            detail,
        };
        if v.type_of() != schema.value_type {
            return Err(violation(format!(
                "value {} has type {:?}, attribute expects {:?}",
                v,
                v.type_of(),
                schema.value_type
            )));
        }
        match v {
            Value::Str(s) if s.len() > MAX_STRING_VALUE_LENGTH => Err(violation(format!(
                "string value exceeds {} bytes",
                MAX_STRING_VALUE_LENGTH
            ))),
            Value::Tuple(t) if t.len() > MAX_TUPLE_ARITY => Err(violation(format!(
                "tuple value exceeds arity {}",
                MAX_TUPLE_ARITY
            ))),
            _ => Ok(()),
        }
    }

    /// Extra validation for facts that define schema.
    fn check_schema_fact(schema: &AttributeSchema, v: &Value) -> Result<(), VarveError> {
        let violation = |detail: String| VarveError::SchemaViolation {
            attribute: schema.ident.clone(),
            detail,
        };
        match (schema.id, v) {
            (builtin::DB_IDENT, Value::Str(s)) => {
                if s.is_empty() {
                    return Err(violation("ident must not be empty".to_string()));
                }
                if s.len() > MAX_IDENT_LENGTH {
                    return Err(violation(format!(
                        "ident exceeds {} bytes",
                        MAX_IDENT_LENGTH
                    )));
                }
                Ok(())
            }
            (builtin::DB_VALUE_TYPE, Value::Str(s)) => match ValueType::parse(s) {
                Some(_) => Ok(()),
                None => Err(violation(format!("unknown value type {:?}", s))),
            },
            (builtin::DB_CARDINALITY, Value::Str(s)) => match Cardinality::parse(s) {
                Some(_) => Ok(()),
                None => Err(violation(format!("unknown cardinality {:?}", s))),
            },
            (builtin::DB_UNIQUE, Value::Str(s)) => match Uniqueness::parse(s) {
                Some(_) => Ok(()),
                None => Err(violation(format!("unknown uniqueness {:?}", s))),
            },
            _ => Ok(()),
        }
    }

    /// Retraction bans: attribute definitions and transaction metadata
    /// are append-only records.
    fn check_retractable(&self, e: EntityId, schema: &AttributeSchema) -> Result<(), VarveError> {
        let violation = |detail: String| VarveError::SchemaViolation {
            attribute: schema.ident.clone(),
            detail,
        };
        if schema.id == builtin::DB_TX_INSTANT {
            return Err(violation(
                "transaction instants cannot be retracted".to_string(),
            ));
        }
        if builtin::is_schema_attribute(schema.id)
            && (e.0 < builtin::FIRST_USER_ENTITY || self.snapshot.attribute_by_id(e).is_some())
        {
            return Err(violation(
                "attribute definitions are install-only".to_string(),
            ));
        }
        Ok(())
    }

    /// Assertion bans mirroring the retraction bans: installed attribute
    /// definitions cannot be amended, and transaction instants are
    /// stamped by the processor, never by callers.
    fn check_assertable(&self, e: EntityId, schema: &AttributeSchema) -> Result<(), VarveError> {
        let violation = |detail: String| VarveError::SchemaViolation {
            attribute: schema.ident.clone(),
            detail,
        };
        if schema.id == builtin::DB_TX_INSTANT {
            return Err(violation(
                "transaction instants are system-managed".to_string(),
            ));
        }
        if builtin::is_schema_attribute(schema.id)
            && (e.0 < builtin::FIRST_USER_ENTITY || self.snapshot.attribute_by_id(e).is_some())
        {
            return Err(violation(
                "attribute definitions are install-only".to_string(),
            ));
        }
        Ok(())
    }

    fn live_values(&self, e: EntityId, a: EntityId) -> Vec<Value> {
        self.snapshot.live_values(e, a)
    }

    fn assert(&mut self, e: EntityId, schema: &AttributeSchema, v: Value) -> Result<(), VarveError> {
        Self::check_value(schema, &v)?;
        Self::check_schema_fact(schema, &v)?;

        let violation = |detail: String| VarveError::SchemaViolation {
            attribute: schema.ident.clone(),
            detail,
        };

        // Uniqueness against the basis and against this batch.
        if schema.unique.is_some() {
            if let Some(owner) = self.snapshot.entity_with_value(schema.id, &v)
                && owner != e
            {
                return Err(violation(format!(
                    "value {} is already held by entity {}",
                    v, owner.0
                )));
            }
            if let Some(claimant) = self.unique_claims.get(&(schema.id, v.clone()))
                && *claimant != e
            {
                return Err(violation(format!(
                    "value {} claimed twice in one transaction",
                    v
                )));
            }
            self.unique_claims.insert((schema.id, v.clone()), e);
        }

        let live = self.live_values(e, schema.id);
        let pending = self.pending.entry((e, schema.id)).or_default();

        if pending.asserted.contains(&v) {
            return Ok(()); // duplicate operation within the batch
        }
        if pending.retracted.contains(&v) {
            return Err(violation(format!(
                "value {} both asserted and retracted in one transaction",
                v
            )));
        }
        if live.contains(&v) {
            return Ok(()); // already live, elide
        }

        // Only an actual write is subject to the install-only bans, so a
        // byte-identical schema re-install elides instead of erroring.
        self.check_assertable(e, schema)?;
        let pending = self.pending.entry((e, schema.id)).or_default();

        if schema.cardinality == Cardinality::One {
            if let Some(other) = pending.asserted.iter().next() {
                return Err(violation(format!(
                    "cardinality-one received {} and {} in one transaction",
                    other, v
                )));
            }
            // Implicitly retract the prior live value.
            for old in live {
                if !pending.retracted.contains(&old) {
                    pending.retracted.insert(old.clone());
                    self.out.push((e, schema.id, old, Op::Retract));
                }
            }
        }

        pending.asserted.insert(v.clone());
        self.out.push((e, schema.id, v, Op::Assert));
        Ok(())
    }

    fn retract(
        &mut self,
        e: EntityId,
        schema: &AttributeSchema,
        v: Value,
    ) -> Result<(), VarveError> {
        let live = self.live_values(e, schema.id);
        let pending = self.pending.entry((e, schema.id)).or_default();
        if pending.asserted.contains(&v) {
            return Err(VarveError::SchemaViolation {
                attribute: schema.ident.clone(),
                detail: format!(
                    "value {} both asserted and retracted in one transaction",
                    v
                ),
            });
        }
        if pending.retracted.contains(&v) || !live.contains(&v) {
            return Ok(()); // retracting nothing is a no-op
        }

        // Only an actual write is subject to the append-only bans.
        self.check_retractable(e, schema)?;
        let pending = self.pending.entry((e, schema.id)).or_default();
        pending.retracted.insert(v.clone());
        self.out.push((e, schema.id, v, Op::Retract));
        Ok(())
    }

    /// Retract every live fact of an entity, cascading through components
    /// and severing incoming references.
    fn retract_entity(
        &mut self,
        e: EntityId,
        visited: &mut BTreeSet<EntityId>,
    ) -> Result<(), VarveError> {
        if !visited.insert(e) {
            return Ok(());
        }
        for (attribute, values) in self.snapshot.entity(e) {
            let Some(schema) = self.snapshot.attribute_by_id(attribute).cloned() else {
                continue;
            };
            for v in values {
                let cascade = match (&v, schema.component) {
                    (Value::Ref(child), true) => Some(*child),
                    _ => None,
                };
                self.retract(e, &schema, v)?;
                if let Some(child) = cascade {
                    self.retract_entity(child, visited)?;
                }
            }
        }
        // Sever incoming references so nothing dangles.
        for fact in self.snapshot.facts_matching(None, None, Some(&Value::Ref(e))) {
            let Some(schema) = self.snapshot.attribute_by_id(fact.attribute).cloned() else {
                continue;
            };
            self.retract(fact.entity, &schema, fact.value)?;
        }
        Ok(())
    }

    fn compare_and_set(
        &mut self,
        e: EntityId,
        schema: &AttributeSchema,
        expected: Option<Value>,
        new: Value,
    ) -> Result<(), VarveError> {
        if schema.cardinality != Cardinality::One {
            return Err(VarveError::SchemaViolation {
                attribute: schema.ident.clone(),
                detail: "compare-and-set requires a cardinality-one attribute".to_string(),
            });
        }
        let current = self.snapshot.live_value(e, schema.id);
        let matches = match (&expected, &current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == cur,
            _ => false,
        };
        if !matches {
            return Err(VarveError::CompareAndSetMismatch {
                attribute: schema.ident.clone(),
                expected: expected
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "absent".to_string()),
                actual: current
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "absent".to_string()),
            });
        }
        self.assert(e, schema, new)
    }
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Process a transaction request against a basis snapshot.
///
/// Pure with respect to the store: the caller owns committing the
/// returned facts atomically.
pub(crate) fn process(
    snapshot: &Snapshot,
    registry: &FunctionRegistry,
    ops: Vec<TxOp>,
    next_entity: u64,
    instant: DateTime<Utc>,
) -> Result<Processed, VarveError> {
    let ops = expand_functions(snapshot, registry, ops)?;
    let prims = MapExpander {
        prims: Vec::new(),
        internal_counter: 0,
    }
    .expand(ops)?;

    let mut resolver = Resolver::new(snapshot, next_entity);
    let resolved = resolve_prims(&mut resolver, prims)?;

    let mut merger = Merger::new(snapshot);
    for op in resolved {
        match op {
            Resolved::Assert { e, schema, v } => merger.assert(e, &schema, v)?,
            Resolved::Retract { e, schema, v } => merger.retract(e, &schema, v)?,
            Resolved::RetractEntity { e } => {
                let mut visited = BTreeSet::new();
                merger.retract_entity(e, &mut visited)?;
            }
            Resolved::Cas {
                e,
                schema,
                expected,
                new,
            } => merger.compare_and_set(e, &schema, expected, new)?,
        }
    }

    let tempids: BTreeMap<String, EntityId> = resolver
        .tempids
        .iter()
        .filter(|(name, _)| !name.starts_with(INTERNAL_TEMPID_PREFIX))
        .map(|(name, id)| (name.clone(), *id))
        .collect();

    if merger.out.is_empty() {
        // Nothing survived elision: the log does not advance.
        return Ok(Processed {
            facts: Vec::new(),
            tempids,
            next_entity,
            tx: None,
        });
    }

    let tx = TxId(resolver.next_entity);
    let mut facts: Vec<Fact> = merger
        .out
        .into_iter()
        .map(|(e, a, v, op)| Fact::new(e, a, v, tx, op))
        .collect();
    facts.push(Fact::assertion(
        tx.entity(),
        builtin::DB_TX_INSTANT,
        Value::Instant(instant),
        tx,
    ));

    Ok(Processed {
        facts,
        tempids,
        next_entity: resolver.next_entity + 1,
        tx: Some(tx),
    })
}

// =============================================================================
// REPORT
// =============================================================================

/// Result of a committed (or fully elided) transaction.
#[derive(Debug, Clone)]
pub struct TxReport {
    /// The snapshot the transaction was processed against.
    pub basis: Snapshot,
    /// The snapshot after the commit; equals `basis` when nothing
    /// survived elision.
    pub snapshot: Snapshot,
    /// The allocated transaction, `None` when nothing was committed.
    pub tx: Option<TxId>,
    /// Every fact laid down by this transaction, including the
    /// transaction entity's own instant.
    pub facts: Vec<Fact>,
    /// Resolution of every client-supplied temporary identifier.
    pub tempids: BTreeMap<String, EntityId>,
}

impl TxReport {
    /// The facts without the transaction entity's own metadata.
    #[must_use]
    pub fn data_facts(&self) -> Vec<&Fact> {
        self.facts
            .iter()
            .filter(|f| Some(f.entity) != self.tx.map(TxId::entity))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
