//! # Pull Module
//!
//! Nested-entity projection: gather a tree of attributes for an entity
//! per a recursive pattern spec.
//!
//! A pattern names attributes (with per-attribute rename, limit, and
//! default options), may match all attributes with a wildcard, traverses
//! forward into referenced entities through a nested pattern, and
//! traverses in reverse through the `ns/_name` ident notation. Component
//! references expand recursively under the wildcard; recursion is bounded
//! by `MAX_PULL_DEPTH` so reference cycles terminate.

use crate::primitives::MAX_PULL_DEPTH;
use crate::schema::AttributeSchema;
use crate::snapshot::Snapshot;
use crate::types::{EntityId, Ident, Value, ValueType, VarveError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// PATTERN
// =============================================================================

/// A recursive projection pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullPattern {
    pub specs: Vec<PullSpec>,
}

impl PullPattern {
    /// Empty pattern; combine with the builder methods below.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Match all attributes of the entity (components expand recursively).
    #[must_use]
    pub fn wildcard(mut self) -> Self {
        self.specs.push(PullSpec::Wildcard);
        self
    }

    /// Project one attribute by ident (reverse notation allowed).
    #[must_use]
    pub fn attr(mut self, ident: impl Into<String>) -> Self {
        self.specs.push(PullSpec::Attr(PullAttr::new(ident)));
        self
    }

    /// Project one attribute with options.
    #[must_use]
    pub fn attr_spec(mut self, spec: PullAttr) -> Self {
        self.specs.push(PullSpec::Attr(spec));
        self
    }
}

/// One entry of a pull pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullSpec {
    /// All attributes of the entity.
    Wildcard,
    /// A named attribute with options.
    Attr(PullAttr),
}

/// A named attribute within a pull pattern.
///
/// `ident` in the reverse notation (`order/_items`) projects the entities
/// referencing the current one instead of following the reference forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullAttr {
    pub ident: Ident,
    /// Key to use in the result map instead of the ident.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<Ident>,
    /// Cap on the number of projected values for cardinality-many
    /// attributes (and reverse traversals).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Value to project when the attribute is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Pattern to apply to referenced entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<PullPattern>,
}

impl PullAttr {
    /// Plain projection of one attribute.
    #[must_use]
    pub fn new(ident: impl Into<String>) -> Self {
        Self {
            ident: Ident::new(ident),
            rename: None,
            limit: None,
            default: None,
            nested: None,
        }
    }

    /// Rename the key in the result map.
    #[must_use]
    pub fn rename(mut self, ident: impl Into<String>) -> Self {
        self.rename = Some(Ident::new(ident));
        self
    }

    /// Cap the number of projected values.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Project a default when the attribute is absent.
    #[must_use]
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Recurse into referenced entities with a nested pattern.
    #[must_use]
    pub fn nested(mut self, pattern: PullPattern) -> Self {
        self.nested = Some(pattern);
        self
    }

    fn key(&self) -> Ident {
        self.rename.clone().unwrap_or_else(|| self.ident.clone())
    }
}

// =============================================================================
// RESULT TREE
// =============================================================================

/// Result of a pull: a scalar, an entity map, or a list of either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PullValue {
    Value(Value),
    Entity(BTreeMap<Ident, PullValue>),
    List(Vec<PullValue>),
}

impl PullValue {
    /// Fetch a key from an entity-map result.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PullValue> {
        match self {
            Self::Entity(map) => map.get(&Ident::new(key)),
            _ => None,
        }
    }

    /// The scalar inside a `Value` result.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Project `entity` through `pattern` against `snapshot`.
pub fn pull(
    snapshot: &Snapshot,
    pattern: &PullPattern,
    entity: EntityId,
) -> Result<PullValue, VarveError> {
    pull_at(snapshot, pattern, entity, 0)
}

fn pull_at(
    snapshot: &Snapshot,
    pattern: &PullPattern,
    entity: EntityId,
    depth: usize,
) -> Result<PullValue, VarveError> {
    let mut map: BTreeMap<Ident, PullValue> = BTreeMap::new();
    for spec in &pattern.specs {
        match spec {
            PullSpec::Wildcard => pull_wildcard(snapshot, entity, depth, &mut map)?,
            PullSpec::Attr(attr) if attr.ident.is_reverse() => {
                pull_reverse(snapshot, entity, attr, depth, &mut map)?;
            }
            PullSpec::Attr(attr) => pull_forward(snapshot, entity, attr, depth, &mut map)?,
        }
    }
    Ok(PullValue::Entity(map))
}

/// Wildcard: every live attribute, components expanded recursively.
fn pull_wildcard(
    snapshot: &Snapshot,
    entity: EntityId,
    depth: usize,
    map: &mut BTreeMap<Ident, PullValue>,
) -> Result<(), VarveError> {
    map.insert(Ident::new("db/id"), PullValue::Value(Value::Ref(entity)));
    for (attr_id, values) in snapshot.entity(entity) {
        let Some(schema) = snapshot.attribute_by_id(attr_id) else {
            continue;
        };
        let mut rendered = Vec::with_capacity(values.len());
        for v in &values {
            rendered.push(render_value(snapshot, schema, v, None, depth)?);
        }
        map.insert(schema.ident.clone(), collapse(schema, rendered));
    }
    Ok(())
}

/// Forward attribute projection.
fn pull_forward(
    snapshot: &Snapshot,
    entity: EntityId,
    attr: &PullAttr,
    depth: usize,
    map: &mut BTreeMap<Ident, PullValue>,
) -> Result<(), VarveError> {
    let schema = snapshot.attribute(&attr.ident)?.clone();
    let mut values = snapshot.live_values(entity, schema.id);
    if let Some(limit) = attr.limit {
        values.truncate(limit);
    }
    if values.is_empty() {
        if let Some(default) = &attr.default {
            map.insert(attr.key(), PullValue::Value(default.clone()));
        }
        return Ok(());
    }
    let mut rendered = Vec::with_capacity(values.len());
    for v in &values {
        rendered.push(render_value(snapshot, &schema, v, attr.nested.as_ref(), depth)?);
    }
    map.insert(attr.key(), collapse(&schema, rendered));
    Ok(())
}

/// Reverse traversal: entities referencing this one through the attribute.
fn pull_reverse(
    snapshot: &Snapshot,
    entity: EntityId,
    attr: &PullAttr,
    depth: usize,
    map: &mut BTreeMap<Ident, PullValue>,
) -> Result<(), VarveError> {
    let forward = attr.ident.forward();
    let schema = snapshot.attribute(&forward)?.clone();
    if schema.value_type != ValueType::Ref {
        return Err(VarveError::SchemaViolation {
            attribute: forward,
            detail: "reverse traversal requires a ref attribute".to_string(),
        });
    }
    let mut sources = snapshot.referencing(entity, schema.id);
    if let Some(limit) = attr.limit {
        sources.truncate(limit);
    }
    if sources.is_empty() {
        if let Some(default) = &attr.default {
            map.insert(attr.key(), PullValue::Value(default.clone()));
        }
        return Ok(());
    }
    let mut rendered = Vec::with_capacity(sources.len());
    for source in sources {
        rendered.push(render_entity(snapshot, attr.nested.as_ref(), source, depth)?);
    }
    // A component has exactly one owner, so reverse through a component
    // attribute projects a single entity rather than a list.
    let value = if schema.component {
        rendered.swap_remove(0)
    } else {
        PullValue::List(rendered)
    };
    map.insert(attr.key(), value);
    Ok(())
}

/// Render one value: plain scalars pass through, references recurse when
/// a nested pattern asks for it or the attribute owns its target.
fn render_value(
    snapshot: &Snapshot,
    schema: &AttributeSchema,
    value: &Value,
    nested: Option<&PullPattern>,
    depth: usize,
) -> Result<PullValue, VarveError> {
    if let Value::Ref(target) = value {
        if let Some(pattern) = nested {
            if depth < MAX_PULL_DEPTH {
                return pull_at(snapshot, pattern, *target, depth.saturating_add(1));
            }
        } else if schema.component && depth < MAX_PULL_DEPTH {
            let wildcard = PullPattern::new().wildcard();
            return pull_at(snapshot, &wildcard, *target, depth.saturating_add(1));
        }
    }
    Ok(PullValue::Value(value.clone()))
}

/// Render a referenced entity for reverse traversal.
fn render_entity(
    snapshot: &Snapshot,
    nested: Option<&PullPattern>,
    entity: EntityId,
    depth: usize,
) -> Result<PullValue, VarveError> {
    match nested {
        Some(pattern) if depth < MAX_PULL_DEPTH => {
            pull_at(snapshot, pattern, entity, depth.saturating_add(1))
        }
        _ => Ok(PullValue::Value(Value::Ref(entity))),
    }
}

/// Cardinality-one projects a scalar, cardinality-many a list.
fn collapse(schema: &AttributeSchema, mut rendered: Vec<PullValue>) -> PullValue {
    match schema.cardinality {
        crate::schema::Cardinality::One => rendered.swap_remove(0),
        crate::schema::Cardinality::Many => PullValue::List(rendered),
    }
}

// =============================================================================
// TESTS
// =============================================================================
