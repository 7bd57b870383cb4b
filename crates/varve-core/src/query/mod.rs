//! # Query Module
//!
//! Typed query AST for the unification engine.
//!
//! A query is data: a `find` spec (projection and result shape), an `in`
//! spec (named external inputs), and an ordered `where` sequence of tagged
//! clause variants. Queries are built through the builder API below or
//! deserialized from the wire; there is no stringly-typed query language
//! in the core.
//!
//! - Map questions to structured unification operations
//! - Structural validation happens before evaluation, never mid-search
//! - Clause order never affects the solution set, only cost

mod aggregate;
mod engine;

pub use aggregate::AggregateFn;
pub use engine::execute;

use crate::pull::{PullPattern, PullValue};
use crate::types::{Ident, Value, VarveError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// TERMS & CLAUSES
// =============================================================================

/// A named logic variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Var(pub String);

impl Var {
    /// Create a new variable.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the variable name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One position of a fact pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// A logic variable: binds on first use, must agree afterwards.
    Var(Var),
    /// A literal value that candidate facts must equal.
    Lit(Value),
    /// A symbolic identifier, resolved through `db/ident` before
    /// evaluation; `UnknownIdentifier` if it does not resolve.
    Ident(Ident),
    /// Matches anything, never binds.
    Blank,
}

impl Term {
    /// Variable term helper.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(Var::new(name))
    }

    /// Literal term helper.
    #[must_use]
    pub fn lit(value: Value) -> Self {
        Self::Lit(value)
    }

    /// Ident term helper.
    #[must_use]
    pub fn ident(ident: impl Into<String>) -> Self {
        Self::Ident(Ident::new(ident))
    }
}

/// A fact pattern `[entity attribute value]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub e: Term,
    pub a: Term,
    pub v: Term,
}

impl Pattern {
    /// Create a pattern from three terms.
    #[must_use]
    pub fn new(e: Term, a: Term, v: Term) -> Self {
        Self { e, a, v }
    }
}

/// Built-in derived-value functions for call clauses.
///
/// A closed set of tagged variants; there is no open-ended dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallFn {
    /// `(get-else entity attribute default)` — read an attribute of a
    /// bound entity, falling back to the default when absent.
    GetElse,
    /// `(add a b)` — numeric addition.
    Add,
    /// `(subtract a b)` — numeric subtraction.
    Subtract,
    /// `(multiply a b)` — numeric multiplication.
    Multiply,
    /// `(concat a b)` — string concatenation.
    Concat,
}

/// One entry of the `where` sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    /// A fact pattern evaluated against the index layer.
    Pattern(Pattern),
    /// A function call `(fn arg...)` binding its result to a variable.
    Call {
        func: CallFn,
        args: Vec<Term>,
        binding: Var,
    },
}

impl Clause {
    /// Pattern clause helper.
    #[must_use]
    pub fn pattern(e: Term, a: Term, v: Term) -> Self {
        Self::Pattern(Pattern::new(e, a, v))
    }

    /// Call clause helper.
    #[must_use]
    pub fn call(func: CallFn, args: Vec<Term>, binding: impl Into<String>) -> Self {
        Self::Call {
            func,
            args,
            binding: Var::new(binding),
        }
    }
}

// =============================================================================
// FIND SPEC
// =============================================================================

/// One projected element of the find spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindElement {
    /// Project the variable's bound value.
    Var(Var),
    /// Aggregate over the variable across solutions agreeing on the
    /// other find elements (implicit grouping).
    Agg { func: AggregateFn, var: Var },
    /// Project the entity bound to the variable through a pull pattern.
    Pull { var: Var, pattern: PullPattern },
}

impl FindElement {
    /// Variable element helper.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(Var::new(name))
    }

    /// Aggregate element helper.
    #[must_use]
    pub fn agg(func: AggregateFn, name: impl Into<String>) -> Self {
        Self::Agg {
            func,
            var: Var::new(name),
        }
    }

    /// Pull element helper.
    #[must_use]
    pub fn pull(name: impl Into<String>, pattern: PullPattern) -> Self {
        Self::Pull {
            var: Var::new(name),
            pattern,
        }
    }

    fn var_name(&self) -> &Var {
        match self {
            Self::Var(v) | Self::Agg { var: v, .. } | Self::Pull { var: v, .. } => v,
        }
    }
}

/// Result shape of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindSpec {
    /// Collection of tuples (the default shape).
    Rel(Vec<FindElement>),
    /// First solution, projected as one tuple.
    Tuple(Vec<FindElement>),
    /// One element per solution, without tuple wrapping.
    Coll(FindElement),
    /// First solution, one value.
    Scalar(FindElement),
}

impl FindSpec {
    pub(crate) fn elements(&self) -> Vec<&FindElement> {
        match self {
            Self::Rel(els) | Self::Tuple(els) => els.iter().collect(),
            Self::Coll(el) | Self::Scalar(el) => vec![el],
        }
    }

    pub(crate) fn is_first_only(&self) -> bool {
        matches!(self, Self::Tuple(_) | Self::Scalar(_))
    }
}

// =============================================================================
// IN SPEC
// =============================================================================

/// Declared external inputs, bound before clause evaluation begins.
///
/// The snapshot itself is passed alongside the query, not through the
/// input list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSpec {
    /// One scalar bound to one variable.
    Scalar(Var),
    /// One tuple bound across several variables.
    Tuple(Vec<Var>),
    /// A collection of scalars; each element spawns an independent set of
    /// initial bindings.
    Coll(Var),
    /// A collection of tuples; each row spawns an independent set of
    /// initial bindings.
    Rel(Vec<Var>),
}

/// Value supplied for an `InputSpec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputValue {
    Scalar(Value),
    Tuple(Vec<Value>),
    Coll(Vec<Value>),
    Rel(Vec<Vec<Value>>),
}

// =============================================================================
// QUERY
// =============================================================================

/// A declarative query: find spec, input spec, where clauses, and an
/// optional wall-clock budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub find: FindSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputSpec>,
    pub clauses: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Query {
    /// Create a query with the given find spec and no clauses yet.
    #[must_use]
    pub fn new(find: FindSpec) -> Self {
        Self {
            find,
            inputs: Vec::new(),
            clauses: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Shorthand for a relation query over named variables.
    #[must_use]
    pub fn find_rel(vars: &[&str]) -> Self {
        Self::new(FindSpec::Rel(
            vars.iter().map(|v| FindElement::var(*v)).collect(),
        ))
    }

    /// Shorthand for a collection-of-scalars query over one variable.
    #[must_use]
    pub fn find_coll(var: &str) -> Self {
        Self::new(FindSpec::Coll(FindElement::var(var)))
    }

    /// Shorthand for a single-scalar query over one variable.
    #[must_use]
    pub fn find_scalar(var: &str) -> Self {
        Self::new(FindSpec::Scalar(FindElement::var(var)))
    }

    /// Shorthand for a single-tuple query over named variables.
    #[must_use]
    pub fn find_tuple(vars: &[&str]) -> Self {
        Self::new(FindSpec::Tuple(
            vars.iter().map(|v| FindElement::var(*v)).collect(),
        ))
    }

    /// Declare an external input.
    #[must_use]
    pub fn input(mut self, spec: InputSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Append a where clause.
    #[must_use]
    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Append a fact pattern clause.
    #[must_use]
    pub fn pattern(self, e: Term, a: Term, v: Term) -> Self {
        self.clause(Clause::pattern(e, a, v))
    }

    /// Set the wall-clock budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Variables that some clause or input can bind.
    fn boundable_vars(&self) -> BTreeSet<&Var> {
        let mut vars = BTreeSet::new();
        for spec in &self.inputs {
            match spec {
                InputSpec::Scalar(v) | InputSpec::Coll(v) => {
                    vars.insert(v);
                }
                InputSpec::Tuple(vs) | InputSpec::Rel(vs) => {
                    vars.extend(vs.iter());
                }
            }
        }
        for clause in &self.clauses {
            match clause {
                Clause::Pattern(p) => {
                    for term in [&p.e, &p.a, &p.v] {
                        if let Term::Var(v) = term {
                            vars.insert(v);
                        }
                    }
                }
                Clause::Call { binding, .. } => {
                    vars.insert(binding);
                }
            }
        }
        vars
    }

    /// Structural validation, performed before evaluation begins.
    ///
    /// Everything caught here is a `MalformedQuery`; data-dependent
    /// conditions (no matches, unresolved idents) are not structural and
    /// surface during evaluation instead.
    pub fn validate(&self) -> Result<(), VarveError> {
        if self.clauses.is_empty() {
            return Err(VarveError::MalformedQuery(
                "query has no where clauses".to_string(),
            ));
        }
        if self.clauses.len() > crate::primitives::MAX_QUERY_CLAUSES {
            return Err(VarveError::MalformedQuery(format!(
                "query has {} clauses, maximum is {}",
                self.clauses.len(),
                crate::primitives::MAX_QUERY_CLAUSES
            )));
        }

        let boundable = self.boundable_vars();
        let elements = self.find.elements();
        if elements.is_empty() {
            return Err(VarveError::MalformedQuery(
                "find spec projects nothing".to_string(),
            ));
        }
        for el in &elements {
            let var = el.var_name();
            if !boundable.contains(var) {
                return Err(VarveError::MalformedQuery(format!(
                    "find variable {} is never bound",
                    var.as_str()
                )));
            }
        }

        // Each variable may appear in at most one pull projection.
        let mut pulled: BTreeSet<&Var> = BTreeSet::new();
        for el in &elements {
            if let FindElement::Pull { var, .. } = el
                && !pulled.insert(var)
            {
                return Err(VarveError::MalformedQuery(format!(
                    "variable {} appears in two pull projections",
                    var.as_str()
                )));
            }
        }

        // An aggregated variable cannot also be projected bare: it would
        // be its own group key and the aggregate would be degenerate.
        for el in &elements {
            if let FindElement::Agg { var, .. } = el
                && elements
                    .iter()
                    .any(|other| matches!(other, FindElement::Var(v) if v == var))
            {
                return Err(VarveError::MalformedQuery(format!(
                    "variable {} is both aggregated and projected bare",
                    var.as_str()
                )));
            }
        }

        // Call arguments must be boundable by something.
        for clause in &self.clauses {
            if let Clause::Call { args, binding, .. } = clause {
                for arg in args {
                    if matches!(arg, Term::Blank) {
                        return Err(VarveError::MalformedQuery(
                            "call argument cannot be a blank".to_string(),
                        ));
                    }
                    if let Term::Var(v) = arg {
                        if v == binding {
                            return Err(VarveError::MalformedQuery(format!(
                                "call binding {} depends on itself",
                                v.as_str()
                            )));
                        }
                        if !boundable.contains(v) {
                            return Err(VarveError::MalformedQuery(format!(
                                "call argument {} is never bound",
                                v.as_str()
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// One projected cell of a result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultItem {
    Value(Value),
    Pull(PullValue),
}

impl ResultItem {
    /// The scalar inside a value cell.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Pull(_) => None,
        }
    }
}

/// Query result, shaped per the find spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    Rel(Vec<Vec<ResultItem>>),
    Tuple(Option<Vec<ResultItem>>),
    Coll(Vec<ResultItem>),
    Scalar(Option<ResultItem>),
}

impl QueryResult {
    /// Number of solutions in the result.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Rel(rows) => rows.len(),
            Self::Coll(items) => items.len(),
            Self::Tuple(row) => usize::from(row.is_some()),
            Self::Scalar(item) => usize::from(item.is_some()),
        }
    }

    /// Whether the result is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The rows of a relation result.
    #[must_use]
    pub fn rows(&self) -> &[Vec<ResultItem>] {
        match self {
            Self::Rel(rows) => rows,
            _ => &[],
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pull::PullPattern;

    fn name_pattern() -> Clause {
        Clause::pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::var("name"),
        )
    }

    #[test]
    fn builder_assembles_query() {
        let q = Query::find_rel(&["e", "name"])
            .clause(name_pattern())
            .with_timeout(250);
        assert_eq!(q.clauses.len(), 1);
        assert_eq!(q.timeout_ms, Some(250));
        assert!(q.validate().is_ok());
    }

    #[test]
    fn empty_where_is_malformed() {
        let q = Query::find_scalar("e");
        assert!(matches!(
            q.validate(),
            Err(VarveError::MalformedQuery(_))
        ));
    }

    #[test]
    fn unbound_find_variable_is_malformed() {
        let q = Query::find_rel(&["e", "age"]).clause(name_pattern());
        assert!(matches!(
            q.validate(),
            Err(VarveError::MalformedQuery(_))
        ));
    }

    #[test]
    fn duplicate_pull_variable_is_malformed() {
        let q = Query::new(FindSpec::Rel(vec![
            FindElement::pull("e", PullPattern::new().wildcard()),
            FindElement::pull("e", PullPattern::new().attr("person/name")),
        ]))
        .clause(name_pattern());
        assert!(matches!(
            q.validate(),
            Err(VarveError::MalformedQuery(_))
        ));
    }

    #[test]
    fn aggregated_variable_cannot_be_bare() {
        let q = Query::new(FindSpec::Rel(vec![
            FindElement::var("name"),
            FindElement::agg(AggregateFn::Count, "name"),
        ]))
        .clause(name_pattern());
        assert!(matches!(
            q.validate(),
            Err(VarveError::MalformedQuery(_))
        ));
    }

    #[test]
    fn self_referential_call_is_malformed() {
        let q = Query::find_scalar("x").clause(Clause::call(
            CallFn::Add,
            vec![Term::var("x"), Term::lit(Value::Int(1))],
            "x",
        ));
        assert!(matches!(
            q.validate(),
            Err(VarveError::MalformedQuery(_))
        ));
    }

    #[test]
    fn input_binds_find_variable() {
        let q = Query::find_scalar("needle")
            .input(InputSpec::Scalar(Var::new("needle")))
            .clause(Clause::pattern(
                Term::var("e"),
                Term::ident("person/name"),
                Term::var("needle"),
            ));
        assert!(q.validate().is_ok());
    }

    #[test]
    fn query_serde_roundtrip() {
        let q = Query::find_rel(&["e"])
            .input(InputSpec::Coll(Var::new("name")))
            .clause(name_pattern());
        let json = serde_json::to_string(&q).expect("serialize");
        let back: Query = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(q, back);
    }
}
