//! # Unification Engine
//!
//! Depth-first backtracking evaluation of a query against one snapshot.
//!
//! The engine maintains a partial binding from variables to values and
//! processes clauses in planner order. For a fact pattern, the bound
//! terms form a lookup prefix into the index layer; each candidate fact
//! extends the binding (consistency-checked), then evaluation recurses
//! into the next clause. A completed pass emits one solution and the
//! search resumes at the most recent choice point.
//!
//! The planner greedily reorders clauses by bound-prefix selectivity.
//! Reordering never changes the solution set; call clauses are only
//! scheduled once their argument variables can be bound.

use super::{
    CallFn, Clause, FindElement, FindSpec, InputSpec, InputValue, Query, QueryResult, ResultItem,
    Term, Var,
};
use crate::pull;
use crate::snapshot::Snapshot;
use crate::types::{Value, VarveError};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

type Binding = BTreeMap<Var, Value>;

// =============================================================================
// RESOLVED CLAUSES
// =============================================================================

/// A term after ident resolution: symbolic identifiers have become `Ref`
/// literals, so evaluation never consults `db/ident` mid-search.
#[derive(Debug, Clone)]
enum RTerm {
    Var(Var),
    Lit(Value),
    Blank,
}

#[derive(Debug, Clone)]
enum RClause {
    Pattern {
        e: RTerm,
        a: RTerm,
        v: RTerm,
    },
    Call {
        func: CallFn,
        args: Vec<RTerm>,
        binding: Var,
    },
}

/// Position of a term within a pattern, for ident resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Entity,
    Attribute,
    Value,
}

fn resolve_term(
    snapshot: &Snapshot,
    term: &Term,
    position: Position,
) -> Result<RTerm, VarveError> {
    match term {
        Term::Var(v) => Ok(RTerm::Var(v.clone())),
        Term::Blank => Ok(RTerm::Blank),
        Term::Lit(value) => Ok(RTerm::Lit(value.clone())),
        Term::Ident(ident) => {
            let entity = if position == Position::Attribute {
                snapshot.attribute(ident)?.id
            } else {
                snapshot.resolve_ident(ident)?
            };
            Ok(RTerm::Lit(Value::Ref(entity)))
        }
    }
}

fn resolve_clauses(snapshot: &Snapshot, clauses: &[Clause]) -> Result<Vec<RClause>, VarveError> {
    let mut resolved = Vec::with_capacity(clauses.len());
    for clause in clauses {
        resolved.push(match clause {
            Clause::Pattern(p) => RClause::Pattern {
                e: resolve_term(snapshot, &p.e, Position::Entity)?,
                a: resolve_term(snapshot, &p.a, Position::Attribute)?,
                v: resolve_term(snapshot, &p.v, Position::Value)?,
            },
            Clause::Call {
                func,
                args,
                binding,
            } => RClause::Call {
                func: *func,
                args: args
                    .iter()
                    .map(|t| resolve_term(snapshot, t, Position::Value))
                    .collect::<Result<_, _>>()?,
                binding: binding.clone(),
            },
        });
    }
    Ok(resolved)
}

// =============================================================================
// PLANNER
// =============================================================================

/// Greedy selectivity ordering.
///
/// At each step, schedule the evaluable clause with the most bound
/// pattern positions (entity heaviest, then value, then attribute); a
/// call clause is evaluable once its arguments are bound and schedules
/// eagerly. Ties keep the original clause order.
fn order_clauses(
    clauses: Vec<RClause>,
    initially_bound: &BTreeSet<Var>,
) -> Result<Vec<RClause>, VarveError> {
    let mut remaining: Vec<Option<RClause>> = clauses.into_iter().map(Some).collect();
    let mut bound = initially_bound.clone();
    let mut ordered = Vec::with_capacity(remaining.len());

    for _ in 0..remaining.len() {
        let mut best: Option<(usize, u32)> = None;
        for (i, slot) in remaining.iter().enumerate() {
            let Some(clause) = slot else { continue };
            let score = match clause {
                RClause::Call { args, .. } => {
                    let ready = args.iter().all(|t| match t {
                        RTerm::Var(v) => bound.contains(v),
                        _ => true,
                    });
                    if ready { Some(100) } else { None }
                }
                RClause::Pattern { e, a, v } => {
                    let mut score = 0;
                    for (term, weight) in [(e, 4u32), (v, 3), (a, 2)] {
                        match term {
                            RTerm::Lit(_) => score += weight,
                            RTerm::Var(var) if bound.contains(var) => score += weight,
                            _ => {}
                        }
                    }
                    Some(score)
                }
            };
            if let Some(score) = score
                && best.is_none_or(|(_, b)| score > b)
            {
                best = Some((i, score));
            }
        }

        let Some((index, _)) = best else {
            return Err(VarveError::MalformedQuery(
                "call clause arguments cannot be bound by any evaluation order".to_string(),
            ));
        };
        let Some(clause) = remaining[index].take() else {
            continue;
        };
        match &clause {
            RClause::Pattern { e, a, v } => {
                for term in [e, a, v] {
                    if let RTerm::Var(var) = term {
                        bound.insert(var.clone());
                    }
                }
            }
            RClause::Call { binding, .. } => {
                bound.insert(binding.clone());
            }
        }
        ordered.push(clause);
    }
    Ok(ordered)
}

// =============================================================================
// INPUT BINDING
// =============================================================================

/// Insert respecting existing bindings; an inconsistent duplicate makes
/// the whole initial binding unsatisfiable.
fn bind_var(binding: &mut Binding, var: &Var, value: Value) -> bool {
    match binding.get(var) {
        Some(existing) => *existing == value,
        None => {
            binding.insert(var.clone(), value);
            true
        }
    }
}

/// Bind declared inputs, fanning out collections into independent
/// initial binding sets.
fn bind_inputs(specs: &[InputSpec], values: &[InputValue]) -> Result<Vec<Binding>, VarveError> {
    if specs.len() != values.len() {
        return Err(VarveError::MalformedQuery(format!(
            "query declares {} inputs but {} were supplied",
            specs.len(),
            values.len()
        )));
    }

    let mut bindings = vec![Binding::new()];
    for (spec, value) in specs.iter().zip(values) {
        match (spec, value) {
            (InputSpec::Scalar(var), InputValue::Scalar(v)) => {
                bindings.retain_mut(|b| bind_var(b, var, v.clone()));
            }
            (InputSpec::Tuple(vars), InputValue::Tuple(vs)) => {
                if vars.len() != vs.len() {
                    return Err(VarveError::MalformedQuery(
                        "tuple input arity mismatch".to_string(),
                    ));
                }
                bindings.retain_mut(|b| {
                    vars.iter()
                        .zip(vs)
                        .all(|(var, v)| bind_var(b, var, v.clone()))
                });
            }
            (InputSpec::Coll(var), InputValue::Coll(vs)) => {
                let mut fanned = Vec::with_capacity(bindings.len() * vs.len());
                for b in &bindings {
                    for v in vs {
                        let mut next = b.clone();
                        if bind_var(&mut next, var, v.clone()) {
                            fanned.push(next);
                        }
                    }
                }
                bindings = fanned;
            }
            (InputSpec::Rel(vars), InputValue::Rel(rows)) => {
                let mut fanned = Vec::new();
                for b in &bindings {
                    for row in rows {
                        if vars.len() != row.len() {
                            return Err(VarveError::MalformedQuery(
                                "relation input arity mismatch".to_string(),
                            ));
                        }
                        let mut next = b.clone();
                        if vars
                            .iter()
                            .zip(row)
                            .all(|(var, v)| bind_var(&mut next, var, v.clone()))
                        {
                            fanned.push(next);
                        }
                    }
                }
                bindings = fanned;
            }
            _ => {
                return Err(VarveError::MalformedQuery(
                    "input value does not match its declared shape".to_string(),
                ));
            }
        }
    }
    Ok(bindings)
}

// =============================================================================
// SEARCH
// =============================================================================

struct SearchCtx<'a> {
    snapshot: &'a Snapshot,
    clauses: &'a [RClause],
    started: Instant,
    deadline: Option<Instant>,
    first_only: bool,
    solutions: Vec<Binding>,
}

impl SearchCtx<'_> {
    fn check_budget(&self) -> Result<(), VarveError> {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(VarveError::QueryTimeout {
                elapsed_ms: self.started.elapsed().as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// The value a term contributes to the lookup prefix.
enum Component {
    /// Term is unbound: wildcard position.
    Unbound,
    /// Term is bound to a value usable in this position.
    Bound(Value),
    /// Term is bound to something that can never match this position
    /// (a non-ref in an entity or attribute slot).
    Impossible,
}

fn lookup_component(term: &RTerm, binding: &Binding, entity_position: bool) -> Component {
    let value = match term {
        RTerm::Blank => None,
        RTerm::Lit(v) => Some(v.clone()),
        RTerm::Var(var) => binding.get(var).cloned(),
    };
    match value {
        Some(v) if entity_position && v.as_entity().is_none() => Component::Impossible,
        Some(v) => Component::Bound(v),
        None => Component::Unbound,
    }
}

fn unify(term: &RTerm, actual: Value, binding: &mut Binding, trail: &mut Vec<Var>) -> bool {
    match term {
        RTerm::Blank => true,
        RTerm::Lit(expected) => *expected == actual,
        RTerm::Var(var) => match binding.get(var) {
            Some(existing) => *existing == actual,
            None => {
                binding.insert(var.clone(), actual);
                trail.push(var.clone());
                true
            }
        },
    }
}

fn undo(binding: &mut Binding, trail: &[Var]) {
    for var in trail {
        binding.remove(var);
    }
}

/// Evaluate one call clause against the current binding.
fn eval_call(
    snapshot: &Snapshot,
    func: CallFn,
    args: &[Value],
) -> Result<Value, VarveError> {
    let arity = |expected: usize| -> Result<(), VarveError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(VarveError::MalformedQuery(format!(
                "call expects {} arguments, got {}",
                expected,
                args.len()
            )))
        }
    };

    match func {
        CallFn::GetElse => {
            arity(3)?;
            let (Some(entity), Some(attribute)) = (args[0].as_entity(), args[1].as_entity())
            else {
                return Err(VarveError::MalformedQuery(
                    "get-else expects an entity and an attribute".to_string(),
                ));
            };
            Ok(snapshot
                .live_value(entity, attribute)
                .unwrap_or_else(|| args[2].clone()))
        }
        CallFn::Add | CallFn::Subtract | CallFn::Multiply => {
            arity(2)?;
            numeric_op(func, &args[0], &args[1])
        }
        CallFn::Concat => {
            arity(2)?;
            match (&args[0], &args[1]) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::string(format!("{}{}", a, b))),
                _ => Err(VarveError::MalformedQuery(
                    "concat expects two strings".to_string(),
                )),
            }
        }
    }
}

fn numeric_op(func: CallFn, a: &Value, b: &Value) -> Result<Value, VarveError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(match func {
            CallFn::Add => x.saturating_add(*y),
            CallFn::Subtract => x.saturating_sub(*y),
            _ => x.saturating_mul(*y),
        })),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let x = match a {
                Value::Int(i) => *i as f64,
                Value::Float(f) => f.0,
                _ => 0.0,
            };
            let y = match b {
                Value::Int(i) => *i as f64,
                Value::Float(f) => f.0,
                _ => 0.0,
            };
            Ok(Value::float(match func {
                CallFn::Add => x + y,
                CallFn::Subtract => x - y,
                _ => x * y,
            }))
        }
        _ => Err(VarveError::MalformedQuery(format!(
            "numeric call over non-numeric values {} and {}",
            a, b
        ))),
    }
}

/// Depth-first search over the clause list. Returns `true` when the
/// caller should stop seeking further solutions.
fn solve(ctx: &mut SearchCtx<'_>, idx: usize, binding: &mut Binding) -> Result<bool, VarveError> {
    ctx.check_budget()?;

    if idx == ctx.clauses.len() {
        ctx.solutions.push(binding.clone());
        return Ok(ctx.first_only);
    }

    match &ctx.clauses[idx] {
        RClause::Pattern { e, a, v } => {
            let components = (
                lookup_component(e, binding, true),
                lookup_component(a, binding, true),
                lookup_component(v, binding, false),
            );
            let (e_val, a_val, v_val) = match components {
                (Component::Impossible, _, _)
                | (_, Component::Impossible, _)
                | (_, _, Component::Impossible) => return Ok(false),
                (e, a, v) => (
                    match e {
                        Component::Bound(v) => Some(v),
                        _ => None,
                    },
                    match a {
                        Component::Bound(v) => Some(v),
                        _ => None,
                    },
                    match v {
                        Component::Bound(v) => Some(v),
                        _ => None,
                    },
                ),
            };
            let candidates = ctx.snapshot.facts_matching(
                e_val.as_ref().and_then(Value::as_entity),
                a_val.as_ref().and_then(Value::as_entity),
                v_val.as_ref(),
            );
            for fact in candidates {
                ctx.check_budget()?;
                let mut trail = Vec::new();
                let matched = unify(e, Value::Ref(fact.entity), binding, &mut trail)
                    && unify(a, Value::Ref(fact.attribute), binding, &mut trail)
                    && unify(v, fact.value.clone(), binding, &mut trail);
                let stop = if matched {
                    solve(ctx, idx + 1, binding)?
                } else {
                    false
                };
                undo(binding, &trail);
                if stop {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        RClause::Call {
            func,
            args,
            binding: result_var,
        } => {
            let mut arg_values = Vec::with_capacity(args.len());
            for arg in args {
                match arg {
                    RTerm::Lit(v) => arg_values.push(v.clone()),
                    RTerm::Var(var) => match binding.get(var) {
                        Some(v) => arg_values.push(v.clone()),
                        // The planner schedules calls after their
                        // arguments; an unbound argument is a plan bug
                        // surfaced as an unsatisfied clause.
                        None => return Ok(false),
                    },
                    RTerm::Blank => {
                        return Err(VarveError::MalformedQuery(
                            "call argument cannot be a blank".to_string(),
                        ));
                    }
                }
            }
            let result = eval_call(ctx.snapshot, *func, &arg_values)?;
            let mut trail = Vec::new();
            let matched = unify(
                &RTerm::Var(result_var.clone()),
                result,
                binding,
                &mut trail,
            );
            let stop = if matched {
                solve(ctx, idx + 1, binding)?
            } else {
                false
            };
            undo(binding, &trail);
            Ok(stop)
        }
    }
}

// =============================================================================
// PROJECTION
// =============================================================================

fn element_value(element: &FindElement, binding: &Binding) -> Result<Value, VarveError> {
    let var = match element {
        FindElement::Var(v) | FindElement::Agg { var: v, .. } | FindElement::Pull { var: v, .. } => v,
    };
    binding.get(var).cloned().ok_or_else(|| {
        VarveError::MalformedQuery(format!("variable {} unbound in solution", var.as_str()))
    })
}

fn materialize(
    snapshot: &Snapshot,
    element: &FindElement,
    value: Value,
) -> Result<ResultItem, VarveError> {
    match element {
        FindElement::Pull { pattern, .. } => {
            let Some(entity) = value.as_entity() else {
                return Err(VarveError::MalformedQuery(
                    "pull projection over a non-entity value".to_string(),
                ));
            };
            Ok(ResultItem::Pull(pull::pull(snapshot, pattern, entity)?))
        }
        _ => Ok(ResultItem::Value(value)),
    }
}

fn shape(find: &FindSpec, mut rows: Vec<Vec<ResultItem>>) -> QueryResult {
    match find {
        FindSpec::Rel(_) => QueryResult::Rel(rows),
        FindSpec::Tuple(_) => QueryResult::Tuple(rows.drain(..).next()),
        FindSpec::Coll(_) => QueryResult::Coll(
            rows.into_iter()
                .filter_map(|mut row| row.drain(..).next())
                .collect(),
        ),
        FindSpec::Scalar(_) => {
            QueryResult::Scalar(rows.drain(..).next().and_then(|mut row| row.drain(..).next()))
        }
    }
}

fn project(
    snapshot: &Snapshot,
    query: &Query,
    solutions: &[Binding],
) -> Result<QueryResult, VarveError> {
    let elements = query.find.elements();

    // Distinct projections of every solution onto the find variables.
    let mut distinct: BTreeSet<Vec<Value>> = BTreeSet::new();
    for solution in solutions {
        let mut projected = Vec::with_capacity(elements.len());
        for el in &elements {
            projected.push(element_value(el, solution)?);
        }
        distinct.insert(projected);
    }

    let has_agg = elements
        .iter()
        .any(|el| matches!(el, FindElement::Agg { .. }));

    if !has_agg {
        let mut rows = Vec::with_capacity(distinct.len());
        for projected in distinct {
            let mut row = Vec::with_capacity(elements.len());
            for (el, value) in elements.iter().zip(projected) {
                row.push(materialize(snapshot, el, value)?);
            }
            rows.push(row);
        }
        return Ok(shape(&query.find, rows));
    }

    // Implicit grouping: the non-aggregated elements form the group key.
    let mut groups: BTreeMap<Vec<Value>, Vec<Vec<Value>>> = BTreeMap::new();
    for projected in distinct {
        let mut key = Vec::new();
        let mut agg_values = Vec::new();
        for (el, value) in elements.iter().zip(projected) {
            match el {
                FindElement::Agg { .. } => agg_values.push(value),
                _ => key.push(value),
            }
        }
        groups.entry(key).or_default().push(agg_values);
    }

    let mut rows = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut row = Vec::with_capacity(elements.len());
        let mut key_iter = key.into_iter();
        let mut agg_index = 0;
        for el in &elements {
            match el {
                FindElement::Agg { func, .. } => {
                    let values: Vec<Value> = members
                        .iter()
                        .filter_map(|m| m.get(agg_index).cloned())
                        .collect();
                    row.push(ResultItem::Value(func.apply(&values)?));
                    agg_index += 1;
                }
                _ => {
                    let Some(value) = key_iter.next() else {
                        return Err(VarveError::MalformedQuery(
                            "group key arity mismatch".to_string(),
                        ));
                    };
                    row.push(materialize(snapshot, el, value)?);
                }
            }
        }
        rows.push(row);
    }
    Ok(shape(&query.find, rows))
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Evaluate a query against a snapshot with the given inputs.
///
/// Structural errors surface as `MalformedQuery` before any search;
/// symbolic identifiers that do not resolve surface as
/// `UnknownIdentifier`; exceeding the wall-clock budget surfaces as
/// `QueryTimeout` with partial results discarded.
pub fn execute(
    snapshot: &Snapshot,
    query: &Query,
    inputs: &[InputValue],
) -> Result<QueryResult, VarveError> {
    query.validate()?;

    let initial = bind_inputs(&query.inputs, inputs)?;
    let resolved = resolve_clauses(snapshot, &query.clauses)?;

    let mut initially_bound = BTreeSet::new();
    for binding in &initial {
        initially_bound.extend(binding.keys().cloned());
    }
    let ordered = order_clauses(resolved, &initially_bound)?;

    let has_agg = query
        .find
        .elements()
        .iter()
        .any(|el| matches!(el, FindElement::Agg { .. }));
    let started = Instant::now();
    let mut ctx = SearchCtx {
        snapshot,
        clauses: &ordered,
        started,
        deadline: query.timeout_ms.map(|ms| started + Duration::from_millis(ms)),
        first_only: query.find.is_first_only() && !has_agg,
        solutions: Vec::new(),
    };

    for mut binding in initial {
        if solve(&mut ctx, 0, &mut binding)? {
            break;
        }
    }

    project(snapshot, query, &ctx.solutions)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::query::AggregateFn;
    use crate::schema::Cardinality;
    use crate::transact::{AttributeDef, EntityRef, TxOp};
    use crate::types::ValueType;

    /// Three people with names, ages, and a couple of friendships.
    fn people_db() -> Database {
        let mut db = Database::in_memory();
        db.transact(vec![
            AttributeDef::new("person/name", ValueType::String, Cardinality::One)
                .unique_identity()
                .build(),
            AttributeDef::new("person/age", ValueType::Int, Cardinality::One).build(),
            AttributeDef::new("person/friend", ValueType::Ref, Cardinality::Many).build(),
        ])
        .expect("schema");
        db.transact(vec![
            TxOp::assert(EntityRef::tempid("ada"), "person/name", Value::string("ada")),
            TxOp::assert(EntityRef::tempid("ada"), "person/age", Value::Int(36)),
            TxOp::assert(EntityRef::tempid("grace"), "person/name", Value::string("grace")),
            TxOp::assert(EntityRef::tempid("grace"), "person/age", Value::Int(85)),
            TxOp::assert(EntityRef::tempid("edith"), "person/name", Value::string("edith")),
            TxOp::assert_ref(
                EntityRef::tempid("ada"),
                "person/friend",
                EntityRef::tempid("grace"),
            ),
            TxOp::assert_ref(
                EntityRef::tempid("edith"),
                "person/friend",
                EntityRef::tempid("grace"),
            ),
        ])
        .expect("people");
        db
    }

    fn names_of(result: &QueryResult) -> Vec<String> {
        result
            .rows()
            .iter()
            .filter_map(|row| match row.first().and_then(ResultItem::as_value) {
                Some(Value::Str(s)) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn pattern_enumerates_all_matches() {
        let db = people_db();
        let q = Query::find_rel(&["name"]).pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::var("name"),
        );
        let result = db.query(&q, &[]).expect("query");
        assert_eq!(names_of(&result), vec!["ada", "edith", "grace"]);
    }

    #[test]
    fn join_through_shared_variable() {
        let db = people_db();
        // Friends of people named ada.
        let q = Query::find_coll("friend_name")
            .pattern(
                Term::var("e"),
                Term::ident("person/name"),
                Term::lit(Value::string("ada")),
            )
            .pattern(
                Term::var("e"),
                Term::ident("person/friend"),
                Term::var("f"),
            )
            .pattern(
                Term::var("f"),
                Term::ident("person/name"),
                Term::var("friend_name"),
            );
        let result = db.query(&q, &[]).expect("query");
        let QueryResult::Coll(items) = result else {
            unreachable!("find_coll yields a coll result");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_value(), Some(&Value::string("grace")));
    }

    #[test]
    fn no_matching_facts_yields_empty_set_not_error() {
        let db = people_db();
        let q = Query::find_rel(&["e"]).pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::lit(Value::string("missing-value")),
        );
        let result = db.query(&q, &[]).expect("query");
        assert!(result.is_empty());
    }

    #[test]
    fn unknown_attribute_ident_is_an_error() {
        let db = people_db();
        let q = Query::find_rel(&["e"]).pattern(
            Term::var("e"),
            Term::ident("person/height"),
            Term::var("h"),
        );
        assert!(matches!(
            db.query(&q, &[]),
            Err(VarveError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn scalar_shape_stops_after_first_solution() {
        let db = people_db();
        let q = Query::find_scalar("name").pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::var("name"),
        );
        let QueryResult::Scalar(Some(item)) = db.query(&q, &[]).expect("query") else {
            unreachable!("scalar query against non-empty data yields one value");
        };
        assert!(item.as_value().is_some());
    }

    #[test]
    fn tuple_shape_returns_none_on_empty() {
        let db = people_db();
        let q = Query::find_tuple(&["e"]).pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::lit(Value::string("nobody")),
        );
        assert_eq!(
            db.query(&q, &[]).expect("query"),
            QueryResult::Tuple(None)
        );
    }

    #[test]
    fn coll_input_spawns_independent_bindings() {
        let db = people_db();
        let q = Query::find_rel(&["e", "name"])
            .input(InputSpec::Coll(Var::new("name")))
            .pattern(
                Term::var("e"),
                Term::ident("person/name"),
                Term::var("name"),
            );
        let result = db
            .query(
                &q,
                &[InputValue::Coll(vec![
                    Value::string("ada"),
                    Value::string("grace"),
                    Value::string("nobody"),
                ])],
            )
            .expect("query");
        assert_eq!(result.rows().len(), 2);
    }

    #[test]
    fn get_else_supplies_default() {
        let db = people_db();
        // edith has no age; default to -1.
        let q = Query::find_rel(&["name", "age"])
            .pattern(
                Term::var("e"),
                Term::ident("person/name"),
                Term::var("name"),
            )
            .clause(Clause::call(
                CallFn::GetElse,
                vec![
                    Term::var("e"),
                    Term::ident("person/age"),
                    Term::lit(Value::Int(-1)),
                ],
                "age",
            ));
        let result = db.query(&q, &[]).expect("query");
        let edith_age = result
            .rows()
            .iter()
            .find(|row| row[0].as_value() == Some(&Value::string("edith")))
            .and_then(|row| row[1].as_value().cloned());
        assert_eq!(edith_age, Some(Value::Int(-1)));
    }

    #[test]
    fn aggregates_group_by_bare_elements() {
        let db = people_db();
        // Count people referencing each friend.
        let q = Query::new(crate::query::FindSpec::Rel(vec![
            FindElement::var("friend"),
            FindElement::agg(AggregateFn::Count, "e"),
        ]))
        .pattern(
            Term::var("e"),
            Term::ident("person/friend"),
            Term::var("friend"),
        );
        let result = db.query(&q, &[]).expect("query");
        assert_eq!(result.rows().len(), 1);
        assert_eq!(
            result.rows()[0][1].as_value(),
            Some(&Value::Int(2)),
            "grace is referenced by ada and edith"
        );
    }

    #[test]
    fn clause_order_does_not_change_solutions() {
        let db = people_db();
        let forward = Query::find_rel(&["name", "age"])
            .pattern(
                Term::var("e"),
                Term::ident("person/name"),
                Term::var("name"),
            )
            .pattern(Term::var("e"), Term::ident("person/age"), Term::var("age"));
        let reversed = Query::find_rel(&["name", "age"])
            .pattern(Term::var("e"), Term::ident("person/age"), Term::var("age"))
            .pattern(
                Term::var("e"),
                Term::ident("person/name"),
                Term::var("name"),
            );
        assert_eq!(
            db.query(&forward, &[]).expect("forward"),
            db.query(&reversed, &[]).expect("reversed")
        );
    }

    #[test]
    fn zero_budget_times_out() {
        let db = people_db();
        let q = Query::find_rel(&["e", "a", "v"])
            .pattern(Term::var("e"), Term::var("a"), Term::var("v"))
            .with_timeout(0);
        assert!(matches!(
            db.query(&q, &[]),
            Err(VarveError::QueryTimeout { .. })
        ));
    }

    #[test]
    fn blank_matches_without_binding() {
        let db = people_db();
        let q = Query::find_coll("e").pattern(
            Term::var("e"),
            Term::ident("person/friend"),
            Term::Blank,
        );
        let QueryResult::Coll(items) = db.query(&q, &[]).expect("query") else {
            unreachable!("find_coll yields a coll result");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn literal_entity_in_value_position_joins_refs() {
        let db = people_db();
        let snap = db.current_snapshot();
        let grace = snap
            .resolve_ident(&crate::types::Ident::new("person/name"))
            .ok()
            .and_then(|attr| snap.entity_with_value(attr, &Value::string("grace")))
            .expect("grace exists");

        let q = Query::find_coll("e").pattern(
            Term::var("e"),
            Term::ident("person/friend"),
            Term::lit(Value::Ref(grace)),
        );
        let QueryResult::Coll(items) = db.query(&q, &[]).expect("query") else {
            unreachable!("find_coll yields a coll result");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn bound_non_entity_in_entity_position_matches_nothing() {
        let db = people_db();
        let q = Query::find_rel(&["v"])
            .input(InputSpec::Scalar(Var::new("e")))
            .pattern(Term::var("e"), Term::ident("person/name"), Term::var("v"));
        let result = db
            .query(&q, &[InputValue::Scalar(Value::Int(42))])
            .expect("query");
        assert!(result.is_empty());
    }
}
