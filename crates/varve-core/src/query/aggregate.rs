//! # Aggregate Functions
//!
//! Aggregates operate over the multiset of values a variable takes across
//! all solutions that agree on the other find elements; the
//! non-aggregated elements form the implicit group key.

use crate::types::{Value, VarveError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The built-in aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregateFn {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    Median,
}

impl AggregateFn {
    /// Apply the aggregate to one group's value multiset.
    ///
    /// Groups are never empty: a group only exists because at least one
    /// solution produced it.
    pub fn apply(self, values: &[Value]) -> Result<Value, VarveError> {
        match self {
            Self::Count => Ok(Value::Int(values.len() as i64)),
            Self::CountDistinct => {
                let distinct: BTreeSet<&Value> = values.iter().collect();
                Ok(Value::Int(distinct.len() as i64))
            }
            Self::Min => values
                .iter()
                .min()
                .cloned()
                .ok_or_else(|| VarveError::MalformedQuery("aggregate over empty group".to_string())),
            Self::Max => values
                .iter()
                .max()
                .cloned()
                .ok_or_else(|| VarveError::MalformedQuery("aggregate over empty group".to_string())),
            Self::Sum => sum(values),
            Self::Avg => {
                let total = as_f64_sum(values)?;
                Ok(Value::float(total / values.len() as f64))
            }
            Self::Median => median(values),
        }
    }
}

/// Numeric view of a value for sum/avg/median.
fn as_numeric(value: &Value) -> Result<f64, VarveError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(f.0),
        other => Err(VarveError::MalformedQuery(format!(
            "numeric aggregate over non-numeric value {}",
            other
        ))),
    }
}

fn as_f64_sum(values: &[Value]) -> Result<f64, VarveError> {
    let mut total = 0.0;
    for v in values {
        total += as_numeric(v)?;
    }
    Ok(total)
}

/// Integer inputs stay integers; any float input promotes the sum.
fn sum(values: &[Value]) -> Result<Value, VarveError> {
    let any_float = values.iter().any(|v| matches!(v, Value::Float(_)));
    if any_float {
        return Ok(Value::float(as_f64_sum(values)?));
    }
    let mut total: i64 = 0;
    for v in values {
        match v {
            Value::Int(i) => total = total.saturating_add(*i),
            other => {
                return Err(VarveError::MalformedQuery(format!(
                    "numeric aggregate over non-numeric value {}",
                    other
                )));
            }
        }
    }
    Ok(Value::Int(total))
}

/// The middle element of the sorted multiset; even-sized groups take the
/// lower middle, avoiding cross-type promotion.
fn median(values: &[Value]) -> Result<Value, VarveError> {
    for v in values {
        as_numeric(v)?;
    }
    let mut sorted: Vec<&Value> = values.iter().collect();
    sorted.sort();
    sorted
        .get((sorted.len().saturating_sub(1)) / 2)
        .map(|v| (*v).clone())
        .ok_or_else(|| VarveError::MalformedQuery("aggregate over empty group".to_string()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|i| Value::Int(*i)).collect()
    }

    #[test]
    fn count_and_count_distinct_differ_on_duplicates() {
        let values = ints(&[3, 3, 5]);
        assert_eq!(
            AggregateFn::Count.apply(&values).expect("count"),
            Value::Int(3)
        );
        assert_eq!(
            AggregateFn::CountDistinct.apply(&values).expect("distinct"),
            Value::Int(2)
        );
    }

    #[test]
    fn sum_stays_integer_without_floats() {
        assert_eq!(
            AggregateFn::Sum.apply(&ints(&[1, 2, 3])).expect("sum"),
            Value::Int(6)
        );
    }

    #[test]
    fn sum_promotes_with_float_input() {
        let values = vec![Value::Int(1), Value::float(0.5)];
        assert_eq!(
            AggregateFn::Sum.apply(&values).expect("sum"),
            Value::float(1.5)
        );
    }

    #[test]
    fn min_max_use_value_order() {
        let values = ints(&[7, 2, 9]);
        assert_eq!(
            AggregateFn::Min.apply(&values).expect("min"),
            Value::Int(2)
        );
        assert_eq!(
            AggregateFn::Max.apply(&values).expect("max"),
            Value::Int(9)
        );
    }

    #[test]
    fn median_odd_takes_middle() {
        assert_eq!(
            AggregateFn::Median.apply(&ints(&[9, 1, 5])).expect("median"),
            Value::Int(5)
        );
    }

    #[test]
    fn median_even_takes_lower_middle() {
        assert_eq!(
            AggregateFn::Median
                .apply(&ints(&[1, 2, 3, 4]))
                .expect("median"),
            Value::Int(2)
        );
    }

    #[test]
    fn avg_returns_float() {
        assert_eq!(
            AggregateFn::Avg.apply(&ints(&[1, 2])).expect("avg"),
            Value::float(1.5)
        );
    }

    #[test]
    fn numeric_aggregate_rejects_strings() {
        let values = vec![Value::string("a")];
        assert!(matches!(
            AggregateFn::Sum.apply(&values),
            Err(VarveError::MalformedQuery(_))
        ));
    }

    #[test]
    fn min_works_on_any_ordered_values() {
        let values = vec![Value::string("b"), Value::string("a")];
        assert_eq!(
            AggregateFn::Min.apply(&values).expect("min"),
            Value::string("a")
        );
    }
}
