//! Reduction operators
//!
//! The closed operator set used by requests: `sum`, `mean`, `max`, `min`.
//! Operator names are parsed when a request is configured so an unknown
//! name fails before any data is touched.

use crate::error::BoxfishError;
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Sum,
    Mean,
    Max,
    Min,
}

impl Aggregator {
    pub const ALL: [Aggregator; 4] = [
        Aggregator::Sum,
        Aggregator::Mean,
        Aggregator::Max,
        Aggregator::Min,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Mean => "mean",
            Aggregator::Max => "max",
            Aggregator::Min => "min",
        }
    }

    /// Reduce `values` to one value.
    ///
    /// Non-numeric entries are ignored. `sum`, `max` and `min` keep
    /// integers integral when every input is an integer, except that an
    /// integer sum leaving the `i64` range is reported as a float; `mean`
    /// is always a float. Reducing nothing yields `Null`.
    pub fn reduce(&self, values: &[Value]) -> Value {
        let numeric: Vec<&Value> = values.iter().filter(|v| v.is_numeric()).collect();
        if numeric.is_empty() {
            return Value::Null;
        }
        let all_int = numeric.iter().all(|v| matches!(v, Value::Int(_)));

        match self {
            Aggregator::Sum => {
                let exact = if all_int {
                    numeric
                        .iter()
                        .filter_map(|v| v.as_i64())
                        .try_fold(0i64, |acc, x| acc.checked_add(x))
                } else {
                    None
                };
                // integer overflow falls back to a float total
                match exact {
                    Some(total) => Value::Int(total),
                    None => Value::Float(numeric.iter().filter_map(|v| v.as_f64()).sum()),
                }
            }
            Aggregator::Mean => {
                let total: f64 = numeric.iter().filter_map(|v| v.as_f64()).sum();
                Value::Float(total / numeric.len() as f64)
            }
            Aggregator::Max => Self::extreme(&numeric, std::cmp::Ordering::Greater),
            Aggregator::Min => Self::extreme(&numeric, std::cmp::Ordering::Less),
        }
    }

    /// Value reported for an identifier nothing contributed to
    pub fn zero(&self) -> Value {
        match self {
            Aggregator::Mean => Value::Float(0.0),
            _ => Value::Int(0),
        }
    }

    fn extreme(values: &[&Value], wanted: std::cmp::Ordering) -> Value {
        let mut best = values[0];
        for &v in &values[1..] {
            if v.compare(best) == Some(wanted) {
                best = v;
            }
        }
        best.clone()
    }
}

impl FromStr for Aggregator {
    type Err = BoxfishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Aggregator::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BoxfishError::UnknownAggregator(s.to_string()))
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn test_basic_reductions() {
        let values = ints(&[2, 4, 6]);
        assert_eq!(Aggregator::Sum.reduce(&values), Value::Int(12));
        assert_eq!(Aggregator::Mean.reduce(&values), Value::Float(4.0));
        assert_eq!(Aggregator::Max.reduce(&values), Value::Int(6));
        assert_eq!(Aggregator::Min.reduce(&values), Value::Int(2));
    }

    #[test]
    fn test_mixed_and_non_numeric_values() {
        let values = vec![Value::Int(1), Value::Float(0.5), Value::Text("x".into()), Value::Null];
        assert_eq!(Aggregator::Sum.reduce(&values), Value::Float(1.5));
        assert_eq!(Aggregator::Max.reduce(&values), Value::Int(1));
        assert_eq!(Aggregator::Mean.reduce(&[]), Value::Null);
    }

    #[test]
    fn test_integer_sum_overflow_becomes_float() {
        let values = ints(&[i64::MAX, 1]);
        assert_eq!(Aggregator::Sum.reduce(&values), Value::Float(i64::MAX as f64 + 1.0));

        let values = ints(&[i64::MIN, -1, 5]);
        assert_eq!(Aggregator::Sum.reduce(&values), Value::Float(i64::MIN as f64 + 4.0));

        // in-range sums stay integral
        let values = ints(&[i64::MAX, -1, 1]);
        assert_eq!(Aggregator::Sum.reduce(&values), Value::Int(i64::MAX));
    }

    #[test]
    fn test_zero_matches_reduction_type() {
        assert_eq!(Aggregator::Mean.zero(), Value::Float(0.0));
        assert_eq!(Aggregator::Sum.zero(), Value::Int(0));
        assert_eq!(Aggregator::Max.zero(), Value::Int(0));
    }

    #[test]
    fn test_parse_operator_names() {
        assert_eq!("MEAN".parse::<Aggregator>().unwrap(), Aggregator::Mean);
        assert_eq!(" min ".parse::<Aggregator>().unwrap(), Aggregator::Min);
        let err = "median".parse::<Aggregator>().unwrap_err();
        assert!(err.is_not_found());
    }
}
