//! Row predicates
//!
//! A small expression tree evaluated against one row of a [`Table`].
//! Filters built on predicates narrow identifier lists.

use crate::error::Result;
use crate::table::Table;
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Predicate / value expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    // Logical
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),

    // Comparisons
    Equal(Box<Predicate>, Box<Predicate>),
    NotEqual(Box<Predicate>, Box<Predicate>),
    LessThan(Box<Predicate>, Box<Predicate>),
    LessThanEq(Box<Predicate>, Box<Predicate>),
    GreaterThan(Box<Predicate>, Box<Predicate>),
    GreaterThanEq(Box<Predicate>, Box<Predicate>),

    /// Value is one of the listed constants
    InSet(Box<Predicate>, Vec<Value>),

    // Values
    /// The row's key column
    Key,
    Attribute(String),
    Constant(Value),
}

impl Predicate {
    pub fn attribute(name: &str) -> Self {
        Predicate::Attribute(name.to_string())
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Predicate::Constant(value.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn equals(self, other: Predicate) -> Self {
        Predicate::Equal(Box::new(self), Box::new(other))
    }

    pub fn not_equals(self, other: Predicate) -> Self {
        Predicate::NotEqual(Box::new(self), Box::new(other))
    }

    pub fn less_than(self, other: Predicate) -> Self {
        Predicate::LessThan(Box::new(self), Box::new(other))
    }

    pub fn less_eq(self, other: Predicate) -> Self {
        Predicate::LessThanEq(Box::new(self), Box::new(other))
    }

    pub fn greater_than(self, other: Predicate) -> Self {
        Predicate::GreaterThan(Box::new(self), Box::new(other))
    }

    pub fn greater_eq(self, other: Predicate) -> Self {
        Predicate::GreaterThanEq(Box::new(self), Box::new(other))
    }

    pub fn in_set(self, values: Vec<Value>) -> Self {
        Predicate::InSet(Box::new(self), values)
    }

    /// Attribute names referenced anywhere in the expression
    pub fn attributes(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_attributes(&mut names);
        names
    }

    fn collect_attributes<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Predicate::Attribute(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Predicate::Not(e) | Predicate::InSet(e, _) => e.collect_attributes(names),
            Predicate::And(l, r)
            | Predicate::Or(l, r)
            | Predicate::Equal(l, r)
            | Predicate::NotEqual(l, r)
            | Predicate::LessThan(l, r)
            | Predicate::LessThanEq(l, r)
            | Predicate::GreaterThan(l, r)
            | Predicate::GreaterThanEq(l, r) => {
                l.collect_attributes(names);
                r.collect_attributes(names);
            }
            Predicate::Key | Predicate::Constant(_) => {}
        }
    }

    /// Evaluate as a condition against `row` of `table`
    pub fn matches(&self, table: &Table, row: usize) -> Result<bool> {
        let result = match self {
            Predicate::And(l, r) => l.matches(table, row)? && r.matches(table, row)?,
            Predicate::Or(l, r) => l.matches(table, row)? || r.matches(table, row)?,
            Predicate::Not(e) => !e.matches(table, row)?,

            Predicate::Equal(l, r) => l.value(table, row)?.loosely_equals(&r.value(table, row)?),
            Predicate::NotEqual(l, r) => {
                !l.value(table, row)?.loosely_equals(&r.value(table, row)?)
            }
            Predicate::LessThan(l, r) => {
                matches!(self.order(l, r, table, row)?, Some(Ordering::Less))
            }
            Predicate::LessThanEq(l, r) => matches!(
                self.order(l, r, table, row)?,
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::GreaterThan(l, r) => {
                matches!(self.order(l, r, table, row)?, Some(Ordering::Greater))
            }
            Predicate::GreaterThanEq(l, r) => matches!(
                self.order(l, r, table, row)?,
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::InSet(e, values) => {
                let v = e.value(table, row)?;
                values.iter().any(|candidate| candidate.loosely_equals(&v))
            }

            // A bare value is truthy unless null, false or zero
            Predicate::Key | Predicate::Attribute(_) | Predicate::Constant(_) => {
                match self.value(table, row)? {
                    Value::Null | Value::Bool(false) => false,
                    Value::Int(0) => false,
                    Value::Float(x) => x != 0.0,
                    _ => true,
                }
            }
        };

        Ok(result)
    }

    /// Evaluate as a value against `row` of `table`
    pub fn value(&self, table: &Table, row: usize) -> Result<Value> {
        match self {
            Predicate::Key => Ok(table.key_at(row).map_or(Value::Null, Value::Int)),
            Predicate::Attribute(name) => table.value_at(name, row),
            Predicate::Constant(value) => Ok(value.clone()),
            _ => Ok(Value::Bool(self.matches(table, row)?)),
        }
    }

    fn order(
        &self,
        l: &Predicate,
        r: &Predicate,
        table: &Table,
        row: usize,
    ) -> Result<Option<Ordering>> {
        Ok(l.value(table, row)?.compare(&r.value(table, row)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subdomain::SubDomainKind;
    use crate::table::{Column, Table};

    fn nodes() -> Table {
        Table::new(
            "nodes",
            "run0",
            SubDomainKind::Node,
            "nodeid",
            vec![1, 2, 3],
            vec![
                ("x".to_string(), Column::Int(vec![10, 20, 30])),
                ("state".to_string(), Column::Text(vec!["up".into(), "down".into(), "up".into()])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_comparisons() {
        let table = nodes();
        let p = Predicate::attribute("x").greater_than(Predicate::constant(15));
        assert!(!p.matches(&table, 0).unwrap());
        assert!(p.matches(&table, 1).unwrap());

        let both = p.and(Predicate::attribute("state").equals(Predicate::constant("up")));
        assert!(both.matches(&table, 2).unwrap());
        assert!(!both.matches(&table, 1).unwrap());
    }

    #[test]
    fn test_key_and_in_set() {
        let table = nodes();
        let p = Predicate::Key.in_set(vec![Value::Int(1), Value::Int(3)]);
        assert!(p.matches(&table, 0).unwrap());
        assert!(!p.matches(&table, 1).unwrap());
        assert!(p.clone().negate().matches(&table, 1).unwrap());
    }

    #[test]
    fn test_row_past_end_reads_null() {
        let table = nodes();
        assert_eq!(Predicate::Key.value(&table, 3).unwrap(), Value::Null);
        assert_eq!(Predicate::attribute("x").value(&table, 3).unwrap(), Value::Null);
        assert!(!Predicate::Key.in_set(vec![Value::Int(1)]).matches(&table, 3).unwrap());
        assert!(!Predicate::attribute("x").matches(&table, 99).unwrap());
    }

    #[test]
    fn test_unknown_attribute_is_an_error() {
        let table = nodes();
        let p = Predicate::attribute("missing").less_than(Predicate::constant(1));
        assert!(p.matches(&table, 0).unwrap_err().is_not_found());
    }

    #[test]
    fn test_referenced_attributes() {
        let p = Predicate::attribute("x")
            .greater_than(Predicate::constant(1))
            .or(Predicate::attribute("y").equals(Predicate::attribute("x")));
        assert_eq!(p.attributes(), vec!["x", "y"]);
    }
}
