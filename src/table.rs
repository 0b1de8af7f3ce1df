//! Column store keyed by an identifier column
//!
//! A table belongs to exactly one subdomain and one run. Keys are not
//! unique: several rows may share an identifier when independent
//! measurements were taken for the same entity. Tables are immutable
//! once built and every query is a pure read.

use crate::error::{BoxfishError, Result};
use crate::predicate::Predicate;
use crate::subdomain::{SubDomain, SubDomainKind};
use crate::types::{Id, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Typed attribute column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Value {
        match self {
            Column::Int(v) => v.get(row).map_or(Value::Null, |x| Value::Int(*x)),
            Column::Float(v) => v.get(row).map_or(Value::Null, |x| Value::Float(*x)),
            Column::Text(v) => v.get(row).map_or(Value::Null, |x| Value::Text(x.clone())),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Int(_) => "Integer",
            Column::Float(_) => "Float",
            Column::Text(_) => "Text",
        }
    }
}

/// Rows fetched by identifier: the key column followed by one value
/// column per requested attribute, all parallel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub ids: Vec<Id>,
    pub columns: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Non-key values of one row, in attribute order
    pub fn row_values(&self, row: usize) -> Vec<Value> {
        self.columns.iter().map(|column| column[row].clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    run: String,
    subdomain: SubDomainKind,
    key: String,
    ids: Vec<Id>,
    names: Vec<String>,
    columns: Vec<Column>,
    // identifier -> row positions, in table order
    rows_by_id: HashMap<Id, Vec<usize>>,
}

impl Table {
    pub fn new(
        name: &str,
        run: &str,
        subdomain: SubDomainKind,
        key: &str,
        ids: Vec<Id>,
        columns: Vec<(String, Column)>,
    ) -> Result<Self> {
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());

        for (column_name, column) in columns {
            if column.len() != ids.len() {
                return Err(BoxfishError::InvalidTable {
                    table: name.to_string(),
                    reason: format!(
                        "column '{}' has {} rows, key column '{}' has {}",
                        column_name,
                        column.len(),
                        key,
                        ids.len()
                    ),
                });
            }
            if column_name == key || names.contains(&column_name) {
                return Err(BoxfishError::InvalidTable {
                    table: name.to_string(),
                    reason: format!("duplicate column '{}'", column_name),
                });
            }
            names.push(column_name);
            data.push(column);
        }

        let mut rows_by_id: HashMap<Id, Vec<usize>> = HashMap::new();
        for (row, id) in ids.iter().enumerate() {
            rows_by_id.entry(*id).or_default().push(row);
        }

        Ok(Table {
            name: name.to_string(),
            run: run.to_string(),
            subdomain,
            key: key.to_string(),
            ids,
            names,
            columns: data,
            rows_by_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the run this table belongs to
    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn subdomain(&self) -> SubDomainKind {
        self.subdomain
    }

    pub fn key_name(&self) -> &str {
        &self.key
    }

    pub fn attribute_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn row_count(&self) -> usize {
        self.ids.len()
    }

    /// Every key-column value in row order (not deduplicated)
    pub fn identifiers(&self) -> &[Id] {
        &self.ids
    }

    /// Distinct identifiers in order of first appearance
    pub fn unique_identifiers(&self) -> Vec<Id> {
        dedup_ordered(&self.ids)
    }

    pub fn contains_id(&self, id: Id) -> bool {
        self.rows_by_id.contains_key(&id)
    }

    /// Row positions holding `id`
    pub fn rows_of(&self, id: Id) -> &[usize] {
        self.rows_by_id.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Key of `row`, `None` past the last row
    pub fn key_at(&self, row: usize) -> Option<Id> {
        self.ids.get(row).copied()
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| self.unknown_attribute(name))
    }

    pub fn value_at(&self, name: &str, row: usize) -> Result<Value> {
        if name == self.key {
            return Ok(self.key_at(row).map_or(Value::Null, Value::Int));
        }
        Ok(self.column(name)?.get(row))
    }

    /// Tag a list of identifiers with this table's subdomain
    pub fn subdomain_of(&self, ids: Vec<Id>) -> SubDomain {
        SubDomain::new(self.subdomain, ids)
    }

    /// Fetch `attributes` for the rows keyed by `ids`.
    ///
    /// Identifiers are visited in the requested order; repeats in `ids`
    /// are visited once. With `unique == false` every row of an
    /// identifier is returned, otherwise only its first row.
    /// Identifiers absent from the table contribute nothing.
    pub fn attributes_by_identifiers(
        &self,
        ids: &[Id],
        attributes: &[String],
        unique: bool,
    ) -> Result<RowSet> {
        let columns: Vec<&Column> = attributes
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<_>>()?;

        let mut rows = RowSet {
            ids: Vec::new(),
            columns: vec![Vec::new(); columns.len()],
        };

        for id in dedup_ordered(ids) {
            let positions = self.rows_of(id);
            let positions = if unique && !positions.is_empty() {
                &positions[..1]
            } else {
                positions
            };

            for &row in positions {
                rows.ids.push(id);
                for (out, column) in rows.columns.iter_mut().zip(&columns) {
                    out.push(column.get(row));
                }
            }
        }

        Ok(rows)
    }

    /// Keep the identifiers that have at least one row satisfying
    /// `predicate`. Input order and repeats are preserved.
    pub fn evaluate(&self, predicate: &Predicate, ids: &[Id]) -> Result<Vec<Id>> {
        for name in predicate.attributes() {
            if name != self.key && !self.has_attribute(name) {
                return Err(self.unknown_attribute(name));
            }
        }

        let mut verdicts: HashMap<Id, bool> = HashMap::new();
        let mut kept = Vec::with_capacity(ids.len());

        for &id in ids {
            let keep = match verdicts.get(&id) {
                Some(keep) => *keep,
                None => {
                    let mut keep = false;
                    for &row in self.rows_of(id) {
                        if predicate.matches(self, row)? {
                            keep = true;
                            break;
                        }
                    }
                    verdicts.insert(id, keep);
                    keep
                }
            };

            if keep {
                kept.push(id);
            }
        }

        Ok(kept)
    }

    fn unknown_attribute(&self, name: &str) -> BoxfishError {
        BoxfishError::UnknownAttribute {
            table: self.name.clone(),
            attribute: name.to_string(),
        }
    }
}

/// Distinct values of `ids` in order of first appearance
pub fn dedup_ordered(ids: &[Id]) -> Vec<Id> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
