//! Runs and the column catalog
//!
//! A run is a named collection of tables sharing one projection graph.
//! The catalog hands out an opaque [`ItemIndex`] for every attribute
//! column of every registered table; requests refer to columns only
//! through these indices.

use crate::error::{BoxfishError, Result};
use crate::projection::Projection;
use crate::subdomain::SubDomainKind;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Reference to one attribute column in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemIndex(pub usize);

impl fmt::Display for ItemIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Named collection of tables and the projections between their subdomains
#[derive(Debug, Clone)]
pub struct Run {
    name: String,
    tables: Vec<Arc<Table>>,
    projections: Vec<Projection>,
}

impl Run {
    pub fn new(name: &str) -> Self {
        Run {
            name: name.to_string(),
            tables: Vec::new(),
            projections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a table; it must name this run and be the only table of its name
    pub fn add_table(&mut self, table: Table) -> Result<Arc<Table>> {
        if table.run() != self.name {
            return Err(BoxfishError::InvalidTable {
                table: table.name().to_string(),
                reason: format!("belongs to run '{}', not '{}'", table.run(), self.name),
            });
        }
        if self.table(table.name()).is_some() {
            return Err(BoxfishError::InvalidTable {
                table: table.name().to_string(),
                reason: format!("run '{}' already has a table of that name", self.name),
            });
        }

        let table = Arc::new(table);
        self.tables.push(table.clone());
        Ok(table)
    }

    pub fn add_projection(&mut self, projection: Projection) {
        self.projections.push(projection);
    }

    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// First table holding data for `kind`
    pub fn table_for(&self, kind: SubDomainKind) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.subdomain() == kind)
    }

    /// Projection relating `source` and `target`, if the run has one.
    ///
    /// A subdomain always projects onto itself through the identity.
    pub fn get_projection(&self, source: SubDomainKind, target: SubDomainKind) -> Option<Projection> {
        if source == target {
            return Some(Projection::identity(source, target));
        }
        self.projections
            .iter()
            .find(|p| p.connects(source, target))
            .cloned()
    }
}

/// Catalog entry: an attribute name and the table that owns it
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub name: String,
    pub table: Arc<Table>,
}

/// All loaded runs plus the index of their attribute columns
#[derive(Debug, Default)]
pub struct Catalog {
    runs: Vec<Arc<Run>>,
    items: Vec<CatalogItem>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and every attribute column of its tables
    pub fn add_run(&mut self, run: Run) -> Arc<Run> {
        let run = Arc::new(run);
        for table in run.tables() {
            for name in table.attribute_names() {
                self.items.push(CatalogItem {
                    name: name.clone(),
                    table: table.clone(),
                });
            }
        }

        debug!(run = run.name(), tables = run.tables().len(), "registered run");
        self.runs.push(run.clone());
        run
    }

    pub fn get_item(&self, index: ItemIndex) -> Result<&CatalogItem> {
        self.items
            .get(index.0)
            .ok_or(BoxfishError::UnknownItem(index.0))
    }

    /// Index of `attribute` in table `table` of run `run`
    pub fn find_index(&self, run: &str, table: &str, attribute: &str) -> Option<ItemIndex> {
        self.items
            .iter()
            .position(|item| {
                item.name == attribute && item.table.name() == table && item.table.run() == run
            })
            .map(ItemIndex)
    }

    /// Indices of every attribute column of one table
    pub fn indices_of_table(&self, run: &str, table: &str) -> Vec<ItemIndex> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.table.name() == table && item.table.run() == run)
            .map(|(i, _)| ItemIndex(i))
            .collect()
    }

    pub fn run(&self, name: &str) -> Result<&Arc<Run>> {
        self.runs
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| BoxfishError::UnknownRun(name.to_string()))
    }

    /// Run owning `table`
    pub fn run_of(&self, table: &Table) -> Result<&Arc<Run>> {
        self.run(table.run())
    }

    pub fn runs(&self) -> &[Arc<Run>] {
        &self.runs
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::GeneralProjection;
    use crate::table::Column;

    fn sample_run() -> Run {
        let mut run = Run::new("run0");
        run.add_table(
            Table::new(
                "nodes",
                "run0",
                SubDomainKind::Node,
                "nodeid",
                vec![1, 2],
                vec![
                    ("x".to_string(), Column::Int(vec![1, 2])),
                    ("y".to_string(), Column::Float(vec![0.1, 0.2])),
                ],
            )
            .unwrap(),
        )
        .unwrap();
        run.add_table(
            Table::new(
                "links",
                "run0",
                SubDomainKind::Link,
                "linkid",
                vec![7],
                vec![("bw".to_string(), Column::Float(vec![9.0]))],
            )
            .unwrap(),
        )
        .unwrap();
        run.add_projection(Projection::general(GeneralProjection::new(
            SubDomainKind::Node,
            SubDomainKind::Link,
            vec![(1, 7)],
        )));
        run
    }

    #[test]
    fn test_catalog_registers_attribute_columns() {
        let mut catalog = Catalog::new();
        catalog.add_run(sample_run());

        assert_eq!(catalog.item_count(), 3);
        let index = catalog.find_index("run0", "links", "bw").unwrap();
        let item = catalog.get_item(index).unwrap();
        assert_eq!(item.name, "bw");
        assert_eq!(item.table.name(), "links");
        assert_eq!(catalog.indices_of_table("run0", "nodes").len(), 2);
    }

    #[test]
    fn test_unknown_item_and_run() {
        let catalog = Catalog::new();
        assert!(catalog.get_item(ItemIndex(3)).unwrap_err().is_not_found());
        assert!(catalog.run("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_projection_lookup() {
        let run = sample_run();
        assert!(run
            .get_projection(SubDomainKind::Node, SubDomainKind::Node)
            .unwrap()
            .is_identity());
        // registered node->link, looked up in the other direction
        assert!(run.get_projection(SubDomainKind::Link, SubDomainKind::Node).is_some());
        assert!(run.get_projection(SubDomainKind::Rank, SubDomainKind::Node).is_none());
    }

    #[test]
    fn test_table_must_belong_to_run() {
        let mut run = Run::new("run1");
        let table = Table::new("t", "run0", SubDomainKind::Rank, "rank", vec![], vec![]).unwrap();
        assert!(run.add_table(table).is_err());
    }
}
