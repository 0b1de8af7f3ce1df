//! Filters and modifier chains
//!
//! A filter narrows a list of identifiers of one table. Filters are
//! immutable and shared behind `Arc`; a modifier chain is the ordered
//! list of filters collected from the root of the consumer tree down to
//! one consumer, applied root first.

use crate::catalog::Run;
use crate::error::Result;
use crate::predicate::Predicate;
use crate::subdomain::SubDomain;
use crate::table::Table;
use crate::types::Id;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Pure identifier-narrowing function used by [`Filter::Custom`]
pub type FilterFn = dyn Fn(&Table, &[Id]) -> Vec<Id> + Send + Sync;

#[derive(Clone)]
pub enum Filter {
    /// Keep identifiers with a row satisfying the predicate
    Where(Predicate),
    /// Keep only the listed identifiers
    Keep(HashSet<Id>),
    /// Drop the listed identifiers
    Exclude(HashSet<Id>),
    /// Keep identifiers related to a subdomain selection through the run's
    /// projection graph; nothing passes if the run cannot relate the two
    SubDomain(SubDomain),
    Custom { label: String, func: Arc<FilterFn> },
}

impl Filter {
    pub fn custom(
        label: &str,
        func: impl Fn(&Table, &[Id]) -> Vec<Id> + Send + Sync + 'static,
    ) -> Self {
        Filter::Custom {
            label: label.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn keep(ids: impl IntoIterator<Item = Id>) -> Self {
        Filter::Keep(ids.into_iter().collect())
    }

    pub fn exclude(ids: impl IntoIterator<Item = Id>) -> Self {
        Filter::Exclude(ids.into_iter().collect())
    }

    /// Narrow `ids`, which belong to `table` of `run`
    pub fn apply(&self, run: &Run, table: &Table, ids: Vec<Id>) -> Result<Vec<Id>> {
        match self {
            Filter::Where(predicate) => table.evaluate(predicate, &ids),
            Filter::Keep(keep) => Ok(ids.into_iter().filter(|id| keep.contains(id)).collect()),
            Filter::Exclude(drop) => Ok(ids.into_iter().filter(|id| !drop.contains(id)).collect()),
            Filter::SubDomain(selection) => {
                let related: HashSet<Id> =
                    match run.get_projection(selection.kind(), table.subdomain()) {
                        Some(projection) => projection
                            .project(selection, table.subdomain())?
                            .into_ids()
                            .into_iter()
                            .collect(),
                        None => HashSet::new(),
                    };
                Ok(ids.into_iter().filter(|id| related.contains(id)).collect())
            }
            Filter::Custom { func, .. } => Ok(func(table, &ids)),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Where(predicate) => f.debug_tuple("Where").field(predicate).finish(),
            Filter::Keep(ids) => f.debug_tuple("Keep").field(&ids.len()).finish(),
            Filter::Exclude(ids) => f.debug_tuple("Exclude").field(&ids.len()).finish(),
            Filter::SubDomain(sub) => f.debug_tuple("SubDomain").field(&sub.subdomain()).finish(),
            Filter::Custom { label, .. } => f.debug_tuple("Custom").field(label).finish(),
        }
    }
}

/// Ordered filters, root of the consumer tree first
#[derive(Debug, Clone, Default)]
pub struct ModifierChain(Vec<Arc<Filter>>);

impl ModifierChain {
    pub fn new() -> Self {
        ModifierChain(Vec::new())
    }

    /// This chain with `own` appended when present
    pub fn extended(&self, own: Option<&Arc<Filter>>) -> ModifierChain {
        let mut filters = self.0.clone();
        if let Some(filter) = own {
            filters.push(filter.clone());
        }
        ModifierChain(filters)
    }

    pub fn filters(&self) -> &[Arc<Filter>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Same filters in the same order (by identity)
    pub fn same_as(&self, other: &ModifierChain) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| Arc::ptr_eq(a, b))
    }

    /// Apply every filter left to right, each consuming the previous output
    pub fn apply(&self, run: &Run, table: &Table, ids: Vec<Id>) -> Result<Vec<Id>> {
        self.0
            .iter()
            .try_fold(ids, |ids, filter| filter.apply(run, table, ids))
    }
}

impl FromIterator<Arc<Filter>> for ModifierChain {
    fn from_iter<I: IntoIterator<Item = Arc<Filter>>>(iter: I) -> Self {
        ModifierChain(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{GeneralProjection, Projection};
    use crate::subdomain::SubDomainKind;
    use crate::table::Column;

    fn run_with_nodes() -> (Run, Arc<Table>) {
        let mut run = Run::new("run0");
        let table = run
            .add_table(
                Table::new(
                    "nodes",
                    "run0",
                    SubDomainKind::Node,
                    "nodeid",
                    vec![1, 2, 3],
                    vec![("x".to_string(), Column::Int(vec![10, 20, 30]))],
                )
                .unwrap(),
            )
            .unwrap();
        run.add_projection(Projection::general(GeneralProjection::new(
            SubDomainKind::Rank,
            SubDomainKind::Node,
            vec![(0, 1), (1, 1), (2, 3)],
        )));
        (run, table)
    }

    #[test]
    fn test_chain_applies_left_to_right() {
        let (run, table) = run_with_nodes();
        let chain: ModifierChain = vec![
            Arc::new(Filter::exclude([2])),
            Arc::new(Filter::Where(
                Predicate::attribute("x").less_than(Predicate::constant(30)),
            )),
        ]
        .into_iter()
        .collect();

        let ids = chain.apply(&run, &table, table.identifiers().to_vec()).unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_subdomain_filter_projects_selection() {
        let (run, table) = run_with_nodes();
        let ranks = SubDomain::new(SubDomainKind::Rank, vec![2]);
        let filter = Filter::SubDomain(ranks);
        assert_eq!(filter.apply(&run, &table, vec![1, 2, 3]).unwrap(), vec![3]);

        let unrelated = Filter::SubDomain(SubDomain::new(SubDomainKind::Patch, vec![1]));
        assert!(unrelated.apply(&run, &table, vec![1, 2, 3]).unwrap().is_empty());
    }

    #[test]
    fn test_custom_filter() {
        let (run, table) = run_with_nodes();
        let odd = Filter::custom("odd", |_, ids| ids.iter().copied().filter(|id| id % 2 == 1).collect());
        assert_eq!(odd.apply(&run, &table, vec![1, 2, 3]).unwrap(), vec![1, 3]);
        assert_eq!(format!("{:?}", odd), "Custom(\"odd\")");
    }

    #[test]
    fn test_extended_chain() {
        let f = Arc::new(Filter::keep([1]));
        let base = ModifierChain::new();
        assert!(base.extended(None).is_empty());
        let chain = base.extended(Some(&f));
        assert_eq!(chain.len(), 1);
        assert!(chain.same_as(&ModifierChain::from_iter([f])));
    }
}
