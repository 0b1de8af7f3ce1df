//! Requests: row retrieval and aggregation over catalog columns
//!
//! A request binds a list of catalog column references to the coupler
//! chain of its consumer. Every query first sorts the references into
//! groups by owning table, because modifier chains and attribute lists
//! apply per table, then works group by group.
//!
//! Missing projections are handled asymmetrically. Domain aggregation
//! skips a table group that cannot be related to the target domain and
//! carries on with the rest; the cross-request group-by fails with
//! `NoProjection` when its two axes cannot be related.
//!
//! Every query returns `Ok(None)` while the request has no columns.

use crate::aggregate::Aggregator;
use crate::catalog::{Catalog, ItemIndex, Run};
use crate::coupler::CouplerId;
use crate::error::{BoxfishError, Result};
use crate::filter::ModifierChain;
use crate::projection::Projection;
use crate::scene::AttributeScene;
use crate::subdomain::SubDomainKind;
use crate::table::{RowSet, Table};
use crate::types::{AttributeSet, Id, NodeId, Range, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Which identifiers a domain aggregation reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// Only identifiers that received at least one value
    #[default]
    Contributing,
    /// Every identifier of the domain table, zero where nothing contributed
    ZeroFill,
}

/// Operators and coverage used by the aggregating queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAggregation {
    pub row: Aggregator,
    pub attribute: Aggregator,
    pub coverage: Coverage,
}

impl Default for DomainAggregation {
    fn default() -> Self {
        DomainAggregation {
            row: Aggregator::Sum,
            attribute: Aggregator::Sum,
            coverage: Coverage::Contributing,
        }
    }
}

/// Column references of one table, in request order
#[derive(Debug, Clone)]
pub struct TableGroup {
    pub run: Arc<Run>,
    pub table: Arc<Table>,
    pub attributes: Vec<String>,
}

impl TableGroup {
    /// Table identifiers narrowed by `chain`, in table order
    fn filtered_ids(&self, chain: &ModifierChain) -> Result<Vec<Id>> {
        chain.apply(&self.run, &self.table, self.table.identifiers().to_vec())
    }

    fn fetch(&self, chain: &ModifierChain) -> Result<(Vec<Id>, RowSet)> {
        let ids = self.filtered_ids(chain)?;
        let rows = self
            .table
            .attributes_by_identifiers(&ids, &self.attributes, false)?;
        Ok((ids, rows))
    }
}

/// Result of [`Request::get_rows`] for one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    pub table: String,
    pub run: String,
    /// Identifiers left after the modifier chain
    pub ids: Vec<Id>,
    pub attributes: Vec<String>,
    /// Key column and one value column per attribute, one entry per row
    pub rows: RowSet,
}

/// Parallel identifier/value lists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainValues {
    pub ids: Vec<Id>,
    pub values: Vec<Value>,
}

impl DomainValues {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Value reported for `id`. Scans the list; use [`DomainValues::to_map`]
    /// for repeated lookups.
    pub fn get(&self, id: Id) -> Option<&Value> {
        self.ids.iter().position(|i| *i == id).map(|i| &self.values[i])
    }

    /// Identifier to value lookup table
    pub fn to_map(&self) -> HashMap<Id, &Value> {
        self.ids.iter().copied().zip(self.values.iter()).collect()
    }
}

/// Result of [`Request::group_by_table`] for one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableValues {
    pub table: String,
    pub run: String,
    pub values: DomainValues,
}

/// Row values gathered onto the identifiers of one table, keyed by the
/// (run, table) they came from
pub type ProjectedRows = BTreeMap<Id, BTreeMap<(String, String), Vec<Vec<Value>>>>;

/// Output of [`Request::project_to_first_table`]
#[derive(Debug, Clone)]
pub struct FirstTableProjection {
    pub table: Arc<Table>,
    pub rows: ProjectedRows,
}

/// Paired values of the two group-by axes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupByPairs {
    pub group: Vec<Value>,
    pub desired: Vec<Value>,
}

impl GroupByPairs {
    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }
}

/// Accumulates value lists per target identifier, remembering the order
/// in which identifiers first received a value
#[derive(Debug, Default)]
struct Accumulator {
    order: Vec<Id>,
    values: HashMap<Id, Vec<Value>>,
}

impl Accumulator {
    fn extend(&mut self, id: Id, values: impl IntoIterator<Item = Value>) {
        let entry = self.values.entry(id).or_insert_with(|| {
            self.order.push(id);
            Vec::new()
        });
        entry.extend(values);
    }

    fn reduce(&self, aggregator: Aggregator) -> DomainValues {
        let values = self
            .order
            .iter()
            .map(|id| aggregator.reduce(&self.values[id]))
            .collect();
        DomainValues {
            ids: self.order.clone(),
            values,
        }
    }
}

/// Memoized projection of single identifiers onto a target subdomain
struct ProjectionCache<'a> {
    projection: &'a Projection,
    source: &'a Table,
    target: SubDomainKind,
    memo: HashMap<Id, Vec<Id>>,
}

impl<'a> ProjectionCache<'a> {
    fn new(projection: &'a Projection, source: &'a Table, target: SubDomainKind) -> Self {
        ProjectionCache {
            projection,
            source,
            target,
            memo: HashMap::new(),
        }
    }

    fn targets(&mut self, id: Id) -> Result<&[Id]> {
        if !self.memo.contains_key(&id) {
            let targets = if self.projection.is_identity() {
                vec![id]
            } else {
                self.projection
                    .project(&self.source.subdomain_of(vec![id]), self.target)?
                    .into_ids()
            };
            self.memo.insert(id, targets);
        }
        Ok(self.memo[&id].as_slice())
    }
}

/// Named binding between catalog columns and a coupler chain
#[derive(Debug, Clone)]
pub struct Request {
    name: String,
    owner: NodeId,
    coupler: CouplerId,
    indices: Vec<ItemIndex>,
    attributes: AttributeSet,
    aggregation: DomainAggregation,
    target: Option<SubDomainKind>,
    scene: AttributeScene,
}

impl Request {
    pub fn new(name: &str, owner: NodeId, coupler: CouplerId, color_map: &str) -> Self {
        Request {
            name: name.to_string(),
            owner,
            coupler,
            indices: Vec::new(),
            attributes: AttributeSet::new(),
            aggregation: DomainAggregation::default(),
            target: None,
            scene: AttributeScene::new(AttributeSet::new(), color_map),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Leaf coupler this request reads its modifier chain from
    pub fn coupler(&self) -> CouplerId {
        self.coupler
    }

    pub fn indices(&self) -> &[ItemIndex] {
        &self.indices
    }

    /// Names of the requested columns
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub fn aggregation(&self) -> DomainAggregation {
        self.aggregation
    }

    pub fn set_aggregation(&mut self, aggregation: DomainAggregation) {
        self.aggregation = aggregation;
    }

    /// Set both operators by name; unknown names fail and change nothing
    pub fn set_aggregators(&mut self, row: &str, attribute: &str) -> Result<()> {
        let row: Aggregator = row.parse()?;
        let attribute: Aggregator = attribute.parse()?;
        self.aggregation.row = row;
        self.aggregation.attribute = attribute;
        Ok(())
    }

    pub fn target(&self) -> Option<SubDomainKind> {
        self.target
    }

    pub fn set_target(&mut self, target: Option<SubDomainKind>) {
        self.target = target;
    }

    pub fn scene(&self) -> &AttributeScene {
        &self.scene
    }

    /// Replace the column references.
    ///
    /// Every index must resolve in `catalog`. The attribute scene starts
    /// over when the set of attribute names changes.
    pub fn set_indices(&mut self, catalog: &Catalog, indices: Vec<ItemIndex>) -> Result<()> {
        let mut attributes = AttributeSet::new();
        for index in &indices {
            attributes.insert(catalog.get_item(*index)?.name.clone());
        }

        if attributes != self.attributes {
            self.scene = AttributeScene::new(attributes.clone(), &self.scene.color_map);
        }
        self.attributes = attributes;
        self.indices = indices;
        Ok(())
    }

    pub fn set_local_range(&mut self, range: Option<Range>) {
        self.scene.local_range = range;
    }

    /// Offer a scene arriving from above; true if it changed this request
    pub fn offer_scene(&mut self, scene: &AttributeScene) -> bool {
        self.scene.merge(scene)
    }

    /// Group this request's column references by owning table
    pub fn sort_indices_by_table(&self, catalog: &Catalog) -> Result<Vec<TableGroup>> {
        sort_indices_by_table(catalog, &self.indices)
    }

    /// Filtered rows of every table group.
    ///
    /// Rows sharing an identifier are all returned.
    pub fn get_rows(
        &self,
        catalog: &Catalog,
        chain: &ModifierChain,
    ) -> Result<Option<Vec<TableRows>>> {
        if self.indices.is_empty() {
            return Ok(None);
        }

        let mut result = Vec::new();
        for group in self.sort_indices_by_table(catalog)? {
            let (ids, rows) = group.fetch(chain)?;
            result.push(TableRows {
                table: group.table.name().to_string(),
                run: group.run.name().to_string(),
                ids,
                attributes: group.attributes,
                rows,
            });
        }
        Ok(Some(result))
    }

    /// Range of the numeric values this request currently selects
    pub fn data_range(&self, catalog: &Catalog, chain: &ModifierChain) -> Result<Option<Range>> {
        let Some(tables) = self.get_rows(catalog, chain)? else {
            return Ok(None);
        };
        Ok(tables
            .iter()
            .flat_map(|t| t.rows.columns.iter().flatten())
            .fold(None, |acc: Option<Range>, value| {
                match (acc, Range::of_values([value])) {
                    (Some(a), Some(b)) => Some(a.union(&b)),
                    (a, b) => a.or(b),
                }
            }))
    }

    /// Aggregate every table group onto the identifiers of `domain`.
    ///
    /// Row values accumulate per target identifier by list extension;
    /// only the attribute aggregator reduces. Groups without a
    /// projection to the domain are skipped.
    pub fn aggregate_domain(
        &self,
        catalog: &Catalog,
        chain: &ModifierChain,
        domain: &Table,
        aggregation: &DomainAggregation,
    ) -> Result<Option<DomainValues>> {
        if self.indices.is_empty() {
            return Ok(None);
        }

        let mut accumulator = Accumulator::default();
        for group in self.sort_indices_by_table(catalog)? {
            let Some(projection) = group
                .run
                .get_projection(domain.subdomain(), group.table.subdomain())
            else {
                debug!(
                    request = %self.name,
                    table = group.table.name(),
                    domain = %domain.subdomain(),
                    "no projection to domain, skipping table group"
                );
                continue;
            };

            let (_, rows) = group.fetch(chain)?;
            let mut cache = ProjectionCache::new(&projection, &group.table, domain.subdomain());
            for row in 0..rows.len() {
                let values = rows.row_values(row);
                for target in cache.targets(rows.ids[row])? {
                    accumulator.extend(*target, values.iter().cloned());
                }
            }
            trace!(table = group.table.name(), rows = rows.len(), "aggregated table group");
        }

        let mut result = accumulator.reduce(aggregation.attribute);
        if aggregation.coverage == Coverage::ZeroFill {
            result = zero_fill(
                domain.unique_identifiers(),
                result,
                aggregation.attribute.zero(),
            );
        }
        Ok(Some(result))
    }

    /// Per table: reduce each row with the row aggregator, then each
    /// identifier's row results with the attribute aggregator. Every
    /// identifier of the table is reported, zero where filtered out.
    pub fn group_by_table(
        &self,
        catalog: &Catalog,
        chain: &ModifierChain,
        row_aggregator: Aggregator,
        attribute_aggregator: Aggregator,
    ) -> Result<Option<Vec<TableValues>>> {
        if self.indices.is_empty() {
            return Ok(None);
        }

        let mut result = Vec::new();
        for group in self.sort_indices_by_table(catalog)? {
            let (_, rows) = group.fetch(chain)?;
            let mut accumulator = Accumulator::default();
            for row in 0..rows.len() {
                let scalar = row_aggregator.reduce(&rows.row_values(row));
                accumulator.extend(rows.ids[row], [scalar]);
            }
            let values = zero_fill(
                group.table.unique_identifiers(),
                accumulator.reduce(attribute_aggregator),
                attribute_aggregator.zero(),
            );
            result.push(TableValues {
                table: group.table.name().to_string(),
                run: group.run.name().to_string(),
                values,
            });
        }
        Ok(Some(result))
    }

    /// Gather the rows referenced by `indices` onto the identifiers of the
    /// table owning `indices[0]`.
    ///
    /// Tables of other runs, and tables with no projection to the first
    /// table, are skipped.
    pub fn project_to_first_table(
        catalog: &Catalog,
        chain: &ModifierChain,
        indices: &[ItemIndex],
    ) -> Result<Option<FirstTableProjection>> {
        let Some(first) = indices.first() else {
            return Ok(None);
        };
        let first = catalog.get_item(*first)?.table.clone();

        let mut rows: ProjectedRows = BTreeMap::new();
        for group in sort_indices_by_table(catalog, indices)? {
            if group.run.name() != first.run() {
                debug!(table = group.table.name(), "table belongs to another run, skipping");
                continue;
            }
            let Some(projection) = group
                .run
                .get_projection(group.table.subdomain(), first.subdomain())
            else {
                debug!(
                    table = group.table.name(),
                    first = first.name(),
                    "no projection to first table, skipping"
                );
                continue;
            };

            let (_, fetched) = group.fetch(chain)?;
            let key = (group.run.name().to_string(), group.table.name().to_string());
            let mut cache = ProjectionCache::new(&projection, &group.table, first.subdomain());
            for row in 0..fetched.len() {
                let values = fetched.row_values(row);
                for target in cache.targets(fetched.ids[row])? {
                    rows.entry(*target)
                        .or_default()
                        .entry(key.clone())
                        .or_default()
                        .push(values.clone());
                }
            }
        }

        Ok(Some(FirstTableProjection { table: first, rows }))
    }

    /// Group this request's columns against `desired`.
    ///
    /// Each axis is projected onto its own first table and compressed by
    /// a full Cartesian product across the tables sharing an identifier.
    /// The axes are then related through a projection between their first
    /// tables, and every related identifier pair contributes the product
    /// of the two value lists. Rows are joined by identifier, not by row
    /// correspondence, so unrelated rows sharing an identifier are paired.
    pub fn generalized_group_by(
        &self,
        catalog: &Catalog,
        chain: &ModifierChain,
        desired: &[ItemIndex],
        group_aggregator: Aggregator,
        desired_aggregator: Aggregator,
    ) -> Result<Option<GroupByPairs>> {
        if self.indices.is_empty() || desired.is_empty() {
            return Ok(None);
        }

        let (Some(group_axis), Some(desired_axis)) = (
            Self::project_to_first_table(catalog, chain, &self.indices)?,
            Self::project_to_first_table(catalog, chain, desired)?,
        ) else {
            return Ok(None);
        };

        let group_table = &group_axis.table;
        let desired_table = &desired_axis.table;
        let no_projection = || BoxfishError::NoProjection {
            origin: group_table.subdomain().key(),
            target: desired_table.subdomain().key(),
        };
        if group_table.run() != desired_table.run() {
            return Err(no_projection());
        }
        let projection = catalog
            .run_of(group_table)?
            .get_projection(group_table.subdomain(), desired_table.subdomain())
            .ok_or_else(no_projection)?;

        let desired_values: HashMap<Id, Vec<Value>> = desired_axis
            .rows
            .iter()
            .map(|(id, tables)| (*id, cartesian_compress(tables, desired_aggregator)))
            .collect();

        let mut pairs = GroupByPairs::default();
        let mut cache = ProjectionCache::new(&projection, group_table, desired_table.subdomain());
        for (id, tables) in &group_axis.rows {
            let group_values = cartesian_compress(tables, group_aggregator);
            for related in cache.targets(*id)? {
                let Some(matching) = desired_values.get(related) else {
                    continue;
                };
                for g in &group_values {
                    for d in matching {
                        pairs.group.push(g.clone());
                        pairs.desired.push(d.clone());
                    }
                }
            }
        }

        debug!(request = %self.name, pairs = pairs.len(), "generalized group-by");
        Ok(Some(pairs))
    }
}

/// Group `indices` by owning table, ordered by (run, table) name.
/// Attribute names keep request order, repeats removed.
pub fn sort_indices_by_table(catalog: &Catalog, indices: &[ItemIndex]) -> Result<Vec<TableGroup>> {
    let mut groups: BTreeMap<(String, String), TableGroup> = BTreeMap::new();
    for index in indices {
        let item = catalog.get_item(*index)?;
        let key = (item.table.run().to_string(), item.table.name().to_string());
        if !groups.contains_key(&key) {
            let run = catalog.run_of(&item.table)?.clone();
            groups.insert(
                key.clone(),
                TableGroup {
                    run,
                    table: item.table.clone(),
                    attributes: Vec::new(),
                },
            );
        }
        if let Some(group) = groups.get_mut(&key) {
            if !group.attributes.contains(&item.name) {
                group.attributes.push(item.name.clone());
            }
        }
    }
    Ok(groups.into_values().collect())
}

/// Reduce every combination of one row per table.
///
/// Each combination's values are flattened and reduced with `aggregator`,
/// so the output holds the product of the per-table row counts.
pub fn cartesian_compress(
    tables: &BTreeMap<(String, String), Vec<Vec<Value>>>,
    aggregator: Aggregator,
) -> Vec<Value> {
    if tables.is_empty() {
        return Vec::new();
    }

    let mut combinations: Vec<Vec<Value>> = vec![Vec::new()];
    for rows in tables.values() {
        let mut next = Vec::with_capacity(combinations.len() * rows.len());
        for combination in &combinations {
            for row in rows {
                let mut extended = combination.clone();
                extended.extend(row.iter().cloned());
                next.push(extended);
            }
        }
        combinations = next;
    }

    combinations
        .iter()
        .map(|values| aggregator.reduce(values))
        .collect()
}

/// Report every identifier of `all`, in that order, followed by any
/// contributing identifier outside it; missing values become `zero`
fn zero_fill(all: Vec<Id>, contributed: DomainValues, zero: Value) -> DomainValues {
    let mut by_id: HashMap<Id, Value> = contributed
        .ids
        .iter()
        .copied()
        .zip(contributed.values)
        .collect();

    let mut seen: HashSet<Id> = all.iter().copied().collect();
    let mut ids = all;
    for id in &contributed.ids {
        if seen.insert(*id) {
            ids.push(*id);
        }
    }

    let values = ids
        .iter()
        .map(|id| by_id.remove(id).unwrap_or_else(|| zero.clone()))
        .collect();
    DomainValues { ids, values }
}
