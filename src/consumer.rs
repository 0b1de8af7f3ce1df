//! Consumer tree
//!
//! Consumers (views, plots, filters) form a tree. Each node may carry a
//! filter, owns the requests its module made, and holds its copy of the
//! shared scenes. The tree owns the coupler graph: every request gets a
//! leaf coupler at its node plus one coupler per ancestor, so ancestor
//! filters narrow the request's data root first.
//!
//! Scenes published by a node travel up while the propagate flag of the
//! node they pass through is set. The first node that does not propagate
//! (or the root) is the turn-around point: the scene is broadcast back
//! down its whole subtree, children before the local apply step.
//!
//! Nothing here calls back into the consumers. Notifications are queued
//! and handed out by [`ConsumerTree::drain_events`].

use crate::aggregate::Aggregator;
use crate::catalog::{Catalog, ItemIndex};
use crate::config::EngineConfig;
use crate::coupler::{CouplerEvent, CouplerGraph, CouplerId};
use crate::error::{BoxfishError, Result};
use crate::filter::{Filter, ModifierChain};
use crate::request::{DomainAggregation, DomainValues, GroupByPairs, Request, TableRows, TableValues};
use crate::scene::{AttributeScene, HighlightScene, ModuleScene, SceneFlags, SceneKind, SceneSettings};
use crate::subdomain::SubDomainKind;
use crate::table::Table;
use crate::types::{AttributeSet, NodeId, Range};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Notification queued for the consumers
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    /// The modifier chain of a request changed; its data is stale
    CouplerChanged { node: NodeId, request: String },
    /// A coupler owned by `node` was removed
    CouplerDeleted { node: NodeId, request: String },
    HighlightsChanged { node: NodeId },
    ModuleSceneReceived { node: NodeId, module: String },
    AttributeSceneChanged {
        node: NodeId,
        request: String,
        attributes: AttributeSet,
    },
}

#[derive(Debug, Clone)]
enum SceneUpdate {
    Highlight(HighlightScene),
    Attribute(AttributeScene),
    Module(ModuleScene),
}

impl SceneUpdate {
    fn kind(&self) -> SceneKind {
        match self {
            SceneUpdate::Highlight(_) => SceneKind::Highlight,
            SceneUpdate::Attribute(_) => SceneKind::Attribute,
            SceneUpdate::Module(_) => SceneKind::Module,
        }
    }
}

#[derive(Debug)]
pub struct ConsumerNode {
    name: String,
    module_type: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    filter: Option<Arc<Filter>>,
    couplers: Vec<CouplerId>,
    requests: BTreeMap<String, Request>,
    scenes: SceneSettings,
    highlight: HighlightScene,
    module_scenes: BTreeMap<String, ModuleScene>,
    attribute_scenes: BTreeMap<AttributeSet, AttributeScene>,
}

impl ConsumerNode {
    fn new(name: &str, module_type: &str, parent: Option<NodeId>, scenes: SceneSettings) -> Self {
        ConsumerNode {
            name: name.to_string(),
            module_type: module_type.to_string(),
            parent,
            children: Vec::new(),
            filter: None,
            couplers: Vec::new(),
            requests: BTreeMap::new(),
            scenes,
            highlight: HighlightScene::default(),
            module_scenes: BTreeMap::new(),
            attribute_scenes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn filter(&self) -> Option<&Arc<Filter>> {
        self.filter.as_ref()
    }

    /// Couplers owned by this node, for its own requests and for the
    /// requests of its descendants
    pub fn couplers(&self) -> &[CouplerId] {
        &self.couplers
    }

    pub fn requests(&self) -> impl Iterator<Item = &Request> {
        self.requests.values()
    }

    pub fn request(&self, name: &str) -> Option<&Request> {
        self.requests.get(name)
    }

    pub fn scene_flags(&self, kind: SceneKind) -> SceneFlags {
        self.scenes.get(kind)
    }

    pub fn highlight(&self) -> &HighlightScene {
        &self.highlight
    }

    pub fn module_scene(&self, module: &str) -> Option<&ModuleScene> {
        self.module_scenes.get(module)
    }

    pub fn attribute_scene(&self, attributes: &AttributeSet) -> Option<&AttributeScene> {
        self.attribute_scenes.get(attributes)
    }

    pub fn attribute_scene_keys(&self) -> impl Iterator<Item = &AttributeSet> {
        self.attribute_scenes.keys()
    }
}

pub struct ConsumerTree {
    config: EngineConfig,
    aggregation: DomainAggregation,
    catalog: Arc<Catalog>,
    nodes: Vec<Option<ConsumerNode>>,
    free_nodes: Vec<usize>,
    live_nodes: usize,
    couplers: CouplerGraph,
    // leaf coupler -> owning request
    request_couplers: HashMap<CouplerId, (NodeId, String)>,
    events: Vec<ConsumerEvent>,
}

impl ConsumerTree {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let aggregation = config.aggregation.to_aggregation()?;
        Ok(ConsumerTree {
            config,
            aggregation,
            catalog,
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            live_nodes: 0,
            couplers: CouplerGraph::new(),
            request_couplers: HashMap::new(),
            events: Vec::new(),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn couplers(&self) -> &CouplerGraph {
        &self.couplers
    }

    pub fn node(&self, id: NodeId) -> Result<&ConsumerNode> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(BoxfishError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ConsumerNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(BoxfishError::UnknownNode(id))
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.live_nodes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every notification queued since the last call
    pub fn drain_events(&mut self) -> Vec<ConsumerEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- tree structure ----

    pub fn add_root(&mut self, name: &str, module_type: &str) -> NodeId {
        let node = ConsumerNode::new(name, module_type, None, self.config.scenes.defaults);
        let id = self.insert_node(node);
        debug!(node = %id, name, "added root consumer");
        id
    }

    /// Add a child under `parent`. It propagates every scene kind its
    /// parent propagates.
    pub fn add_child(&mut self, parent: NodeId, name: &str, module_type: &str) -> Result<NodeId> {
        let mut scenes = self.config.scenes.defaults;
        let parent_scenes = self.node(parent)?.scenes;
        for kind in SceneKind::ALL {
            if parent_scenes.get(kind).propagate {
                scenes.get_mut(kind).propagate = true;
            }
        }

        let id = self.insert_node(ConsumerNode::new(name, module_type, Some(parent), scenes));
        self.node_mut(parent)?.children.push(id);
        debug!(node = %id, %parent, name, "added consumer");
        Ok(id)
    }

    /// Place `node` in a vacated slot if there is one. Ids of removed
    /// nodes are reused, so handles must not outlive `remove_node`.
    fn insert_node(&mut self, node: ConsumerNode) -> NodeId {
        self.live_nodes += 1;
        match self.free_nodes.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Ancestors of `id`, parent first
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut result = Vec::new();
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            result.push(parent);
            current = self.node(parent)?.parent;
        }
        Ok(result)
    }

    /// `id` and every descendant, parents before children
    pub fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut result = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let node = self.node(next)?;
            result.push(next);
            pending.extend(node.children.iter().rev().copied());
        }
        Ok(result)
    }

    /// Remove `id` and its subtree, tearing down their requests' couplers
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let subtree = self.subtree(id)?;
        for node in &subtree {
            for leaf in self.request_leaves(*node)? {
                let events = self.couplers.delete(leaf);
                self.absorb(events);
            }
        }

        if let Some(parent) = self.node(id)?.parent {
            self.node_mut(parent)?.children.retain(|c| *c != id);
        }
        for node in &subtree {
            self.nodes[node.0] = None;
            self.free_nodes.push(node.0);
        }
        self.live_nodes -= subtree.len();
        debug!(node = %id, removed = subtree.len(), "removed consumer subtree");
        Ok(())
    }

    /// Move `id` (with its subtree) under `new_parent`, or make it a root.
    ///
    /// The coupler chains of every request below `id` are rebuilt, and
    /// scene kinds the new parent propagates are forced on in the subtree.
    pub fn reparent(&mut self, id: NodeId, new_parent: Option<NodeId>) -> Result<()> {
        let subtree = self.subtree(id)?;
        if let Some(parent) = new_parent {
            self.node(parent)?;
            if subtree.contains(&parent) {
                return Err(BoxfishError::InvalidParent { node: id, parent });
            }
        }

        let old_parent = self.node(id)?.parent;
        if old_parent == new_parent {
            return Ok(());
        }
        if let Some(old) = old_parent {
            self.node_mut(old)?.children.retain(|c| *c != id);
        }
        self.node_mut(id)?.parent = new_parent;
        if let Some(parent) = new_parent {
            self.node_mut(parent)?.children.push(id);
        }

        for node in &subtree {
            for leaf in self.request_leaves(*node)? {
                let events = self.couplers.detach_upstream(leaf);
                self.absorb(events);
                self.build_upstream(*node, leaf)?;
            }
        }

        if let Some(parent) = new_parent {
            let parent_scenes = self.node(parent)?.scenes;
            for kind in SceneKind::ALL {
                if parent_scenes.get(kind).propagate {
                    self.set_propagate(id, kind, true)?;
                }
            }
        }
        debug!(node = %id, parent = ?new_parent, "reparented consumer");
        Ok(())
    }

    /// Set or clear the filter of `id`; every coupler it owns picks it up
    pub fn set_filter(&mut self, id: NodeId, filter: Option<Filter>) -> Result<()> {
        let filter = filter.map(Arc::new);
        let node = self.node_mut(id)?;
        node.filter = filter.clone();
        let couplers = node.couplers.clone();

        for coupler in couplers {
            let events = self.couplers.set_filter(coupler, filter.clone());
            self.absorb(events);
        }
        Ok(())
    }

    // ---- requests ----

    /// Create a request named `name` on `id`, replacing any request of
    /// that name
    pub fn add_request(&mut self, id: NodeId, name: &str) -> Result<()> {
        if self.node(id)?.requests.contains_key(name) {
            self.remove_request(id, name)?;
        }

        let filter = self.node(id)?.filter.clone();
        let leaf = self.couplers.create(name, id, filter);
        self.request_couplers.insert(leaf, (id, name.to_string()));

        let mut request = Request::new(name, id, leaf, &self.config.scenes.color_map);
        request.set_aggregation(self.aggregation);
        let node = self.node_mut(id)?;
        node.couplers.push(leaf);
        node.requests.insert(name.to_string(), request);

        self.build_upstream(id, leaf)
    }

    pub fn remove_request(&mut self, id: NodeId, name: &str) -> Result<()> {
        let leaf = self.request(id, name)?.coupler();
        let events = self.couplers.delete(leaf);
        self.absorb(events);
        Ok(())
    }

    pub fn request(&self, id: NodeId, name: &str) -> Result<&Request> {
        self.node(id)?
            .requests
            .get(name)
            .ok_or_else(|| BoxfishError::UnknownRequest {
                node: id,
                name: name.to_string(),
            })
    }

    fn request_mut(&mut self, id: NodeId, name: &str) -> Result<&mut Request> {
        self.node_mut(id)?
            .requests
            .get_mut(name)
            .ok_or_else(|| BoxfishError::UnknownRequest {
                node: id,
                name: name.to_string(),
            })
    }

    /// Modifier chain currently applying to a request
    pub fn chain(&self, id: NodeId, name: &str) -> Result<&ModifierChain> {
        let coupler = self.request(id, name)?.coupler();
        Ok(self.couplers.resolved_chain(coupler))
    }

    pub fn set_request_indices(&mut self, id: NodeId, name: &str, indices: Vec<ItemIndex>) -> Result<()> {
        let catalog = self.catalog.clone();
        self.request_mut(id, name)?.set_indices(&catalog, indices)
    }

    pub fn set_request_aggregators(&mut self, id: NodeId, name: &str, row: &str, attribute: &str) -> Result<()> {
        self.request_mut(id, name)?.set_aggregators(row, attribute)
    }

    pub fn set_request_target(&mut self, id: NodeId, name: &str, target: Option<SubDomainKind>) -> Result<()> {
        self.request_mut(id, name)?.set_target(target);
        Ok(())
    }

    /// Record the local range of a request's data and publish its
    /// attribute scene
    pub fn set_request_range(&mut self, id: NodeId, name: &str, range: Option<Range>) -> Result<()> {
        let request = self.request_mut(id, name)?;
        request.set_local_range(range);
        let scene = request.scene().clone();
        self.publish_attribute_scene(id, scene)
    }

    /// Recompute a request's local range from its current data, then
    /// publish it
    pub fn refresh_request_range(&mut self, id: NodeId, name: &str) -> Result<Option<Range>> {
        let request = self.request(id, name)?;
        let range = request.data_range(&self.catalog, self.couplers.resolved_chain(request.coupler()))?;
        self.set_request_range(id, name, range)?;
        Ok(range)
    }

    /// Change the color policy of a request and publish it
    pub fn set_request_color_map(
        &mut self,
        id: NodeId,
        name: &str,
        color_map: &str,
        use_total_range: bool,
    ) -> Result<()> {
        let mut scene = self.request(id, name)?.scene().clone();
        scene.color_map = color_map.to_string();
        scene.use_total_range = use_total_range;
        self.request_mut(id, name)?.offer_scene(&scene);
        self.publish_attribute_scene(id, scene)
    }

    pub fn rows(&self, id: NodeId, name: &str) -> Result<Option<Vec<TableRows>>> {
        let request = self.request(id, name)?;
        request.get_rows(&self.catalog, self.chain(id, name)?)
    }

    /// Aggregate a request onto `domain` with the request's operators
    pub fn aggregate_domain(&self, id: NodeId, name: &str, domain: &Table) -> Result<Option<DomainValues>> {
        let request = self.request(id, name)?;
        request.aggregate_domain(&self.catalog, self.chain(id, name)?, domain, &request.aggregation())
    }

    /// Aggregate a request onto the table holding its target subdomain,
    /// looked up in the run of its first column
    pub fn aggregate_target(&self, id: NodeId, name: &str) -> Result<Option<DomainValues>> {
        let request = self.request(id, name)?;
        let (Some(kind), Some(first)) = (request.target(), request.indices().first()) else {
            return Ok(None);
        };
        let table = self.catalog.get_item(*first)?.table.clone();
        let run = self.catalog.run_of(&table)?;
        let Some(domain) = run.table_for(kind) else {
            debug!(request = name, target = %kind, "run has no table for target");
            return Ok(None);
        };
        self.aggregate_domain(id, name, domain)
    }

    pub fn group_by_table(&self, id: NodeId, name: &str) -> Result<Option<Vec<TableValues>>> {
        let request = self.request(id, name)?;
        let aggregation = request.aggregation();
        request.group_by_table(&self.catalog, self.chain(id, name)?, aggregation.row, aggregation.attribute)
    }

    pub fn generalized_group_by(
        &self,
        id: NodeId,
        name: &str,
        desired: &[ItemIndex],
        group_aggregator: Aggregator,
        desired_aggregator: Aggregator,
    ) -> Result<Option<GroupByPairs>> {
        let request = self.request(id, name)?;
        request.generalized_group_by(
            &self.catalog,
            self.chain(id, name)?,
            desired,
            group_aggregator,
            desired_aggregator,
        )
    }

    // ---- scenes ----

    /// Clear or set the propagate flag of one scene kind.
    ///
    /// Clearing fails while the parent still propagates that kind.
    /// Setting forces the flag on for the whole subtree.
    pub fn set_propagate(&mut self, id: NodeId, kind: SceneKind, propagate: bool) -> Result<()> {
        if propagate {
            for node in self.subtree(id)? {
                self.node_mut(node)?.scenes.get_mut(kind).propagate = true;
            }
            return Ok(());
        }

        if let Some(parent) = self.node(id)?.parent {
            if self.node(parent)?.scenes.get(kind).propagate {
                return Err(BoxfishError::PropagationLocked { kind });
            }
        }
        self.node_mut(id)?.scenes.get_mut(kind).propagate = false;
        Ok(())
    }

    pub fn set_apply(&mut self, id: NodeId, kind: SceneKind, apply: bool) -> Result<()> {
        self.node_mut(id)?.scenes.get_mut(kind).apply = apply;
        Ok(())
    }

    /// Node where a scene of `kind` published at `id` turns around
    pub fn turn_around(&self, id: NodeId, kind: SceneKind) -> Result<NodeId> {
        let mut current = id;
        loop {
            let node = self.node(current)?;
            match node.parent {
                Some(parent) if node.scenes.get(kind).propagate => current = parent,
                _ => return Ok(current),
            }
        }
    }

    pub fn publish_highlight(&mut self, id: NodeId, scene: HighlightScene) -> Result<()> {
        let turn = self.turn_around(id, SceneKind::Highlight)?;
        trace!(from = %id, turn = %turn, "highlight scene");
        self.broadcast(turn, &SceneUpdate::Highlight(scene))
    }

    pub fn publish_module_scene(&mut self, id: NodeId, scene: ModuleScene) -> Result<()> {
        let turn = self.turn_around(id, SceneKind::Module)?;
        trace!(from = %id, turn = %turn, module = %scene.module, "module scene");
        self.broadcast(turn, &SceneUpdate::Module(scene))
    }

    /// Publish an attribute scene.
    ///
    /// At the turn-around point the total range becomes the union of the
    /// scene's local range and every local range for the same attribute
    /// set in the subtree. Afterwards, scenes for attribute sets the
    /// subtree no longer uses are pruned.
    pub fn publish_attribute_scene(&mut self, id: NodeId, mut scene: AttributeScene) -> Result<()> {
        let turn = self.turn_around(id, SceneKind::Attribute)?;
        let subtree = self.union_ranges(turn, &scene.attributes)?;
        scene.total_range = match (subtree, scene.local_range) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        };
        debug!(
            from = %id,
            turn = %turn,
            attributes = %scene.attributes,
            total = ?scene.total_range,
            "attribute scene turned around"
        );

        self.broadcast(turn, &SceneUpdate::Attribute(scene))?;
        self.prune_attribute_scenes(turn)
    }

    /// Union of the local ranges of every request in the subtree of `id`
    /// whose attribute set is `attributes`
    pub fn union_ranges(&self, id: NodeId, attributes: &AttributeSet) -> Result<Option<Range>> {
        let node = self.node(id)?;
        let mut total: Option<Range> = None;
        for child in &node.children {
            if let Some(range) = self.union_ranges(*child, attributes)? {
                total = Some(total.map_or(range, |t| t.union(&range)));
            }
        }
        for request in node.requests.values() {
            if request.attributes() != attributes {
                continue;
            }
            if let Some(range) = request.scene().local_range {
                total = Some(total.map_or(range, |t| t.union(&range)));
            }
        }
        Ok(total)
    }

    fn broadcast(&mut self, id: NodeId, update: &SceneUpdate) -> Result<()> {
        let children = self.node(id)?.children.clone();
        for child in children {
            self.broadcast(child, update)?;
        }
        self.apply_locally(id, update)
    }

    fn apply_locally(&mut self, id: NodeId, update: &SceneUpdate) -> Result<()> {
        let mut events = Vec::new();
        let node = self.node_mut(id)?;
        let flags = node.scenes.get(update.kind());

        match update {
            SceneUpdate::Highlight(scene) => {
                if flags.apply {
                    node.highlight = scene.clone();
                    events.push(ConsumerEvent::HighlightsChanged { node: id });
                }
            }
            SceneUpdate::Module(scene) => {
                node.module_scenes.insert(scene.module.clone(), scene.clone());
                if flags.apply && scene.module == node.module_type {
                    events.push(ConsumerEvent::ModuleSceneReceived {
                        node: id,
                        module: scene.module.clone(),
                    });
                }
            }
            SceneUpdate::Attribute(scene) => {
                node.attribute_scenes
                    .insert(scene.attributes.clone(), scene.clone());
                if flags.apply {
                    for request in node.requests.values_mut() {
                        if request.attributes() == &scene.attributes && request.offer_scene(scene) {
                            events.push(ConsumerEvent::AttributeSceneChanged {
                                node: id,
                                request: request.name().to_string(),
                                attributes: scene.attributes.clone(),
                            });
                        }
                    }
                }
            }
        }

        self.events.extend(events);
        Ok(())
    }

    /// Drop attribute scenes for sets no request under `id` uses, at `id`
    /// and at every descendant reached through propagating nodes
    pub fn prune_attribute_scenes(&mut self, id: NodeId) -> Result<()> {
        let mut valid = BTreeSet::new();
        for node in self.subtree(id)? {
            for request in self.node(node)?.requests.values() {
                valid.insert(request.attributes().clone());
            }
        }
        self.prune(id, &valid)
    }

    fn prune(&mut self, id: NodeId, valid: &BTreeSet<AttributeSet>) -> Result<()> {
        let node = self.node_mut(id)?;
        let before = node.attribute_scenes.len();
        node.attribute_scenes.retain(|key, _| valid.contains(key));
        let removed = before - node.attribute_scenes.len();
        if removed > 0 {
            trace!(node = %id, removed, "pruned attribute scenes");
        }

        let children = node.children.clone();
        for child in children {
            if self.node(child)?.scenes.get(SceneKind::Attribute).propagate {
                self.prune(child, valid)?;
            }
        }
        Ok(())
    }

    // ---- coupler bookkeeping ----

    fn request_leaves(&self, id: NodeId) -> Result<Vec<CouplerId>> {
        Ok(self.node(id)?.requests.values().map(Request::coupler).collect())
    }

    /// Give `leaf` one upstream coupler per ancestor of `owner`
    fn build_upstream(&mut self, owner: NodeId, leaf: CouplerId) -> Result<()> {
        let mut current = leaf;
        for ancestor in self.ancestors(owner)? {
            let filter = self.node(ancestor)?.filter.clone();
            let (upstream, events) = self.couplers.create_upstream(current, ancestor, filter);
            self.node_mut(ancestor)?.couplers.push(upstream);
            self.absorb(events);
            current = upstream;
        }
        Ok(())
    }

    fn absorb(&mut self, events: Vec<CouplerEvent>) {
        for event in events {
            match event {
                CouplerEvent::Changed { coupler, .. } => {
                    if let Some((node, request)) = self.request_couplers.get(&coupler) {
                        self.events.push(ConsumerEvent::CouplerChanged {
                            node: *node,
                            request: request.clone(),
                        });
                    }
                }
                CouplerEvent::Deleted { coupler, owner, name } => {
                    if let Some(Some(node)) = self.nodes.get_mut(owner.0) {
                        node.couplers.retain(|c| *c != coupler);
                    }
                    if let Some((node, request)) = self.request_couplers.remove(&coupler) {
                        if let Some(Some(node)) = self.nodes.get_mut(node.0) {
                            node.requests.remove(&request);
                        }
                    }
                    self.events.push(ConsumerEvent::CouplerDeleted {
                        node: owner,
                        request: name,
                    });
                }
            }
        }
    }
}
