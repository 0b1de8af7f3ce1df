//! Filter couplers
//!
//! Every request owns a coupler, and every ancestor of the requesting
//! consumer owns one coupler upstream of it, so each request sees a chain
//! of couplers running from its consumer up to the root of the consumer
//! tree. A coupler resolves its modifier chain as its upstream's chain
//! plus its own filter. Changes flow downstream (toward the requesting
//! consumer); deletions tear down the whole chain in both directions.
//!
//! Couplers live in an arena and refer to each other by [`CouplerId`].
//! Operations return the notifications they produced instead of invoking
//! callbacks; the consumer tree turns them into its own events.

use crate::filter::{Filter, ModifierChain};
use crate::types::NodeId;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CouplerId(usize);

#[derive(Debug, Clone)]
pub struct Coupler {
    name: String,
    owner: NodeId,
    filter: Option<Arc<Filter>>,
    upstream: Option<CouplerId>,
    downstream: Vec<CouplerId>,
    upstream_chain: ModifierChain,
    resolved: ModifierChain,
}

impl Coupler {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumer node owning this coupler
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn filter(&self) -> Option<&Arc<Filter>> {
        self.filter.as_ref()
    }

    pub fn upstream(&self) -> Option<CouplerId> {
        self.upstream
    }

    pub fn downstream(&self) -> &[CouplerId] {
        &self.downstream
    }

    pub fn upstream_chain(&self) -> &ModifierChain {
        &self.upstream_chain
    }

    pub fn resolved_chain(&self) -> &ModifierChain {
        &self.resolved
    }

    fn recompute(&mut self) {
        self.resolved = self.upstream_chain.extended(self.filter.as_ref());
    }
}

/// Notification produced by a coupler operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouplerEvent {
    /// The coupler's resolved chain was recomputed
    Changed { coupler: CouplerId, owner: NodeId },
    /// The coupler was removed from the graph
    Deleted {
        coupler: CouplerId,
        owner: NodeId,
        name: String,
    },
}

#[derive(Debug, Default)]
pub struct CouplerGraph {
    slots: Vec<Option<Coupler>>,
    // vacated slots, reused before the arena grows
    free: Vec<usize>,
    live: usize,
}

impl CouplerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coupler with no upstream
    pub fn create(&mut self, name: &str, owner: NodeId, filter: Option<Arc<Filter>>) -> CouplerId {
        let mut coupler = Coupler {
            name: name.to_string(),
            owner,
            filter,
            upstream: None,
            downstream: Vec::new(),
            upstream_chain: ModifierChain::new(),
            resolved: ModifierChain::new(),
        };
        coupler.recompute();

        self.live += 1;
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(coupler);
                CouplerId(slot)
            }
            None => {
                self.slots.push(Some(coupler));
                CouplerId(self.slots.len() - 1)
            }
        }
    }

    /// Create a coupler one level closer to the root than `downstream`,
    /// carrying the same name, and wire the two together.
    ///
    /// `downstream` must not already have an upstream.
    pub fn create_upstream(
        &mut self,
        downstream: CouplerId,
        owner: NodeId,
        filter: Option<Arc<Filter>>,
    ) -> (CouplerId, Vec<CouplerEvent>) {
        let name = self.get(downstream).name.clone();
        assert!(
            self.get(downstream).upstream.is_none(),
            "coupler {:?} already has an upstream",
            downstream
        );

        let upstream = self.create(&name, owner, filter);
        self.get_mut(upstream).downstream.push(downstream);
        self.get_mut(downstream).upstream = Some(upstream);

        let chain = self.get(upstream).resolved.clone();
        let mut events = Vec::new();
        self.adopt_upstream_chain(downstream, chain, &mut events);
        (upstream, events)
    }

    /// Set or clear this coupler's own filter and propagate downstream
    pub fn set_filter(&mut self, id: CouplerId, filter: Option<Arc<Filter>>) -> Vec<CouplerEvent> {
        let mut events = Vec::new();
        {
            let coupler = self.get_mut(id);
            coupler.filter = filter;
            coupler.recompute();
            debug!(coupler = id.0, chain = coupler.resolved.len(), "coupler filter changed");
        }
        let owner = self.get(id).owner;
        events.push(CouplerEvent::Changed { coupler: id, owner });
        self.propagate_downstream(id, &mut events);
        events
    }

    /// Remove `id` and every coupler reachable from it in either direction
    pub fn delete(&mut self, id: CouplerId) -> Vec<CouplerEvent> {
        let mut events = Vec::new();
        let mut pending = vec![id];

        while let Some(next) = pending.pop() {
            let Some(coupler) = self.take(next) else {
                continue;
            };
            pending.extend(coupler.upstream);
            pending.extend(coupler.downstream.iter().copied());
            trace!(coupler = next.0, name = %coupler.name, "coupler deleted");
            events.push(CouplerEvent::Deleted {
                coupler: next,
                owner: coupler.owner,
                name: coupler.name,
            });
        }

        events
    }

    /// Remove everything upstream of `id`, leaving `id` (and its
    /// downstream) in place with an empty upstream chain
    pub fn detach_upstream(&mut self, id: CouplerId) -> Vec<CouplerEvent> {
        let mut events = Vec::new();
        let mut next = self.get_mut(id).upstream.take();

        while let Some(current) = next {
            let Some(coupler) = self.take(current) else {
                break;
            };
            next = coupler.upstream;
            events.push(CouplerEvent::Deleted {
                coupler: current,
                owner: coupler.owner,
                name: coupler.name,
            });
        }

        self.adopt_upstream_chain(id, ModifierChain::new(), &mut events);
        events
    }

    pub fn get(&self, id: CouplerId) -> &Coupler {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("coupler {:?} was deleted", id))
    }

    pub fn contains(&self, id: CouplerId) -> bool {
        matches!(self.slots.get(id.0), Some(Some(_)))
    }

    pub fn resolved_chain(&self, id: CouplerId) -> &ModifierChain {
        &self.get(id).resolved
    }

    /// Walk from `id` to the root coupler, `id` first
    pub fn path_to_root(&self, id: CouplerId) -> Vec<CouplerId> {
        let mut path = vec![id];
        let mut current = self.get(id).upstream;
        while let Some(up) = current {
            path.push(up);
            current = self.get(up).upstream;
        }
        path
    }

    /// Number of live couplers
    pub fn len(&self) -> usize {
        self.live
    }

    /// Slots allocated so far, live or vacant
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&mut self, id: CouplerId) -> Option<Coupler> {
        let coupler = self.slots.get_mut(id.0).and_then(Option::take)?;
        self.free.push(id.0);
        self.live -= 1;
        Some(coupler)
    }

    fn get_mut(&mut self, id: CouplerId) -> &mut Coupler {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("coupler {:?} was deleted", id))
    }

    fn adopt_upstream_chain(
        &mut self,
        id: CouplerId,
        chain: ModifierChain,
        events: &mut Vec<CouplerEvent>,
    ) {
        let coupler = self.get_mut(id);
        coupler.upstream_chain = chain;
        coupler.recompute();
        let owner = coupler.owner;
        events.push(CouplerEvent::Changed { coupler: id, owner });
        self.propagate_downstream(id, events);
    }

    fn propagate_downstream(&mut self, id: CouplerId, events: &mut Vec<CouplerEvent>) {
        let chain = self.get(id).resolved.clone();
        let downstream = self.get(id).downstream.clone();
        for child in downstream {
            self.adopt_upstream_chain(child, chain.clone(), events);
        }
    }
}
