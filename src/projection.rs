//! Projections between subdomains of one run
//!
//! A projection relates the identifiers of two subdomains. The identity
//! projection keeps identifiers as they are; a general projection is an
//! explicit many-to-many mapping usable in either direction.

use crate::error::{BoxfishError, Result};
use crate::subdomain::{SubDomain, SubDomainKind};
use crate::types::Id;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Projection {
    /// Identifier sets are equal on both sides
    Identity {
        source: SubDomainKind,
        target: SubDomainKind,
    },
    General(Arc<GeneralProjection>),
}

impl Projection {
    pub fn identity(source: SubDomainKind, target: SubDomainKind) -> Self {
        Projection::Identity { source, target }
    }

    pub fn general(projection: GeneralProjection) -> Self {
        Projection::General(Arc::new(projection))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Projection::Identity { .. })
    }

    /// The two subdomains this projection relates
    pub fn endpoints(&self) -> (SubDomainKind, SubDomainKind) {
        match self {
            Projection::Identity { source, target } => (*source, *target),
            Projection::General(general) => (general.first, general.second),
        }
    }

    /// True if this projection relates `a` and `b`, in either direction
    pub fn connects(&self, a: SubDomainKind, b: SubDomainKind) -> bool {
        let (x, y) = self.endpoints();
        (x == a && y == b) || (x == b && y == a)
    }

    /// Identifiers of `target` related to the identifiers of `subdomain`
    pub fn project(&self, subdomain: &SubDomain, target: SubDomainKind) -> Result<SubDomain> {
        if !self.connects(subdomain.kind(), target) {
            return Err(BoxfishError::NoProjection {
                origin: subdomain.subdomain(),
                target: target.key(),
            });
        }

        match self {
            Projection::Identity { .. } => Ok(subdomain.relabel(target)),
            Projection::General(general) => {
                let mapping = if subdomain.kind() == general.first && target == general.second {
                    &general.forward
                } else {
                    &general.backward
                };
                Ok(SubDomain::new(target, map_ids(mapping, subdomain.ids())))
            }
        }
    }
}

/// Explicit many-to-many mapping between two subdomains
#[derive(Debug, Clone)]
pub struct GeneralProjection {
    first: SubDomainKind,
    second: SubDomainKind,
    forward: HashMap<Id, Vec<Id>>,
    backward: HashMap<Id, Vec<Id>>,
}

impl GeneralProjection {
    /// Build from `(first_id, second_id)` pairs
    pub fn new(
        first: SubDomainKind,
        second: SubDomainKind,
        pairs: impl IntoIterator<Item = (Id, Id)>,
    ) -> Self {
        let mut forward: HashMap<Id, Vec<Id>> = HashMap::new();
        let mut backward: HashMap<Id, Vec<Id>> = HashMap::new();

        for (a, b) in pairs {
            let targets = forward.entry(a).or_default();
            if !targets.contains(&b) {
                targets.push(b);
            }
            let sources = backward.entry(b).or_default();
            if !sources.contains(&a) {
                sources.push(a);
            }
        }

        GeneralProjection {
            first,
            second,
            forward,
            backward,
        }
    }

    pub fn first(&self) -> SubDomainKind {
        self.first
    }

    pub fn second(&self) -> SubDomainKind {
        self.second
    }

    pub fn pair_count(&self) -> usize {
        self.forward.values().map(Vec::len).sum()
    }
}

fn map_ids(mapping: &HashMap<Id, Vec<Id>>, ids: &[Id]) -> Vec<Id> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in ids {
        if let Some(related) = mapping.get(id) {
            for r in related {
                if seen.insert(*r) {
                    out.push(*r);
                }
            }
        }
    }
    out
}
