//! Subdomain registry
//!
//! Identifiers in Boxfish always belong to a subdomain: a concrete type
//! (node, link, rank...) inside a domain group (hardware, communication,
//! application). Domain groups are never instantiated on their own; only
//! the leaf kinds listed in [`SubDomainKind::ALL`] tag identifier sets.

use crate::error::{BoxfishError, Result};
use crate::types::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    Hardware,
    Communication,
    Application,
}

impl Domain {
    /// Short name used in subdomain keys
    pub fn name(&self) -> &'static str {
        match self {
            Domain::Hardware => "HW",
            Domain::Communication => "comm",
            Domain::Application => "app",
        }
    }
}

/// Concrete (leaf) subdomain type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubDomainKind {
    Core,
    Node,
    Link,
    Rank,
    Communicator,
    Patch,
}

impl SubDomainKind {
    /// Registry of every instantiable subdomain
    pub const ALL: [SubDomainKind; 6] = [
        SubDomainKind::Core,
        SubDomainKind::Node,
        SubDomainKind::Link,
        SubDomainKind::Rank,
        SubDomainKind::Communicator,
        SubDomainKind::Patch,
    ];

    pub fn domain(&self) -> Domain {
        match self {
            SubDomainKind::Core | SubDomainKind::Node | SubDomainKind::Link => Domain::Hardware,
            SubDomainKind::Rank | SubDomainKind::Communicator => Domain::Communication,
            SubDomainKind::Patch => Domain::Application,
        }
    }

    pub fn typename(&self) -> &'static str {
        match self {
            SubDomainKind::Core => "core",
            SubDomainKind::Node => "node",
            SubDomainKind::Link => "link",
            SubDomainKind::Rank => "rank",
            SubDomainKind::Communicator => "communicator",
            SubDomainKind::Patch => "patch",
        }
    }

    /// Canonical `<domain>_<type>` key, e.g. `HW_node`
    pub fn key(&self) -> String {
        format!("{}_{}", self.domain().name(), self.typename())
    }

    /// Look up a kind by its key, ignoring case
    pub fn from_key(key: &str) -> Result<SubDomainKind> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.key().eq_ignore_ascii_case(key))
            .ok_or_else(|| BoxfishError::UnknownSubDomain(key.to_string()))
    }

    /// All registered keys, in registry order
    pub fn keys() -> Vec<String> {
        Self::ALL.iter().map(SubDomainKind::key).collect()
    }

    /// Kinds belonging to one domain group
    pub fn in_domain(domain: Domain) -> impl Iterator<Item = SubDomainKind> {
        Self::ALL.into_iter().filter(move |kind| kind.domain() == domain)
    }
}

impl fmt::Display for SubDomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Ordered identifiers tagged with their subdomain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDomain {
    kind: SubDomainKind,
    ids: Vec<Id>,
}

impl SubDomain {
    pub fn new(kind: SubDomainKind, ids: Vec<Id>) -> Self {
        SubDomain { kind, ids }
    }

    /// Construct the subdomain registered under `key`
    pub fn instantiate(key: &str, ids: Vec<Id>) -> Result<Self> {
        Ok(SubDomain::new(SubDomainKind::from_key(key)?, ids))
    }

    pub fn kind(&self) -> SubDomainKind {
        self.kind
    }

    pub fn subdomain(&self) -> String {
        self.kind.key()
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<Id> {
        self.ids
    }

    /// Replace the backing identifier list
    pub fn set_ids(&mut self, ids: Vec<Id>) {
        self.ids = ids;
    }

    /// Same identifiers, relabeled as another kind
    pub fn relabel(&self, kind: SubDomainKind) -> SubDomain {
        SubDomain::new(kind, self.ids.clone())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_follow_domain_and_type() {
        assert_eq!(SubDomainKind::Node.key(), "HW_node");
        assert_eq!(SubDomainKind::Rank.key(), "comm_rank");
        assert_eq!(SubDomainKind::Patch.key(), "app_patch");
        assert_eq!(SubDomainKind::keys().len(), SubDomainKind::ALL.len());
    }

    #[test]
    fn test_instantiate_is_case_insensitive() {
        let sub = SubDomain::instantiate("hw_LINK", vec![1, 2]).unwrap();
        assert_eq!(sub.kind(), SubDomainKind::Link);
        assert_eq!(sub.ids(), &[1, 2]);
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let err = SubDomain::instantiate("HW", vec![]).unwrap_err();
        assert!(err.is_not_found());
        assert!(SubDomainKind::from_key("HW_cabinet").is_err());
    }

    #[test]
    fn test_domain_groups() {
        let hardware: Vec<_> = SubDomainKind::in_domain(Domain::Hardware).collect();
        assert_eq!(
            hardware,
            vec![SubDomainKind::Core, SubDomainKind::Node, SubDomainKind::Link]
        );
        assert_eq!(SubDomainKind::Communicator.domain(), Domain::Communication);
    }
}
