//! Error taxonomy for the engine

use crate::scene::SceneKind;
use crate::types::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BoxfishError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoxfishError {
    #[error("unknown subdomain '{0}'")]
    UnknownSubDomain(String),

    #[error("no request named '{name}' on {node}")]
    UnknownRequest { node: NodeId, name: String },

    #[error("table '{table}' has no attribute '{attribute}'")]
    UnknownAttribute { table: String, attribute: String },

    #[error("no catalog item with index {0}")]
    UnknownItem(usize),

    #[error("unknown run '{0}'")]
    UnknownRun(String),

    #[error("{0} is not part of the consumer tree")]
    UnknownNode(NodeId),

    #[error("unknown aggregator '{0}' (expected sum, mean, max or min)")]
    UnknownAggregator(String),

    #[error("no projection from {origin} to {target}")]
    NoProjection { origin: String, target: String },

    #[error("cannot stop propagating {kind} scenes while the parent still propagates them")]
    PropagationLocked { kind: SceneKind },

    #[error("{node} cannot be moved under {parent}: the parent lies in its own subtree")]
    InvalidParent { node: NodeId, parent: NodeId },

    #[error("invalid table '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl BoxfishError {
    /// True for the lookup failures: unknown keys, names and indices
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BoxfishError::UnknownSubDomain(_)
                | BoxfishError::UnknownRequest { .. }
                | BoxfishError::UnknownAttribute { .. }
                | BoxfishError::UnknownItem(_)
                | BoxfishError::UnknownRun(_)
                | BoxfishError::UnknownNode(_)
                | BoxfishError::UnknownAggregator(_)
        )
    }
}

impl From<serde_json::Error> for BoxfishError {
    fn from(err: serde_json::Error) -> Self {
        BoxfishError::Config(err.to_string())
    }
}

impl From<std::io::Error> for BoxfishError {
    fn from(err: std::io::Error) -> Self {
        BoxfishError::Config(err.to_string())
    }
}
