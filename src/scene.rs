//! Scene values shared through the consumer tree
//!
//! Three independent kinds of shared state travel through the tree:
//! highlights, attribute scenes (color map and value ranges, one per
//! attribute set) and module-specific scenes (e.g. a camera position,
//! one per module type). Each consumer node decides per kind whether it
//! forwards scenes to its parent and whether it applies scenes it receives.

use crate::types::{AttributeSet, Id, Range};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneKind {
    Highlight,
    Attribute,
    Module,
}

impl SceneKind {
    pub const ALL: [SceneKind; 3] = [SceneKind::Highlight, SceneKind::Attribute, SceneKind::Module];
}

impl fmt::Display for SceneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SceneKind::Highlight => "highlight",
            SceneKind::Attribute => "attribute",
            SceneKind::Module => "module",
        };
        write!(f, "{}", name)
    }
}

/// Propagate/apply toggles for one scene kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFlags {
    /// Forward scenes from below to the parent
    pub propagate: bool,
    /// Act on scenes arriving from above
    pub apply: bool,
}

impl Default for SceneFlags {
    fn default() -> Self {
        SceneFlags {
            propagate: true,
            apply: true,
        }
    }
}

/// Flags for all three kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    pub highlight: SceneFlags,
    pub attribute: SceneFlags,
    pub module: SceneFlags,
}

impl SceneSettings {
    pub fn get(&self, kind: SceneKind) -> SceneFlags {
        match kind {
            SceneKind::Highlight => self.highlight,
            SceneKind::Attribute => self.attribute,
            SceneKind::Module => self.module,
        }
    }

    pub fn get_mut(&mut self, kind: SceneKind) -> &mut SceneFlags {
        match kind {
            SceneKind::Highlight => &mut self.highlight,
            SceneKind::Attribute => &mut self.attribute,
            SceneKind::Module => &mut self.module,
        }
    }
}

/// Highlighted identifiers of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHighlight {
    pub table: String,
    pub ids: BTreeSet<Id>,
}

/// Highlighted identifiers, per table, within one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightScene {
    pub run: Option<String>,
    pub tables: Vec<TableHighlight>,
}

impl HighlightScene {
    pub fn new(run: &str) -> Self {
        HighlightScene {
            run: Some(run.to_string()),
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: &str, ids: impl IntoIterator<Item = Id>) -> Self {
        self.tables.push(TableHighlight {
            table: table.to_string(),
            ids: ids.into_iter().collect(),
        });
        self
    }

    /// Highlighted identifiers of `table`, if any
    pub fn ids_for(&self, table: &str) -> Option<&BTreeSet<Id>> {
        self.tables.iter().find(|t| t.table == table).map(|t| &t.ids)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.ids.is_empty())
    }
}

/// Color map and value ranges for one attribute set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeScene {
    pub attributes: AttributeSet,
    pub color_map: String,
    /// Range of the data held by the owning request
    pub local_range: Option<Range>,
    /// Union of every related request's local range
    pub total_range: Option<Range>,
    /// Color by the total range instead of the local one
    pub use_total_range: bool,
}

impl AttributeScene {
    pub fn new(attributes: AttributeSet, color_map: &str) -> Self {
        AttributeScene {
            attributes,
            color_map: color_map.to_string(),
            local_range: None,
            total_range: None,
            use_total_range: false,
        }
    }

    /// Range to color by under the current policy
    pub fn range(&self) -> Option<Range> {
        if self.use_total_range {
            self.total_range.or(self.local_range)
        } else {
            self.local_range
        }
    }

    /// Scenes over different attribute sets are unrelated
    pub fn is_compatible(&self, other: &AttributeScene) -> bool {
        self.attributes == other.attributes
    }

    /// Adopt the shared policy of `other` (color map, total range, range
    /// policy), keeping this scene's local range. Returns true if
    /// anything changed.
    pub fn merge(&mut self, other: &AttributeScene) -> bool {
        if !self.is_compatible(other) {
            return false;
        }

        let changed = self.color_map != other.color_map
            || self.total_range != other.total_range
            || self.use_total_range != other.use_total_range;

        if changed {
            self.color_map = other.color_map.clone();
            self.total_range = other.total_range;
            self.use_total_range = other.use_total_range;
        }
        changed
    }
}

/// Module-specific scene, keyed by module type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleScene {
    pub module: String,
    pub payload: serde_json::Value,
}

impl ModuleScene {
    pub fn new(module: &str, payload: serde_json::Value) -> Self {
        ModuleScene {
            module: module.to_string(),
            payload,
        }
    }
}
