//! Boxfish - Rust Core Engine
//!
//! Data request, aggregation, projection and scene-propagation engine
//! behind the Boxfish performance-data visualizer. Consumer modules ask
//! for columns of run tables; the engine filters, aggregates and projects
//! them across subdomains and keeps shared view state in sync.
//!
//! # Architecture
//!
//! - Data Layer: typed column tables keyed by subdomain identifiers
//! - Projection Layer: identifier mappings between subdomains of a run
//! - Filter Layer: predicate filters and root-first modifier chains
//! - Coupler Layer: per-request filter chains following the consumer tree
//! - Request Layer: row retrieval, domain aggregation and group-by
//! - Scene Layer: highlight, attribute-range and module scene propagation

pub mod types;
pub mod error;
pub mod config;
pub mod telemetry;

// Data model
pub mod subdomain;
pub mod table;
pub mod predicate;
pub mod projection;
pub mod catalog;

// Filtering
pub mod filter;
pub mod coupler;

// Queries
pub mod aggregate;
pub mod request;

// Consumer tree and scenes
pub mod scene;
pub mod consumer;

pub use types::{AttributeSet, Id, NodeId, Range, Value};
pub use error::{BoxfishError, Result};
pub use config::{AggregationConfig, EngineConfig, LoggingConfig, SceneConfig};
pub use telemetry::init_tracing;

// Data model exports
pub use subdomain::{Domain, SubDomain, SubDomainKind};
pub use table::{dedup_ordered, Column, RowSet, Table};
pub use predicate::Predicate;
pub use projection::{GeneralProjection, Projection};
pub use catalog::{Catalog, CatalogItem, ItemIndex, Run};

// Filtering exports
pub use filter::{Filter, FilterFn, ModifierChain};
pub use coupler::{Coupler, CouplerEvent, CouplerGraph, CouplerId};

// Query exports
pub use aggregate::Aggregator;
pub use request::{
    cartesian_compress, sort_indices_by_table, Coverage, DomainAggregation, DomainValues,
    FirstTableProjection, GroupByPairs, ProjectedRows, Request, TableGroup, TableRows, TableValues,
};

// Scene exports
pub use scene::{
    AttributeScene, HighlightScene, ModuleScene, SceneFlags, SceneKind, SceneSettings,
    TableHighlight,
};
pub use consumer::{ConsumerEvent, ConsumerNode, ConsumerTree};
