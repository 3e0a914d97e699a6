//! Faction registry, relation graph, and vassalage aggregation.
//!
//! This crate owns the canonical faction store and the directed, typed
//! relation graph between factions. The liege/vassal subset of that graph
//! drives power aggregation: a liege's cumulative power includes a share of
//! each vassal's.
//!
//! # Modules
//!
//! - [`registry`] -- [`FactionRegistry`]: factions, membership, relations,
//!   diplomacy, vassalization, disbandment
//! - [`vassalage`] -- Feudal tree traversal and [`PowerAggregator`]
//! - [`error`] -- [`FactionError`]
//!
//! # Invariants
//!
//! - Faction names are unique, compared case-insensitively.
//! - No faction relates to itself.
//! - `relation(A, B) == Vassal` if and only if `relation(B, A) == Liege`.
//! - The liege/vassal subgraph is a forest: cycles are rejected when an edge
//!   is created, and every traversal tracks visited ids regardless.

pub mod error;
pub mod registry;
pub mod vassalage;

pub use error::FactionError;
pub use registry::{DisbandOutcome, FactionChanges, FactionRegistry, TerritoryRelease};
pub use vassalage::{PowerAggregator, feudal_tree, liege_chain, top_liege};
