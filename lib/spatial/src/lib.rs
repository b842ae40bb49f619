//! Spatial region model and world-partitioning heuristics (spec §4.5, §4.6 /
//! C5, C6).

mod bound;
mod heuristic;

pub use bound::{position_query, Bound, BoundSet, BoundShape, EntityMinimal, GridShape};
pub use heuristic::{GridHeuristic, GridHeuristicConfig, Heuristic};
