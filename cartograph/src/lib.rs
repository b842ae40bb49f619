//! The cartograph process: a read-only observer over the discovery
//! bulletin's telemetry tables, rendering a cluster snapshot for an operator
//! (spec §4's "read-only observer that consumes telemetry for operator
//! dashboards"). It never writes a row another node's logic depends on.

pub mod config;
pub mod logging;
pub mod snapshot;

pub use config::CartographConfig;
pub use snapshot::{take_snapshot, ClusterSnapshot, NodeRow};
