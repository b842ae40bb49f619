//! The watchdog process: the sole producer of the spatial partition,
//! publisher of unclaimed bounds, and the peer that releases a dead shard's
//! claim back to `bounds_pending` (spec §4.6, §4.13 / C6).

pub mod config;
pub mod logging;
pub mod reconciler;

pub use config::WatchdogConfig;
pub use reconciler::Reconciler;
