//! External shared-state contract for node registration, pending-bound
//! claims, authority telemetry, and health pings (spec §4.3 / C3).

mod bulletin;
mod error;
mod memory_bulletin;
mod redis_bulletin;

pub use bulletin::Bulletin;
pub use error::{DiscoveryError, DiscoveryResult};
pub use memory_bulletin::MemoryBulletin;
pub use redis_bulletin::RedisBulletin;
