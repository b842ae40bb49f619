use crate::error::DiscoveryResult;
use std::collections::HashMap;

/// External shared-state contract every AtlasNet process talks to for
/// coordination: node registration, pending-bound claims, authority
/// telemetry, and health pings (spec §4.3 / C3). Table names (`"Heuristic_
/// Bounds_Pending"` and friends) are an internal convention of the callers
/// above this trait, not something the bulletin itself knows about — it only
/// ever sees flat keys, hash tables, and opaque byte values.
///
/// Grounded on the original `HeuristicManifest`/`RedisConnection` split
/// (`Heuristic_Bounds_Pending`/`Heuristic_Bounds_Claimed` hash tables, plain
/// GET/SET/EXPIRE/TTL key ops): the original kept a typed manifest wrapper
/// per subsystem over one untyped connection, which is exactly the shape of
/// `Bulletin` plus its callers.
pub trait Bulletin: Send + Sync {
    fn get(&self, key: &str) -> DiscoveryResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> DiscoveryResult<()>;
    fn del(&self, key: &str) -> DiscoveryResult<bool>;
    fn expire(&self, key: &str, ttl_secs: u64) -> DiscoveryResult<bool>;
    /// Remaining seconds to live, or `None` if the key carries no expiry or
    /// does not exist (Redis TTL's -1/-2 collapsed into one case: callers
    /// that need to tell them apart should `exists` first).
    fn ttl(&self, key: &str) -> DiscoveryResult<Option<i64>>;
    fn exists(&self, key: &str) -> DiscoveryResult<bool>;

    fn hset(&self, key: &str, field: &str, value: &[u8]) -> DiscoveryResult<()>;
    fn hget(&self, key: &str, field: &str) -> DiscoveryResult<Option<Vec<u8>>>;
    fn hgetall(&self, key: &str) -> DiscoveryResult<HashMap<String, Vec<u8>>>;
    fn hdel(&self, key: &str, field: &str) -> DiscoveryResult<bool>;
    fn hexists(&self, key: &str, field: &str) -> DiscoveryResult<bool>;
    /// Atomically adds `delta` to `field` (creating it at 0 first if absent)
    /// and returns the new value.
    fn hincrby(&self, key: &str, field: &str, delta: i64) -> DiscoveryResult<i64>;

    /// The bulletin's notion of "now", in milliseconds, used instead of each
    /// node's local clock so health-ping expiry is judged consistently
    /// (spec §4.13).
    fn server_time_now(&self) -> DiscoveryResult<u64>;

    /// Atomically removes and returns one arbitrary `(field, value)` pair
    /// from the hash table at `key`, or `None` if it is empty. This is the
    /// primitive `BoundLeaser` claims pending bounds with (spec §4.7):
    /// exactly one caller among racing shards gets each field.
    fn pop_one(&self, key: &str) -> DiscoveryResult<Option<(String, Vec<u8>)>>;
}
