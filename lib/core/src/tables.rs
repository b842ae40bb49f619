//! Well-known discovery bulletin table names (spec §4.3, §4.7, §4.10,
//! §4.13). `Bulletin` itself only ever sees flat keys and hash tables — these
//! constants are the convention every caller above it shares so a shard's
//! bound claim and a cartograph's telemetry read agree on where to look.

/// Hash table of `(bound_id → shape)` a watchdog publishes and a
/// `BoundLeaser` atomically pops from (spec §4.7).
pub const BOUNDS_PENDING: &str = "bounds_pending";

/// Hash table of `(owning shard's canonical identity → shape)`, one row per
/// claimed bound. Only the claiming shard writes its own row.
pub const BOUNDS_CLAIMED: &str = "bounds_claimed";

/// Hash table of `(canonical identity → listen address)` every internal-role
/// node registers on startup, consulted before trusting an inbound Interlink
/// handshake from another internal role (spec §4.4).
pub const SERVER_REGISTRY: &str = "server_registry";

/// Hash table of per-entity `TelemetryRow` snapshots a shard's
/// `AuthorityTracker` publishes each tick (spec §4.10).
pub const AUTHORITY_TELEMETRY: &str = "authority_telemetry";

/// Hash table of per-node liveness/role telemetry a Cartograph reads to
/// render the cluster view (spec §4.13, §6).
pub const NETWORK_TELEMETRY: &str = "network_telemetry";

/// Hash table of `(canonical identity → expiry)` health pings (spec §4.13).
pub const HEALTH_PINGS: &str = "health_pings";

/// Hash table of `(client canonical identity → managing proxy's canonical
/// identity)`, kept current by whichever proxy currently owns a client, and
/// consulted by the Server-State Bus to resolve where to ship a command
/// (spec §4.12).
pub const CLIENT_PROXY_ASSIGNMENT: &str = "client_proxy_assignment";
