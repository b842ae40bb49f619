//! Read-only cluster view (spec §4's "Cartograph — a read-only observer that
//! consumes telemetry for operator dashboards"). Everything here only reads
//! the discovery bulletin; it never writes a row another node depends on.

use atlasnet_codec::{Decode, Reader};
use atlasnet_core::tables::{AUTHORITY_TELEMETRY, HEALTH_PINGS, NETWORK_TELEMETRY, SERVER_REGISTRY};
use atlasnet_core::{NetworkTelemetryRow, TelemetryRow};
use atlasnet_discovery::{Bulletin, DiscoveryResult};

#[derive(Debug, Clone)]
pub struct NodeRow {
    pub identity: String,
    pub registered_addr: Option<String>,
    pub network: Option<NetworkTelemetryRow>,
    pub ping_expiry_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeRow>,
    pub entities: Vec<TelemetryRow>,
}

/// Pulls `server_registry`, `network_telemetry`, `health_pings`, and
/// `authority_telemetry` in one pass and joins them on canonical identity.
/// Malformed rows (wrong byte shape from a version skew) are skipped rather
/// than failing the whole snapshot.
pub fn take_snapshot(bulletin: &dyn Bulletin) -> DiscoveryResult<ClusterSnapshot> {
    let registry = bulletin.hgetall(SERVER_REGISTRY)?;
    let network = bulletin.hgetall(NETWORK_TELEMETRY)?;
    let pings = bulletin.hgetall(HEALTH_PINGS)?;
    let telemetry = bulletin.hgetall(AUTHORITY_TELEMETRY)?;

    let mut nodes: Vec<NodeRow> = registry
        .iter()
        .map(|(identity, addr_bytes)| NodeRow {
            identity: identity.clone(),
            registered_addr: std::str::from_utf8(addr_bytes).ok().map(|s| s.to_string()),
            network: network.get(identity).and_then(|bytes| decode::<NetworkTelemetryRow>(bytes)),
            ping_expiry_ms: pings.get(identity).and_then(|bytes| bytes.get(..8)).map(|b| {
                u64::from_be_bytes(b.try_into().expect("slice is exactly 8 bytes"))
            }),
        })
        .collect();
    nodes.sort_by(|a, b| a.identity.cmp(&b.identity));

    let mut entities: Vec<TelemetryRow> = telemetry.values().filter_map(|bytes| decode::<TelemetryRow>(bytes)).collect();
    entities.sort_by_key(|row| row.entity_id);

    Ok(ClusterSnapshot { nodes, entities })
}

fn decode<T: Decode>(bytes: &[u8]) -> Option<T> {
    let mut r = Reader::new(bytes);
    T::decode(&mut r).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_codec::Encode;
    use atlasnet_core::{Aabb3, Transform};
    use atlasnet_discovery::MemoryBulletin;
    use atlasnet_ident::{NodeIdentity, Role};
    use glam::Vec3;
    use uuid::Uuid;

    #[test]
    fn snapshot_joins_registry_network_and_pings_by_identity() {
        let bulletin = MemoryBulletin::new();
        let shard = NodeIdentity::new(Role::Shard, Uuid::new_v4());

        bulletin.hset(SERVER_REGISTRY, &shard.canonical(), b"10.0.0.1:29100").unwrap();
        let net_row = NetworkTelemetryRow {
            identity: shard,
            listen_addr: "10.0.0.1:29100".to_string(),
            last_seen_ms: 42,
        };
        bulletin.hset(NETWORK_TELEMETRY, &shard.canonical(), &net_row.encode_to_vec()).unwrap();
        bulletin.hset(HEALTH_PINGS, &shard.canonical(), &9_000u64.to_be_bytes()).unwrap();

        let snapshot = take_snapshot(&bulletin).unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        let row = &snapshot.nodes[0];
        assert_eq!(row.identity, shard.canonical());
        assert_eq!(row.registered_addr.as_deref(), Some("10.0.0.1:29100"));
        assert_eq!(row.network.as_ref().unwrap().last_seen_ms, 42);
        assert_eq!(row.ping_expiry_ms, Some(9_000));
    }

    #[test]
    fn snapshot_includes_registered_nodes_with_no_telemetry_yet() {
        let bulletin = MemoryBulletin::new();
        let watchdog = NodeIdentity::singleton(Role::Watchdog);
        bulletin.hset(SERVER_REGISTRY, &watchdog.canonical(), b"10.0.0.9:29300").unwrap();

        let snapshot = take_snapshot(&bulletin).unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert!(snapshot.nodes[0].network.is_none());
        assert!(snapshot.nodes[0].ping_expiry_ms.is_none());
    }

    #[test]
    fn snapshot_decodes_and_sorts_entity_telemetry() {
        let bulletin = MemoryBulletin::new();
        let shard = NodeIdentity::new(Role::Shard, Uuid::new_v4());
        let entity_id = Uuid::new_v4();
        let row = TelemetryRow {
            entity_id,
            owner: shard,
            transform: Transform::new(0, Vec3::ZERO, Aabb3::new(Vec3::ZERO, Vec3::ZERO)),
            client_id: Uuid::nil(),
            is_client: false,
        };
        bulletin.hset(AUTHORITY_TELEMETRY, &entity_id.to_string(), &row.encode_to_vec()).unwrap();

        let snapshot = take_snapshot(&bulletin).unwrap();
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].entity_id, entity_id);
    }
}
