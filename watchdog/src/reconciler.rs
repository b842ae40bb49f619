//! Watchdog reconciliation loop (spec §4.6 / C6): computes the world's
//! bound partition via a `Heuristic` and keeps `bounds_pending` stocked with
//! any bound that has fallen out of both `bounds_pending` and
//! `bounds_claimed` — the initial publish, and the backstop after a shard's
//! claim row is released on peer failure (see `release_failed_shard_bound`).

use atlasnet_codec::{Decode, Encode, Reader};
use atlasnet_core::tables::{BOUNDS_CLAIMED, BOUNDS_PENDING};
use atlasnet_discovery::{Bulletin, DiscoveryResult};
use atlasnet_ident::NodeIdentity;
use atlasnet_spatial::{Bound, Heuristic};
use slog::{info, o, warn, Logger};
use std::collections::HashSet;
use std::str::FromStr;

pub struct Reconciler {
    heuristic: Heuristic,
    log: Logger,
}

impl Reconciler {
    pub fn new(heuristic: Heuristic, log: &Logger) -> Reconciler {
        Reconciler {
            heuristic,
            log: log.new(o!("component" => "reconciler")),
        }
    }

    /// Recomputes the target partition and republishes any bound id absent
    /// from both `bounds_pending` and `bounds_claimed`. Returns the ids
    /// republished this pass.
    pub fn reconcile(&self, bulletin: &dyn Bulletin) -> DiscoveryResult<Vec<u32>> {
        let target = self.heuristic.compute_bounds(&[]);

        let pending = bulletin.hgetall(BOUNDS_PENDING)?;
        let claimed = bulletin.hgetall(BOUNDS_CLAIMED)?;

        let mut known: HashSet<u32> = HashSet::new();
        for bytes in pending.values() {
            if let Some(bound) = decode_bound(bytes) {
                known.insert(bound.bound_id);
            }
        }
        for bytes in claimed.values() {
            if let Some(bound) = decode_bound(bytes) {
                known.insert(bound.bound_id);
            }
        }

        let mut republished = Vec::new();
        for bound in target {
            if known.contains(&bound.bound_id) {
                continue;
            }
            bulletin.hset(BOUNDS_PENDING, &bound.bound_id.to_string(), &bound.encode_to_vec())?;
            info!(self.log, "published a bound for claiming"; "bound_id" => bound.bound_id);
            republished.push(bound.bound_id);
        }
        Ok(republished)
    }

    /// Releases a failed shard's claimed bound back into `bounds_pending`
    /// (spec §4.13: "release any locks named by that peer in the discovery
    /// bulletin"). The watchdog is the natural owner of this cleanup since
    /// it never itself competes for a claim. No-op if the peer held nothing.
    pub fn release_failed_shard_bound(&self, bulletin: &dyn Bulletin, peer_canonical: &str) -> DiscoveryResult<bool> {
        let Ok(identity) = NodeIdentity::from_str(peer_canonical) else {
            return Ok(false);
        };
        if !identity.is_internal() {
            return Ok(false);
        }

        let Some(bytes) = bulletin.hget(BOUNDS_CLAIMED, &identity.canonical())? else {
            return Ok(false);
        };
        let Some(bound) = decode_bound(&bytes) else {
            warn!(self.log, "failed shard's claim row was malformed, dropping it"; "peer" => peer_canonical);
            bulletin.hdel(BOUNDS_CLAIMED, &identity.canonical())?;
            return Ok(false);
        };

        bulletin.hdel(BOUNDS_CLAIMED, &identity.canonical())?;
        bulletin.hset(BOUNDS_PENDING, &bound.bound_id.to_string(), &bytes)?;
        info!(self.log, "released a failed shard's bound back to pending"; "peer" => peer_canonical, "bound_id" => bound.bound_id);
        Ok(true)
    }
}

fn decode_bound(bytes: &[u8]) -> Option<Bound> {
    let mut r = Reader::new(bytes);
    Bound::decode(&mut r).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_core::tables::SERVER_REGISTRY;
    use atlasnet_discovery::MemoryBulletin;
    use atlasnet_ident::Role;
    use atlasnet_spatial::{GridHeuristic, GridHeuristicConfig};
    use uuid::Uuid;

    fn log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(Heuristic::Grid(GridHeuristic::new(GridHeuristicConfig::default())), &log())
    }

    #[test]
    fn first_reconcile_publishes_every_computed_bound() {
        let bulletin = MemoryBulletin::new();
        let republished = reconciler().reconcile(&bulletin).unwrap();
        assert_eq!(republished.len(), 4);
        assert_eq!(bulletin.hgetall(BOUNDS_PENDING).unwrap().len(), 4);
    }

    #[test]
    fn second_reconcile_with_everything_claimed_republishes_nothing() {
        let bulletin = MemoryBulletin::new();
        let r = reconciler();
        r.reconcile(&bulletin).unwrap();

        let pending = bulletin.hgetall(BOUNDS_PENDING).unwrap();
        for (field, bytes) in pending {
            bulletin.hdel(BOUNDS_PENDING, &field).unwrap();
            bulletin.hset(BOUNDS_CLAIMED, "Shard some-shard", &bytes).unwrap();
        }

        let republished = r.reconcile(&bulletin).unwrap();
        assert!(republished.is_empty());
    }

    #[test]
    fn release_failed_shard_bound_moves_claim_back_to_pending() {
        let bulletin = MemoryBulletin::new();
        let r = reconciler();
        r.reconcile(&bulletin).unwrap();

        let shard = NodeIdentity::new(Role::Shard, Uuid::new_v4());
        let (field, bytes) = bulletin.pop_one(BOUNDS_PENDING).unwrap().unwrap();
        let _ = field;
        bulletin.hset(BOUNDS_CLAIMED, &shard.canonical(), &bytes).unwrap();
        bulletin.hset(SERVER_REGISTRY, &shard.canonical(), b"127.0.0.1:1").unwrap();

        let released = r.release_failed_shard_bound(&bulletin, &shard.canonical()).unwrap();
        assert!(released);
        assert!(!bulletin.hexists(BOUNDS_CLAIMED, &shard.canonical()).unwrap());
        assert_eq!(bulletin.hgetall(BOUNDS_PENDING).unwrap().len(), 4, "the released bound rejoins the other three still pending");
    }

    #[test]
    fn release_failed_shard_bound_is_a_no_op_for_a_peer_holding_nothing() {
        let bulletin = MemoryBulletin::new();
        let r = reconciler();
        let shard = NodeIdentity::new(Role::Shard, Uuid::new_v4());
        assert!(!r.release_failed_shard_bound(&bulletin, &shard.canonical()).unwrap());
    }
}
