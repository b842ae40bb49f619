//! Bound Leaser (spec §4.7 / C7): claims exactly one pending bound per
//! shard process and keeps the discovery bulletin's claim row in sync.

use atlasnet_codec::{Decode, Reader};
use atlasnet_core::tables::{BOUNDS_CLAIMED, BOUNDS_PENDING};
use atlasnet_discovery::{Bulletin, DiscoveryResult};
use atlasnet_ident::NodeIdentity;
use atlasnet_spatial::Bound;
use slog::{info, o, warn, Logger};
use std::str::FromStr;

pub struct BoundLeaser {
    self_identity: NodeIdentity,
    current: Option<Bound>,
    log: Logger,
}

impl BoundLeaser {
    pub fn new(self_identity: NodeIdentity, log: &Logger) -> BoundLeaser {
        BoundLeaser {
            self_identity,
            current: None,
            log: log.new(o!("component" => "bound-leaser")),
        }
    }

    pub fn current(&self) -> Option<&Bound> {
        self.current.as_ref()
    }

    pub fn is_claimed(&self) -> bool {
        self.current.is_some()
    }

    /// Attempts one claim if this shard is idle (spec §4.7). Returns
    /// `Ok(false)` without touching the bulletin if a bound is already
    /// held, or if `bounds_pending` is currently empty — the loser of a
    /// race simply retries on a later tick (spec §8 S5).
    pub fn try_claim(&mut self, bulletin: &dyn Bulletin) -> DiscoveryResult<bool> {
        if self.current.is_some() {
            return Ok(false);
        }

        let (_field, bytes) = match bulletin.pop_one(BOUNDS_PENDING)? {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let bound = match decode_bound(&bytes) {
            Some(b) => b,
            None => {
                warn!(self.log, "discarding a malformed bounds_pending entry");
                return Ok(false);
            }
        };

        bulletin.hset(BOUNDS_CLAIMED, &self.self_identity.canonical(), &bytes)?;
        info!(self.log, "claimed a bound"; "bound_id" => bound.bound_id);
        self.current = Some(bound);
        Ok(true)
    }

    /// Releases the held bound, e.g. when a watchdog republishes a fresh
    /// partition and every shard is expected to re-claim (spec §4.7). Does
    /// not push the shape back into `bounds_pending` — a rebind is expected
    /// to come with its own freshly published set.
    pub fn release(&mut self, bulletin: &dyn Bulletin) -> DiscoveryResult<()> {
        if self.current.take().is_some() {
            bulletin.hdel(BOUNDS_CLAIMED, &self.self_identity.canonical())?;
        }
        Ok(())
    }
}

fn decode_bound(bytes: &[u8]) -> Option<Bound> {
    let mut r = Reader::new(bytes);
    Bound::decode(&mut r).ok()
}

/// Reads every currently claimed `(owner, shape)` pair from `bounds_claimed`
/// (spec §4.3), for the Transfer Coordinator to resolve a moved entity's new
/// owner against. Rows with an unparseable identity or shape are skipped —
/// the coordinator treats a missing mapping the same as an unmapped bound.
pub fn read_claimed_bounds(bulletin: &dyn Bulletin) -> DiscoveryResult<Vec<(NodeIdentity, Bound)>> {
    let table = bulletin.hgetall(BOUNDS_CLAIMED)?;
    let mut out = Vec::with_capacity(table.len());
    for (identity_str, bytes) in table {
        let Ok(identity) = NodeIdentity::from_str(&identity_str) else {
            continue;
        };
        let Some(bound) = decode_bound(&bytes) else {
            continue;
        };
        out.push((identity, bound));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_codec::Encode;
    use atlasnet_discovery::MemoryBulletin;
    use atlasnet_ident::Role;
    use atlasnet_spatial::{BoundShape, GridShape};
    use glam::Vec3;
    use uuid::Uuid;

    fn log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn sample_bound(bound_id: u32) -> Bound {
        Bound::new(bound_id, BoundShape::Grid(GridShape { min: Vec3::ZERO, max: Vec3::splat(10.0) }))
    }

    #[test]
    fn claims_once_then_finds_pending_empty() {
        let bulletin = MemoryBulletin::new();
        bulletin.hset(BOUNDS_PENDING, "0", &sample_bound(0).encode_to_vec()).unwrap();

        let mut leaser = BoundLeaser::new(NodeIdentity::new(Role::Shard, Uuid::new_v4()), &log());
        assert!(leaser.try_claim(&bulletin).unwrap());
        assert_eq!(leaser.current().unwrap().bound_id, 0);

        assert!(!leaser.try_claim(&bulletin).unwrap(), "already holding a bound is a no-op");
    }

    #[test]
    fn only_one_of_two_racing_shards_claims_the_sole_pending_bound() {
        let bulletin = MemoryBulletin::new();
        bulletin.hset(BOUNDS_PENDING, "0", &sample_bound(0).encode_to_vec()).unwrap();

        let mut a = BoundLeaser::new(NodeIdentity::new(Role::Shard, Uuid::new_v4()), &log());
        let mut b = BoundLeaser::new(NodeIdentity::new(Role::Shard, Uuid::new_v4()), &log());

        let a_won = a.try_claim(&bulletin).unwrap();
        let b_won = b.try_claim(&bulletin).unwrap();

        assert_ne!(a_won, b_won, "exactly one of the two racing claims must succeed");
    }

    #[test]
    fn release_clears_the_claimed_row_and_allows_a_new_claim() {
        let bulletin = MemoryBulletin::new();
        bulletin.hset(BOUNDS_PENDING, "0", &sample_bound(0).encode_to_vec()).unwrap();
        let identity = NodeIdentity::new(Role::Shard, Uuid::new_v4());
        let mut leaser = BoundLeaser::new(identity, &log());
        leaser.try_claim(&bulletin).unwrap();

        leaser.release(&bulletin).unwrap();
        assert!(leaser.current().is_none());
        assert!(!bulletin.hexists(BOUNDS_CLAIMED, &identity.canonical()).unwrap());

        bulletin.hset(BOUNDS_PENDING, "1", &sample_bound(1).encode_to_vec()).unwrap();
        assert!(leaser.try_claim(&bulletin).unwrap());
    }

    #[test]
    fn read_claimed_bounds_round_trips_published_rows() {
        let bulletin = MemoryBulletin::new();
        let identity = NodeIdentity::new(Role::Shard, Uuid::new_v4());
        bulletin.hset(BOUNDS_CLAIMED, &identity.canonical(), &sample_bound(2).encode_to_vec()).unwrap();

        let rows = read_claimed_bounds(&bulletin).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, identity);
        assert_eq!(rows[0].1.bound_id, 2);
    }
}
