//! Entity Ledger (spec §4.8 / C8): the shard's in-memory `map<entity_id,
//! Entity>` plus the background sweep that flags entities that have drifted
//! outside the shard's claimed bound.

use atlasnet_core::Entity;
use atlasnet_spatial::Bound;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct EntityLedger {
    entries: HashMap<Uuid, Entity>,
    in_transit: HashSet<Uuid>,
}

impl EntityLedger {
    pub fn new() -> EntityLedger {
        EntityLedger::default()
    }

    pub fn insert_new(&mut self, entity: Entity) {
        self.entries.insert(entity.entity_id, entity);
    }

    /// Upserts a full snapshot, refusing to touch an entity the Transfer
    /// Coordinator currently owns (spec §4.8: in-transit entries are never
    /// mutated except by the coordinator). Returns `false` if the write was
    /// refused.
    pub fn upsert_snapshot(&mut self, entity: Entity) -> bool {
        if self.in_transit.contains(&entity.entity_id) {
            return false;
        }
        self.entries.insert(entity.entity_id, entity);
        true
    }

    pub fn erase(&mut self, entity_id: Uuid) -> Option<Entity> {
        self.in_transit.remove(&entity_id);
        self.entries.remove(&entity_id)
    }

    pub fn get(&self, entity_id: Uuid) -> Option<&Entity> {
        self.entries.get(&entity_id)
    }

    /// Applies a freshly consumed client intent's `packet_seq` to every
    /// entity `client_id` owns, monotonically. A client transfer's
    /// `drained_seq` (spec §4.11 stage 5) is read straight off these fields
    /// at drain time, so an out-of-order or duplicate intent arriving after
    /// a higher `packet_seq` was already applied must never regress it.
    pub fn apply_client_packet_seq(&mut self, client_id: Uuid, packet_seq: u64) {
        for entity in self.entries.values_mut() {
            if entity.is_client && entity.client_id == client_id && packet_seq > entity.packet_seq {
                entity.packet_seq = packet_seq;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A stable snapshot for iteration, sorted by id (spec §4.10's
    /// snapshot-not-live-reference pattern, mirrored here for consistency).
    pub fn snapshot_all(&self) -> Vec<Entity> {
        let mut rows: Vec<Entity> = self.entries.values().cloned().collect();
        rows.sort_by_key(|e| e.entity_id);
        rows
    }

    pub fn is_in_transit(&self, entity_id: Uuid) -> bool {
        self.in_transit.contains(&entity_id)
    }

    pub fn clear_in_transit(&mut self, entity_id: Uuid) {
        self.in_transit.remove(&entity_id);
    }

    /// Flags every tracked entity not already in-transit whose position now
    /// falls outside `bound`, marking each returned id in-transit so a
    /// second sweep before the Transfer Coordinator acts on the first
    /// doesn't report it again (spec §4.8's trigger step).
    pub fn sweep(&mut self, bound: &Bound) -> Vec<Uuid> {
        let mut out = Vec::new();
        for (id, entity) in self.entries.iter() {
            if self.in_transit.contains(id) {
                continue;
            }
            if !bound.contains(entity.transform.position) {
                out.push(*id);
            }
        }
        for id in &out {
            self.in_transit.insert(*id);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_core::Aabb3;
    use atlasnet_core::Transform;
    use atlasnet_spatial::{BoundShape, GridShape};
    use glam::Vec3;

    fn entity_at(pos: Vec3) -> Entity {
        let transform = Transform::new(0, pos, Aabb3::new(Vec3::ZERO, Vec3::ONE));
        Entity::new(Uuid::new_v4(), transform)
    }

    fn bound(min: Vec3, max: Vec3) -> Bound {
        Bound::new(0, BoundShape::Grid(GridShape { min, max }))
    }

    #[test]
    fn sweep_flags_only_entities_outside_the_bound() {
        let mut ledger = EntityLedger::new();
        let inside = entity_at(Vec3::new(1.0, 0.0, 1.0));
        let outside = entity_at(Vec3::new(20.0, 0.0, 1.0));
        let inside_id = inside.entity_id;
        let outside_id = outside.entity_id;
        ledger.insert_new(inside);
        ledger.insert_new(outside);

        let flagged = ledger.sweep(&bound(Vec3::ZERO, Vec3::splat(10.0)));
        assert_eq!(flagged, vec![outside_id]);
        assert!(ledger.is_in_transit(outside_id));
        assert!(!ledger.is_in_transit(inside_id));
    }

    #[test]
    fn sweep_does_not_reflag_an_already_in_transit_entity() {
        let mut ledger = EntityLedger::new();
        let outside = entity_at(Vec3::new(20.0, 0.0, 1.0));
        let id = outside.entity_id;
        ledger.insert_new(outside);

        let b = bound(Vec3::ZERO, Vec3::splat(10.0));
        assert_eq!(ledger.sweep(&b), vec![id]);
        assert_eq!(ledger.sweep(&b), Vec::<Uuid>::new());
    }

    #[test]
    fn upsert_snapshot_refuses_an_in_transit_entity() {
        let mut ledger = EntityLedger::new();
        let e = entity_at(Vec3::ZERO);
        let id = e.entity_id;
        ledger.insert_new(e.clone());
        ledger.mark_in_transit_for_test(id);

        let mut updated = e;
        updated.packet_seq = 7;
        assert!(!ledger.upsert_snapshot(updated));
        assert_eq!(ledger.get(id).unwrap().packet_seq, 0);
    }

    impl EntityLedger {
        fn mark_in_transit_for_test(&mut self, id: Uuid) {
            self.in_transit.insert(id);
        }
    }

    #[test]
    fn apply_client_packet_seq_is_monotonic_per_client() {
        let mut ledger = EntityLedger::new();
        let transform = Transform::new(0, Vec3::ZERO, Aabb3::new(Vec3::ZERO, Vec3::ONE));
        let client_id = Uuid::new_v4();
        let entity = Entity::for_client(Uuid::new_v4(), client_id, transform);
        let entity_id = entity.entity_id;
        ledger.insert_new(entity);

        ledger.apply_client_packet_seq(client_id, 5);
        assert_eq!(ledger.get(entity_id).unwrap().packet_seq, 5);

        ledger.apply_client_packet_seq(client_id, 3);
        assert_eq!(ledger.get(entity_id).unwrap().packet_seq, 5, "an older packet_seq must never regress the applied value");

        ledger.apply_client_packet_seq(client_id, 9);
        assert_eq!(ledger.get(entity_id).unwrap().packet_seq, 9);
    }

    #[test]
    fn erase_clears_both_the_entry_and_in_transit_flag() {
        let mut ledger = EntityLedger::new();
        let e = entity_at(Vec3::ZERO);
        let id = e.entity_id;
        ledger.insert_new(e);
        ledger.mark_in_transit_for_test(id);

        let erased = ledger.erase(id);
        assert!(erased.is_some());
        assert!(!ledger.is_in_transit(id));
        assert!(ledger.get(id).is_none());
    }
}
