//! Debug orbit simulator (spec §4.10, §5, §8-S3): a background driver that
//! moves one seeded entity in a circle so it deliberately crosses bound
//! edges, exercising the transfer pipeline end-to-end without a real game
//! client attached. Gated behind `ShardConfig`'s debug section; a production
//! deployment leaves it off.

use atlasnet_core::{Aabb3, Entity, Transform};
use glam::Vec3;
use std::time::Instant;
use uuid::Uuid;

use crate::entity_ledger::EntityLedger;

/// Circles `entity_id` around `center` at `radius` world units, completing
/// one revolution every `period_secs` seconds.
pub struct OrbitSim {
    entity_id: Uuid,
    center: Vec3,
    radius: f32,
    angular_velocity: f32,
    started_at: Option<Instant>,
}

impl OrbitSim {
    pub fn new(entity_id: Uuid, center: Vec3, radius: f32, period_secs: f32) -> OrbitSim {
        let angular_velocity = std::f32::consts::TAU / period_secs.max(0.001);
        OrbitSim {
            entity_id,
            center,
            radius,
            angular_velocity,
            started_at: None,
        }
    }

    /// Inserts the orbiting entity at its starting position if it isn't in
    /// the ledger yet (e.g. the first tick after this shard starts, or after
    /// this shard just received it via transfer and should stop driving it —
    /// callers only invoke `seed` once, before the first `step`).
    pub fn seed(&self, ledger: &mut EntityLedger) {
        if ledger.get(self.entity_id).is_some() {
            return;
        }
        let position = self.center + Vec3::new(self.radius, 0.0, 0.0);
        let transform = Transform::new(0, position, Aabb3::new(Vec3::splat(-0.5), Vec3::splat(0.5)));
        ledger.insert_new(Entity::new(self.entity_id, transform));
    }

    /// Advances the orbit by one tick. No-op if the entity is currently
    /// in-transit (another shard now drives it, or a handoff is underway) or
    /// absent (it migrated away and this shard stopped owning it).
    pub fn step(&mut self, now: Instant, ledger: &mut EntityLedger) {
        if ledger.is_in_transit(self.entity_id) {
            return;
        }
        let Some(mut entity) = ledger.get(self.entity_id).cloned() else {
            return;
        };

        let elapsed = self.started_at.get_or_insert(now).elapsed();
        let theta = self.angular_velocity * elapsed.as_secs_f32();
        let position = self.center + Vec3::new(self.radius * theta.cos(), 0.0, self.radius * theta.sin());

        entity.transform.position = position;
        entity.packet_seq += 1;
        ledger.upsert_snapshot(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn seed_inserts_the_entity_exactly_once() {
        let mut ledger = EntityLedger::new();
        let id = Uuid::new_v4();
        let sim = OrbitSim::new(id, Vec3::ZERO, 12.0, 4.0);

        sim.seed(&mut ledger);
        assert_eq!(ledger.len(), 1);
        sim.seed(&mut ledger);
        assert_eq!(ledger.len(), 1, "seeding twice must not duplicate the entity");
    }

    #[test]
    fn step_moves_the_entity_away_from_its_start_position() {
        let mut ledger = EntityLedger::new();
        let id = Uuid::new_v4();
        let mut sim = OrbitSim::new(id, Vec3::ZERO, 12.0, 4.0);
        sim.seed(&mut ledger);
        let start = ledger.get(id).unwrap().transform.position;

        let t0 = Instant::now();
        sim.step(t0, &mut ledger);
        sim.step(t0 + Duration::from_millis(500), &mut ledger);

        let moved = ledger.get(id).unwrap().transform.position;
        assert!(moved.distance(start) > 0.01, "a quarter period in should have moved the entity");
        assert!((moved.distance(Vec3::ZERO) - 12.0).abs() < 0.01, "radius from center must stay constant");
    }

    #[test]
    fn step_does_not_touch_an_in_transit_entity() {
        let mut ledger = EntityLedger::new();
        let id = Uuid::new_v4();
        let mut sim = OrbitSim::new(id, Vec3::ZERO, 12.0, 4.0);
        sim.seed(&mut ledger);
        ledger.sweep(&bound_excluding_everything());

        let before = ledger.get(id).unwrap().transform.position;
        sim.step(Instant::now(), &mut ledger);
        assert_eq!(ledger.get(id).unwrap().transform.position, before);
    }

    fn bound_excluding_everything() -> atlasnet_spatial::Bound {
        atlasnet_spatial::Bound::new(
            0,
            atlasnet_spatial::BoundShape::Grid(atlasnet_spatial::GridShape { min: Vec3::ZERO, max: Vec3::ZERO }),
        )
    }
}
