//! Transfer Coordinator (spec §4.9 / C9): drives the sender/receiver entity
//! hand-off state machine over `EntityTransferPacket`, using `EntityTransfer`
//! from `atlasnet-core` for the stage bookkeeping.

use crate::entity_ledger::EntityLedger;
use atlasnet_core::{EntityTransfer, EntityTransferStage, TransferMode};
use atlasnet_ident::NodeIdentity;
use atlasnet_interlink::EntityTransferPacket;
use atlasnet_spatial::Bound;
use slog::{o, warn, Logger};
use std::collections::HashMap;
use uuid::Uuid;

pub struct TransferCoordinator {
    self_identity: NodeIdentity,
    transfers: HashMap<Uuid, EntityTransfer>,
    log: Logger,
}

impl TransferCoordinator {
    pub fn new(self_identity: NodeIdentity, log: &Logger) -> TransferCoordinator {
        TransferCoordinator {
            self_identity,
            transfers: HashMap::new(),
            log: log.new(o!("component" => "transfer-coordinator")),
        }
    }

    pub fn active_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Groups newly out-of-bound ids by the shard whose claimed bound now
    /// contains them (spec §4.9's trigger step), drops a group whose target
    /// is unmapped or self, and starts one `Sending` transfer per remaining
    /// group. An empty group never reaches this far since grouping only
    /// ever produces non-empty buckets (spec §8: "transfer of an empty
    /// entity set ... never creates a transfer record").
    pub fn begin_outbound(
        &mut self,
        ledger: &mut EntityLedger,
        candidates: &[Uuid],
        claimed_bounds: &[(NodeIdentity, Bound)],
    ) -> Vec<(NodeIdentity, EntityTransferPacket)> {
        let mut groups: HashMap<NodeIdentity, Vec<Uuid>> = HashMap::new();

        for &id in candidates {
            let Some(entity) = ledger.get(id) else { continue };
            let position = entity.transform.position;

            let target = claimed_bounds
                .iter()
                .find(|(_, bound)| bound.contains(position))
                .map(|(identity, _)| *identity);

            match target {
                Some(identity) if identity != self.self_identity => {
                    groups.entry(identity).or_default().push(id);
                }
                _ => {
                    warn!(self.log, "entity has no mapped destination bound, leaving it in place"; "entity_id" => %id);
                    ledger.clear_in_transit(id);
                }
            }
        }

        let mut outgoing = Vec::new();
        for (peer, entity_ids) in groups {
            let transfer_id = Uuid::new_v4();
            let mut transfer = EntityTransfer::new(
                transfer_id,
                peer,
                TransferMode::Sending,
                entity_ids.iter().copied().collect(),
            );
            transfer
                .advance(EntityTransferStage::Prepare)
                .expect("a freshly created transfer can always advance to Prepare");
            self.transfers.insert(transfer_id, transfer);
            outgoing.push((peer, EntityTransferPacket::Prepare { transfer_id, entity_ids }));
        }
        outgoing
    }

    /// Advances the state machine on an inbound `EntityTransferPacket`,
    /// returning the reply packet (if any) the caller should send back to
    /// `sender` over Interlink. Packets that don't match the referenced
    /// transfer's expected stage or mode are dropped and logged — the
    /// transfer is left as-is to heal via the health-expiry path (spec §7's
    /// `ProtocolError::OutOfOrderStage` policy).
    pub fn handle_packet(
        &mut self,
        sender: NodeIdentity,
        packet: EntityTransferPacket,
        ledger: &mut EntityLedger,
    ) -> Option<(NodeIdentity, EntityTransferPacket)> {
        match packet {
            EntityTransferPacket::Prepare { transfer_id, entity_ids } => {
                if self.transfers.contains_key(&transfer_id) {
                    warn!(self.log, "duplicate Prepare for an already-known transfer"; "transfer_id" => %transfer_id);
                    return None;
                }
                let mut transfer = EntityTransfer::new(
                    transfer_id,
                    sender,
                    TransferMode::Receiving,
                    entity_ids.into_iter().collect(),
                );
                transfer
                    .advance(EntityTransferStage::Prepare)
                    .expect("a freshly created transfer can always advance to Prepare");
                transfer
                    .advance(EntityTransferStage::Ready)
                    .expect("Receiving mode always permits Prepare -> Ready");
                self.transfers.insert(transfer_id, transfer);
                Some((sender, EntityTransferPacket::Ready { transfer_id }))
            }

            EntityTransferPacket::Ready { transfer_id } => {
                let transfer = match self.transfers.get_mut(&transfer_id) {
                    Some(t) if t.mode == TransferMode::Sending => t,
                    _ => {
                        warn!(self.log, "Ready for an unknown or wrongly-moded transfer"; "transfer_id" => %transfer_id);
                        return None;
                    }
                };
                if transfer.advance(EntityTransferStage::Commit).is_err() {
                    warn!(self.log, "out-of-order Ready"; "transfer_id" => %transfer_id);
                    return None;
                }

                let mut entities = Vec::new();
                for id in transfer.entity_ids.clone() {
                    if let Some(mut snapshot) = ledger.erase(id) {
                        snapshot.transfer_generation += 1;
                        entities.push(snapshot);
                    }
                }
                Some((sender, EntityTransferPacket::Commit { transfer_id, entities }))
            }

            EntityTransferPacket::Commit { transfer_id, entities } => {
                let transfer = match self.transfers.get_mut(&transfer_id) {
                    Some(t) if t.mode == TransferMode::Receiving => t,
                    _ => {
                        warn!(self.log, "Commit for an unknown or wrongly-moded transfer"; "transfer_id" => %transfer_id);
                        return None;
                    }
                };
                if transfer.advance(EntityTransferStage::Complete).is_err() {
                    warn!(self.log, "out-of-order Commit"; "transfer_id" => %transfer_id);
                    return None;
                }

                for entity in entities {
                    ledger.insert_new(entity);
                }
                self.transfers.remove(&transfer_id);
                Some((sender, EntityTransferPacket::Complete { transfer_id }))
            }

            EntityTransferPacket::Complete { transfer_id } => {
                match self.transfers.remove(&transfer_id) {
                    Some(t) if t.mode == TransferMode::Sending => {}
                    Some(_) => warn!(self.log, "Complete for a Receiving-mode transfer"; "transfer_id" => %transfer_id),
                    None => warn!(self.log, "Complete for an unknown transfer"; "transfer_id" => %transfer_id),
                }
                None
            }
        }
    }

    /// Drops a peer's in-flight transfers without notice, for the health
    /// warden's failure callback (spec §8 S2): the receiving side's record
    /// is cleared directly rather than waiting on a `Complete` that will
    /// never arrive.
    pub fn cancel_transfers_with(&mut self, peer: NodeIdentity) {
        self.transfers.retain(|_, t| t.peer != peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_core::{Aabb3, Entity, Transform};
    use atlasnet_ident::Role;
    use atlasnet_spatial::{BoundShape, GridShape};
    use glam::Vec3;

    fn log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn identity() -> NodeIdentity {
        NodeIdentity::new(Role::Shard, Uuid::new_v4())
    }

    fn bound(id: u32, min: Vec3, max: Vec3) -> Bound {
        Bound::new(id, BoundShape::Grid(GridShape { min, max }))
    }

    fn entity_at(pos: Vec3) -> Entity {
        let transform = Transform::new(0, pos, Aabb3::new(Vec3::ZERO, Vec3::ONE));
        Entity::new(Uuid::new_v4(), transform)
    }

    #[test]
    fn single_entity_crosses_from_a_to_b_s1() {
        let a_id = identity();
        let b_id = identity();

        let mut a_ledger = EntityLedger::new();
        let mut b_ledger = EntityLedger::new();

        let mut e = entity_at(Vec3::new(11.0, 0.0, 1.0));
        e.packet_seq = 0;
        let entity_id = e.entity_id;
        a_ledger.insert_new(e);

        let mut a_coord = TransferCoordinator::new(a_id, &log());
        let mut b_coord = TransferCoordinator::new(b_id, &log());

        let claimed = vec![
            (a_id, bound(0, Vec3::new(0.0, -1000.0, 0.0), Vec3::new(10.0, 1000.0, 10.0))),
            (b_id, bound(1, Vec3::new(10.0, -1000.0, 0.0), Vec3::new(20.0, 1000.0, 10.0))),
        ];

        let flagged = a_ledger.sweep(&claimed[0].1);
        assert_eq!(flagged, vec![entity_id]);

        let outgoing = a_coord.begin_outbound(&mut a_ledger, &flagged, &claimed);
        assert_eq!(outgoing.len(), 1);
        let (target, prepare) = outgoing.into_iter().next().unwrap();
        assert_eq!(target, b_id);

        let ready = b_coord.handle_packet(a_id, prepare, &mut b_ledger).unwrap();
        assert_eq!(ready.0, a_id);

        let commit = a_coord.handle_packet(b_id, ready.1, &mut a_ledger).unwrap();
        assert!(a_ledger.get(entity_id).is_none(), "sender erases on Commit emission");
        assert_eq!(commit.0, b_id);
        assert_eq!(a_coord.active_count(), 1);

        let complete = b_coord.handle_packet(a_id, commit.1, &mut b_ledger).unwrap();
        let committed = b_ledger.get(entity_id).expect("receiver now holds the entity");
        assert_eq!(committed.transfer_generation, 1);
        assert_eq!(complete.0, a_id);
        assert_eq!(b_coord.active_count(), 0);

        assert!(a_coord.handle_packet(b_id, complete.1, &mut a_ledger).is_none());
        assert_eq!(a_coord.active_count(), 0);

        assert!(a_ledger.get(entity_id).is_none());
        assert!(b_ledger.get(entity_id).is_some());
    }

    #[test]
    fn entity_targeting_an_unmapped_bound_is_dropped_and_left_in_place() {
        let a_id = identity();
        let mut ledger = EntityLedger::new();
        let e = entity_at(Vec3::new(500.0, 0.0, 500.0));
        let id = e.entity_id;
        ledger.insert_new(e);
        ledger.mark_in_transit_test(id);

        let mut coord = TransferCoordinator::new(a_id, &log());
        let claimed = vec![(a_id, bound(0, Vec3::ZERO, Vec3::splat(10.0)))];
        let outgoing = coord.begin_outbound(&mut ledger, &[id], &claimed);

        assert!(outgoing.is_empty());
        assert!(!ledger.is_in_transit(id), "dropped candidates are unmarked so the next sweep can retry");
        assert!(coord.is_idle());
    }

    #[test]
    fn peer_failure_cancels_in_flight_transfers_s2() {
        let a_id = identity();
        let b_id = identity();
        let mut coord = TransferCoordinator::new(b_id, &log());
        let mut ledger = EntityLedger::new();

        let packet = EntityTransferPacket::Prepare {
            transfer_id: Uuid::new_v4(),
            entity_ids: vec![Uuid::new_v4()],
        };
        coord.handle_packet(a_id, packet, &mut ledger);
        assert_eq!(coord.active_count(), 1);

        coord.cancel_transfers_with(a_id);
        assert!(coord.is_idle());
    }

    impl EntityLedger {
        fn mark_in_transit_test(&mut self, id: Uuid) {
            self.mark_in_transit_via_sweep(id);
        }

        fn mark_in_transit_via_sweep(&mut self, id: Uuid) {
            let tiny = Bound::new(0, BoundShape::Grid(GridShape { min: Vec3::ZERO, max: Vec3::ZERO }));
            if self.get(id).is_some() {
                self.sweep(&tiny);
            }
        }
    }
}
