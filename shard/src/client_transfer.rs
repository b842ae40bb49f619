//! Client Transfer Coordinator (spec §4.11 / C10): drives shard A's and
//! shard B's halves of the six-phase client hand-off over
//! `ClientTransferPacket`. The proxy's half (freezing intents, retargeting
//! the routing table, and the final flush) lives in the `proxy` crate's
//! `ClientRouter` — the proxy is the only participant that touches every
//! leg of the hand-off.
//!
//! Only A walks the full `ClientTransferStage` ladder in strict order: it is
//! the one shard that issues or receives every message up through
//! `ShardDrained`. B only ever sees the opening `ShardPrepare` and the
//! closing `ProxyTransferActivate`, so its half is a plain pending-state
//! struct rather than the 7-stage enum forced through steps it never
//! witnesses — the same asymmetric-bookkeeping choice the entity coordinator
//! makes between `Sending` and `Receiving` mode.

use crate::entity_ledger::EntityLedger;
use atlasnet_core::{ClientTransfer, ClientTransferStage, Entity};
use atlasnet_ident::NodeIdentity;
use atlasnet_interlink::ClientTransferPacket;
use slog::{o, warn, Logger};
use std::collections::HashMap;
use uuid::Uuid;

/// A's bookkeeping for one client it is handing off to `target`.
struct OutboundClientTransfer {
    client_id: Uuid,
    proxy: NodeIdentity,
    target: NodeIdentity,
    transfer: ClientTransfer,
    ready_to_drain: bool,
}

/// B's bookkeeping for one client it is about to receive from `peer`.
struct InboundClientTransfer {
    peer: NodeIdentity,
    entities: Vec<Entity>,
}

pub struct ClientTransferCoordinator {
    self_identity: NodeIdentity,
    outbound: HashMap<Uuid, OutboundClientTransfer>,
    inbound: HashMap<Uuid, InboundClientTransfer>,
    adopted: Vec<Entity>,
    log: Logger,
}

impl ClientTransferCoordinator {
    pub fn new(self_identity: NodeIdentity, log: &Logger) -> ClientTransferCoordinator {
        ClientTransferCoordinator {
            self_identity,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            adopted: Vec::new(),
            log: log.new(o!("component" => "client-transfer-coordinator")),
        }
    }

    pub fn active_outbound(&self) -> usize {
        self.outbound.len()
    }

    pub fn active_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// A begins handing `client_id`'s `entities` off to `target`, fronted by
    /// `proxy` (spec §4.11 stage 1). Returns the transfer id and the
    /// `ShardPrepare` packet to send to `target`.
    pub fn begin_outbound(
        &mut self,
        client_id: Uuid,
        proxy: NodeIdentity,
        target: NodeIdentity,
        entities: Vec<Entity>,
    ) -> (Uuid, ClientTransferPacket) {
        debug_assert_ne!(target, self.self_identity, "a client transfer's target must never be this shard itself");
        let transfer_id = Uuid::new_v4();
        let entity_ids = entities.iter().map(|e| e.entity_id).collect();
        let mut transfer = ClientTransfer::new(transfer_id, entity_ids);
        transfer
            .advance(ClientTransferStage::ShardPrepare)
            .expect("a freshly created transfer can always advance to ShardPrepare");

        self.outbound.insert(
            transfer_id,
            OutboundClientTransfer {
                client_id,
                proxy,
                target,
                transfer,
                ready_to_drain: false,
            },
        );
        (transfer_id, ClientTransferPacket::ShardPrepare { transfer_id, entities })
    }

    /// Handles an inbound `ClientTransferPacket`, returning the reply (if
    /// any) and its destination. A `ProxyFreeze` only flips a ready flag —
    /// the actual drain needs ledger access and is finished by the caller via
    /// `drain_ready_transfers` before `ShardDrained` can be sent. Packets
    /// referencing an unknown or wrongly-staged transfer are dropped and
    /// logged (spec §7's `ProtocolError::OutOfOrderStage` policy, same as the
    /// entity coordinator).
    pub fn handle_packet(
        &mut self,
        sender: NodeIdentity,
        packet: ClientTransferPacket,
    ) -> Option<(NodeIdentity, ClientTransferPacket)> {
        match packet {
            ClientTransferPacket::ShardPrepare { transfer_id, entities } => {
                if self.inbound.contains_key(&transfer_id) {
                    warn!(self.log, "duplicate ShardPrepare for an already-known client transfer"; "transfer_id" => %transfer_id);
                    return None;
                }
                let entity_ids: Vec<Uuid> = entities.iter().map(|e| e.entity_id).collect();
                self.inbound.insert(transfer_id, InboundClientTransfer { peer: sender, entities });
                Some((sender, ClientTransferPacket::ShardReady { transfer_id, entity_ids }))
            }

            ClientTransferPacket::ShardReady { transfer_id, .. } => {
                let outbound = match self.outbound.get_mut(&transfer_id) {
                    Some(o) if o.target == sender => o,
                    _ => {
                        warn!(self.log, "ShardReady for an unknown or mismatched client transfer"; "transfer_id" => %transfer_id);
                        return None;
                    }
                };
                if outbound.transfer.advance(ClientTransferStage::ShardReady).is_err() {
                    warn!(self.log, "out-of-order ShardReady"; "transfer_id" => %transfer_id);
                    return None;
                }
                outbound
                    .transfer
                    .advance(ClientTransferStage::ProxyRequestSwitch)
                    .expect("ShardReady always permits advancing to ProxyRequestSwitch");
                let proxy = outbound.proxy;
                let entity_ids = outbound.transfer.entity_ids.iter().copied().collect();
                Some((
                    proxy,
                    ClientTransferPacket::ProxyRequestSwitch {
                        transfer_id,
                        client_id: outbound.client_id,
                        entity_ids,
                        target: outbound.target,
                    },
                ))
            }

            ClientTransferPacket::ProxyFreeze { transfer_id } => {
                let outbound = match self.outbound.get_mut(&transfer_id) {
                    Some(o) if o.proxy == sender => o,
                    _ => {
                        warn!(self.log, "ProxyFreeze for an unknown or mismatched client transfer"; "transfer_id" => %transfer_id);
                        return None;
                    }
                };
                if outbound.transfer.advance(ClientTransferStage::ProxyFreeze).is_err() {
                    warn!(self.log, "out-of-order ProxyFreeze"; "transfer_id" => %transfer_id);
                    return None;
                }
                outbound.ready_to_drain = true;
                None
            }

            ClientTransferPacket::ProxyTransferActivate { transfer_id, generation } => {
                let inbound = match self.inbound.remove(&transfer_id) {
                    Some(i) => i,
                    None => {
                        warn!(self.log, "ProxyTransferActivate for an unknown client transfer"; "transfer_id" => %transfer_id);
                        return None;
                    }
                };
                let _ = sender;
                let mut entities = inbound.entities;
                for entity in &mut entities {
                    entity.transfer_generation = generation;
                }
                self.adopted.extend(entities);
                None
            }

            ClientTransferPacket::ShardDrained { transfer_id, .. } => {
                warn!(self.log, "ShardDrained is proxy-only and has no shard-side handler"; "transfer_id" => %transfer_id);
                None
            }
        }
    }

    /// Finishes every transfer whose `ProxyFreeze` arrived: erases the
    /// client's entities from `ledger`, bumps each one's `transfer_generation`
    /// (spec §4.11 stage 5's fence, mirroring the entity coordinator's
    /// Ready→Commit bump), and returns the `ShardDrained` packet to send to
    /// each transfer's proxy. `drained_seq` is read off the erased entities
    /// themselves — the highest `packet_seq` this shard actually applied to
    /// any of them before the freeze took effect — not a counter external to
    /// the client's own intent stream, so B can compare a replayed intent's
    /// `packet_seq` against it and know whether A already applied it (spec
    /// §4.11 stage 6).
    pub fn drain_ready_transfers(&mut self, ledger: &mut EntityLedger) -> Vec<(NodeIdentity, ClientTransferPacket)> {
        let mut out = Vec::new();
        let ready: Vec<Uuid> = self
            .outbound
            .iter()
            .filter(|(_, o)| o.ready_to_drain)
            .map(|(id, _)| *id)
            .collect();

        for transfer_id in ready {
            let mut outbound = self.outbound.remove(&transfer_id).expect("just collected from outbound");
            let mut generation = 0u64;
            let mut drained_seq = 0u64;
            for id in outbound.transfer.entity_ids.iter().copied() {
                if let Some(mut snapshot) = ledger.erase(id) {
                    drained_seq = drained_seq.max(snapshot.packet_seq);
                    snapshot.transfer_generation += 1;
                    generation = generation.max(snapshot.transfer_generation);
                }
            }
            outbound
                .transfer
                .advance(ClientTransferStage::ShardDrained)
                .expect("ProxyFreeze always permits advancing to ShardDrained");
            out.push((
                outbound.proxy,
                ClientTransferPacket::ShardDrained { transfer_id, drained_seq, generation },
            ));
        }
        out
    }

    /// Entities adopted via `ProxyTransferActivate` since the last drain,
    /// ready for the caller to insert into its ledger.
    pub fn take_adopted(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.adopted)
    }

    /// Drops a peer's in-flight client transfers without notice, for the
    /// health warden's failure callback (spec §8's peer-failure cleanup,
    /// mirrored from the entity coordinator).
    pub fn cancel_transfers_with(&mut self, peer: NodeIdentity) {
        self.outbound.retain(|_, o| o.target != peer && o.proxy != peer);
        self.inbound.retain(|_, i| i.peer != peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_core::{Aabb3, Transform};
    use atlasnet_ident::Role;
    use glam::Vec3;

    fn log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn identity() -> NodeIdentity {
        NodeIdentity::new(Role::Shard, Uuid::new_v4())
    }

    fn client_entity() -> Entity {
        let transform = Transform::new(0, Vec3::ZERO, Aabb3::new(Vec3::ZERO, Vec3::ONE));
        Entity::for_client(Uuid::new_v4(), Uuid::new_v4(), transform)
    }

    #[test]
    fn client_crosses_from_a_through_proxy_to_b() {
        let a = identity();
        let b = identity();
        let p = identity();

        let mut a_coord = ClientTransferCoordinator::new(a, &log());
        let mut b_coord = ClientTransferCoordinator::new(b, &log());
        let mut a_ledger = EntityLedger::new();
        let mut b_ledger = EntityLedger::new();

        let mut entity = client_entity();
        entity.packet_seq = 42;
        let entity_id = entity.entity_id;
        let client_id = entity.client_id;
        a_ledger.insert_new(entity.clone());

        let (transfer_id, prepare) = a_coord.begin_outbound(client_id, p, b, vec![entity]);
        assert_eq!(a_coord.active_outbound(), 1);

        let ready = b_coord.handle_packet(a, prepare).unwrap();
        assert_eq!(ready.0, a);
        assert_eq!(b_coord.active_inbound(), 1);

        let request_switch = a_coord.handle_packet(b, ready.1).unwrap();
        assert_eq!(request_switch.0, p);
        match &request_switch.1 {
            ClientTransferPacket::ProxyRequestSwitch { transfer_id: tid, client_id: cid, target, .. } => {
                assert_eq!(*tid, transfer_id);
                assert_eq!(*cid, client_id);
                assert_eq!(*target, b);
            }
            other => panic!("expected ProxyRequestSwitch, got {other:?}"),
        }

        // Proxy freezes intents and tells A to drain.
        assert!(a_coord.handle_packet(p, ClientTransferPacket::ProxyFreeze { transfer_id }).is_none());

        let drained = a_coord.drain_ready_transfers(&mut a_ledger);
        assert_eq!(drained.len(), 1);
        assert!(a_ledger.get(entity_id).is_none(), "A erases the client's entities once drained");
        let (drain_target, drained_packet) = &drained[0];
        assert_eq!(*drain_target, p);
        let (generation, drained_seq) = match drained_packet {
            ClientTransferPacket::ShardDrained { generation, drained_seq, .. } => (*generation, *drained_seq),
            other => panic!("expected ShardDrained, got {other:?}"),
        };
        assert_eq!(generation, 1);
        assert_eq!(drained_seq, 42, "drained_seq must come from the entity's own last-applied packet_seq");
        assert_eq!(a_coord.active_outbound(), 0);

        // Proxy forwards the activation to B with A's reported generation.
        assert!(b_coord
            .handle_packet(p, ClientTransferPacket::ProxyTransferActivate { transfer_id, generation })
            .is_none());
        assert_eq!(b_coord.active_inbound(), 0);

        let adopted = b_coord.take_adopted();
        assert_eq!(adopted.len(), 1);
        assert_eq!(adopted[0].entity_id, entity_id);
        assert_eq!(adopted[0].transfer_generation, generation);
        b_ledger.insert_new(adopted.into_iter().next().unwrap());
        assert!(b_ledger.get(entity_id).is_some());
    }

    #[test]
    fn shard_ready_for_unknown_transfer_is_dropped() {
        let a = identity();
        let b = identity();
        let mut a_coord = ClientTransferCoordinator::new(a, &log());
        let reply = a_coord.handle_packet(b, ClientTransferPacket::ShardReady { transfer_id: Uuid::new_v4(), entity_ids: vec![] });
        assert!(reply.is_none());
    }

    #[test]
    fn peer_failure_cancels_in_flight_client_transfers() {
        let a = identity();
        let b = identity();
        let p = identity();
        let mut a_coord = ClientTransferCoordinator::new(a, &log());

        let entity = client_entity();
        let client_id = entity.client_id;
        a_coord.begin_outbound(client_id, p, b, vec![entity]);
        assert_eq!(a_coord.active_outbound(), 1);

        a_coord.cancel_transfers_with(b);
        assert_eq!(a_coord.active_outbound(), 0);
    }
}
