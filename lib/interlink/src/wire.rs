//! Wire packets for the protocols that ride on top of raw Interlink frames:
//! entity transfer (spec §4.9), client transfer (spec §4.11), and the two
//! command buses (spec §4.12). Defined here rather than in `atlasnet-core`
//! so that crate can stay free of a transport dependency; `Packet` — the
//! trait these need — lives in this crate.

use crate::packet::Packet;
use atlasnet_core::{ClientIntentCommandPacket, Entity, ServerStateCommandPacket};
use atlasnet_codec::{CodecError, CodecResult, Decode, Encode, Reader, Writer};
use atlasnet_ident::NodeIdentity;
use uuid::Uuid;

impl Packet for ClientIntentCommandPacket {
    fn type_name() -> &'static str {
        "ClientIntentCommandPacket"
    }
}

impl Packet for ServerStateCommandPacket {
    fn type_name() -> &'static str {
        "ServerStateCommandPacket"
    }
}

fn encode_uuid_vec(w: &mut Writer, ids: &[Uuid]) {
    w.varint(ids.len() as u64);
    for id in ids {
        w.uuid(id);
    }
}

fn decode_uuid_vec(r: &mut Reader) -> CodecResult<Vec<Uuid>> {
    let len = r.varint()? as usize;
    let mut ids = Vec::with_capacity(len);
    for _ in 0..len {
        ids.push(r.uuid()?);
    }
    Ok(ids)
}

fn encode_entity_vec(w: &mut Writer, entities: &[Entity]) {
    w.varint(entities.len() as u64);
    for e in entities {
        e.encode(w);
    }
}

fn decode_entity_vec(r: &mut Reader) -> CodecResult<Vec<Entity>> {
    let len = r.varint()? as usize;
    let mut entities = Vec::with_capacity(len);
    for _ in 0..len {
        entities.push(Entity::decode(r)?);
    }
    Ok(entities)
}

const ETP_PREPARE: u8 = 0;
const ETP_READY: u8 = 1;
const ETP_COMMIT: u8 = 2;
const ETP_COMPLETE: u8 = 3;

/// One message of the sender/receiver entity-transfer protocol (spec §4.9).
/// `Commit`'s `entities` already carry their bumped `transfer_generation` —
/// the coordinator sets it before handing the snapshot to `send`, so there is
/// no separate generation scalar to keep in sync with the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityTransferPacket {
    Prepare { transfer_id: Uuid, entity_ids: Vec<Uuid> },
    Ready { transfer_id: Uuid },
    Commit { transfer_id: Uuid, entities: Vec<Entity> },
    Complete { transfer_id: Uuid },
}

impl EntityTransferPacket {
    pub fn transfer_id(&self) -> Uuid {
        match self {
            EntityTransferPacket::Prepare { transfer_id, .. }
            | EntityTransferPacket::Ready { transfer_id }
            | EntityTransferPacket::Commit { transfer_id, .. }
            | EntityTransferPacket::Complete { transfer_id } => *transfer_id,
        }
    }
}

impl Encode for EntityTransferPacket {
    fn encode(&self, w: &mut Writer) {
        match self {
            EntityTransferPacket::Prepare { transfer_id, entity_ids } => {
                w.tag(ETP_PREPARE);
                w.uuid(transfer_id);
                encode_uuid_vec(w, entity_ids);
            }
            EntityTransferPacket::Ready { transfer_id } => {
                w.tag(ETP_READY);
                w.uuid(transfer_id);
            }
            EntityTransferPacket::Commit { transfer_id, entities } => {
                w.tag(ETP_COMMIT);
                w.uuid(transfer_id);
                encode_entity_vec(w, entities);
            }
            EntityTransferPacket::Complete { transfer_id } => {
                w.tag(ETP_COMPLETE);
                w.uuid(transfer_id);
            }
        }
    }
}

impl Decode for EntityTransferPacket {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        match r.tag(4)? {
            ETP_PREPARE => Ok(EntityTransferPacket::Prepare {
                transfer_id: r.uuid()?,
                entity_ids: decode_uuid_vec(r)?,
            }),
            ETP_READY => Ok(EntityTransferPacket::Ready { transfer_id: r.uuid()? }),
            ETP_COMMIT => Ok(EntityTransferPacket::Commit {
                transfer_id: r.uuid()?,
                entities: decode_entity_vec(r)?,
            }),
            ETP_COMPLETE => Ok(EntityTransferPacket::Complete { transfer_id: r.uuid()? }),
            _ => Err(CodecError::BadTag),
        }
    }
}

impl Packet for EntityTransferPacket {
    fn type_name() -> &'static str {
        "EntityTransferPacket"
    }
}

const CTP_SHARD_PREPARE: u8 = 0;
const CTP_SHARD_READY: u8 = 1;
const CTP_PROXY_REQUEST_SWITCH: u8 = 2;
const CTP_PROXY_FREEZE: u8 = 3;
const CTP_SHARD_DRAINED: u8 = 4;
const CTP_PROXY_TRANSFER_ACTIVATE: u8 = 5;

/// One message of the shard/shard/proxy client-transfer protocol (spec
/// §4.11). Each variant is exactly the payload its stage needs; the sender
/// determines the recipient via `Interlink::send`'s target, not a field on
/// the packet itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientTransferPacket {
    /// A → B: snapshots plus each entity's last applied `packet_seq`.
    ShardPrepare { transfer_id: Uuid, entities: Vec<Entity> },
    /// B → A: which entity ids B is prepared to receive.
    ShardReady { transfer_id: Uuid, entity_ids: Vec<Uuid> },
    /// A → P: redirect this client's intent stream to B.
    ProxyRequestSwitch { transfer_id: Uuid, client_id: Uuid, entity_ids: Vec<Uuid>, target: NodeIdentity },
    /// P → A: intents are now buffered; A may proceed to drain.
    ProxyFreeze { transfer_id: Uuid },
    /// A → P: all buffered intents applied up to `drained_seq`; B's new
    /// generation for these entities follows.
    ShardDrained { transfer_id: Uuid, drained_seq: u64, generation: u64 },
    /// P → B: retarget complete, buffered intents flushed and resumed.
    /// Carries the same `generation` A reported in `ShardDrained` so B can
    /// stamp the entities it already holds from `ShardPrepare` without a
    /// second shard-to-shard round trip (spec §4.11's generation fence).
    ProxyTransferActivate { transfer_id: Uuid, generation: u64 },
}

impl ClientTransferPacket {
    pub fn transfer_id(&self) -> Uuid {
        match self {
            ClientTransferPacket::ShardPrepare { transfer_id, .. }
            | ClientTransferPacket::ShardReady { transfer_id, .. }
            | ClientTransferPacket::ProxyRequestSwitch { transfer_id, .. }
            | ClientTransferPacket::ProxyFreeze { transfer_id }
            | ClientTransferPacket::ShardDrained { transfer_id, .. }
            | ClientTransferPacket::ProxyTransferActivate { transfer_id, .. } => *transfer_id,
        }
    }
}

impl Encode for ClientTransferPacket {
    fn encode(&self, w: &mut Writer) {
        match self {
            ClientTransferPacket::ShardPrepare { transfer_id, entities } => {
                w.tag(CTP_SHARD_PREPARE);
                w.uuid(transfer_id);
                encode_entity_vec(w, entities);
            }
            ClientTransferPacket::ShardReady { transfer_id, entity_ids } => {
                w.tag(CTP_SHARD_READY);
                w.uuid(transfer_id);
                encode_uuid_vec(w, entity_ids);
            }
            ClientTransferPacket::ProxyRequestSwitch { transfer_id, client_id, entity_ids, target } => {
                w.tag(CTP_PROXY_REQUEST_SWITCH);
                w.uuid(transfer_id);
                w.uuid(client_id);
                encode_uuid_vec(w, entity_ids);
                target.encode(w);
            }
            ClientTransferPacket::ProxyFreeze { transfer_id } => {
                w.tag(CTP_PROXY_FREEZE);
                w.uuid(transfer_id);
            }
            ClientTransferPacket::ShardDrained { transfer_id, drained_seq, generation } => {
                w.tag(CTP_SHARD_DRAINED);
                w.uuid(transfer_id);
                w.u64(*drained_seq);
                w.u64(*generation);
            }
            ClientTransferPacket::ProxyTransferActivate { transfer_id, generation } => {
                w.tag(CTP_PROXY_TRANSFER_ACTIVATE);
                w.uuid(transfer_id);
                w.u64(*generation);
            }
        }
    }
}

impl Decode for ClientTransferPacket {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        match r.tag(6)? {
            CTP_SHARD_PREPARE => Ok(ClientTransferPacket::ShardPrepare {
                transfer_id: r.uuid()?,
                entities: decode_entity_vec(r)?,
            }),
            CTP_SHARD_READY => Ok(ClientTransferPacket::ShardReady {
                transfer_id: r.uuid()?,
                entity_ids: decode_uuid_vec(r)?,
            }),
            CTP_PROXY_REQUEST_SWITCH => Ok(ClientTransferPacket::ProxyRequestSwitch {
                transfer_id: r.uuid()?,
                client_id: r.uuid()?,
                entity_ids: decode_uuid_vec(r)?,
                target: NodeIdentity::decode(r)?,
            }),
            CTP_PROXY_FREEZE => Ok(ClientTransferPacket::ProxyFreeze { transfer_id: r.uuid()? }),
            CTP_SHARD_DRAINED => Ok(ClientTransferPacket::ShardDrained {
                transfer_id: r.uuid()?,
                drained_seq: r.u64()?,
                generation: r.u64()?,
            }),
            CTP_PROXY_TRANSFER_ACTIVATE => Ok(ClientTransferPacket::ProxyTransferActivate {
                transfer_id: r.uuid()?,
                generation: r.u64()?,
            }),
            _ => Err(CodecError::BadTag),
        }
    }
}

impl Packet for ClientTransferPacket {
    fn type_name() -> &'static str {
        "ClientTransferPacket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_codec::Reader;
    use atlasnet_ident::Role;
    use atlasnet_core::Transform;
    use glam::Vec3;
    use atlasnet_core::Aabb3;

    fn entity() -> Entity {
        let transform = Transform::new(0, Vec3::ONE, Aabb3::new(Vec3::ZERO, Vec3::ONE));
        Entity::new(Uuid::new_v4(), transform)
    }

    #[test]
    fn entity_transfer_prepare_round_trips() {
        let p = EntityTransferPacket::Prepare {
            transfer_id: Uuid::new_v4(),
            entity_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        let bytes = p.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(EntityTransferPacket::decode(&mut r).unwrap(), p);
    }

    #[test]
    fn entity_transfer_commit_carries_snapshots() {
        let p = EntityTransferPacket::Commit {
            transfer_id: Uuid::new_v4(),
            entities: vec![entity(), entity()],
        };
        let bytes = p.encode_to_vec();
        let mut r = Reader::new(&bytes);
        let decoded = EntityTransferPacket::decode(&mut r).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn client_transfer_request_switch_round_trips() {
        let p = ClientTransferPacket::ProxyRequestSwitch {
            transfer_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            entity_ids: vec![Uuid::new_v4()],
            target: NodeIdentity::new(Role::Shard, Uuid::new_v4()),
        };
        let bytes = p.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(ClientTransferPacket::decode(&mut r).unwrap(), p);
    }

    #[test]
    fn proxy_transfer_activate_carries_generation() {
        let p = ClientTransferPacket::ProxyTransferActivate {
            transfer_id: Uuid::new_v4(),
            generation: 7,
        };
        let bytes = p.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(ClientTransferPacket::decode(&mut r).unwrap(), p);
    }

    #[test]
    fn malformed_tag_is_rejected() {
        let mut w = Writer::new();
        w.tag(200);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(EntityTransferPacket::decode(&mut r).unwrap_err(), CodecError::BadTag);
    }
}
