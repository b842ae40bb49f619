use atlasnet_codec::{CodecError, CodecResult, Decode, Encode, Reader, Writer};
use atlasnet_ident::NodeIdentity;
use std::collections::HashSet;
use uuid::Uuid;

/// Which side of an entity transfer this shard plays (spec §4.9).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransferMode {
    Sending,
    Receiving,
}

/// Entity transfer state machine (spec §4.9): `Sending` walks
/// `None -> Prepare -> Commit -> Complete`; `Receiving` walks
/// `None -> Prepare -> Ready -> Complete`. Both sides share one enum since
/// `Complete` and `None` mean the same thing regardless of mode, and keeping
/// them in one type lets `EntityTransfer::advance` validate the transition
/// against `mode` in a single place.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EntityTransferStage {
    None,
    Prepare,
    Ready,
    Commit,
    Complete,
}

impl EntityTransferStage {
    /// Is `next` a legal successor of `self` under `mode`?
    pub fn can_advance_to(self, next: EntityTransferStage, mode: TransferMode) -> bool {
        use EntityTransferStage::*;
        match (mode, self, next) {
            (_, None, Prepare) => true,
            (TransferMode::Sending, Prepare, Commit) => true,
            (TransferMode::Sending, Commit, Complete) => true,
            (TransferMode::Receiving, Prepare, Ready) => true,
            (TransferMode::Receiving, Ready, Complete) => true,
            _ => false,
        }
    }
}

const ETS_NONE: u8 = 0;
const ETS_PREPARE: u8 = 1;
const ETS_READY: u8 = 2;
const ETS_COMMIT: u8 = 3;
const ETS_COMPLETE: u8 = 4;

impl Encode for EntityTransferStage {
    fn encode(&self, w: &mut Writer) {
        let tag = match self {
            EntityTransferStage::None => ETS_NONE,
            EntityTransferStage::Prepare => ETS_PREPARE,
            EntityTransferStage::Ready => ETS_READY,
            EntityTransferStage::Commit => ETS_COMMIT,
            EntityTransferStage::Complete => ETS_COMPLETE,
        };
        w.tag(tag);
    }
}

impl Decode for EntityTransferStage {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        match r.tag(5)? {
            ETS_NONE => Ok(EntityTransferStage::None),
            ETS_PREPARE => Ok(EntityTransferStage::Prepare),
            ETS_READY => Ok(EntityTransferStage::Ready),
            ETS_COMMIT => Ok(EntityTransferStage::Commit),
            ETS_COMPLETE => Ok(EntityTransferStage::Complete),
            _ => unreachable!("Reader::tag bounds-checks the discriminant"),
        }
    }
}

/// Tracks one in-flight entity hand-off with a peer shard (spec §4.9).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTransfer {
    pub transfer_id: Uuid,
    pub peer: NodeIdentity,
    pub mode: TransferMode,
    pub stage: EntityTransferStage,
    pub entity_ids: HashSet<Uuid>,
}

impl EntityTransfer {
    pub fn new(transfer_id: Uuid, peer: NodeIdentity, mode: TransferMode, entity_ids: HashSet<Uuid>) -> EntityTransfer {
        EntityTransfer {
            transfer_id,
            peer,
            mode,
            stage: EntityTransferStage::None,
            entity_ids,
        }
    }

    /// Advances to `next`, returning an error rather than silently
    /// corrupting state on an out-of-order packet (spec §4.9 edge cases).
    pub fn advance(&mut self, next: EntityTransferStage) -> Result<(), EntityTransferStage> {
        if self.stage.can_advance_to(next, self.mode) {
            self.stage = next;
            Ok(())
        } else {
            Err(self.stage)
        }
    }
}

/// Six-phase client hand-off between proxies (spec §4.11).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClientTransferStage {
    None,
    ShardPrepare,
    ShardReady,
    ProxyRequestSwitch,
    ProxyFreeze,
    ShardDrained,
    ProxyTransferActivate,
}

impl ClientTransferStage {
    pub const ORDER: [ClientTransferStage; 7] = [
        ClientTransferStage::None,
        ClientTransferStage::ShardPrepare,
        ClientTransferStage::ShardReady,
        ClientTransferStage::ProxyRequestSwitch,
        ClientTransferStage::ProxyFreeze,
        ClientTransferStage::ShardDrained,
        ClientTransferStage::ProxyTransferActivate,
    ];

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).expect("ORDER is exhaustive")
    }

    /// The protocol is strictly linear: the only legal next stage is the one
    /// immediately after `self` in `ORDER` (spec §9 Open Question, resolved
    /// in favor of a single unified enum rather than per-role stage types).
    pub fn can_advance_to(self, next: ClientTransferStage) -> bool {
        next.index() == self.index() + 1
    }
}

const CTS_NONE: u8 = 0;
const CTS_SHARD_PREPARE: u8 = 1;
const CTS_SHARD_READY: u8 = 2;
const CTS_PROXY_REQUEST_SWITCH: u8 = 3;
const CTS_PROXY_FREEZE: u8 = 4;
const CTS_SHARD_DRAINED: u8 = 5;
const CTS_PROXY_TRANSFER_ACTIVATE: u8 = 6;

impl Encode for ClientTransferStage {
    fn encode(&self, w: &mut Writer) {
        let tag = match self {
            ClientTransferStage::None => CTS_NONE,
            ClientTransferStage::ShardPrepare => CTS_SHARD_PREPARE,
            ClientTransferStage::ShardReady => CTS_SHARD_READY,
            ClientTransferStage::ProxyRequestSwitch => CTS_PROXY_REQUEST_SWITCH,
            ClientTransferStage::ProxyFreeze => CTS_PROXY_FREEZE,
            ClientTransferStage::ShardDrained => CTS_SHARD_DRAINED,
            ClientTransferStage::ProxyTransferActivate => CTS_PROXY_TRANSFER_ACTIVATE,
        };
        w.tag(tag);
    }
}

impl Decode for ClientTransferStage {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        match r.tag(7)? {
            CTS_NONE => Ok(ClientTransferStage::None),
            CTS_SHARD_PREPARE => Ok(ClientTransferStage::ShardPrepare),
            CTS_SHARD_READY => Ok(ClientTransferStage::ShardReady),
            CTS_PROXY_REQUEST_SWITCH => Ok(ClientTransferStage::ProxyRequestSwitch),
            CTS_PROXY_FREEZE => Ok(ClientTransferStage::ProxyFreeze),
            CTS_SHARD_DRAINED => Ok(ClientTransferStage::ShardDrained),
            CTS_PROXY_TRANSFER_ACTIVATE => Ok(ClientTransferStage::ProxyTransferActivate),
            _ => unreachable!("Reader::tag bounds-checks the discriminant"),
        }
    }
}

/// Tracks one in-flight client hand-off between proxies (spec §4.11).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientTransfer {
    pub transfer_id: Uuid,
    pub stage: ClientTransferStage,
    pub entity_ids: HashSet<Uuid>,
}

impl ClientTransfer {
    pub fn new(transfer_id: Uuid, entity_ids: HashSet<Uuid>) -> ClientTransfer {
        ClientTransfer {
            transfer_id,
            stage: ClientTransferStage::None,
            entity_ids,
        }
    }

    pub fn advance(&mut self, next: ClientTransferStage) -> Result<(), ClientTransferStage> {
        if self.stage.can_advance_to(next) {
            self.stage = next;
            Ok(())
        } else {
            Err(self.stage)
        }
    }
}

fn encode_uuid_set(w: &mut Writer, ids: &HashSet<Uuid>) {
    w.varint(ids.len() as u64);
    for id in ids {
        w.uuid(id);
    }
}

fn decode_uuid_set(r: &mut Reader) -> CodecResult<HashSet<Uuid>> {
    let len = r.varint()? as usize;
    let mut ids = HashSet::with_capacity(len);
    for _ in 0..len {
        ids.insert(r.uuid()?);
    }
    Ok(ids)
}

impl Encode for EntityTransfer {
    fn encode(&self, w: &mut Writer) {
        w.uuid(&self.transfer_id);
        self.peer.encode(w);
        w.bool(matches!(self.mode, TransferMode::Sending));
        self.stage.encode(w);
        encode_uuid_set(w, &self.entity_ids);
    }
}

impl Decode for EntityTransfer {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let transfer_id = r.uuid()?;
        let peer = NodeIdentity::decode(r)?;
        let mode = if r.bool()? { TransferMode::Sending } else { TransferMode::Receiving };
        let stage = EntityTransferStage::decode(r)?;
        let entity_ids = decode_uuid_set(r)?;

        if !matches!(stage, EntityTransferStage::None) {
            let legal = match mode {
                TransferMode::Sending => matches!(
                    stage,
                    EntityTransferStage::Prepare | EntityTransferStage::Commit | EntityTransferStage::Complete
                ),
                TransferMode::Receiving => matches!(
                    stage,
                    EntityTransferStage::Prepare | EntityTransferStage::Ready | EntityTransferStage::Complete
                ),
            };
            if !legal {
                return Err(CodecError::BadTag);
            }
        }

        Ok(EntityTransfer {
            transfer_id,
            peer,
            mode,
            stage,
            entity_ids,
        })
    }
}

impl Encode for ClientTransfer {
    fn encode(&self, w: &mut Writer) {
        w.uuid(&self.transfer_id);
        self.stage.encode(w);
        encode_uuid_set(w, &self.entity_ids);
    }
}

impl Decode for ClientTransfer {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let transfer_id = r.uuid()?;
        let stage = ClientTransferStage::decode(r)?;
        let entity_ids = decode_uuid_set(r)?;
        Ok(ClientTransfer {
            transfer_id,
            stage,
            entity_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasnet_ident::Role;

    fn ids(n: usize) -> HashSet<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn sending_side_rejects_ready_stage() {
        let mut t = EntityTransfer::new(Uuid::new_v4(), NodeIdentity::singleton(Role::Watchdog), TransferMode::Sending, ids(1));
        t.advance(EntityTransferStage::Prepare).unwrap();
        assert!(t.advance(EntityTransferStage::Ready).is_err());
        assert_eq!(t.stage, EntityTransferStage::Prepare);
    }

    #[test]
    fn sending_side_walks_prepare_commit_complete() {
        let mut t = EntityTransfer::new(Uuid::new_v4(), NodeIdentity::singleton(Role::Watchdog), TransferMode::Sending, ids(2));
        t.advance(EntityTransferStage::Prepare).unwrap();
        t.advance(EntityTransferStage::Commit).unwrap();
        t.advance(EntityTransferStage::Complete).unwrap();
        assert_eq!(t.stage, EntityTransferStage::Complete);
    }

    #[test]
    fn receiving_side_walks_prepare_ready_complete() {
        let mut t = EntityTransfer::new(Uuid::new_v4(), NodeIdentity::singleton(Role::Watchdog), TransferMode::Receiving, ids(1));
        t.advance(EntityTransferStage::Prepare).unwrap();
        t.advance(EntityTransferStage::Ready).unwrap();
        t.advance(EntityTransferStage::Complete).unwrap();
        assert_eq!(t.stage, EntityTransferStage::Complete);
    }

    #[test]
    fn client_transfer_stage_is_strictly_linear() {
        let mut ct = ClientTransfer::new(Uuid::new_v4(), ids(1));
        assert!(ct.advance(ClientTransferStage::ProxyFreeze).is_err());
        ct.advance(ClientTransferStage::ShardPrepare).unwrap();
        ct.advance(ClientTransferStage::ShardReady).unwrap();
        ct.advance(ClientTransferStage::ProxyRequestSwitch).unwrap();
        ct.advance(ClientTransferStage::ProxyFreeze).unwrap();
        ct.advance(ClientTransferStage::ShardDrained).unwrap();
        ct.advance(ClientTransferStage::ProxyTransferActivate).unwrap();
        assert!(ct.advance(ClientTransferStage::ShardPrepare).is_err());
    }

    #[test]
    fn entity_transfer_round_trips() {
        let t = EntityTransfer::new(Uuid::new_v4(), NodeIdentity::singleton(Role::Cartograph), TransferMode::Sending, ids(3));
        let bytes = t.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(EntityTransfer::decode(&mut r).unwrap(), t);
    }
}
