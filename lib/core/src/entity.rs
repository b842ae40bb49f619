use crate::transform::Transform;
use atlasnet_codec::{CodecResult, Decode, Encode, Reader, Writer};
use smallvec::SmallVec;
use uuid::Uuid;

/// Small inline buffer for the per-entity opaque metadata blob. Most payloads
/// fit in 32 bytes (a handful of gameplay flags/ids); larger ones spill to
/// the heap transparently.
pub type Metadata = SmallVec<[u8; 32]>;

/// One simulated object (spec §3). Game-specific interpretation of
/// `metadata` is a collaborator concern; AtlasNet only moves the blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub entity_id: Uuid,
    pub is_client: bool,
    pub client_id: Uuid,
    pub transform: Transform,
    pub packet_seq: u64,
    pub transfer_generation: u64,
    pub metadata: Metadata,
}

impl Entity {
    pub fn new(entity_id: Uuid, transform: Transform) -> Entity {
        Entity {
            entity_id,
            is_client: false,
            client_id: Uuid::nil(),
            transform,
            packet_seq: 0,
            transfer_generation: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn for_client(entity_id: Uuid, client_id: Uuid, transform: Transform) -> Entity {
        Entity {
            entity_id,
            is_client: true,
            client_id,
            transform,
            packet_seq: 0,
            transfer_generation: 0,
            metadata: Metadata::new(),
        }
    }

    /// Replaces the metadata blob wholesale. The wire format has no notion of
    /// a partial update: every transfer of a snapshot carries the full blob,
    /// and the receiver always fully resizes its own buffer to match rather
    /// than copying into a pre-sized one (see DESIGN.md's resolution of the
    /// "assign vs. copy" semantics).
    pub fn set_metadata(&mut self, bytes: &[u8]) {
        self.metadata.clear();
        self.metadata.extend_from_slice(bytes);
    }

    #[inline]
    pub fn minimal(&self) -> atlasnet_spatial::EntityMinimal {
        atlasnet_spatial::EntityMinimal {
            entity_id: self.entity_id.as_u128(),
            position: self.transform.position,
        }
    }
}

impl Encode for Entity {
    fn encode(&self, w: &mut Writer) {
        w.uuid(&self.entity_id);
        w.bool(self.is_client);
        w.uuid(&self.client_id);
        self.transform.encode(w);
        w.u64(self.packet_seq);
        w.u64(self.transfer_generation);
        w.blob(&self.metadata);
    }
}

impl Decode for Entity {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let entity_id = r.uuid()?;
        let is_client = r.bool()?;
        let client_id = r.uuid()?;
        let transform = Transform::decode(r)?;
        let packet_seq = r.u64()?;
        let transfer_generation = r.u64()?;
        let metadata_bytes = r.blob()?;

        let mut metadata = Metadata::new();
        metadata.extend_from_slice(&metadata_bytes);

        Ok(Entity {
            entity_id,
            is_client,
            client_id,
            transform,
            packet_seq,
            transfer_generation,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Aabb3;
    use glam::Vec3;

    fn sample() -> Entity {
        let transform = Transform::new(0, Vec3::new(1.0, 2.0, 3.0), Aabb3::new(Vec3::ZERO, Vec3::ONE));
        let mut e = Entity::for_client(Uuid::new_v4(), Uuid::new_v4(), transform);
        e.set_metadata(&[9, 8, 7]);
        e.packet_seq = 42;
        e
    }

    #[test]
    fn entity_round_trips() {
        let e = sample();
        let bytes = e.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(Entity::decode(&mut r).unwrap(), e);
    }

    #[test]
    fn set_metadata_replaces_rather_than_appends() {
        let mut e = sample();
        e.set_metadata(&[1]);
        assert_eq!(e.metadata.as_slice(), &[1]);
    }
}
