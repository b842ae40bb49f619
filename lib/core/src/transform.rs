use atlasnet_codec::{CodecResult, Decode, Encode, Reader, Writer};
use glam::Vec3;

/// Axis-aligned bounding box attached to an entity for broad-phase queries
/// (spec §3). Distinct from `atlasnet_spatial::GridShape`: this one travels
/// on the wire per-entity rather than describing a region of authority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb3 {
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Aabb3 {
        Aabb3 { min, max }
    }
}

impl Encode for Aabb3 {
    fn encode(&self, w: &mut Writer) {
        w.vec3(self.min);
        w.vec3(self.max);
    }
}

impl Decode for Aabb3 {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        Ok(Aabb3 {
            min: r.vec3()?,
            max: r.vec3()?,
        })
    }
}

/// An entity's pose: which world it lives in, its position, and its bounds
/// (spec §3). `world` lets a single shard host more than one logical world
/// without entity ids colliding across them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub world: u16,
    pub position: Vec3,
    pub bounding_box: Aabb3,
}

impl Transform {
    #[inline]
    pub fn new(world: u16, position: Vec3, bounding_box: Aabb3) -> Transform {
        Transform {
            world,
            position,
            bounding_box,
        }
    }
}

impl Encode for Transform {
    fn encode(&self, w: &mut Writer) {
        w.u16(self.world);
        w.vec3(self.position);
        self.bounding_box.encode(w);
    }
}

impl Decode for Transform {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let world = r.u16()?;
        let position = r.vec3()?;
        let bounding_box = Aabb3::decode(r)?;
        Ok(Transform {
            world,
            position,
            bounding_box,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_round_trips() {
        let t = Transform::new(
            3,
            Vec3::new(1.0, 2.0, 3.0),
            Aabb3::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
        );
        let bytes = t.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(Transform::decode(&mut r).unwrap(), t);
    }
}
