use atlasnet_codec::{CodecResult, Decode, Encode, Reader, Writer};
use glam::Vec3;

/// A minimal, position-only view of an entity, the input a `Heuristic`
/// consumes to compute a bound partition (spec §3, §4.6).
#[derive(Debug, Clone, Copy)]
pub struct EntityMinimal {
    pub entity_id: u128,
    pub position: Vec3,
}

/// Axis-aligned box. The default (and currently only) `BoundShape` variant;
/// kept as a tagged union rather than a trait object per spec §9's
/// "sealed variants, not open inheritance" design note, so adding a second
/// shape later is a match-arm addition, not a vtable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridShape {
    pub min: Vec3,
    pub max: Vec3,
}

impl GridShape {
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x < self.max.x
            && point.z >= self.min.z
            && point.z < self.max.z
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// A spatial region whose `contains` predicate determines spatial authority
/// (spec §3, §4.5). Modeled as a tagged union so the encode/decode and
/// dispatch stay exhaustive-match based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundShape {
    Grid(GridShape),
}

impl BoundShape {
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        match self {
            BoundShape::Grid(g) => g.contains(point),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        match self {
            BoundShape::Grid(g) => g.center(),
        }
    }
}

/// `(bound_id, shape)` pair (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub bound_id: u32,
    pub shape: BoundShape,
}

impl Bound {
    #[inline]
    pub fn new(bound_id: u32, shape: BoundShape) -> Bound {
        Bound { bound_id, shape }
    }

    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        self.shape.contains(point)
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.shape.center()
    }
}

/// Returns the id of the bound containing `point`, provided it lies inside
/// exactly one of `bounds` (spec §4.6, §8 boundary behavior).
pub fn position_query(bounds: &[Bound], point: Vec3) -> Option<u32> {
    let mut found = None;

    for bound in bounds {
        if bound.contains(point) {
            if found.is_some() {
                return None;
            }
            found = Some(bound.bound_id);
        }
    }

    found
}

const SHAPE_TAG_GRID: u8 = 0;

impl Encode for BoundShape {
    fn encode(&self, w: &mut Writer) {
        match self {
            BoundShape::Grid(g) => {
                w.tag(SHAPE_TAG_GRID);
                w.vec3(g.min);
                w.vec3(g.max);
            }
        }
    }
}

impl Decode for BoundShape {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let tag = r.tag(1)?;
        match tag {
            SHAPE_TAG_GRID => {
                let min = r.vec3()?;
                let max = r.vec3()?;
                Ok(BoundShape::Grid(GridShape { min, max }))
            }
            _ => unreachable!("Reader::tag bounds-checks the discriminant"),
        }
    }
}

impl Encode for Bound {
    fn encode(&self, w: &mut Writer) {
        w.u32(self.bound_id);
        self.shape.encode(w);
    }
}

impl Decode for Bound {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let bound_id = r.u32()?;
        let shape = BoundShape::decode(r)?;
        Ok(Bound { bound_id, shape })
    }
}

/// A set of bounds produced by a heuristic, serialized as a varint length
/// header followed by bound encodings (spec §4.6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundSet {
    pub bounds: Vec<Bound>,
}

impl Encode for BoundSet {
    fn encode(&self, w: &mut Writer) {
        w.varint(self.bounds.len() as u64);
        for bound in &self.bounds {
            bound.encode(w);
        }
    }
}

impl Decode for BoundSet {
    fn decode(r: &mut Reader) -> CodecResult<Self> {
        let len = r.varint()? as usize;
        let mut bounds = Vec::with_capacity(len);
        for _ in 0..len {
            bounds.push(Bound::decode(r)?);
        }
        Ok(BoundSet { bounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(bound_id: u32, min: Vec3, max: Vec3) -> Bound {
        Bound::new(bound_id, BoundShape::Grid(GridShape { min, max }))
    }

    #[test]
    fn position_query_resolves_single_containing_bound() {
        let bounds = vec![
            grid(0, Vec3::new(0.0, -1000.0, 0.0), Vec3::new(10.0, 1000.0, 10.0)),
            grid(1, Vec3::new(10.0, -1000.0, 0.0), Vec3::new(20.0, 1000.0, 10.0)),
        ];

        assert_eq!(position_query(&bounds, Vec3::new(9.0, 0.0, 1.0)), Some(0));
        assert_eq!(position_query(&bounds, Vec3::new(11.0, 0.0, 1.0)), Some(1));
    }

    #[test]
    fn boundary_point_resolves_deterministically() {
        // x=10 is outside the [0,10) bound and inside the [10,20) bound: the
        // receiving shape's `contains` is the sole source of truth (spec §8).
        let bounds = vec![
            grid(0, Vec3::new(0.0, -1000.0, 0.0), Vec3::new(10.0, 1000.0, 10.0)),
            grid(1, Vec3::new(10.0, -1000.0, 0.0), Vec3::new(20.0, 1000.0, 10.0)),
        ];

        assert_eq!(position_query(&bounds, Vec3::new(10.0, 0.0, 1.0)), Some(1));
    }

    #[test]
    fn position_outside_all_bounds_is_none() {
        let bounds = vec![grid(0, Vec3::ZERO, Vec3::splat(10.0))];
        assert_eq!(position_query(&bounds, Vec3::new(100.0, 0.0, 100.0)), None);
    }

    #[test]
    fn bound_set_round_trips() {
        let set = BoundSet {
            bounds: vec![
                grid(0, Vec3::ZERO, Vec3::splat(10.0)),
                grid(1, Vec3::splat(10.0), Vec3::splat(20.0)),
            ],
        };

        let bytes = set.encode_to_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(BoundSet::decode(&mut r).unwrap(), set);
    }
}
