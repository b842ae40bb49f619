use crate::bound::{Bound, BoundShape, EntityMinimal, GridShape};
use glam::Vec3;

/// Unbounded in the vertical axis: only horizontal position decides bound
/// membership (spec is silent on per-world/vertical partitioning, see
/// DESIGN.md's Open Question resolutions).
const VERTICAL_SPAN: f32 = 1.0e7;

/// Configuration for the default heuristic: four axis-aligned quads in a
/// 2x2 grid around `origin`, each `half_extent` wide (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct GridHeuristicConfig {
    pub origin: Vec3,
    pub half_extent: f32,
}

impl Default for GridHeuristicConfig {
    fn default() -> Self {
        GridHeuristicConfig {
            origin: Vec3::ZERO,
            half_extent: 50.0,
        }
    }
}

/// Partitions the world into a fixed 2x2 grid. Does not consult the entity
/// snapshot — a future load-aware heuristic would, which is why
/// `compute_bounds` still takes it.
#[derive(Debug, Clone, Copy)]
pub struct GridHeuristic {
    pub config: GridHeuristicConfig,
}

impl GridHeuristic {
    pub fn new(config: GridHeuristicConfig) -> GridHeuristic {
        GridHeuristic { config }
    }

    pub fn compute_bounds(&self, _snapshot: &[EntityMinimal]) -> Vec<Bound> {
        let GridHeuristicConfig { origin, half_extent } = self.config;
        let step = half_extent * 2.0;

        let quadrants = [
            (origin.x - step, origin.x, origin.z - step, origin.z),
            (origin.x, origin.x + step, origin.z - step, origin.z),
            (origin.x - step, origin.x, origin.z, origin.z + step),
            (origin.x, origin.x + step, origin.z, origin.z + step),
        ];

        quadrants
            .into_iter()
            .enumerate()
            .map(|(index, (min_x, max_x, min_z, max_z))| {
                Bound::new(
                    index as u32,
                    BoundShape::Grid(GridShape {
                        min: Vec3::new(min_x, -VERTICAL_SPAN, min_z),
                        max: Vec3::new(max_x, VERTICAL_SPAN, max_z),
                    }),
                )
            })
            .collect()
    }
}

/// Algorithm that partitions the world into bounds from a snapshot of
/// minimal entities (spec §4.6). A sealed union over the one implementation
/// we ship, per spec §9's polymorphism design note.
#[derive(Debug, Clone, Copy)]
pub enum Heuristic {
    Grid(GridHeuristic),
}

impl Heuristic {
    pub fn compute_bounds(&self, snapshot: &[EntityMinimal]) -> Vec<Bound> {
        match self {
            Heuristic::Grid(h) => h.compute_bounds(snapshot),
        }
    }
}

impl Default for Heuristic {
    fn default() -> Self {
        Heuristic::Grid(GridHeuristic::new(GridHeuristicConfig::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::position_query;

    #[test]
    fn grid_heuristic_produces_four_non_overlapping_quadrants() {
        let heuristic = Heuristic::default();
        let bounds = heuristic.compute_bounds(&[]);
        assert_eq!(bounds.len(), 4);

        assert_eq!(position_query(&bounds, Vec3::new(-10.0, 0.0, -10.0)), Some(0));
        assert_eq!(position_query(&bounds, Vec3::new(10.0, 0.0, -10.0)), Some(1));
        assert_eq!(position_query(&bounds, Vec3::new(-10.0, 0.0, 10.0)), Some(2));
        assert_eq!(position_query(&bounds, Vec3::new(10.0, 0.0, 10.0)), Some(3));
    }

    #[test]
    fn origin_resolves_to_exactly_one_quadrant() {
        let heuristic = Heuristic::default();
        let bounds = heuristic.compute_bounds(&[]);
        assert!(position_query(&bounds, Vec3::ZERO).is_some());
    }
}
