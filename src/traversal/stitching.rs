use std::collections::HashMap;

use crate::spatial::Aabb;
use crate::tile::{TileId, TileIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    North,
    South,
    East,
    West,
}

const EDGES: [Edge; 4] = [Edge::North, Edge::South, Edge::East, Edge::West];
/// Tolerance, in world units, for treating two extents as sharing a
/// boundary; quadtree extents are exact multiples of their parent's so this
/// only needs to absorb floating-point drift.
const EPSILON: f64 = 1e-6;

/// The smallest (most-refined) currently-displayed node bordering each edge
/// of a node, used to snap that edge's sampled vertices to the neighbour's
/// resolution and avoid cracks. Purely a tree/extent lookup — it does not
/// touch geometry, which lives downstream in the renderer.
#[derive(Debug, Clone, Default)]
pub struct StitchInfo {
    pub neighbors: HashMap<Edge, TileId>,
}

fn touches(a: &Aabb, b: &Aabb, edge: Edge) -> bool {
    match edge {
        Edge::East => (a.max.x - b.min.x).abs() < EPSILON && overlaps_z(a, b),
        Edge::West => (a.min.x - b.max.x).abs() < EPSILON && overlaps_z(a, b),
        Edge::North => (a.max.z - b.min.z).abs() < EPSILON && overlaps_x(a, b),
        Edge::South => (a.min.z - b.max.z).abs() < EPSILON && overlaps_x(a, b),
    }
}

fn overlaps_x(a: &Aabb, b: &Aabb) -> bool {
    a.min.x < b.max.x - EPSILON && b.min.x < a.max.x - EPSILON
}

fn overlaps_z(a: &Aabb, b: &Aabb) -> bool {
    a.min.z < b.max.z - EPSILON && b.min.z < a.max.z - EPSILON
}

fn extent(aabb: &Aabb) -> f64 {
    (aabb.max.x - aabb.min.x).max(aabb.max.z - aabb.min.z)
}

/// For every node in `displayed`, finds the smallest neighbour (by world
/// extent) touching each of its four edges among the other displayed nodes.
/// `O(n^2)` in the displayed-set size, which for a per-frame quadtree
/// selection stays small.
pub fn compute_stitching(index: &TileIndex, displayed: &[TileId]) -> HashMap<TileId, StitchInfo> {
    let extents: Vec<(TileId, Aabb)> = displayed
        .iter()
        .filter_map(|&id| {
            let node = index.get(id)?;
            let world = index.world_transform(id);
            Some((id, node.bounding_volume.to_aabb(&world)))
        })
        .collect();

    let mut result = HashMap::new();
    for (id, aabb) in &extents {
        let mut info = StitchInfo::default();
        for edge in EDGES {
            let best = extents
                .iter()
                .filter(|(other_id, other_aabb)| other_id != id && touches(aabb, other_aabb, edge))
                .min_by(|(_, a), (_, b)| extent(a).partial_cmp(&extent(b)).unwrap());
            if let Some((neighbor_id, _)) = best {
                info.neighbors.insert(edge, *neighbor_id);
            }
        }
        result.insert(*id, info);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{BoundingVolume, Obb};
    use crate::tile::{RefineMode, TileNode};
    use cgmath::{Matrix4, Vector3};

    fn square(index: &TileIndex, center: Vector3<f64>, half_extent: f64) -> TileId {
        let id = index.allocate_id();
        index.insert(TileNode {
            id,
            parent: None,
            children: Vec::new(),
            level: 0,
            local_transform: Matrix4::from_translation(center),
            bounding_volume: BoundingVolume::Box(Obb {
                center: Vector3::new(0.0, 0.0, 0.0),
                half_axes: [
                    Vector3::new(half_extent, 0.0, 0.0),
                    Vector3::new(0.0, 1.0, 0.0),
                    Vector3::new(0.0, 0.0, half_extent),
                ],
            }),
            geometric_error: 1.0,
            refine: RefineMode::Replace,
            content_uri: None,
            sub_tileset_loaded: false,
            last_seen_frame: 0,
            content_state: Default::default(),
            visible: false,
            displayed: true,
            cleanable_since: None,
        });
        id
    }

    fn blank_index() -> TileIndex {
        TileIndex::new(
            BoundingVolume::Box(Obb {
                center: Vector3::new(0.0, 0.0, 0.0),
                half_axes: [Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0), Vector3::new(0.0, 0.0, 1.0)],
            }),
            1.0,
            RefineMode::Replace,
        )
    }

    #[test]
    fn adjacent_tiles_become_each_others_east_west_neighbors() {
        let index = blank_index();
        // Two 10x10 squares sharing the x=10 boundary.
        let west = square(&index, Vector3::new(0.0, 0.0, 0.0), 10.0);
        let east = square(&index, Vector3::new(20.0, 0.0, 0.0), 10.0);

        let info = compute_stitching(&index, &[west, east]);

        assert_eq!(info[&west].neighbors[&Edge::East], east);
        assert_eq!(info[&east].neighbors[&Edge::West], west);
        assert!(!info[&west].neighbors.contains_key(&Edge::North));
    }

    #[test]
    fn a_finer_neighbor_is_preferred_over_a_coarser_one() {
        let index = blank_index();
        let west = square(&index, Vector3::new(0.0, 0.0, 0.0), 10.0);
        // Two smaller tiles stacked along z, both bordering `west`'s east edge;
        // each is a better (smaller-extent) match than one big neighbor would be.
        let east_small_a = square(&index, Vector3::new(15.0, 0.0, -5.0), 5.0);
        let east_small_b = square(&index, Vector3::new(15.0, 0.0, 5.0), 5.0);

        let info = compute_stitching(&index, &[west, east_small_a, east_small_b]);

        let neighbor = info[&west].neighbors[&Edge::East];
        assert!(neighbor == east_small_a || neighbor == east_small_b);
    }

    #[test]
    fn non_touching_tiles_have_no_shared_edge() {
        let index = blank_index();
        let a = square(&index, Vector3::new(0.0, 0.0, 0.0), 10.0);
        let far = square(&index, Vector3::new(10_000.0, 0.0, 0.0), 10.0);

        let info = compute_stitching(&index, &[a, far]);

        assert!(info[&a].neighbors.is_empty());
        assert!(info[&far].neighbors.is_empty());
    }
}
