use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::tile::TileIndex;
use crate::traversal::{
    cleanup, compute_stitching, sub_tileset_hook, update_quadtree, update_tileset3d, FrameOutcome, StitchInfo,
    TraversalContext,
};
use crate::tile::TileId;

/// A logical scene object with a lifecycle: identity, visibility,
/// opacity, and the two traversal hooks the `MainLoop` drives each frame.
/// `MapEntity` and `Tileset3dEntity` are the two concrete implementations;
/// both just wrap a `TileIndex` and pick which traversal algorithm walks it.
pub trait Entity: Send + Sync {
    fn id(&self) -> &str;
    fn visible(&self) -> bool;
    fn set_visible(&self, visible: bool);
    fn opacity(&self) -> f32;
    fn set_opacity(&self, opacity: f32);

    /// True while any request for this entity's tiles is pending.
    fn loading(&self) -> bool;
    /// `done / (done + pending)`, settling to `1.0` once nothing is left
    /// in flight; `done` counts both loaded and permanently-failed tiles.
    fn progress(&self) -> f32;

    /// Runs one frame of traversal. Returns what got selected/visited so
    /// the `MainLoop` can hand it to the renderer and to event payloads.
    fn update(&self, ctx: &TraversalContext) -> FrameOutcome;
    /// Cleanup pass: evicts stale content/nodes.
    fn post_update(&self, ctx: &TraversalContext) -> Vec<TileId>;

    fn tile_index(&self) -> &Arc<TileIndex>;
}

struct EntityState {
    visible: AtomicBool,
    opacity: RwLock<f32>,
}

impl Default for EntityState {
    fn default() -> Self {
        EntityState {
            visible: AtomicBool::new(true),
            opacity: RwLock::new(1.0),
        }
    }
}

fn progress_of(index: &TileIndex) -> (bool, f32) {
    let (done, pending) = index.content_progress();
    let loading = pending > 0;
    let progress = if done + pending == 0 {
        1.0
    } else {
        done as f32 / (done + pending) as f32
    };
    (loading, progress)
}

/// A 2.5D map entity: REPLACE-only quadtree traversal.
pub struct MapEntity {
    id: String,
    index: Arc<TileIndex>,
    state: EntityState,
}

impl MapEntity {
    pub fn new(id: impl Into<String>, index: Arc<TileIndex>) -> Self {
        MapEntity {
            id: id.into(),
            index,
            state: EntityState::default(),
        }
    }
}

impl Entity for MapEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn visible(&self) -> bool {
        self.state.visible.load(Ordering::Relaxed)
    }

    fn set_visible(&self, visible: bool) {
        self.state.visible.store(visible, Ordering::Relaxed);
    }

    fn opacity(&self) -> f32 {
        *self.state.opacity.read().unwrap()
    }

    fn set_opacity(&self, opacity: f32) {
        *self.state.opacity.write().unwrap() = opacity.clamp(0.0, 1.0);
    }

    fn loading(&self) -> bool {
        progress_of(&self.index).0
    }

    fn progress(&self) -> f32 {
        progress_of(&self.index).1
    }

    fn update(&self, ctx: &TraversalContext) -> FrameOutcome {
        if !self.visible() {
            return FrameOutcome::default();
        }
        update_quadtree(ctx)
    }

    fn post_update(&self, ctx: &TraversalContext) -> Vec<TileId> {
        cleanup(ctx)
    }

    fn tile_index(&self) -> &Arc<TileIndex> {
        &self.index
    }
}

/// A 3D Tiles entity: ADD/REPLACE traversal with sub-tileset extension.
pub struct Tileset3dEntity {
    id: String,
    index: Arc<TileIndex>,
    state: EntityState,
}

impl Tileset3dEntity {
    pub fn new(id: impl Into<String>, index: Arc<TileIndex>) -> Self {
        Tileset3dEntity {
            id: id.into(),
            index,
            state: EntityState::default(),
        }
    }

    /// A `TraversalContext` built for this entity must set
    /// `on_content_loaded` to this hook for sub-tileset grafting to work.
    pub fn content_loaded_hook() -> Arc<dyn Fn(&TileIndex, TileId, &crate::content::ContentPayload) + Send + Sync> {
        sub_tileset_hook()
    }
}

impl Entity for Tileset3dEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn visible(&self) -> bool {
        self.state.visible.load(Ordering::Relaxed)
    }

    fn set_visible(&self, visible: bool) {
        self.state.visible.store(visible, Ordering::Relaxed);
    }

    fn opacity(&self) -> f32 {
        *self.state.opacity.read().unwrap()
    }

    fn set_opacity(&self, opacity: f32) {
        *self.state.opacity.write().unwrap() = opacity.clamp(0.0, 1.0);
    }

    fn loading(&self) -> bool {
        progress_of(&self.index).0
    }

    fn progress(&self) -> f32 {
        progress_of(&self.index).1
    }

    fn update(&self, ctx: &TraversalContext) -> FrameOutcome {
        if !self.visible() {
            return FrameOutcome::default();
        }
        update_tileset3d(ctx)
    }

    fn post_update(&self, ctx: &TraversalContext) -> Vec<TileId> {
        cleanup(ctx)
    }

    fn tile_index(&self) -> &Arc<TileIndex> {
        &self.index
    }
}

/// Per-edge stitching info for every currently-displayed node of an entity,
/// computed on demand (not part of the per-frame traversal itself since it
/// only matters to whoever is about to build renderable geometry).
pub fn stitching_for(entity: &dyn Entity) -> std::collections::HashMap<TileId, StitchInfo> {
    let index = entity.tile_index();
    compute_stitching(index, &index.displayed_nodes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::content::mock::MockSource;
    use crate::content::ContentPayload;
    use crate::queue::RequestQueue;
    use crate::spatial::{BoundingVolume, Camera, Obb, PositionState};
    use crate::tile::{ContentState, RefineMode};
    use cgmath::{Point3, Vector3};
    use std::time::Duration;

    fn box_index(center: Vector3<f64>, half_extent: f64, refine: RefineMode) -> Arc<TileIndex> {
        Arc::new(TileIndex::new(
            BoundingVolume::Box(Obb {
                center,
                half_axes: [
                    Vector3::new(half_extent, 0.0, 0.0),
                    Vector3::new(0.0, 10.0, 0.0),
                    Vector3::new(0.0, 0.0, half_extent),
                ],
            }),
            1.0,
            refine,
        ))
    }

    fn context(index: Arc<TileIndex>) -> TraversalContext {
        let camera = Arc::new(Camera::new(
            PositionState {
                eye: Point3::new(0.0, 2000.0, 0.0),
                target: Point3::new(0.0, 0.0, 0.0),
                up: Vector3::new(0.0, 0.0, -1.0),
            },
            60.0,
            (800.0, 600.0),
        ));
        TraversalContext {
            index,
            camera,
            queue: RequestQueue::new(4),
            cache: Arc::new(Cache::new()),
            source: Arc::new(MockSource::new(ContentPayload::TextureTile(Vec::new()))),
            frame: 1,
            sse_threshold: 16.0,
            max_level: 24,
            cleanup_after_frames: 240,
            default_ttl: Duration::from_secs(60),
            fast_update_hint: None,
            on_content_loaded: None,
        }
    }

    #[test]
    fn invisible_entity_skips_traversal_entirely() {
        let index = box_index(Vector3::new(0.0, 0.0, 0.0), 512.0, RefineMode::Replace);
        let entity = MapEntity::new("basemap", index.clone());
        entity.set_visible(false);

        let outcome = entity.update(&context(index));

        assert!(outcome.displayed.is_empty());
        assert!(outcome.visited_order.is_empty(), "an invisible entity never walks its tree");
    }

    #[test]
    fn visible_map_entity_displays_its_root_leaf() {
        let index = box_index(Vector3::new(0.0, 0.0, 0.0), 512.0, RefineMode::Replace);
        let entity = MapEntity::new("basemap", index.clone());

        let outcome = entity.update(&context(index.clone()));

        assert_eq!(outcome.displayed, vec![index.root()]);
    }

    #[test]
    fn progress_and_loading_reflect_content_state_without_running_traversal() {
        let index = box_index(Vector3::new(0.0, 0.0, 0.0), 512.0, RefineMode::Replace);
        let entity = MapEntity::new("basemap", index.clone());

        // No tile has content yet: nothing to load, progress reads as done.
        assert!(!entity.loading());
        assert_eq!(entity.progress(), 1.0);

        index.mutate(index.root(), |n| {
            n.content_uri = Some("root".into());
            n.content_state = ContentState::Loading;
        });
        assert!(entity.loading());
        assert_eq!(entity.progress(), 0.0);

        index.mutate(index.root(), |n| n.content_state = ContentState::Loaded);
        assert!(!entity.loading());
        assert_eq!(entity.progress(), 1.0);
    }

    #[test]
    fn opacity_is_clamped_to_the_unit_range() {
        let index = box_index(Vector3::new(0.0, 0.0, 0.0), 512.0, RefineMode::Replace);
        let entity = MapEntity::new("basemap", index);

        entity.set_opacity(5.0);
        assert_eq!(entity.opacity(), 1.0);
        entity.set_opacity(-2.0);
        assert_eq!(entity.opacity(), 0.0);
    }

    #[test]
    fn stitching_for_reports_neighbors_among_an_entitys_displayed_tiles() {
        let index = box_index(Vector3::new(0.0, 0.0, 0.0), 10.0, RefineMode::Replace);
        let root = index.root();
        let neighbor_id = index.allocate_id();
        index.insert(TileNode {
            id: neighbor_id,
            parent: None,
            children: Vec::new(),
            level: 0,
            local_transform: cgmath::Matrix4::from_translation(Vector3::new(20.0, 0.0, 0.0)),
            bounding_volume: BoundingVolume::Box(Obb {
                center: Vector3::new(0.0, 0.0, 0.0),
                half_axes: [Vector3::new(10.0, 0.0, 0.0), Vector3::new(0.0, 10.0, 0.0), Vector3::new(0.0, 0.0, 10.0)],
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
        index.mutate(root, |n| n.displayed = true);

        let entity = MapEntity::new("basemap", index);
        let info = stitching_for(&entity);

        assert_eq!(info[&root].neighbors[&crate::traversal::Edge::East], neighbor_id);
    }

    #[test]
    fn tileset3d_content_loaded_hook_grafts_a_sub_tileset_onto_its_node() {
        let index = box_index(Vector3::new(0.0, 0.0, 0.0), 512.0, RefineMode::Add);
        let root = index.root();
        index.mutate(root, |n| n.content_uri = Some("tileset/sub.json".into()));

        let hook = Tileset3dEntity::content_loaded_hook();
        let payload = ContentPayload::SubTileset(serde_json::json!({
            "root": {
                "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 1.0] },
                "geometricError": 10.0,
                "content": { "uri": "grafted.b3dm" }
            }
        }));
        hook(&index, root, &payload);

        let node = index.get(root).unwrap();
        assert!(node.sub_tileset_loaded);
        assert_eq!(node.children.len(), 1);
    }
}
