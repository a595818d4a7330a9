use cgmath::{Matrix4, SquareMatrix};

use crate::spatial::BoundingVolume;

/// Identifies a node in a `TileIndex`. Quadtree nodes are assigned a
/// sequential id as they're subdivided into existence; nodes grafted in by
/// a sub-tileset extension are keyed by `hash_uri` of their content URI, so
/// loading the same sub-tileset twice grafts onto the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u64);

/// 3D Tiles `refine` semantics: `Add` renders parent and children together,
/// `Replace` renders only the most-refined selected level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineMode {
    Add,
    Replace,
}

/// Lifecycle of a node's content fetch. `Permanent` failures are never
/// retried and block further subdivision through the node; `Transient`
/// failures are retried on a later frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentState {
    #[default]
    Missing,
    Loading,
    Loaded,
    FailedTransient,
    FailedPermanent,
}

impl ContentState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ContentState::Loaded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ContentState::FailedTransient | ContentState::FailedPermanent)
    }

    pub fn should_request(&self) -> bool {
        matches!(self, ContentState::Missing | ContentState::FailedTransient)
    }
}

/// A single node in either the 2.5D map quadtree or the 3D Tiles tree. Both
/// trees share this shape; what differs is how `traversal` walks and
/// subdivides them.
#[derive(Debug, Clone)]
pub struct TileNode {
    pub id: TileId,
    pub parent: Option<TileId>,
    pub children: Vec<TileId>,
    pub level: u32,
    /// Transform from this node's local frame to its parent's frame.
    /// Identity for quadtree nodes, which express extent directly in world
    /// coordinates.
    pub local_transform: Matrix4<f64>,
    pub bounding_volume: BoundingVolume,
    pub geometric_error: f64,
    pub refine: RefineMode,
    pub content_uri: Option<String>,
    /// Set once a `SubTileset` payload has been grafted onto this node, so
    /// the same node is never expanded twice.
    pub sub_tileset_loaded: bool,
    /// Frame counter at which this node was last visited during traversal;
    /// used by cleanup to evict tiles that have fallen out of view.
    pub last_seen_frame: u64,
    pub content_state: ContentState,
    /// Frustum-visible this frame.
    pub visible: bool,
    /// Actually selected for rendering this frame (distinct from `visible`:
    /// a REPLACE parent stays visible-but-not-displayed while its children
    /// are awaited).
    pub displayed: bool,
    /// Set once `visible` goes false and cleared again on re-visibility;
    /// cleanup compares this against the configured TTL in frames.
    pub cleanable_since: Option<u64>,
}

impl TileNode {
    pub fn root(id: TileId, bounding_volume: BoundingVolume, geometric_error: f64, refine: RefineMode) -> Self {
        TileNode {
            id,
            parent: None,
            children: Vec::new(),
            level: 0,
            local_transform: Matrix4::identity(),
            bounding_volume,
            geometric_error,
            refine,
            content_uri: None,
            sub_tileset_loaded: false,
            last_seen_frame: 0,
            content_state: ContentState::Missing,
            visible: false,
            displayed: false,
            cleanable_since: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn has_content(&self) -> bool {
        self.content_uri.is_some()
    }
}
