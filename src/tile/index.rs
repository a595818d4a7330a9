use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use cgmath::Matrix4;

use super::node::{ContentState, RefineMode, TileId, TileNode};
use crate::spatial::BoundingVolume;

/// Owns every `TileNode` of one tree (one quadtree, or one 3D Tiles tree
/// plus whatever sub-tilesets have been grafted into it). Nodes are
/// id-keyed in a flat map rather than linked through `Rc<RefCell<..>>`, so
/// traversal can walk the tree while a concurrent request callback updates
/// an unrelated node's content state.
pub struct TileIndex {
    nodes: RwLock<HashMap<TileId, TileNode>>,
    root: TileId,
    next_id: AtomicU64,
}

impl TileIndex {
    pub fn new(root_volume: BoundingVolume, root_geometric_error: f64, root_refine: RefineMode) -> Self {
        let root = TileId(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, TileNode::root(root, root_volume, root_geometric_error, root_refine));
        TileIndex {
            nodes: RwLock::new(nodes),
            root,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn root(&self) -> TileId {
        self.root
    }

    /// Allocates an id for a node synthesized by subdivision (quadtree
    /// children, or procedurally-split 3D Tiles nodes).
    pub fn allocate_id(&self) -> TileId {
        TileId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Deterministic id for a node grafted in from a sub-tileset URI, so
    /// loading the same sub-tileset twice yields the same node identity
    /// instead of duplicating the subtree.
    pub fn id_for_uri(uri: &str) -> TileId {
        TileId(crate::helpers::hash_uri(uri))
    }

    pub fn get(&self, id: TileId) -> Option<TileNode> {
        self.nodes.read().unwrap().get(&id).cloned()
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.nodes.read().unwrap().contains_key(&id)
    }

    pub fn insert(&self, node: TileNode) {
        self.nodes.write().unwrap().insert(node.id, node);
    }

    pub fn remove(&self, id: TileId) -> Option<TileNode> {
        self.nodes.write().unwrap().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_children(&self, parent: TileId, children: Vec<TileId>) {
        let mut nodes = self.nodes.write().unwrap();
        if let Some(node) = nodes.get_mut(&parent) {
            node.children = children;
        }
    }

    pub fn mark_seen(&self, id: TileId, frame: u64) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.last_seen_frame = frame;
        }
    }

    pub fn mark_sub_tileset_loaded(&self, id: TileId) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.sub_tileset_loaded = true;
        }
    }

    pub fn set_content_uri(&self, id: TileId, uri: Option<String>) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.content_uri = uri;
        }
    }

    pub fn set_content_state(&self, id: TileId, state: super::node::ContentState) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.content_state = state;
        }
    }

    pub fn set_visible(&self, id: TileId, visible: bool, frame: u64) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.visible = visible;
            node.cleanable_since = if visible { None } else { node.cleanable_since.or(Some(frame)) };
        }
    }

    pub fn set_displayed(&self, id: TileId, displayed: bool) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            node.displayed = displayed;
        }
    }

    /// Applies `f` to the node in place, if it exists. The general escape
    /// hatch for traversal steps that need to update several fields of one
    /// node atomically under a single write lock.
    pub fn mutate(&self, id: TileId, f: impl FnOnce(&mut TileNode)) {
        if let Some(node) = self.nodes.write().unwrap().get_mut(&id) {
            f(node);
        }
    }

    /// `(done, pending)` across every node that has content to load:
    /// `done` counts `Loaded` and `FailedPermanent`, `pending` counts
    /// `Missing` and `Loading` (a `FailedTransient` node is eligible for
    /// retry next frame, so it still counts as pending).
    pub fn content_progress(&self) -> (usize, usize) {
        let mut done = 0;
        let mut pending = 0;
        for node in self.nodes.read().unwrap().values() {
            if node.content_uri.is_none() {
                continue;
            }
            match node.content_state {
                ContentState::Loaded | ContentState::FailedPermanent => done += 1,
                ContentState::Missing | ContentState::Loading | ContentState::FailedTransient => pending += 1,
            }
        }
        (done, pending)
    }

    /// Every currently-displayed node, for cleanup/priority/stitching
    /// passes that need the selected set without re-walking the tree.
    pub fn displayed_nodes(&self) -> Vec<TileId> {
        self.nodes
            .read()
            .unwrap()
            .values()
            .filter(|n| n.displayed)
            .map(|n| n.id)
            .collect()
    }

    /// Accumulates `local_transform` from `id` up to the root. 3D Tiles
    /// transforms compose parent-to-child, so the world transform of a node
    /// is the product of every ancestor's local transform, root-first.
    pub fn world_transform(&self, id: TileId) -> Matrix4<f64> {
        let nodes = self.nodes.read().unwrap();
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let Some(node) = nodes.get(&cur) else { break };
            chain.push(node.local_transform);
            current = node.parent;
        }
        chain
            .into_iter()
            .rev()
            .fold(Matrix4::from_scale(1.0), |acc, m| acc * m)
    }

    /// Root-first chain from the tree's root down to and including `id`.
    fn ancestor_chain(&self, id: TileId) -> Vec<TileId> {
        let nodes = self.nodes.read().unwrap();
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            chain.push(cur);
            current = nodes.get(&cur).and_then(|n| n.parent);
        }
        chain.reverse();
        chain
    }

    /// Smallest node that is an ancestor of (or equal to) every id in
    /// `ids`, defaulting to the root when `ids` is empty. Backs the
    /// `fastUpdateHint` a `MainLoop` computes across a frame's changed
    /// sources so traversal can restart below the whole tree (§3, §4.4).
    pub fn common_ancestor(&self, ids: &[TileId]) -> TileId {
        let mut chains = ids.iter().map(|&id| self.ancestor_chain(id));
        let Some(mut common) = chains.next() else {
            return self.root;
        };
        for chain in chains {
            let shared = common.iter().zip(chain.iter()).take_while(|(a, b)| a == b).count();
            common.truncate(shared.max(1));
        }
        common.last().copied().unwrap_or(self.root)
    }

    /// Leaves not displayed and invisible for more than `max_age` frames:
    /// candidates for content release and, for non-root leaves, removal
    /// from the index. A node currently part of the displayed set is never
    /// returned regardless of age.
    pub fn stale_leaves(&self, frame: u64, max_age: u64) -> Vec<TileId> {
        self.nodes
            .read()
            .unwrap()
            .values()
            .filter(|n| {
                n.is_leaf()
                    && !n.displayed
                    && n.cleanable_since
                        .is_some_and(|since| frame.saturating_sub(since) > max_age)
            })
            .map(|n| n.id)
            .collect()
    }
}
