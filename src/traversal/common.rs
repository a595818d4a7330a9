use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheOptions};
use crate::content::{ContentPayload, Source};
use crate::error::CoreError;
use crate::queue::RequestQueue;
use crate::spatial::Camera;
use crate::tile::{ContentState, TileId, TileIndex, TileNode};

/// Everything one traversal pass needs, held as `Arc`s rather than borrows:
/// a content request spawns a detached task (traversal itself must never
/// suspend — §5), and that task outlives the traversal call that started it.
#[derive(Clone)]
pub struct TraversalContext {
    pub index: Arc<TileIndex>,
    pub camera: Arc<Camera>,
    pub queue: Arc<RequestQueue<ContentPayload>>,
    pub cache: Arc<Cache<ContentPayload>>,
    pub source: Arc<dyn Source>,
    pub frame: u64,
    pub sse_threshold: f64,
    pub max_level: u32,
    pub cleanup_after_frames: u64,
    pub default_ttl: Duration,
    /// Smallest common ancestor of whatever changed since the last frame,
    /// as computed by the `MainLoop` (§3 Context, §4.4 ordering
    /// guarantees). When set, traversal restarts here instead of at the
    /// root, skipping the unaffected rest of the tree; ancestor nodes
    /// above the hint keep whatever display state they had last frame.
    pub fast_update_hint: Option<TileId>,
    /// Invoked after a content fetch lands in the cache, with the node it
    /// was fetched for and the payload. 3D Tiles traversal uses this to
    /// graft a `SubTileset` payload into the index; the quadtree leaves it
    /// `None`.
    pub on_content_loaded: Option<Arc<dyn Fn(&TileIndex, TileId, &ContentPayload) + Send + Sync>>,
}

/// What one `update_quadtree`/`update_tileset3d` call produced, handed back
/// to the `MainLoop` for the render step and for the testable properties in
/// §8 (parent-before-child order, the displayed set).
#[derive(Debug, Default, Clone)]
pub struct FrameOutcome {
    pub displayed: Vec<TileId>,
    pub requested: Vec<TileId>,
    pub visited_order: Vec<TileId>,
    pub removed: Vec<TileId>,
}

/// Releases content and drops nodes whose `cleanable_since` has exceeded
/// `ctx.cleanup_after_frames` (§4.4 step 6 / §4.5 step 5). The root is
/// never dropped, only its content. A node referenced by the current
/// displayed set is never a candidate — `TileIndex::stale_leaves` already
/// excludes it.
pub fn cleanup(ctx: &TraversalContext) -> Vec<TileId> {
    let stale = ctx.index.stale_leaves(ctx.frame, ctx.cleanup_after_frames);
    for &id in &stale {
        if let Some(node) = ctx.index.get(id) {
            if let Some(uri) = &node.content_uri {
                ctx.cache.delete(uri);
            }
        }
        if id != ctx.index.root() {
            ctx.index.remove(id);
        }
    }
    stale
}

/// Recursively marks a node and its whole subtree invisible/not-displayed,
/// starting the cleanup clock on each. Used when a node is culled or a
/// REPLACE parent collapses its children back out of the displayed set.
pub fn hide_subtree(index: &TileIndex, id: TileId, frame: u64) {
    let Some(node) = index.get(id) else { return };
    index.set_visible(id, false, frame);
    index.set_displayed(id, false);
    for child in node.children {
        hide_subtree(index, child, frame);
    }
}

/// Request priority is a monotone function of `-distance` and `level`:
/// closer and deeper tiles win. Distance dominates (scaled up) so that a
/// near shallow tile still outranks a far deep one, matching "1/distance
/// and level" for the quadtree and "(-distance, level)" for 3D Tiles.
pub fn request_priority(distance: f64, level: u32) -> i64 {
    let inv_distance = if distance > 1e-6 { 1.0 / distance } else { 1e6 };
    (inv_distance * 1_000.0) as i64 * 1_000 + level as i64
}

/// Enqueues a content fetch for `node` if it doesn't already have one
/// in flight, spawning a detached task that applies the result to the
/// cache and index once the queue resolves it. Traversal calls this and
/// moves on without awaiting anything, per the cooperative single-threaded
/// model (§5).
pub fn request_content(ctx: &TraversalContext, node: &TileNode) {
    if !node.content_state.should_request() {
        return;
    }
    let Some(uri) = node.content_uri.clone() else {
        return;
    };

    if let Some(payload) = ctx.cache.get(&uri) {
        let _ = payload;
        ctx.index.set_content_state(node.id, ContentState::Loaded);
        return;
    }

    ctx.index.set_content_state(node.id, ContentState::Loading);

    let world = ctx.index.world_transform(node.id);
    let distance = node.bounding_volume.distance_to_point(&world, ctx.camera.position());
    let priority = request_priority(distance, node.level);

    let index = ctx.index.clone();
    let cache = ctx.cache.clone();
    let queue = ctx.queue.clone();
    let source = ctx.source.clone();
    let ttl = ctx.default_ttl;
    let id = node.id;
    let node_for_task = node.clone();
    let key = uri.clone();
    let on_loaded = ctx.on_content_loaded.clone();

    tokio::spawn(async move {
        let gate_index = index.clone();
        let should_execute = move || {
            gate_index
                .get(id)
                .map(|n| !matches!(n.content_state, ContentState::FailedPermanent))
                .unwrap_or(false)
        };

        let result = queue
            .enqueue(key.clone(), priority, should_execute, move || async move {
                source.get_data(&node_for_task).await
            })
            .await;

        match result {
            Ok(payload) => {
                let size = payload.byte_len() as u64;
                if let Some(hook) = &on_loaded {
                    hook(&index, id, &payload);
                }
                cache.set(
                    key,
                    payload,
                    CacheOptions {
                        ttl: Some(ttl),
                        size,
                        on_delete: None,
                    },
                );
                index.set_content_state(id, ContentState::Loaded);
            }
            Err(CoreError::Aborted(_)) => {
                index.set_content_state(id, ContentState::Missing);
            }
            Err(CoreError::Permanent(_)) => {
                index.set_content_state(id, ContentState::FailedPermanent);
            }
            Err(CoreError::Invariant(msg)) => {
                // A bug, not a recoverable content-fetch outcome: surface it
                // loudly rather than quietly marking the tile failed.
                panic!("invariant violated while loading tile content: {msg}");
            }
            Err(CoreError::Transient(_) | CoreError::Io(_) | CoreError::Json(_)) => {
                index.set_content_state(id, ContentState::FailedTransient);
            }
        }
    });
}
