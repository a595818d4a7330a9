use cgmath::Matrix4;

use super::common::{hide_subtree, request_content, FrameOutcome, TraversalContext};
use crate::spatial::{screen_space_error, BoundingVolume, Obb};
use crate::tile::{RefineMode, TileId, TileNode};

/// Splits a box extent into four quadrants in the node's local X/Z plane,
/// halving the Y half-extent's... no — Y (elevation) half-extent is kept,
/// only X/Z halve. Sibling order is `[SW, SE, NW, NE]`, a fixed
/// extent-sorted order so traversal visit order is deterministic.
fn split_quadrants(obb: &Obb) -> [Obb; 4] {
    let half_x = obb.half_axes[0] * 0.5;
    let y = obb.half_axes[1];
    let half_z = obb.half_axes[2] * 0.5;

    let mut out = Vec::with_capacity(4);
    for sz in [-1.0, 1.0] {
        for sx in [-1.0, 1.0] {
            out.push(Obb {
                center: obb.center + half_x * sx + half_z * sz,
                half_axes: [half_x, y, half_z],
            });
        }
    }
    [out[0], out[1], out[2], out[3]]
}

/// Quorum gate of §4.4 step 2: "the four children's textures can be
/// produced from available layer data". A freshly-synthesized child has
/// no content of its own yet, so while it loads its quadrant is rendered
/// by cropping the parent's own color/elevation layers — which only
/// works once the parent's own content has actually landed. A node with
/// no content source at all (no layers attached) has nothing to gate on
/// and always clears the quorum.
fn quorum_satisfied(node: &TileNode) -> bool {
    node.content_uri.is_none() || node.content_state.is_loaded()
}

fn ensure_children(ctx: &TraversalContext, node: &TileNode) -> Vec<TileId> {
    if !node.children.is_empty() {
        return node.children.clone();
    }
    let BoundingVolume::Box(obb) = node.bounding_volume else {
        // Map quadtree nodes are always box extents; anything else is a
        // construction bug upstream, not a traversal-time recoverable case.
        panic!("quadtree node {:?} has a non-box bounding volume", node.id);
    };

    let quadrants = split_quadrants(&obb);
    let mut children = Vec::with_capacity(4);
    for quadrant in quadrants {
        let id = ctx.index.allocate_id();
        let content_uri = node
            .content_uri
            .as_ref()
            .map(|base| format!("{base}/{}", children.len()));
        let child = TileNode {
            id,
            parent: Some(node.id),
            children: Vec::new(),
            level: node.level + 1,
            local_transform: Matrix4::from_scale(1.0),
            bounding_volume: BoundingVolume::Box(quadrant),
            geometric_error: node.geometric_error * 0.5,
            refine: RefineMode::Replace,
            content_uri,
            sub_tileset_loaded: false,
            last_seen_frame: ctx.frame,
            content_state: Default::default(),
            visible: false,
            displayed: false,
            cleanable_since: None,
        };
        ctx.index.insert(child);
        children.push(id);
    }
    ctx.index.set_children(node.id, children.clone());
    children
}

/// Per-frame update of the map quadtree rooted at `ctx.index.root()`.
/// Refinement is always REPLACE (§4.4): a parent stays displayed until all
/// four children are themselves displayed, at which point display swaps to
/// the children.
pub fn update_quadtree(ctx: &TraversalContext) -> FrameOutcome {
    let mut outcome = FrameOutcome::default();
    let start = ctx.fast_update_hint.unwrap_or_else(|| ctx.index.root());
    visit(ctx, start, &mut outcome);
    outcome
}

fn visit(ctx: &TraversalContext, id: TileId, outcome: &mut FrameOutcome) {
    let Some(node) = ctx.index.get(id) else { return };
    let world = ctx.index.world_transform(id);

    let visible = node.bounding_volume.is_visible(&world, &ctx.camera.frustum());
    ctx.index.set_visible(id, visible, ctx.frame);
    outcome.visited_order.push(id);

    if !visible {
        hide_subtree(&ctx.index, id, ctx.frame);
        return;
    }
    ctx.index.mark_seen(id, ctx.frame);

    if node.level >= ctx.max_level {
        select_leaf(ctx, &node, outcome);
        return;
    }

    let sse = screen_space_error(
        node.geometric_error,
        ctx.camera.pre_sse(),
        &world,
        &node.bounding_volume,
        ctx.camera.position(),
    );

    if sse <= ctx.sse_threshold || !quorum_satisfied(&node) {
        select_leaf(ctx, &node, outcome);
        for &child in &node.children {
            hide_subtree(&ctx.index, child, ctx.frame);
        }
        return;
    }

    let children = ensure_children(ctx, &node);
    for &child in &children {
        visit(ctx, child, outcome);
    }

    let all_children_displayed = children.iter().all(|&c| ctx.index.get(c).is_some_and(|n| n.displayed));
    if all_children_displayed {
        ctx.index.set_displayed(id, false);
    } else {
        // Children aren't all ready yet: keep this node's own content up so
        // something is shown while they load.
        ctx.index.set_displayed(id, true);
        request_content(ctx, &node);
        outcome.displayed.push(id);
    }
}

fn select_leaf(ctx: &TraversalContext, node: &TileNode, outcome: &mut FrameOutcome) {
    ctx.index.set_displayed(node.id, true);
    request_content(ctx, node);
    outcome.displayed.push(node.id);
}
