use std::sync::Arc;

use super::common::{hide_subtree, request_content, FrameOutcome, TraversalContext};
use super::tileset_json::graft_sub_tileset;
use crate::content::ContentPayload;
use crate::spatial::screen_space_error;
use crate::tile::{RefineMode, TileId, TileIndex};

/// `ctx.on_content_loaded` for a 3D Tiles entity: when a fetch resolves to a
/// `SubTileset` payload, parse and graft it onto the node it was fetched
/// for, keyed by the node's own content URI so grafting twice is
/// idempotent.
pub fn sub_tileset_hook() -> Arc<dyn Fn(&TileIndex, TileId, &ContentPayload) + Send + Sync> {
    Arc::new(|index, id, payload| {
        let ContentPayload::SubTileset(json) = payload else {
            return;
        };
        let Some(node) = index.get(id) else { return };
        if node.sub_tileset_loaded {
            return;
        }
        let Some(base_key) = node.content_uri.clone() else {
            return;
        };
        match graft_sub_tileset(index, id, &base_key, json, node.last_seen_frame) {
            Ok(_) => {}
            Err(e) => {
                // A malformed sub-tileset drops the extension silently; the
                // node stays a leaf rather than failing the whole frame.
                tracing::warn!(tile = ?id, error = %e, "sub-tileset parse failed, node stays a leaf");
            }
        }
    })
}

/// Per-frame update of a 3D Tiles tree (§4.5). Unlike the quadtree, nodes
/// are never synthesized at traversal time — children come from the
/// tileset JSON or a grafted sub-tileset — so this only walks what's
/// already in the index.
pub fn update_tileset3d(ctx: &TraversalContext) -> FrameOutcome {
    let mut outcome = FrameOutcome::default();
    let start = ctx.fast_update_hint.unwrap_or_else(|| ctx.index.root());
    visit(ctx, start, &mut outcome);
    outcome
}

fn visit(ctx: &TraversalContext, id: TileId, outcome: &mut FrameOutcome) {
    let Some(node) = ctx.index.get(id) else { return };
    let world = ctx.index.world_transform(id);

    let visible = node.bounding_volume.is_visible(&world, &ctx.camera.frustum());
    outcome.visited_order.push(id);

    if !visible {
        if node.displayed && node.refine == RefineMode::Add {
            for &child in &node.children {
                visit(ctx, child, outcome);
            }
        } else {
            hide_subtree(&ctx.index, id, ctx.frame);
        }
        ctx.index.set_visible(id, false, ctx.frame);
        return;
    }
    ctx.index.set_visible(id, true, ctx.frame);
    ctx.index.mark_seen(id, ctx.frame);

    let sse = screen_space_error(
        node.geometric_error,
        ctx.camera.pre_sse(),
        &world,
        &node.bounding_volume,
        ctx.camera.position(),
    );

    if sse <= ctx.sse_threshold || node.children.is_empty() {
        let displayed = node.content_state.is_loaded();
        ctx.index.set_displayed(id, displayed);
        request_content(ctx, &node);
        if displayed {
            outcome.displayed.push(id);
        }
        for &child in &node.children {
            hide_subtree(&ctx.index, child, ctx.frame);
        }
        return;
    }

    match node.refine {
        RefineMode::Add => {
            let displayed = node.content_state.is_loaded();
            ctx.index.set_displayed(id, displayed);
            request_content(ctx, &node);
            if displayed {
                outcome.displayed.push(id);
            }
            for &child in &node.children {
                visit(ctx, child, outcome);
            }
        }
        RefineMode::Replace => {
            for &child in &node.children {
                visit(ctx, child, outcome);
            }
            let all_children_displayed = node
                .children
                .iter()
                .all(|&c| ctx.index.get(c).is_some_and(|n| n.displayed));
            if all_children_displayed {
                ctx.index.set_displayed(id, false);
            } else {
                let displayed = node.content_state.is_loaded();
                ctx.index.set_displayed(id, displayed);
                request_content(ctx, &node);
                if displayed {
                    outcome.displayed.push(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::content::mock::MockSource;
    use crate::queue::RequestQueue;
    use crate::spatial::{BoundingSphere, Camera, PositionState};
    use crate::tile::{ContentState, TileIndex, TileNode};
    use cgmath::{Matrix4, Point3, SquareMatrix, Vector3};
    use std::sync::Arc;
    use std::time::Duration;

    fn camera_at(distance: f64) -> Arc<Camera> {
        Arc::new(Camera::new(
            PositionState {
                eye: Point3::new(0.0, 0.0, distance),
                target: Point3::new(0.0, 0.0, 0.0),
                up: Vector3::new(0.0, 1.0, 0.0),
            },
            60.0,
            (800.0, 600.0),
        ))
    }

    fn sphere_volume(radius: f64) -> BoundingVolume {
        BoundingVolume::Sphere(BoundingSphere {
            center: Vector3::new(0.0, 0.0, 0.0),
            radius,
        })
    }

    fn context(index: Arc<TileIndex>, camera: Arc<Camera>) -> TraversalContext {
        TraversalContext {
            index,
            camera,
            queue: RequestQueue::new(4),
            cache: Arc::new(Cache::new()),
            source: Arc::new(MockSource::new(ContentPayload::MeshSurface(Vec::new()))),
            frame: 1,
            sse_threshold: 16.0,
            max_level: 24,
            cleanup_after_frames: 240,
            default_ttl: Duration::from_secs(60),
            fast_update_hint: None,
            on_content_loaded: None,
        }
    }

    fn child_node(id: TileId, parent: TileId, refine: RefineMode, loaded: bool) -> TileNode {
        let mut node = TileNode::root(id, sphere_volume(5.0), 0.1, refine);
        node.parent = Some(parent);
        node.level = 1;
        node.local_transform = Matrix4::identity();
        node.content_uri = Some(format!("tile/{}", id.0));
        node.content_state = if loaded { ContentState::Loaded } else { ContentState::Missing };
        node
    }

    #[tokio::test]
    async fn add_refine_displays_parent_and_child_together() {
        // Geometric error small enough, and camera far enough, that the
        // root's own SSE is already under threshold: it is a leaf-like
        // selection even though it has one ADD-refined child.
        let index = Arc::new(TileIndex::new(sphere_volume(50.0), 0.1, RefineMode::Add));
        let root = index.root();
        index.mutate(root, |n| n.content_uri = Some("root".into()));
        let child_id = index.allocate_id();
        index.insert(child_node(child_id, root, RefineMode::Add, true));
        index.set_children(root, vec![child_id]);

        let ctx = context(index.clone(), camera_at(1000.0));
        let outcome = update_tileset3d(&ctx);

        assert!(outcome.displayed.contains(&child_id));
        assert_eq!(outcome.visited_order[0], root, "parent is visited before its child");
    }

    #[tokio::test]
    async fn replace_refine_hides_parent_once_loaded_child_is_displayed() {
        let index = Arc::new(TileIndex::new(sphere_volume(50.0), 0.1, RefineMode::Replace));
        let root = index.root();
        index.mutate(root, |n| n.content_uri = Some("root".into()));
        let child_id = index.allocate_id();
        index.insert(child_node(child_id, root, RefineMode::Replace, true));
        index.set_children(root, vec![child_id]);

        let ctx = context(index.clone(), camera_at(1000.0));
        let outcome = update_tileset3d(&ctx);

        assert!(outcome.displayed.contains(&child_id));
        assert!(!outcome.displayed.contains(&root), "replace hides the parent once its child is displayed");
        assert!(!index.get(root).unwrap().displayed);
    }

    #[tokio::test]
    async fn replace_refine_keeps_parent_displayed_while_child_is_still_loading() {
        let index = Arc::new(TileIndex::new(sphere_volume(50.0), 0.1, RefineMode::Replace));
        let root = index.root();
        index.mutate(root, |n| {
            n.content_uri = Some("root".into());
            n.content_state = ContentState::Loaded;
        });
        let child_id = index.allocate_id();
        index.insert(child_node(child_id, root, RefineMode::Replace, false));
        index.set_children(root, vec![child_id]);

        let ctx = context(index.clone(), camera_at(1000.0));
        let outcome = update_tileset3d(&ctx);

        assert!(outcome.displayed.contains(&root), "parent fills in while its child is still loading");
    }
}
