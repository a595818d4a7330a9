mod common;
mod quadtree;
mod stitching;
mod tileset3d;
pub mod tileset_json;

pub use common::{cleanup, hide_subtree, request_content, request_priority, FrameOutcome, TraversalContext};
pub use quadtree::update_quadtree;
pub use stitching::{compute_stitching, Edge, StitchInfo};
pub use tileset3d::{sub_tileset_hook, update_tileset3d};
