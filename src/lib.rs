mod cache;
mod config;
mod content;
mod crs;
mod entity;
mod error;
mod event;
mod helpers;
mod mainloop;
mod picking;
mod queue;
mod render;
mod spatial;
mod tile;
mod traversal;

pub use cache::{destroy_content_cache, get_content_cache, init_content_cache, Cache, CacheOptions, OnDelete};
pub use config::{load_config, CoreConfig, LoadConfigError};
pub use content::{ContentPayload, Source};
pub use crs::{CrsDefinition, CrsRegistry, WebMercator, Wgs84Geodetic};
pub use entity::{stitching_for, Entity, MapEntity, Tileset3dEntity};
pub use error::{CoreError, TileLoadingContext};
pub use event::{CoreEvent, EventBus};
pub use helpers::init_tracing;
pub use mainloop::{EntitySummary, FrameReport, MainLoop};
pub use picking::{PickResult, Picker};
pub use queue::{QueueEvent, RequestQueue};
pub use render::{PickBuffer, PickTexel, PickZone, Renderer, RendererInfo, SceneHandle};
pub use spatial::{
    screen_space_error, Aabb, BoundingSphere, BoundingVolume, Camera, GeodeticRegion, Obb, PositionState,
    ViewerRequestVolume,
};
pub use tile::{ContentState, RefineMode, TileId, TileIndex, TileNode};
pub use traversal::{
    cleanup, compute_stitching, hide_subtree, request_content, request_priority, sub_tileset_hook,
    update_quadtree, update_tileset3d, Edge, FrameOutcome, StitchInfo, TraversalContext,
};
pub use traversal::tileset_json::{build_index, graft_sub_tileset, load_tileset_root};
