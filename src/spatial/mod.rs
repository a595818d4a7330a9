pub mod camera;
pub mod volumes;

pub use camera::{Camera, PositionState};
pub use volumes::{
    screen_space_error, Aabb, BoundingSphere, BoundingVolume, GeodeticRegion, Obb,
    ViewerRequestVolume,
};
