use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Transform, Vector3, Zero};

use crate::helpers::{geodetic_to_ecef_z_up, is_aabb_visible, is_sphere_visible, FrustumPlanes};

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Aabb {
    pub fn center(&self) -> Vector3<f64> {
        (self.min + self.max) * 0.5
    }

    pub fn from_points(points: impl IntoIterator<Item = Vector3<f64>>) -> Self {
        let mut min = Vector3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Vector3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        Aabb { min, max }
    }
}

/// Oriented bounding box: `center + half_axes[0]*u + half_axes[1]*v + half_axes[2]*w`
/// for `u,v,w in [-1,1]`, in the node's local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obb {
    pub center: Vector3<f64>,
    pub half_axes: [Vector3<f64>; 3],
}

impl Obb {
    pub fn corners(&self) -> [Vector3<f64>; 8] {
        let mut corners = [Vector3::zero(); 8];
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    corners[i * 4 + j * 2 + k] = self.center
                        + self.half_axes[0] * (if i == 0 { -1.0 } else { 1.0 })
                        + self.half_axes[1] * (if j == 0 { -1.0 } else { 1.0 })
                        + self.half_axes[2] * (if k == 0 { -1.0 } else { 1.0 });
                }
            }
        }
        corners
    }

    pub fn bounding_sphere(&self) -> (Vector3<f64>, f64) {
        let r2 = self.half_axes[0].magnitude2()
            + self.half_axes[1].magnitude2()
            + self.half_axes[2].magnitude2();
        (self.center, r2.sqrt())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vector3<f64>,
    pub radius: f64,
}

/// A WGS84-style geodetic region: longitude/latitude bounds in radians,
/// height bounds in meters. Already expressed in a global frame, so it is
/// not subject to a node's local-to-world transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodeticRegion {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub min_height: f64,
    pub max_height: f64,
}

impl GeodeticRegion {
    fn ecef_corners(&self) -> [Vector3<f64>; 8] {
        let mut out = [Vector3::zero(); 8];
        let mut idx = 0;
        for &lon in &[self.west, self.east] {
            for &lat in &[self.south, self.north] {
                for &h in &[self.min_height, self.max_height] {
                    let p = geodetic_to_ecef_z_up(lat.to_degrees(), lon.to_degrees(), h);
                    out[idx] = p.to_vec();
                    idx += 1;
                }
            }
        }
        out
    }

    fn bounding_sphere(&self) -> (Vector3<f64>, f64) {
        let corners = self.ecef_corners();
        let aabb = Aabb::from_points(corners);
        let center = aabb.center();
        let radius = corners
            .iter()
            .map(|c| (*c - center).magnitude())
            .fold(0.0_f64, f64::max);
        (center, radius)
    }
}

/// Tagged bounding volume: prefer a sum type dispatched once here over a
/// polymorphic base with virtual calls, per the one-dispatcher-per-variant
/// design used throughout this crate for tile geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    Box(Obb),
    Sphere(BoundingSphere),
    Region(GeodeticRegion),
}

impl BoundingVolume {
    /// Center of the volume in world space, given the node's world transform
    /// (ignored for `Region`, which is already global).
    pub fn center(&self, world: &Matrix4<f64>) -> Vector3<f64> {
        match self {
            BoundingVolume::Box(obb) => world.transform_point(Point3::from_vec(obb.center)).to_vec(),
            BoundingVolume::Sphere(s) => world.transform_point(Point3::from_vec(s.center)).to_vec(),
            BoundingVolume::Region(r) => r.bounding_sphere().0,
        }
    }

    /// Conservative covering sphere in world space; used for SSE and as a
    /// single dispatch point instead of per-variant virtual calls.
    pub fn world_bounding_sphere(&self, world: &Matrix4<f64>) -> (Vector3<f64>, f64) {
        match self {
            BoundingVolume::Box(obb) => {
                let (center, radius) = obb.bounding_sphere();
                let world_center = world.transform_point(Point3::from_vec(center)).to_vec();
                // Scale conservatively by the transform's largest axis length.
                let scale = world.x.truncate().magnitude().max(1e-12);
                (world_center, radius * scale)
            }
            BoundingVolume::Sphere(s) => {
                let world_center = world.transform_point(Point3::from_vec(s.center)).to_vec();
                let scale = world.x.truncate().magnitude().max(1e-12);
                (world_center, s.radius * scale)
            }
            BoundingVolume::Region(r) => r.bounding_sphere(),
        }
    }

    /// Axis-aligned extent in world space, used by neighbour lookups and
    /// quadtree culling.
    pub fn to_aabb(&self, world: &Matrix4<f64>) -> Aabb {
        match self {
            BoundingVolume::Box(obb) => {
                let corners = obb.corners().map(|c| world.transform_point(Point3::from_vec(c)).to_vec());
                Aabb::from_points(corners)
            }
            BoundingVolume::Sphere(s) => {
                let center = world.transform_point(Point3::from_vec(s.center)).to_vec();
                let scale = world.x.truncate().magnitude().max(1e-12);
                let r = s.radius * scale;
                Aabb {
                    min: center - Vector3::new(r, r, r),
                    max: center + Vector3::new(r, r, r),
                }
            }
            BoundingVolume::Region(r) => Aabb::from_points(r.ecef_corners()),
        }
    }

    /// Frustum visibility test, dispatched once per variant rather than
    /// through a virtual call.
    pub fn is_visible(&self, world: &Matrix4<f64>, planes: &FrustumPlanes) -> bool {
        match self {
            BoundingVolume::Box(_) | BoundingVolume::Region(_) => {
                let aabb = self.to_aabb(world);
                is_aabb_visible(planes, aabb.min, aabb.max)
            }
            BoundingVolume::Sphere(_) => {
                let (center, radius) = self.world_bounding_sphere(world);
                is_sphere_visible(planes, center, radius)
            }
        }
    }

    pub fn distance_to_point(&self, world: &Matrix4<f64>, point: Vector3<f64>) -> f64 {
        let (center, radius) = self.world_bounding_sphere(world);
        ((point - center).magnitude() - radius).max(0.0)
    }
}

/// A region the camera must be inside of before a node is considered for
/// rendering, tested ahead of the node's own bounding volume.
#[derive(Debug, Clone, Copy)]
pub struct ViewerRequestVolume(pub BoundingVolume);

impl ViewerRequestVolume {
    pub fn contains(&self, world: &Matrix4<f64>, camera_position: Vector3<f64>) -> bool {
        match &self.0 {
            BoundingVolume::Box(obb) => {
                let aabb = BoundingVolume::Box(*obb).to_aabb(world);
                camera_position.x >= aabb.min.x
                    && camera_position.x <= aabb.max.x
                    && camera_position.y >= aabb.min.y
                    && camera_position.y <= aabb.max.y
                    && camera_position.z >= aabb.min.z
                    && camera_position.z <= aabb.max.z
            }
            BoundingVolume::Sphere(_) | BoundingVolume::Region(_) => {
                let (center, radius) = self.0.world_bounding_sphere(world);
                (camera_position - center).magnitude() <= radius
            }
        }
    }
}

/// `SSE = (geometric_error * pre_sse) / clearance_distance`, the classic
/// 3D Tiles screen-space-error formula (`pre_sse = viewport_height /
/// (2*tan(fovy/2))`, carried by the camera).
pub fn screen_space_error(
    geometric_error: f64,
    pre_sse: f64,
    world: &Matrix4<f64>,
    volume: &BoundingVolume,
    camera_position: Vector3<f64>,
) -> f64 {
    if !geometric_error.is_finite() || geometric_error <= 0.0 {
        return f64::INFINITY;
    }

    let (center, radius) = volume.world_bounding_sphere(world);
    let clearance = ((center - camera_position).magnitude() - radius.max(0.0)).max(1e-2);

    (geometric_error * pre_sse) / clearance
}
