use cgmath::{InnerSpace, Matrix, Matrix4, Vector3, Vector4, Zero};

/// A single frustum plane in Hessian normal form: `dot(normal, p) + d >= 0`
/// for points on the inside of the frustum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub d: f64,
}

pub type FrustumPlanes = [Plane; 6];

/// Extracts the six view-frustum planes (left, right, bottom, top, near,
/// far) from a combined projection*view matrix, Gribb/Hartmann style.
pub fn extract_frustum_planes(mat: &Matrix4<f64>) -> FrustumPlanes {
    let rows = [mat.row(0), mat.row(1), mat.row(2), mat.row(3)];

    let raw: [Vector4<f64>; 6] = [
        rows[3] + rows[0], // left
        rows[3] - rows[0], // right
        rows[3] + rows[1], // bottom
        rows[3] - rows[1], // top
        rows[3] + rows[2], // near
        rows[3] - rows[2], // far
    ];

    raw.map(|p| {
        let normal = Vector3::new(p.x, p.y, p.z);
        let len = normal.magnitude();
        if len > 0.0 {
            Plane {
                normal: normal / len,
                d: p.w / len,
            }
        } else {
            Plane {
                normal: Vector3::zero(),
                d: 0.0,
            }
        }
    })
}

/// Axis-aligned box vs. frustum test using the positive/negative vertex
/// trick: a box is fully outside iff its positive vertex (the corner
/// farthest along the plane normal) is behind some plane.
pub fn is_aabb_visible(planes: &FrustumPlanes, min: Vector3<f64>, max: Vector3<f64>) -> bool {
    for plane in planes {
        let positive = Vector3::new(
            if plane.normal.x >= 0.0 { max.x } else { min.x },
            if plane.normal.y >= 0.0 { max.y } else { min.y },
            if plane.normal.z >= 0.0 { max.z } else { min.z },
        );

        if plane.normal.dot(positive) + plane.d < 0.0 {
            return false;
        }
    }
    true
}

/// Sphere vs. frustum test: a sphere is fully outside iff its center is
/// farther than `radius` behind some plane.
pub fn is_sphere_visible(planes: &FrustumPlanes, center: Vector3<f64>, radius: f64) -> bool {
    for plane in planes {
        if plane.normal.dot(center) + plane.d < -radius {
            return false;
        }
    }
    true
}

/// Zero out the translation of a column-major Matrix4<f64>.
#[inline]
pub fn remove_translation(mut v: Matrix4<f64>) -> Matrix4<f64> {
    v.w = Vector4::new(0.0, 0.0, 0.0, v.w.w);
    v
}
