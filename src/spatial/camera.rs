use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use cgmath::{Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, Vector3};

use crate::helpers::{extract_frustum_planes, remove_translation, FrustumPlanes};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionState {
    pub eye: Point3<f64>,
    pub target: Point3<f64>,
    pub up: Vector3<f64>,
}

#[derive(Debug, Clone, Copy)]
struct DerivedState {
    planes: FrustumPlanes,
    near: f64,
    far: f64,
}

impl Default for DerivedState {
    fn default() -> Self {
        Self {
            planes: Default::default(),
            near: 0.1,
            far: 1.0,
        }
    }
}

/// The external camera interface consumed by culling and screen-space-error
/// computation: position,
/// forward vector, frustum planes, viewport size, and `pre_sse`.
///
/// Modeled on the teacher's atomic-generation `Camera`: user-facing state
/// (`user`) is written by the controlling collaborator; `derived` is
/// recomputed lazily and its `generation` counter lets the traversal engine
/// detect "nothing moved, skip re-deriving priorities" the way the teacher's
/// pager compares `camera.generation()` across iterations.
#[derive(Debug)]
pub struct Camera {
    generation: AtomicU64,
    position: RwLock<PositionState>,
    fovy_deg: RwLock<f64>,
    viewport: RwLock<(f64, f64)>,
    derived: RwLock<DerivedState>,
}

impl Camera {
    pub fn new(position: PositionState, fovy_deg: f64, viewport: (f64, f64)) -> Self {
        let cam = Camera {
            generation: AtomicU64::new(0),
            position: RwLock::new(position),
            fovy_deg: RwLock::new(fovy_deg),
            viewport: RwLock::new(viewport),
            derived: RwLock::new(DerivedState::default()),
        };
        cam.recompute();
        cam
    }

    pub fn set_position(&self, position: PositionState) {
        *self.position.write().unwrap() = position;
        self.recompute();
    }

    pub fn set_viewport(&self, width: f64, height: f64) {
        *self.viewport.write().unwrap() = (width, height);
        self.recompute();
    }

    fn recompute(&self) {
        let position = *self.position.read().unwrap();
        let (width, height) = *self.viewport.read().unwrap();
        let aspect = if height > 0.0 { width / height } else { 1.0 };
        let fovy = Deg(*self.fovy_deg.read().unwrap());

        let far = (position.eye - Point3::new(0.0, 0.0, 0.0)).magnitude().max(1.0) * 4.0;
        let near = (far * 1e-5).max(0.1);

        let proj = cgmath::perspective(fovy, aspect, near, far);
        let view = Matrix4::look_at_rh(position.eye, position.target, position.up);
        let proj_view = proj * remove_translation(view) * Matrix4::from_translation(-position.eye.to_vec());

        let mut derived = self.derived.write().unwrap();
        derived.planes = extract_frustum_planes(&proj_view);
        derived.near = near;
        derived.far = far;

        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position.read().unwrap().eye.to_vec()
    }

    pub fn forward(&self) -> Vector3<f64> {
        let state = self.position.read().unwrap();
        (state.target - state.eye).normalize()
    }

    pub fn frustum(&self) -> FrustumPlanes {
        self.derived.read().unwrap().planes
    }

    pub fn viewport(&self) -> (f64, f64) {
        *self.viewport.read().unwrap()
    }

    /// `pre_sse = viewport_height / (2 * tan(fovy / 2))`.
    pub fn pre_sse(&self) -> f64 {
        let (_, height) = *self.viewport.read().unwrap();
        let fovy_rad = self.fovy_deg.read().unwrap().to_radians();
        let denom = 2.0 * (fovy_rad * 0.5).tan();
        if denom.abs() < 1e-12 {
            return f64::INFINITY;
        }
        height / denom
    }
}
