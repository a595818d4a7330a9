use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cgmath::{EuclideanSpace, Vector3};

use crate::error::CoreError;
use crate::helpers::geodetic_to_ecef_z_up;

/// One registered coordinate system: converts a point expressed in its own
/// local representation to/from geocentric ECEF, the common frame
/// `CrsRegistry::project` composes every conversion through. Generalizes
/// the teacher's hardcoded `geodetic_to_ecef_z_up` conversion into a
/// pluggable per-code definition (§6 CRS registry).
pub trait CrsDefinition: Send + Sync {
    fn to_ecef(&self, point: Vector3<f64>) -> Vector3<f64>;
    fn from_ecef(&self, point: Vector3<f64>) -> Vector3<f64>;
}

/// `(longitude_deg, latitude_deg, height_m)`, the frame the teacher's
/// camera and `coord_utils` already assume under the code `EPSG:4979`.
pub struct Wgs84Geodetic;

impl CrsDefinition for Wgs84Geodetic {
    fn to_ecef(&self, point: Vector3<f64>) -> Vector3<f64> {
        geodetic_to_ecef_z_up(point.y, point.x, point.z).to_vec()
    }

    fn from_ecef(&self, point: Vector3<f64>) -> Vector3<f64> {
        let (lon_deg, lat_deg, height_m) = ecef_to_geodetic(point);
        Vector3::new(lon_deg, lat_deg, height_m)
    }
}

/// `(x_meters, y_meters, height_m)` spherical Web Mercator, registered
/// under `EPSG:3857` — the CRS the §8 map-entity scenario places its
/// quadtree extent in.
pub struct WebMercator;

const MERCATOR_RADIUS: f64 = 6_378_137.0;

impl CrsDefinition for WebMercator {
    fn to_ecef(&self, point: Vector3<f64>) -> Vector3<f64> {
        let lon_deg = point.x.to_degrees() / MERCATOR_RADIUS;
        let lat_rad = 2.0 * (point.y / MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2;
        geodetic_to_ecef_z_up(lat_rad.to_degrees(), lon_deg, point.z).to_vec()
    }

    fn from_ecef(&self, point: Vector3<f64>) -> Vector3<f64> {
        let (lon_deg, lat_deg, height_m) = ecef_to_geodetic(point);
        let lon_rad = lon_deg.to_radians();
        let lat_rad = lat_deg.to_radians();
        let x = MERCATOR_RADIUS * lon_rad;
        let y = MERCATOR_RADIUS * (std::f64::consts::FRAC_PI_4 + lat_rad * 0.5).tan().ln();
        Vector3::new(x, y, height_m)
    }
}

/// WGS84 ellipsoid, Bowring's closed-form approximation: accurate to
/// sub-millimeter for terrestrial heights, which is all a tile-culling
/// distance test needs.
fn ecef_to_geodetic(point: Vector3<f64>) -> (f64, f64, f64) {
    const A: f64 = 6_378_137.0;
    const F: f64 = 1.0 / 298.257_223_563;
    const E2: f64 = F * (2.0 - F);
    const B: f64 = A * (1.0 - F);
    const EP2: f64 = (A * A - B * B) / (B * B);

    let (x, y, z) = (point.x, point.y, point.z);
    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();
    let theta = (z * A).atan2(p * B);
    let lat = (z + EP2 * B * theta.sin().powi(3)).atan2(p - E2 * A * theta.cos().powi(3));
    let sin_lat = lat.sin();
    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let height = if p > 1e-9 { p / lat.cos() - n } else { z.abs() - B };

    (lon.to_degrees(), lat.to_degrees(), height)
}

/// Registry of coordinate systems a `Source`/entity may name when
/// describing tile extents. Registering a code before use is a developer
/// precondition (§9 Design Notes): projecting through an unregistered code
/// is an `Invariant` error, not a recoverable runtime condition.
pub struct CrsRegistry {
    definitions: RwLock<HashMap<String, Arc<dyn CrsDefinition>>>,
}

impl CrsRegistry {
    /// Built-in codes: `EPSG:4979` (WGS84 geodetic) and `EPSG:3857` (Web
    /// Mercator), the two frames this crate's own traversal math assumes.
    pub fn new() -> Self {
        let registry = CrsRegistry {
            definitions: RwLock::new(HashMap::new()),
        };
        registry.register("EPSG:4979", Arc::new(Wgs84Geodetic));
        registry.register("EPSG:3857", Arc::new(WebMercator));
        registry
    }

    pub fn register(&self, code: impl Into<String>, definition: Arc<dyn CrsDefinition>) {
        self.definitions.write().unwrap().insert(code.into(), definition);
    }

    pub fn is_registered(&self, code: &str) -> bool {
        self.definitions.read().unwrap().contains_key(code)
    }

    /// Converts `point` from `code_from` to `code_to` via the shared ECEF
    /// frame. Both codes must already be registered.
    pub fn project(&self, code_from: &str, code_to: &str, point: Vector3<f64>) -> Result<Vector3<f64>, CoreError> {
        let definitions = self.definitions.read().unwrap();
        let from = definitions
            .get(code_from)
            .ok_or_else(|| CoreError::Invariant(format!("CRS code \"{code_from}\" used before registration")))?;
        let to = definitions
            .get(code_to)
            .ok_or_else(|| CoreError::Invariant(format!("CRS code \"{code_to}\" used before registration")))?;
        Ok(to.from_ecef(from.to_ecef(point)))
    }
}

impl Default for CrsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace;

    #[test]
    fn round_trips_through_ecef_for_known_point() {
        let registry = CrsRegistry::new();
        let point = Vector3::new(-119.6982, 34.4208, 500.0);
        let ecef = registry.project("EPSG:4979", "EPSG:4979", point).unwrap();
        assert!((ecef - point).magnitude() < 1e-6);
    }

    #[test]
    fn mercator_to_geodetic_matches_equator_origin() {
        let registry = CrsRegistry::new();
        let result = registry.project("EPSG:3857", "EPSG:4979", Vector3::new(0.0, 0.0, 0.0)).unwrap();
        assert!(result.x.abs() < 1e-6, "lon {result:?}");
        assert!(result.y.abs() < 1e-6, "lat {result:?}");
    }

    #[test]
    fn unregistered_code_is_an_invariant_error() {
        let registry = CrsRegistry::new();
        let err = registry
            .project("EPSG:9999", "EPSG:4979", Vector3::new(0.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));
    }

    #[test]
    fn custom_registration_is_usable_immediately() {
        let registry = CrsRegistry::new();
        registry.register("LOCAL:enu", Arc::new(Wgs84Geodetic));
        assert!(registry.is_registered("LOCAL:enu"));
        registry
            .project("LOCAL:enu", "EPSG:4979", Vector3::new(0.0, 0.0, 0.0))
            .unwrap();
    }
}
