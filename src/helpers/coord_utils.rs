use cgmath::Point3;

/// Converts geodetic coordinates (lat, lon, elevation) to standard Z-up ECEF coordinates.
/// Assumes WGS84 ellipsoid.
/// - `lat_deg` and `lon_deg` are in degrees
/// - `elevation_m` is in meters above sea level
pub fn geodetic_to_ecef_z_up(lat_deg: f64, lon_deg: f64, elevation_m: f64) -> Point3<f64> {
    // WGS84 constants
    const A: f64 = 6378137.0; // semi-major axis in meters
    const E2: f64 = 6.69437999014e-3; // first eccentricity squared

    // Convert degrees to radians
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let sin_lon = lon.sin();
    let cos_lon = lon.cos();

    // Prime vertical radius of curvature
    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();

    // Standard ECEF Z-up
    let x = (n + elevation_m) * cos_lat * cos_lon;
    let y = (n + elevation_m) * cos_lat * sin_lon;
    let z = (n * (1.0 - E2) + elevation_m) * sin_lat;

    Point3::new(x, y, z)
}
