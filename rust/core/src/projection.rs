// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Map Projection Support
//!
//! Converts between the tile's geographic frame (longitude, latitude and
//! height) and the projected frame the scene is rendered in. The tile header
//! stores its center on the WGS84 ellipsoid (ECEF metres), so the ellipsoid
//! conversions live here as well.

use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (metres)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Web Mercator latitude limit (degrees)
pub const MERCATOR_MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Projection used to build the tile-local frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    /// Spherical Web Mercator (EPSG:3857), heights passed through
    #[default]
    WebMercator,
    /// Identity: the geographic frame is already metric
    Planar,
}

impl Projection {
    pub fn name(&self) -> &'static str {
        match self {
            Projection::WebMercator => "EPSG:3857",
            Projection::Planar => "planar",
        }
    }

    /// Project (longitude, latitude, height) into the map frame
    #[inline]
    pub fn project(&self, lon: f64, lat: f64, height: f64) -> [f64; 3] {
        match self {
            Projection::WebMercator => {
                let lat = lat.clamp(-MERCATOR_MAX_LATITUDE, MERCATOR_MAX_LATITUDE);
                [
                    WGS84_A * lon.to_radians(),
                    WGS84_A * mercator_y(lat),
                    height,
                ]
            }
            Projection::Planar => [lon, lat, height],
        }
    }

    /// Inverse of [`Projection::project`]
    #[inline]
    pub fn unproject(&self, point: [f64; 3]) -> [f64; 3] {
        match self {
            Projection::WebMercator => {
                let lon = (point[0] / WGS84_A).to_degrees();
                let lat = (2.0 * (point[1] / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                [lon, lat, point[2]]
            }
            Projection::Planar => point,
        }
    }
}

/// Unscaled Mercator ordinate for a latitude in degrees
#[inline]
pub fn mercator_y(lat: f64) -> f64 {
    let phi = lat.to_radians();
    (std::f64::consts::FRAC_PI_4 + phi * 0.5).tan().ln()
}

/// Convert geodetic coordinates (degrees, metres) to ECEF metres
pub fn geodetic_to_ecef(lon: f64, lat: f64, height: f64) -> [f64; 3] {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    [
        (n + height) * cos_lat * cos_lon,
        (n + height) * cos_lat * sin_lon,
        (n * (1.0 - e2) + height) * sin_lat,
    ]
}

/// Convert ECEF metres to geodetic coordinates (degrees, metres)
///
/// Fixed-point iteration on latitude; converges to well below a nanometre
/// for points near the ellipsoid surface.
pub fn ecef_to_geodetic(ecef: [f64; 3]) -> [f64; 3] {
    let [x, y, z] = ecef;
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    if p < 1e-9 {
        // On the polar axis
        let b = WGS84_A * (1.0 - WGS84_F);
        let lat = if z >= 0.0 { 90.0 } else { -90.0 };
        return [lon.to_degrees(), lat, z.abs() - b];
    }

    let mut lat = z.atan2(p * (1.0 - e2));
    let mut height = 0.0;
    for _ in 0..16 {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        height = p / lat.cos() - n;
        let next = z.atan2(p * (1.0 - e2 * n / (n + height)));
        if (next - lat).abs() < 1e-14 {
            lat = next;
            break;
        }
        lat = next;
    }

    [lon.to_degrees(), lat.to_degrees(), height]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_web_mercator_round_trip() {
        let projection = Projection::WebMercator;
        let p = projection.project(116.391, 39.907, 42.0);
        let back = projection.unproject(p);
        assert_abs_diff_eq!(back[0], 116.391, epsilon = 1e-9);
        assert_abs_diff_eq!(back[1], 39.907, epsilon = 1e-9);
        assert_abs_diff_eq!(back[2], 42.0, epsilon = 1e-12);
    }

    #[test]
    fn test_web_mercator_origin() {
        let p = Projection::WebMercator.project(0.0, 0.0, 0.0);
        assert_abs_diff_eq!(p[0], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_planar_is_identity() {
        let p = Projection::Planar.project(12.5, -3.0, 7.0);
        assert_eq!(p, [12.5, -3.0, 7.0]);
        assert_eq!(Projection::Planar.unproject(p), p);
    }

    #[test]
    fn test_ecef_round_trip() {
        let ecef = geodetic_to_ecef(8.54, 47.37, 408.0);
        let geo = ecef_to_geodetic(ecef);
        assert_abs_diff_eq!(geo[0], 8.54, epsilon = 1e-9);
        assert_abs_diff_eq!(geo[1], 47.37, epsilon = 1e-9);
        assert_abs_diff_eq!(geo[2], 408.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ecef_equator() {
        let ecef = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert_abs_diff_eq!(ecef[0], WGS84_A, epsilon = 1e-6);
        let geo = ecef_to_geodetic(ecef);
        assert_abs_diff_eq!(geo[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(geo[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(geo[2], 0.0, epsilon = 1e-6);
    }
}
