//! Local Projected Plane
//!
//! Area computation runs in a local azimuthal plane anchored at a fixed
//! geographic point per operation, with axes in meters (x east, y north).
//! Working in raw degrees would distort areas with latitude; a full
//! equal-area CRS would be overkill at field scale, where this plane is
//! accurate to well under 0.1 %.
//!
//! Every trail of an operation shares the operation's anchor, so footprints
//! from different vehicles can be intersected directly.

use nalgebra::{Point2, Vector2};

use crate::sample::GeoSample;
use crate::types::GeoPoint;

/// Meters in a nautical mile.
pub const NAUTICAL_MILE: f64 = 1852.0;

/// Meters per degree of latitude (60 nautical miles).
pub const METERS_PER_DEGREE_LATITUDE: f64 = 60.0 * NAUTICAL_MILE;

/// Meters per degree of longitude at the given latitude.
pub fn meters_per_degree_longitude(latitude: f64) -> f64 {
    METERS_PER_DEGREE_LATITUDE * latitude.to_radians().cos()
}

/// Projection into the local plane of one operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    anchor: GeoPoint,
    meters_per_degree_lon: f64,
}

impl LocalProjection {
    pub fn new(anchor: GeoPoint) -> Self {
        LocalProjection {
            anchor,
            meters_per_degree_lon: meters_per_degree_longitude(anchor.latitude),
        }
    }

    pub fn anchor(&self) -> GeoPoint {
        self.anchor
    }

    /// Project a geographic position into plane coordinates (meters).
    pub fn to_plane(&self, latitude: f64, longitude: f64) -> Point2<f64> {
        Point2::new(
            (longitude - self.anchor.longitude) * self.meters_per_degree_lon,
            (latitude - self.anchor.latitude) * METERS_PER_DEGREE_LATITUDE,
        )
    }

    /// Project a sample's position.
    pub fn project(&self, sample: &GeoSample) -> Point2<f64> {
        self.to_plane(sample.latitude, sample.longitude)
    }

    /// Inverse projection, plane meters back to geographic degrees.
    pub fn to_geo(&self, point: Point2<f64>) -> GeoPoint {
        GeoPoint::new(
            self.anchor.latitude + point.y / METERS_PER_DEGREE_LATITUDE,
            self.anchor.longitude + point.x / self.meters_per_degree_lon,
        )
    }

    /// Unit vector perpendicular (to the left) of a travel direction.
    /// Returns `None` for a zero-length direction.
    pub fn left_normal(direction: Vector2<f64>) -> Option<Vector2<f64>> {
        let norm = direction.norm();
        if norm < f64::EPSILON {
            return None;
        }
        let unit = direction / norm;
        Some(Vector2::new(-unit.y, unit.x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> GeoPoint {
        GeoPoint::new(52.0, 5.0)
    }

    #[test]
    fn test_anchor_projects_to_origin() {
        let proj = LocalProjection::new(anchor());
        let p = proj.to_plane(52.0, 5.0);
        assert!(p.x.abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
    }

    #[test]
    fn test_north_is_positive_y() {
        let proj = LocalProjection::new(anchor());
        let p = proj.to_plane(52.0 + 100.0 / METERS_PER_DEGREE_LATITUDE, 5.0);
        assert!((p.y - 100.0).abs() < 1e-6);
        assert!(p.x.abs() < 1e-9);
    }

    #[test]
    fn test_longitude_shrinks_with_latitude() {
        let equator = LocalProjection::new(GeoPoint::new(0.0, 0.0));
        let high = LocalProjection::new(GeoPoint::new(60.0, 0.0));

        let xe = equator.to_plane(0.0, 1.0).x;
        let xh = high.to_plane(60.0, 1.0).x;
        // cos(60°) = 0.5
        assert!((xh / xe - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_round_trip() {
        let proj = LocalProjection::new(anchor());
        let p = proj.to_plane(52.003, 5.004);
        let geo = proj.to_geo(p);
        assert!((geo.latitude - 52.003).abs() < 1e-9);
        assert!((geo.longitude - 5.004).abs() < 1e-9);
    }

    #[test]
    fn test_left_normal() {
        // Heading east -> left is north
        let n = LocalProjection::left_normal(Vector2::new(10.0, 0.0)).unwrap();
        assert!((n.x - 0.0).abs() < 1e-9);
        assert!((n.y - 1.0).abs() < 1e-9);

        assert!(LocalProjection::left_normal(Vector2::new(0.0, 0.0)).is_none());
    }
}
