//! Coverage Accumulator
//!
//! Derives a covered-area polygon set from a sequence of position samples by
//! sweeping the vehicle's swath width along the path. Each consecutive pair
//! of samples produces one quad (a trapezoid when the swath width changes
//! mid-trail) perpendicular to the direction of travel; quads are unioned
//! into the running footprint.
//!
//! Area is computed in the operation's local projected plane (m²), distance
//! with haversine on the raw coordinates (m). Degenerate pairs — coincident
//! positions or a non-positive swath width — contribute zero rather than
//! failing.

use geo::{Area, BooleanOps, Distance, Haversine, MultiPolygon, Polygon};
use geo_types::LineString;
use serde::{Deserialize, Serialize};

use crate::projection::LocalProjection;
use crate::sample::GeoSample;

/// Segments shorter than this are treated as coincident positions.
pub const MIN_SEGMENT_LENGTH: f64 = 0.01;

/// Ground covered by one trail, in the operation plane.
///
/// Rebuilt incrementally; after the first segment it is only ever extended
/// by unioning increments in, never recomputed from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageFootprint {
    polygons: MultiPolygon<f64>,
}

impl CoverageFootprint {
    pub fn empty() -> Self {
        CoverageFootprint {
            polygons: MultiPolygon::new(Vec::new()),
        }
    }

    pub fn from_polygons(polygons: MultiPolygon<f64>) -> Self {
        CoverageFootprint { polygons }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.0.is_empty()
    }

    /// Footprint area in m². Self-overlapping ground counts once here;
    /// accumulated trail stats count it per pass.
    pub fn area_m2(&self) -> f64 {
        self.polygons.unsigned_area()
    }

    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }

    /// Union an increment into the footprint.
    pub fn merge(&mut self, increment: &CoverageIncrement) {
        if increment.polygons.0.is_empty() {
            return;
        }
        if self.is_empty() {
            self.polygons = increment.polygons.clone();
        } else {
            self.polygons = self.polygons.union(&increment.polygons);
        }
    }

    /// Union another footprint in (used by the cross-vehicle read-model).
    pub fn merge_footprint(&mut self, other: &CoverageFootprint) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.polygons = other.polygons.clone();
        } else {
            self.polygons = self.polygons.union(&other.polygons);
        }
    }
}

/// The geometry and stats contributed by one batch of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageIncrement {
    polygons: MultiPolygon<f64>,
    /// Swept area of this batch in m²
    pub area_m2: f64,
    /// Path length of this batch in meters
    pub distance_m: f64,
    /// Number of swath segments that produced geometry
    pub segments: usize,
}

impl CoverageIncrement {
    pub fn is_empty(&self) -> bool {
        self.polygons.0.is_empty()
    }

    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }
}

/// Incremental footprint builder for one trail.
///
/// Keeps the last processed sample so segments connect across commit
/// boundaries: the first sample of a new batch pairs with the last sample
/// of the previous one.
#[derive(Debug, Clone)]
pub struct CoverageAccumulator {
    projection: LocalProjection,
    half_width_m: f64,
    last: Option<(GeoSample, f64)>,
}

impl CoverageAccumulator {
    pub fn new(projection: LocalProjection, swath_width_m: f64) -> Self {
        CoverageAccumulator {
            projection,
            half_width_m: swath_width_m / 2.0,
            last: None,
        }
    }

    pub fn projection(&self) -> &LocalProjection {
        &self.projection
    }

    pub fn swath_width_m(&self) -> f64 {
        self.half_width_m * 2.0
    }

    /// Change the swath width mid-trail. The next segment becomes a
    /// trapezoid between the old and new width.
    pub fn set_swath_width(&mut self, swath_width_m: f64) {
        self.half_width_m = swath_width_m / 2.0;
    }

    /// Derive the increment contributed by `samples` and advance the
    /// carry-over state, without touching any footprint.
    pub fn derive(&mut self, samples: &[GeoSample]) -> CoverageIncrement {
        let mut quads: Vec<Polygon<f64>> = Vec::new();
        let mut distance_m = 0.0;

        for sample in samples {
            let current = (*sample, self.half_width_m);
            if let Some((prev, prev_half)) = self.last {
                if let Some((quad, length)) =
                    self.segment_quad(&prev, prev_half, sample, self.half_width_m)
                {
                    distance_m += length;
                    quads.push(quad);
                }
            }
            self.last = Some(current);
        }

        let polygons = union_all(&quads);
        let area_m2 = polygons.unsigned_area();
        CoverageIncrement {
            polygons,
            area_m2,
            distance_m,
            segments: quads.len(),
        }
    }

    /// Derive the increment for `samples` and union it into `footprint`.
    pub fn extend(
        &mut self,
        footprint: &mut CoverageFootprint,
        samples: &[GeoSample],
    ) -> CoverageIncrement {
        let increment = self.derive(samples);
        footprint.merge(&increment);
        increment
    }

    /// Build the swath quad between two samples, or `None` for a degenerate
    /// pair (coincident positions or non-positive swath width).
    fn segment_quad(
        &self,
        from: &GeoSample,
        from_half: f64,
        to: &GeoSample,
        to_half: f64,
    ) -> Option<(Polygon<f64>, f64)> {
        if from_half <= 0.0 || to_half <= 0.0 {
            return None;
        }

        let pa = self.projection.project(from);
        let pb = self.projection.project(to);
        let direction = pb - pa;
        if direction.norm() < MIN_SEGMENT_LENGTH {
            return None;
        }
        let normal = LocalProjection::left_normal(direction)?;

        let corners = [
            pa + normal * from_half,
            pb + normal * to_half,
            pb - normal * to_half,
            pa - normal * from_half,
        ];
        let ring: Vec<(f64, f64)> = corners.iter().map(|p| (p.x, p.y)).collect();
        let quad = Polygon::new(LineString::from(ring), Vec::new());

        let length = Haversine::distance(from.point(), to.point());
        Some((quad, length))
    }
}

fn union_all(quads: &[Polygon<f64>]) -> MultiPolygon<f64> {
    let mut merged = MultiPolygon::new(Vec::new());
    for quad in quads {
        if merged.0.is_empty() {
            merged = MultiPolygon::new(vec![quad.clone()]);
        } else {
            merged = merged.union(&MultiPolygon::new(vec![quad.clone()]));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::METERS_PER_DEGREE_LATITUDE;
    use crate::types::GeoPoint;

    const ANCHOR: GeoPoint = GeoPoint {
        latitude: 52.0,
        longitude: 5.0,
    };

    /// Samples heading due north from the anchor, one per entry of
    /// `meters`, 5 seconds apart.
    fn northbound(meters: &[f64]) -> Vec<GeoSample> {
        meters
            .iter()
            .enumerate()
            .map(|(i, m)| GeoSample {
                timestamp: 1000 + i as u64 * 5000,
                latitude: ANCHOR.latitude + m / METERS_PER_DEGREE_LATITUDE,
                longitude: ANCHOR.longitude,
                heading: 0.0,
                speed: 5.0,
            })
            .collect()
    }

    fn accumulator(swath: f64) -> CoverageAccumulator {
        CoverageAccumulator::new(LocalProjection::new(ANCHOR), swath)
    }

    #[test]
    fn test_straight_pass_area_and_distance() {
        // 100 m straight with a 10 m swath: ~1000 m² (0.1 ha), ~100 m
        let mut acc = accumulator(10.0);
        let mut footprint = CoverageFootprint::empty();
        let increment = acc.extend(&mut footprint, &northbound(&[0.0, 25.0, 50.0, 75.0, 100.0]));

        assert!((increment.area_m2 - 1000.0).abs() < 1.0);
        assert!((increment.distance_m - 100.0).abs() < 0.5);
        assert!((footprint.area_m2() - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_segments_connect_across_batches() {
        let mut acc = accumulator(10.0);
        let mut footprint = CoverageFootprint::empty();
        let samples = northbound(&[0.0, 50.0, 100.0]);

        let first = acc.extend(&mut footprint, &samples[..2]);
        let second = acc.extend(&mut footprint, &samples[2..]);

        // The second batch has one sample but still produces the 50..100 m
        // segment against the carried-over sample.
        assert_eq!(second.segments, 1);
        let total = first.distance_m + second.distance_m;
        assert!((total - 100.0).abs() < 0.5);
        assert!((footprint.area_m2() - 1000.0).abs() < 1.5);
    }

    #[test]
    fn test_coincident_samples_contribute_nothing() {
        let mut acc = accumulator(10.0);
        let mut samples = northbound(&[0.0, 0.0]);
        samples[1].timestamp = 2000;

        let increment = acc.derive(&samples);
        assert_eq!(increment.segments, 0);
        assert_eq!(increment.area_m2, 0.0);
        assert_eq!(increment.distance_m, 0.0);
    }

    #[test]
    fn test_non_positive_swath_contributes_nothing() {
        let mut acc = accumulator(0.0);
        let increment = acc.derive(&northbound(&[0.0, 50.0]));
        assert!(increment.is_empty());
        assert_eq!(increment.area_m2, 0.0);
        assert_eq!(increment.distance_m, 0.0);
    }

    #[test]
    fn test_trapezoid_on_width_change() {
        let mut acc = accumulator(10.0);
        let samples = northbound(&[0.0, 100.0]);
        acc.derive(&samples[..1]);
        acc.set_swath_width(20.0);
        let increment = acc.derive(&samples[1..]);

        // Trapezoid between 10 m and 20 m widths over 100 m: 1500 m²
        assert!((increment.area_m2 - 1500.0).abs() < 1.0);
    }

    #[test]
    fn test_distance_monotonic() {
        let mut acc = accumulator(6.0);
        let samples = northbound(&[0.0, 10.0, 30.0, 60.0, 100.0]);
        let mut footprint = CoverageFootprint::empty();
        let mut total = 0.0;
        for window in samples.chunks(2) {
            let increment = acc.extend(&mut footprint, window);
            assert!(increment.distance_m >= 0.0);
            total += increment.distance_m;
        }
        assert!((total - 100.0).abs() < 0.5);
    }
}
