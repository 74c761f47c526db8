//! Overlap Resolver
//!
//! Computes the intersection area between a new coverage increment and the
//! union of previously recorded coverage: the trail's own earlier
//! increments, the vehicle's previously closed trails, and other vehicles'
//! current trails in the same operation.
//!
//! The result is best-effort and eventually consistent: it is computed
//! against whatever footprints are visible at commit time. A missing or
//! stale cross-vehicle snapshot degrades the result to partial; it never
//! blocks or fails a commit.

use geo::{Area, BooleanOps, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::coverage::{CoverageFootprint, CoverageIncrement};

/// Overlap of one increment against prior coverage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapResult {
    /// Intersection area in m²
    pub area_m2: f64,
    /// `area_m2 / increment area`, clamped to [0, 1]; 0 for an empty
    /// increment
    pub fraction: f64,
    /// True when the prior-coverage view was incomplete (no cross-vehicle
    /// snapshot available, or a stale one)
    pub partial: bool,
}

impl OverlapResult {
    pub fn none() -> Self {
        OverlapResult {
            area_m2: 0.0,
            fraction: 0.0,
            partial: false,
        }
    }

    pub fn overlap_ha(&self) -> f64 {
        self.area_m2 / 10_000.0
    }
}

/// Compute the overlap of `increment` against the union of `priors`.
///
/// `partial` marks the result as computed from an incomplete prior view;
/// it is carried through untouched so callers can surface it.
pub fn compute_overlap(
    increment: &CoverageIncrement,
    priors: &[&CoverageFootprint],
    partial: bool,
) -> OverlapResult {
    if increment.is_empty() || increment.area_m2 <= 0.0 {
        return OverlapResult {
            area_m2: 0.0,
            fraction: 0.0,
            partial,
        };
    }

    let mut prior_union = MultiPolygon::new(Vec::new());
    for footprint in priors {
        if footprint.is_empty() {
            continue;
        }
        if prior_union.0.is_empty() {
            prior_union = footprint.polygons().clone();
        } else {
            prior_union = prior_union.union(footprint.polygons());
        }
    }

    if prior_union.0.is_empty() {
        return OverlapResult {
            area_m2: 0.0,
            fraction: 0.0,
            partial,
        };
    }

    let intersection = increment.polygons().intersection(&prior_union);
    let area_m2 = intersection.unsigned_area().min(increment.area_m2);
    let fraction = (area_m2 / increment.area_m2).clamp(0.0, 1.0);

    OverlapResult {
        area_m2,
        fraction,
        partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverageAccumulator;
    use crate::projection::{LocalProjection, METERS_PER_DEGREE_LATITUDE};
    use crate::sample::GeoSample;
    use crate::types::GeoPoint;

    const ANCHOR: GeoPoint = GeoPoint {
        latitude: 52.0,
        longitude: 5.0,
    };

    fn northbound(offset_east_m: f64, meters: &[f64], t0: u64) -> Vec<GeoSample> {
        let lon_scale = crate::projection::meters_per_degree_longitude(ANCHOR.latitude);
        meters
            .iter()
            .enumerate()
            .map(|(i, m)| GeoSample {
                timestamp: t0 + i as u64 * 5000,
                latitude: ANCHOR.latitude + m / METERS_PER_DEGREE_LATITUDE,
                longitude: ANCHOR.longitude + offset_east_m / lon_scale,
                heading: 0.0,
                speed: 5.0,
            })
            .collect()
    }

    fn accumulator(swath: f64) -> CoverageAccumulator {
        CoverageAccumulator::new(LocalProjection::new(ANCHOR), swath)
    }

    #[test]
    fn test_no_priors_no_overlap() {
        let mut acc = accumulator(10.0);
        let increment = acc.derive(&northbound(0.0, &[0.0, 100.0], 1000));

        let result = compute_overlap(&increment, &[], false);
        assert_eq!(result.area_m2, 0.0);
        assert_eq!(result.fraction, 0.0);
        assert!(!result.partial);
    }

    #[test]
    fn test_full_retrace_is_total_overlap() {
        // First pass
        let mut acc = accumulator(10.0);
        let mut footprint = CoverageFootprint::empty();
        acc.extend(&mut footprint, &northbound(0.0, &[0.0, 50.0, 100.0], 1000));

        // Second pass over the same ground, as a fresh accumulator so the
        // two passes are independent geometry
        let mut retrace = accumulator(10.0);
        let increment = retrace.derive(&northbound(0.0, &[100.0, 50.0, 0.0], 60_000));

        let result = compute_overlap(&increment, &[&footprint], false);
        assert!(result.fraction > 0.98, "fraction = {}", result.fraction);
        assert!((result.area_m2 - increment.area_m2).abs() < increment.area_m2 * 0.02);
    }

    #[test]
    fn test_disjoint_passes_do_not_overlap() {
        let mut acc = accumulator(10.0);
        let mut footprint = CoverageFootprint::empty();
        acc.extend(&mut footprint, &northbound(0.0, &[0.0, 100.0], 1000));

        // Parallel pass 50 m east, well clear of the 10 m swath
        let mut other = accumulator(10.0);
        let increment = other.derive(&northbound(50.0, &[0.0, 100.0], 1000));

        let result = compute_overlap(&increment, &[&footprint], false);
        assert_eq!(result.area_m2, 0.0);
        assert_eq!(result.fraction, 0.0);
    }

    #[test]
    fn test_half_overlap() {
        let mut acc = accumulator(10.0);
        let mut footprint = CoverageFootprint::empty();
        acc.extend(&mut footprint, &northbound(0.0, &[0.0, 100.0], 1000));

        // Adjacent pass offset by half a swath: 5 m of the 10 m swath reruns
        // covered ground
        let mut other = accumulator(10.0);
        let increment = other.derive(&northbound(5.0, &[0.0, 100.0], 1000));

        let result = compute_overlap(&increment, &[&footprint], false);
        assert!((result.fraction - 0.5).abs() < 0.02, "fraction = {}", result.fraction);
    }

    #[test]
    fn test_overlap_never_exceeds_increment() {
        let mut acc = accumulator(10.0);
        let mut big = CoverageFootprint::empty();
        acc.extend(&mut big, &northbound(0.0, &[0.0, 200.0], 1000));
        let mut wide = accumulator(30.0);
        let mut wide_footprint = CoverageFootprint::empty();
        wide.extend(&mut wide_footprint, &northbound(0.0, &[0.0, 200.0], 1000));

        let mut narrow = accumulator(4.0);
        let increment = narrow.derive(&northbound(0.0, &[20.0, 80.0], 1000));

        let result = compute_overlap(&increment, &[&big, &wide_footprint], false);
        assert!(result.area_m2 <= increment.area_m2 + 1e-6);
        assert!(result.fraction <= 1.0);
        assert!(result.fraction >= 0.0);
    }

    #[test]
    fn test_empty_increment_is_zero_fraction() {
        let mut acc = accumulator(10.0);
        let mut footprint = CoverageFootprint::empty();
        acc.extend(&mut footprint, &northbound(0.0, &[0.0, 100.0], 1000));

        let mut other = accumulator(10.0);
        let increment = other.derive(&northbound(0.0, &[0.0], 1000));
        assert!(increment.is_empty());

        let result = compute_overlap(&increment, &[&footprint], false);
        assert_eq!(result.fraction, 0.0);
        assert_eq!(result.area_m2, 0.0);
    }

    #[test]
    fn test_partial_flag_carried() {
        let mut acc = accumulator(10.0);
        let increment = acc.derive(&northbound(0.0, &[0.0, 100.0], 1000));
        let result = compute_overlap(&increment, &[], true);
        assert!(result.partial);
    }
}
