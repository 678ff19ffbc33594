//! Closest points between two line segments.
//!
//! This is the narrow-phase kernel for spherocylinder collision: the
//! separation between two rods is the distance between their centerline
//! segments minus the two radii.

use nalgebra::{Point3, Vector3};

/// Squared-length threshold below which a segment is treated as a point and
/// below which two segments are treated as parallel.
const PARALLEL_EPS: f64 = 1e-12;

/// Result of a segment-segment closest point query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSeparation {
    /// Closest point on the first segment.
    pub point_i: Point3<f64>,
    /// Closest point on the second segment.
    pub point_j: Point3<f64>,
    /// Euclidean distance between the two closest points.
    pub distance: f64,
    /// Parameter of `point_i` on segment I, in `[0, 1]`.
    pub s: f64,
    /// Parameter of `point_j` on segment J, in `[0, 1]`.
    pub t: f64,
}

/// Compute the closest points between segments `[p0, p1]` and `[q0, q1]`.
///
/// Degenerate inputs are handled:
/// - a zero-length segment is treated as a point;
/// - parallel segments with overlapping projections pick the midpoint of the
///   overlap region, so the answer is unique and symmetric.
#[must_use]
pub fn segment_closest_points(
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    q0: &Point3<f64>,
    q1: &Point3<f64>,
) -> SegmentSeparation {
    let d1 = p1 - p0; // direction of segment I
    let d2 = q1 - q0; // direction of segment J
    let r = p0 - q0;

    let a = d1.dot(&d1);
    let e = d2.dot(&d2);
    let f = d2.dot(&r);

    let (s, t) = if a <= PARALLEL_EPS && e <= PARALLEL_EPS {
        // Both segments degenerate to points.
        (0.0, 0.0)
    } else if a <= PARALLEL_EPS {
        // Segment I is a point.
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(&r);
        if e <= PARALLEL_EPS {
            // Segment J is a point.
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;
            if denom > PARALLEL_EPS * a * e {
                let s = ((b * f - c * e) / denom).clamp(0.0, 1.0);
                let t = (b * s + f) / e;
                // Clamp t and recompute s against the clamped value.
                if t < 0.0 {
                    ((-c / a).clamp(0.0, 1.0), 0.0)
                } else if t > 1.0 {
                    (((b - c) / a).clamp(0.0, 1.0), 1.0)
                } else {
                    (s, t)
                }
            } else {
                return parallel_closest_points(p0, q0, &d1, &d2, a, e);
            }
        }
    };

    finish(p0, q0, &d1, &d2, s, t)
}

/// Parallel (or anti-parallel) segments: project J onto I's line and pick
/// the midpoint of the overlapping parameter interval. If the projections do
/// not overlap, the nearest endpoints are returned.
fn parallel_closest_points(
    p0: &Point3<f64>,
    q0: &Point3<f64>,
    d1: &Vector3<f64>,
    d2: &Vector3<f64>,
    a: f64,
    e: f64,
) -> SegmentSeparation {
    // Parameters of q0 and q1 along segment I's line.
    let t0 = (q0 - p0).dot(d1) / a;
    let t1 = t0 + d1.dot(d2) / a;
    let (lo, hi) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };

    let lo_c = lo.max(0.0);
    let hi_c = hi.min(1.0);

    let s = if lo_c <= hi_c {
        // Overlapping: tie-break at the midpoint of the overlap.
        0.5 * (lo_c + hi_c)
    } else if hi < 0.0 {
        0.0
    } else {
        1.0
    };

    // Closest parameter on J for the chosen point on I.
    let pi = p0 + d1 * s;
    let t = ((pi - q0).dot(d2) / e).clamp(0.0, 1.0);
    finish(p0, q0, d1, d2, s, t)
}

fn finish(
    p0: &Point3<f64>,
    q0: &Point3<f64>,
    d1: &Vector3<f64>,
    d2: &Vector3<f64>,
    s: f64,
    t: f64,
) -> SegmentSeparation {
    let point_i = p0 + d1 * s;
    let point_j = q0 + d2 * t;
    SegmentSeparation {
        point_i,
        point_j,
        distance: (point_j - point_i).norm(),
        s,
        t,
    }
}
