//! Confinement boundaries.
//!
//! A boundary is a tagged primitive with a single operation: project a query
//! point onto the boundary surface. The returned delta vector encodes which
//! side of the boundary the query is on:
//!
//! - query inside the allowed region: `delta = query - projection`
//! - query outside: `delta = projection - query`
//!
//! so `(query - projection) . delta < 0` detects an escaped point. This is
//! the convention the boundary-collision generator relies on.

use nalgebra::{Point3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// Result of projecting a point onto a boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Closest point on the boundary surface.
    pub point: Point3<f64>,
    /// Side-encoding delta vector (see module docs).
    pub delta: Vector3<f64>,
}

/// A confinement primitive.
///
/// Serialised form matches the configuration file, e.g.
/// `{ type: wall, center: [0, 0, 0], normal: [0, 0, 1] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Boundary {
    /// A plane; the allowed region is the side the normal points into.
    Wall {
        /// A point on the plane.
        center: [f64; 3],
        /// Inward normal (normalised on use).
        normal: [f64; 3],
    },
    /// An infinite cylindrical tube; the allowed region is the interior.
    Tube {
        /// A point on the tube axis.
        center: [f64; 3],
        /// Axis direction (normalised on use).
        axis: [f64; 3],
        /// Tube radius.
        radius: f64,
    },
    /// A spherical shell; the allowed region is the interior.
    Sphere {
        /// Shell center.
        center: [f64; 3],
        /// Shell radius.
        radius: f64,
    },
}

impl Boundary {
    /// Project `query` onto the boundary surface.
    #[must_use]
    pub fn project(&self, query: &Point3<f64>) -> Projection {
        match self {
            Self::Wall { center, normal } => {
                let c = Point3::from(Vector3::from(*center));
                let n = Unit::new_normalize(Vector3::from(*normal));
                let h = (query - c).dot(&n);
                let point = query - n.into_inner() * h;
                signed(query, point, h >= 0.0)
            }
            Self::Tube {
                center,
                axis,
                radius,
            } => {
                let c = Point3::from(Vector3::from(*center));
                let a = Unit::new_normalize(Vector3::from(*axis));
                let rel = query - c;
                let radial = rel - a.into_inner() * rel.dot(&a);
                let d = radial.norm();
                let outward = if d > 1e-14 {
                    radial / d
                } else {
                    // On the axis: any radial direction is equally close.
                    orthogonal(&a)
                };
                let point = query - radial + outward * *radius;
                signed(query, point, d <= *radius)
            }
            Self::Sphere { center, radius } => {
                let c = Point3::from(Vector3::from(*center));
                let rel = query - c;
                let d = rel.norm();
                let outward = if d > 1e-14 {
                    rel / d
                } else {
                    Vector3::z()
                };
                let point = c + outward * *radius;
                signed(query, point, d <= *radius)
            }
        }
    }
}

fn signed(query: &Point3<f64>, point: Point3<f64>, inside: bool) -> Projection {
    let delta = if inside { query - point } else { point - query };
    Projection { point, delta }
}

/// Any unit vector orthogonal to `a`.
fn orthogonal(a: &Unit<Vector3<f64>>) -> Vector3<f64> {
    let probe = if a.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    a.cross(&probe).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wall_inside_and_outside() {
        let wall = Boundary::Wall {
            center: [0.0, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
        };
        let inside = wall.project(&Point3::new(0.0, 0.0, 0.4));
        assert_relative_eq!(inside.point.z, 0.0, epsilon = 1e-14);
        assert_relative_eq!(inside.delta.z, 0.4, epsilon = 1e-14);
        // Inside: (q - proj) . delta > 0.
        let q = Point3::new(0.0, 0.0, 0.4);
        assert!((q - inside.point).dot(&inside.delta) > 0.0);

        let outside = wall.project(&Point3::new(1.0, 0.0, -0.2));
        let q = Point3::new(1.0, 0.0, -0.2);
        assert!((q - outside.point).dot(&outside.delta) < 0.0);
    }

    #[test]
    fn tube_radial_projection() {
        let tube = Boundary::Tube {
            center: [0.0, 0.0, 0.0],
            axis: [1.0, 0.0, 0.0],
            radius: 2.0,
        };
        let p = tube.project(&Point3::new(5.0, 1.0, 0.0));
        assert_relative_eq!(p.point.x, 5.0, epsilon = 1e-14);
        assert_relative_eq!(p.point.y, 2.0, epsilon = 1e-14);
        assert_relative_eq!(p.delta.norm(), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn sphere_shell() {
        let shell = Boundary::Sphere {
            center: [1.0, 0.0, 0.0],
            radius: 3.0,
        };
        let p = shell.project(&Point3::new(1.0, 2.0, 0.0));
        assert_relative_eq!(p.point.y, 3.0, epsilon = 1e-14);
        assert_relative_eq!(p.delta.norm(), 1.0, epsilon = 1e-14);
    }
}
