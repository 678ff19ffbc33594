//! Drag coefficients and the block-diagonal mobility of a single rod.

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// Translational and rotational drag coefficients of one rod.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragCoeff {
    /// Drag along the rod axis.
    pub para: f64,
    /// Drag perpendicular to the rod axis.
    pub perp: f64,
    /// Rotational drag (isotropic).
    pub rot: f64,
}

/// Compute the drag coefficients for a rod of the given length and radius in
/// a fluid of the given viscosity.
///
/// Slender-body theory for `L >= 2r`; rods shorter than their diameter are
/// treated as spheres of effective radius `L/2 + r` (the cap-to-cap
/// half-extent) with Stokes drag `6 pi mu a` and `8 pi mu a^3`.
#[must_use]
pub fn drag_coefficients(length: f64, radius: f64, viscosity: f64) -> DragCoeff {
    if length < 2.0 * radius {
        let a = 0.5 * length + radius;
        let stokes = 6.0 * PI * viscosity * a;
        DragCoeff {
            para: stokes,
            perp: stokes,
            rot: 8.0 * PI * viscosity * a * a * a,
        }
    } else {
        // Slender-body expansion in the aspect-ratio logarithm.
        let b = -(1.0 + 2.0 * (radius / length).ln());
        DragCoeff {
            para: 8.0 * PI * viscosity * length / (2.0 * b),
            perp: 8.0 * PI * viscosity * length / (b + 2.0),
            rot: 2.0 * PI * viscosity * length * length * length / (3.0 * (b + 2.0)),
        }
    }
}

/// Build the 3x3 translational and rotational mobility blocks of one rod.
///
/// `M_trans = (1/g_par) q q^T + (1/g_perp)(I - q q^T)` along the current
/// direction `q`; `M_rot = (1/g_rot) I`. The rotational mobility is
/// regularised isotropically: it removes the rotational null-space of a
/// slender body and has no effect on the geometric constraints.
///
/// An immovable rod gets zero blocks, which pins it against every force.
#[must_use]
pub fn mobility_blocks(
    direction: &Vector3<f64>,
    drag: &DragCoeff,
    immovable: bool,
) -> (Matrix3<f64>, Matrix3<f64>) {
    if immovable {
        return (Matrix3::zeros(), Matrix3::zeros());
    }
    let qq = direction * direction.transpose();
    let trans = qq * (1.0 / drag.para) + (Matrix3::identity() - qq) * (1.0 / drag.perp);
    let rot = Matrix3::identity() * (1.0 / drag.rot);
    (trans, rot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sphere_matches_stokes() {
        // A zero-length rod of radius 0.5 in unit viscosity is a sphere:
        // mobility = I / (6 pi mu r).
        let drag = drag_coefficients(0.0, 0.5, 1.0);
        let (trans, _) = mobility_blocks(&Vector3::z(), &drag, false);
        let expect = 1.0 / (6.0 * PI * 0.5);
        for i in 0..3 {
            assert_relative_eq!(trans[(i, i)], expect, epsilon = 1e-12);
        }
        assert_relative_eq!(trans[(0, 1)], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn slender_parallel_faster_than_perp() {
        let drag = drag_coefficients(2.0, 0.05, 1.0);
        assert!(drag.para < drag.perp);
        assert!(drag.para > 0.0 && drag.rot > 0.0);
    }

    #[test]
    fn immovable_is_pinned() {
        let drag = drag_coefficients(1.0, 0.1, 1.0);
        let (trans, rot) = mobility_blocks(&Vector3::x(), &drag, true);
        assert_eq!(trans, Matrix3::zeros());
        assert_eq!(rot, Matrix3::zeros());
    }

    #[test]
    fn mobility_anisotropy_along_axis() {
        let drag = drag_coefficients(4.0, 0.1, 1.0);
        let dir = Vector3::x();
        let (trans, _) = mobility_blocks(&dir, &drag, false);
        assert_relative_eq!(trans[(0, 0)], 1.0 / drag.para, epsilon = 1e-12);
        assert_relative_eq!(trans[(1, 1)], 1.0 / drag.perp, epsilon = 1e-12);
    }
}
