//! Quaternion helpers for orientation integration and bending measurement.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Rotate orientation `q` by the body rotation `omega * dt` using the
/// small-angle exponential map, renormalising the result.
#[must_use]
pub fn rotate_by_omega(
    q: &UnitQuaternion<f64>,
    omega: &Vector3<f64>,
    dt: f64,
) -> UnitQuaternion<f64> {
    let rot = UnitQuaternion::from_scaled_axis(omega * dt);
    UnitQuaternion::new_normalize((rot * q).into_inner())
}

/// Midpoint interpolation `slerp(qi, qj, 1/2)`, renormalised.
///
/// Falls back to a plain normalised average when the two orientations are
/// antipodal and slerp is undefined.
#[must_use]
pub fn slerp_mid(qi: &UnitQuaternion<f64>, qj: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    match qi.try_slerp(qj, 0.5, 1e-9) {
        Some(q) => q,
        None => UnitQuaternion::new_normalize((qi.into_inner() + qj.into_inner()) * 0.5),
    }
}

/// Discrete curvature vector between two orientations: the vector part of
/// `qi* qj - qi qj*`.
///
/// Vanishes when the two orientations coincide; the three components measure
/// bending about the mid-frame directors.
#[must_use]
pub fn curvature_vec(qi: &UnitQuaternion<f64>, qj: &UnitQuaternion<f64>) -> Vector3<f64> {
    let a: Quaternion<f64> = qi.conjugate().into_inner() * qj.into_inner();
    let b: Quaternion<f64> = qi.into_inner() * qj.conjugate().into_inner();
    (a - b).imag()
}

/// Minimal rotation taking the body z-axis to `v`.
///
/// For `v` anti-parallel to z the rotation is a half-turn about x.
#[must_use]
pub fn quat_from_z_to(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::rotation_between(&Vector3::z(), v)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI))
}
