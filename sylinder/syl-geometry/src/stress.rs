//! Virial stress contribution of a contact force.

use nalgebra::{Matrix3, Point3, Vector3};

/// Stress tensor for a unit contact force along `normal` applied at `p_i` on
/// rod I and `p_j` on rod J: the symmetric dyadic
/// `(n (p_i - p_j)^T + (p_i - p_j) n^T) / 2`.
///
/// The caller scales this by the solved constraint multiplier.
#[must_use]
pub fn collision_stress(
    normal: &Vector3<f64>,
    p_i: &Point3<f64>,
    p_j: &Point3<f64>,
) -> Matrix3<f64> {
    let d = p_i - p_j;
    (normal * d.transpose() + d * normal.transpose()) * 0.5
}
