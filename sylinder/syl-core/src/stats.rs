//! Run diagnostics: volume fraction, orientational order, constraint
//! stress.
//!
//! Each quantity is reduced across ranks and reported through the logger in
//! `RECORD:` lines so that post-processing can grep a single stream.

use nalgebra::{Matrix3, Vector3};
use syl_constraint::{constraint_stress, ConstraintBlock};
use syl_spatial::Comm;
use syl_types::Sylinder;
use tracing::info;

/// Total rod volume over box volume.
#[must_use]
pub fn volume_fraction(
    rods: &[Sylinder],
    box_low: [f64; 3],
    box_high: [f64; 3],
    comm: &Comm,
) -> f64 {
    let pi = std::f64::consts::PI;
    let local: f64 = rods
        .iter()
        .map(|sy| {
            let d = 2.0 * sy.radius;
            0.25 * pi * sy.length * d * d + pi * d * d * d / 6.0
        })
        .sum();
    let total = comm.all_reduce_sum_scalar(local);
    let box_volume: f64 = (0..3).map(|k| box_high[k] - box_low[k]).product();
    let fraction = total / box_volume;
    info!("RECORD: VolFrac,{:e},{:e}", total, fraction);
    fraction
}

/// Polar order vector and nematic order tensor, averaged over all rods.
#[must_use]
pub fn order_parameter(rods: &[Sylinder], comm: &Comm) -> (Vector3<f64>, Matrix3<f64>) {
    let mut acc = [0.0; 12];
    for sy in rods {
        let dir = sy.direction();
        acc[0] += dir.x;
        acc[1] += dir.y;
        acc[2] += dir.z;
        let q = dir * dir.transpose() - Matrix3::identity() / 3.0;
        for i in 0..3 {
            for j in 0..3 {
                acc[3 + 3 * i + j] += q[(i, j)];
            }
        }
    }
    let reduced = comm.all_reduce_sum(&acc);
    let n_global = comm.all_reduce_sum_scalar(rods.len() as f64).max(1.0);

    let p = Vector3::new(reduced[0], reduced[1], reduced[2]) / n_global;
    let mut q = Matrix3::zeros();
    for i in 0..3 {
        for j in 0..3 {
            q[(i, j)] = reduced[3 + 3 * i + j] / n_global;
        }
    }
    info!(
        "RECORD: Order P,{:e},{:e},{:e},Q,{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e}",
        p.x,
        p.y,
        p.z,
        q[(0, 0)],
        q[(0, 1)],
        q[(0, 2)],
        q[(1, 0)],
        q[(1, 1)],
        q[(1, 2)],
        q[(2, 0)],
        q[(2, 1)],
        q[(2, 2)]
    );
    (p, q)
}

/// Virial stress of the solved constraints, scaled by `1/(N kBT)` and
/// reduced across ranks. Returns the (unilateral, bilateral) totals.
#[must_use]
pub fn constraint_stress_record<'a>(
    blocks: impl Iterator<Item = &'a ConstraintBlock>,
    n_global: usize,
    kbt: f64,
    comm: &Comm,
) -> (Matrix3<f64>, Matrix3<f64>) {
    let (uni, bi) = constraint_stress(blocks);
    let scale = if kbt > 0.0 && n_global > 0 {
        1.0 / (n_global as f64 * kbt)
    } else {
        1.0
    };

    let mut payload = [0.0; 18];
    for i in 0..3 {
        for j in 0..3 {
            payload[3 * i + j] = uni[(i, j)] * scale;
            payload[9 + 3 * i + j] = bi[(i, j)] * scale;
        }
    }
    let reduced = comm.all_reduce_sum(&payload);
    let mut uni_total = Matrix3::zeros();
    let mut bi_total = Matrix3::zeros();
    for i in 0..3 {
        for j in 0..3 {
            uni_total[(i, j)] = reduced[3 * i + j];
            bi_total[(i, j)] = reduced[9 + 3 * i + j];
        }
    }
    info!(
        "RECORD: ColXF,{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e}",
        uni_total[(0, 0)],
        uni_total[(0, 1)],
        uni_total[(0, 2)],
        uni_total[(1, 0)],
        uni_total[(1, 1)],
        uni_total[(1, 2)],
        uni_total[(2, 0)],
        uni_total[(2, 1)],
        uni_total[(2, 2)]
    );
    info!(
        "RECORD: BiXF,{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e},{:e}",
        bi_total[(0, 0)],
        bi_total[(0, 1)],
        bi_total[(0, 2)],
        bi_total[(1, 0)],
        bi_total[(1, 1)],
        bi_total[(1, 2)],
        bi_total[(2, 0)],
        bi_total[(2, 1)],
        bi_total[(2, 2)]
    );
    (uni_total, bi_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Point3, UnitQuaternion};
    use syl_geometry::quat_from_z_to;
    use syl_types::Gid;

    #[test]
    fn aligned_rods_have_full_order() {
        let rods: Vec<Sylinder> = (0..10)
            .map(|i| {
                Sylinder::new(
                    Gid::new(i),
                    0.1,
                    1.0,
                    Point3::origin(),
                    quat_from_z_to(&Vector3::x()),
                )
            })
            .collect();
        let (p, q) = order_parameter(&rods, &Comm::solo());
        assert!((p.x - 1.0).abs() < 1e-12);
        assert!((q[(0, 0)] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn volume_fraction_of_one_sphere() {
        let rods = vec![Sylinder::new(
            Gid::new(0),
            0.5,
            0.0,
            Point3::origin(),
            UnitQuaternion::identity(),
        )];
        let fraction = volume_fraction(&rods, [0.0; 3], [2.0; 3], &Comm::solo());
        let expect = std::f64::consts::PI / 6.0 / 8.0; // unit-diameter sphere in an 8-volume box
        assert!((fraction - expect).abs() < 1e-12);
    }
}
