//! The constraint block: one scalar constraint's geometry.

use nalgebra::{Matrix3, Point3, Vector3};
use syl_types::Gid;

/// One scalar constraint between up to three rods.
///
/// A block stores everything the operator needs to scatter a multiplier
/// into rod forces and gather velocities back: the initial signed gap, the
/// participating gids with their contiguous global indices, the unscaled
/// (unit-multiplier) force and torque on each rod, the lab-frame contact
/// points and the unit-multiplier virial stress.
///
/// Invariants: for two-body blocks `force_j = -force_i`; each torque equals
/// `(lab point - rod center) x force`; unilateral blocks solve for
/// `gamma >= 0`, bilateral blocks for unbounded `gamma`.
#[derive(Debug, Clone)]
pub struct ConstraintBlock {
    /// Initial signed gap; negative means overlap (or a violated link).
    pub delta0: f64,
    /// Multiplier: the initial guess before the solve, the solution after.
    pub gamma: f64,
    /// First participant (always the locally owned target rod).
    pub gid_i: Gid,
    /// Second participant; equals `gid_i` for one-sided blocks.
    pub gid_j: Gid,
    /// Optional third participant (tri-bend links).
    pub gid_k: Option<Gid>,
    /// Global index of I.
    pub global_index_i: usize,
    /// Global index of J.
    pub global_index_j: usize,
    /// Global index of K.
    pub global_index_k: Option<usize>,
    /// J receives no mobility contribution (boundary contacts).
    pub one_side: bool,
    /// Bilateral blocks have unbounded multiplier sign.
    pub bilateral: bool,
    /// Spring stiffness; zero means rigid.
    pub kappa: f64,
    /// Lab-frame constraint location on I.
    pub lab_i: Point3<f64>,
    /// Lab-frame constraint location on J.
    pub lab_j: Point3<f64>,
    /// Lab-frame constraint location on K.
    pub lab_k: Option<Point3<f64>>,
    /// Unit-multiplier force on I.
    pub force_i: Vector3<f64>,
    /// Unit-multiplier force on J.
    pub force_j: Vector3<f64>,
    /// Unit-multiplier force on K.
    pub force_k: Vector3<f64>,
    /// Unit-multiplier torque on I.
    pub torque_i: Vector3<f64>,
    /// Unit-multiplier torque on J.
    pub torque_j: Vector3<f64>,
    /// Unit-multiplier torque on K.
    pub torque_k: Vector3<f64>,
    /// Unit-multiplier virial stress.
    pub stress: Matrix3<f64>,
}

impl ConstraintBlock {
    /// A two-body block.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn two_body(
        delta0: f64,
        gamma: f64,
        (gid_i, global_index_i): (Gid, usize),
        (gid_j, global_index_j): (Gid, usize),
        force_i: Vector3<f64>,
        force_j: Vector3<f64>,
        torque_i: Vector3<f64>,
        torque_j: Vector3<f64>,
        lab_i: Point3<f64>,
        lab_j: Point3<f64>,
        one_side: bool,
        bilateral: bool,
        kappa: f64,
    ) -> Self {
        Self {
            delta0,
            gamma,
            gid_i,
            gid_j,
            gid_k: None,
            global_index_i,
            global_index_j,
            global_index_k: None,
            one_side,
            bilateral,
            kappa,
            lab_i,
            lab_j,
            lab_k: None,
            force_i,
            force_j,
            force_k: Vector3::zeros(),
            torque_i,
            torque_j,
            torque_k: Vector3::zeros(),
            stress: Matrix3::zeros(),
        }
    }

    /// A three-body block.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn three_body(
        delta0: f64,
        gamma: f64,
        (gid_i, global_index_i): (Gid, usize),
        (gid_j, global_index_j): (Gid, usize),
        (gid_k, global_index_k): (Gid, usize),
        forces: [Vector3<f64>; 3],
        torques: [Vector3<f64>; 3],
        labs: [Point3<f64>; 3],
        bilateral: bool,
        kappa: f64,
    ) -> Self {
        Self {
            delta0,
            gamma,
            gid_i,
            gid_j,
            gid_k: Some(gid_k),
            global_index_i,
            global_index_j,
            global_index_k: Some(global_index_k),
            one_side: false,
            bilateral,
            kappa,
            lab_i: labs[0],
            lab_j: labs[1],
            lab_k: Some(labs[2]),
            force_i: forces[0],
            force_j: forces[1],
            force_k: forces[2],
            torque_i: torques[0],
            torque_j: torques[1],
            torque_k: torques[2],
            stress: Matrix3::zeros(),
        }
    }

    /// Attach the unit-multiplier stress tensor.
    #[must_use]
    pub fn with_stress(mut self, stress: Matrix3<f64>) -> Self {
        self.stress = stress;
        self
    }
}

/// Sum the virial stress of the given blocks, each scaled by its solved
/// multiplier, split into (unilateral, bilateral) totals.
#[must_use]
pub fn constraint_stress<'a>(
    blocks: impl Iterator<Item = &'a ConstraintBlock>,
) -> (Matrix3<f64>, Matrix3<f64>) {
    let mut uni = Matrix3::zeros();
    let mut bi = Matrix3::zeros();
    for block in blocks {
        let contribution = block.stress * block.gamma;
        if block.bilateral {
            bi += contribution;
        } else {
            uni += contribution;
        }
    }
    (uni, bi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_splits_by_kind() {
        let mut uni_block = ConstraintBlock::two_body(
            -0.1,
            2.0,
            (Gid::new(0), 0),
            (Gid::new(1), 1),
            Vector3::x(),
            -Vector3::x(),
            Vector3::zeros(),
            Vector3::zeros(),
            Point3::origin(),
            Point3::origin(),
            false,
            false,
            0.0,
        );
        uni_block.stress = Matrix3::identity();
        let mut bi_block = uni_block.clone();
        bi_block.bilateral = true;
        bi_block.gamma = -1.0;

        let blocks = vec![uni_block, bi_block];
        let (uni, bi) = constraint_stress(blocks.iter());
        assert_eq!(uni, Matrix3::identity() * 2.0);
        assert_eq!(bi, Matrix3::identity() * -1.0);
    }
}
