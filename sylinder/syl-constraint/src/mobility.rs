//! Block-diagonal mobility.
//!
//! One 6x6 block per rod (18 non-zeros: a dense 3x3 translational block
//! along the current orientation and an isotropic 3x3 rotational block),
//! rebuilt every step in parallel from the current orientations. Immovable
//! rods contribute zero blocks. A block built from a [`NearRod`] shadow is
//! bit-identical to the owner's, which lets every rank apply the mobility
//! of ghost rows locally.

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use syl_geometry::{drag_coefficients, mobility_blocks};
use syl_types::{NearRod, Sylinder};

/// The per-rod mobility blocks of one rank.
#[derive(Debug, Clone)]
pub struct MobilityMatrix {
    blocks: Vec<(Matrix3<f64>, Matrix3<f64>)>,
}

impl MobilityMatrix {
    /// Build from the local rods.
    #[must_use]
    pub fn build(rods: &[Sylinder], viscosity: f64) -> Self {
        let blocks = rods
            .par_iter()
            .map(|sy| {
                let drag = drag_coefficients(sy.length, sy.radius, viscosity);
                mobility_blocks(&sy.direction(), &drag, sy.is_immovable)
            })
            .collect();
        Self { blocks }
    }

    /// The mobility block a shadow copy implies; identical to the one the
    /// owning rank computes.
    #[must_use]
    pub fn block_from_near(record: &NearRod, viscosity: f64) -> (Matrix3<f64>, Matrix3<f64>) {
        let drag = drag_coefficients(record.length, record.radius, viscosity);
        mobility_blocks(&record.direction, &drag, record.is_immovable)
    }

    /// Number of rods covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no rods are covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The (translational, rotational) block of rod `i`.
    #[must_use]
    pub fn block(&self, i: usize) -> &(Matrix3<f64>, Matrix3<f64>) {
        &self.blocks[i]
    }

    /// Apply to a packed force/torque vector (6 entries per rod), writing a
    /// packed velocity vector of the same layout.
    pub fn apply(&self, force: &[f64], velocity: &mut [f64]) {
        debug_assert_eq!(force.len(), 6 * self.blocks.len());
        debug_assert_eq!(velocity.len(), force.len());
        for (i, (trans, rot)) in self.blocks.iter().enumerate() {
            let f = Vector3::new(force[6 * i], force[6 * i + 1], force[6 * i + 2]);
            let t = Vector3::new(force[6 * i + 3], force[6 * i + 4], force[6 * i + 5]);
            let v = trans * f;
            let w = rot * t;
            velocity[6 * i] = v.x;
            velocity[6 * i + 1] = v.y;
            velocity[6 * i + 2] = v.z;
            velocity[6 * i + 3] = w.x;
            velocity[6 * i + 4] = w.y;
            velocity[6 * i + 5] = w.z;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, UnitQuaternion};
    use std::f64::consts::PI;
    use syl_types::Gid;

    #[test]
    fn sphere_block_is_stokes() {
        let sy = Sylinder::new(
            Gid::new(0),
            0.5,
            0.0,
            Point3::origin(),
            UnitQuaternion::identity(),
        );
        let mob = MobilityMatrix::build(&[sy], 1.0);
        let mut vel = vec![0.0; 6];
        mob.apply(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], &mut vel);
        assert_relative_eq!(vel[0], 1.0 / (6.0 * PI * 0.5), epsilon = 1e-12);
        assert_relative_eq!(vel[1], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn near_record_block_matches_owner() {
        let sy = Sylinder::new(
            Gid::new(1),
            0.1,
            2.0,
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.3, 0.2, 0.1),
        );
        let mob = MobilityMatrix::build(&[sy.clone()], 0.7);
        let near = NearRod::from_sylinder(&sy, 0.3);
        let (trans, rot) = MobilityMatrix::block_from_near(&near, 0.7);
        assert_relative_eq!((mob.block(0).0 - trans).norm(), 0.0, epsilon = 1e-15);
        assert_relative_eq!((mob.block(0).1 - rot).norm(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn immovable_rod_never_moves() {
        let mut sy = Sylinder::new(
            Gid::new(0),
            0.1,
            1.0,
            Point3::origin(),
            UnitQuaternion::identity(),
        );
        sy.is_immovable = true;
        let mob = MobilityMatrix::build(&[sy], 1.0);
        let mut vel = vec![1.0; 6];
        mob.apply(&[5.0; 6], &mut vel);
        assert!(vel.iter().all(|&v| v == 0.0));
    }
}
