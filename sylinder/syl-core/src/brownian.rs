//! Brownian velocity by random finite differences.
//!
//! Translational noise uses the anisotropic mobility
//! `N = (1/g_par - 1/g_perp) q q^T + (1/g_perp) I` with its Cholesky square
//! root, plus the RFD drift term of Delong et al. (JCP 2015) evaluated with
//! a small orientation perturbation `delta = dt/10`. Rotational noise uses
//! the isotropically regularised rotational mobility, which removes the
//! slender-body null space without affecting the constraints.

use nalgebra::{Matrix3, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;
use syl_geometry::{drag_coefficients, rotate_by_omega};
use syl_types::Sylinder;

fn normal3(rng: &mut impl Rng) -> Vector3<f64> {
    Vector3::new(
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
    )
}

fn trans_mobility(q: &Vector3<f64>, para_inv: f64, perp_inv: f64) -> Matrix3<f64> {
    (q * q.transpose()) * (para_inv - perp_inv) + Matrix3::identity() * perp_inv
}

/// Draw this step's Brownian velocity and angular velocity for one rod.
///
/// Immovable rods receive zero noise.
#[must_use]
pub fn brownian_velocity(
    sy: &Sylinder,
    kbt: f64,
    viscosity: f64,
    dt: f64,
    rng: &mut impl Rng,
) -> (Vector3<f64>, Vector3<f64>) {
    if sy.is_immovable || kbt <= 0.0 {
        return (Vector3::zeros(), Vector3::zeros());
    }
    let drag = drag_coefficients(sy.length, sy.radius, viscosity);
    let para_inv = 1.0 / drag.para;
    let perp_inv = 1.0 / drag.perp;
    let rot_inv = 1.0 / drag.rot;

    let kbt_factor = (2.0 * kbt / dt).sqrt();
    let delta = 0.1 * dt;

    let q = sy.direction();
    let n_mat = trans_mobility(&q, para_inv, perp_inv);
    // N is symmetric positive definite; fall back to the isotropic part if
    // roundoff defeats the factorisation.
    let sqrt_n = nalgebra::Cholesky::new(n_mat)
        .map_or_else(|| Matrix3::identity() * perp_inv.sqrt(), |c| c.l());

    let w_rot = normal3(rng);
    let w_pos = normal3(rng);
    let w_rfd_rot = normal3(rng);
    let w_rfd_pos = normal3(rng);

    // RFD drift: difference quotient of the mobility under a small random
    // orientation kick.
    let orient_rfd = rotate_by_omega(&sy.orientation, &w_rfd_rot, delta);
    let q_rfd = orient_rfd * Vector3::z();
    let n_rfd = trans_mobility(&q_rfd, para_inv, perp_inv);

    let mut vel = sqrt_n * w_pos * kbt_factor;
    vel += (n_rfd - n_mat) * w_rfd_pos * (kbt / delta);
    let omega = w_rot * (rot_inv.sqrt() * kbt_factor);

    (vel, omega)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Point3, UnitQuaternion};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use syl_types::Gid;

    fn rod() -> Sylinder {
        Sylinder::new(
            Gid::new(0),
            0.1,
            1.0,
            Point3::origin(),
            UnitQuaternion::identity(),
        )
    }

    #[test]
    fn zero_temperature_is_quiet() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (v, w) = brownian_velocity(&rod(), 0.0, 1.0, 1e-3, &mut rng);
        assert_eq!(v, Vector3::zeros());
        assert_eq!(w, Vector3::zeros());
    }

    #[test]
    fn immovable_rod_is_quiet() {
        let mut sy = rod();
        sy.is_immovable = true;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (v, w) = brownian_velocity(&sy, 1.0, 1.0, 1e-3, &mut rng);
        assert_eq!(v, Vector3::zeros());
        assert_eq!(w, Vector3::zeros());
    }

    #[test]
    fn variance_scales_with_temperature() {
        // Sample many kicks and compare the empirical second moment of the
        // velocity against 2 kBT M / dt within a loose statistical band.
        let sy = rod();
        let kbt = 0.5;
        let dt = 1e-3;
        let n = 4000;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut second = 0.0;
        for _ in 0..n {
            let (v, _) = brownian_velocity(&sy, kbt, 1.0, dt, &mut rng);
            second += v.norm_squared();
        }
        second /= n as f64;

        let drag = drag_coefficients(1.0, 0.1, 1.0);
        let expected = 2.0 * kbt / dt * (1.0 / drag.para + 2.0 / drag.perp);
        let ratio = second / expected;
        assert!(
            (0.85..1.15).contains(&ratio),
            "velocity variance off: ratio {ratio}"
        );
    }
}
