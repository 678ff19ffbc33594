//! Bilateral (link) block generators.
//!
//! Four passes over the global link maps: rigid pins, Hookean extension
//! springs, angular bending springs, and three-body chord bending springs.
//! Link partners may live on any rank; their records are fetched through
//! the data directory, and their periodic image is chosen by minimum-image
//! shifting each coordinate toward the local anchor rod. A residual shift
//! beyond half a period is a fatal consistency error: the link is stretched
//! beyond the domain.

use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use syl_geometry::{
    collision_stress, curvature_vec, find_pbc_image, quat_from_z_to, slerp_mid,
};
use syl_spatial::{DataDirectory, SpatialError};
use syl_types::{Gid, LinkMaps, NearRod, Sylinder};

use crate::{ConstraintBlock, ConstraintCollector};

/// Geometry and stiffness inputs shared by the link passes.
#[derive(Debug, Clone, Copy)]
pub struct LinkParams {
    /// Simulation box lower corner.
    pub sim_box_low: [f64; 3],
    /// Simulation box upper corner.
    pub sim_box_high: [f64; 3],
    /// Periodic flag per axis.
    pub pbc: [bool; 3],
    /// Extension spring stiffness.
    pub extend_kappa: f64,
    /// Extension spring rest gap.
    pub extend_gap: f64,
    /// Bending stiffness per director.
    pub bend_kappa: [f64; 3],
    /// Preferred curvature per director.
    pub preferred_curvature: [f64; 3],
}

impl LinkParams {
    /// Shift `pos` to the periodic image nearest to `anchor`.
    ///
    /// # Errors
    ///
    /// Fatal when the shifted coordinate still sits more than half a period
    /// from the anchor on any periodic axis.
    fn wrap_to_anchor(
        &self,
        mut pos: Point3<f64>,
        anchor: &Point3<f64>,
        gid: Gid,
    ) -> crate::Result<Point3<f64>> {
        for axis in 0..3 {
            if !self.pbc[axis] {
                continue;
            }
            let lo = self.sim_box_low[axis];
            let hi = self.sim_box_high[axis];
            pos[axis] = find_pbc_image(lo, hi, pos[axis], anchor[axis]);
            if (pos[axis] - anchor[axis]).abs() > 0.5 * (hi - lo) * (1.0 + 1e-12) {
                return Err(SpatialError::PbcImageOutOfRange { gid, axis }.into());
            }
        }
        Ok(pos)
    }
}

/// Fetch the directory records of every partner of every local rod, in rod
/// order, with per-rod displacement offsets.
///
/// The directory query is collective, so this must run on every rank even
/// when the local rod list or the link map is empty.
fn find_partners<'a>(
    rods: &[Sylinder],
    partners: impl Fn(Gid) -> &'a [Gid],
    directory: &DataDirectory<NearRod>,
) -> crate::Result<(Vec<NearRod>, Vec<usize>)> {
    let mut gid_to_find = Vec::new();
    let mut displ = Vec::with_capacity(rods.len() + 1);
    displ.push(0);
    for sy in rods {
        gid_to_find.extend_from_slice(partners(sy.gid));
        displ.push(gid_to_find.len());
    }
    let found = directory.find(&gid_to_find)?;
    Ok((found, displ))
}

fn reduce_queues(
    folded: impl ParallelIterator<Item = crate::Result<Vec<ConstraintBlock>>>,
) -> crate::Result<Vec<ConstraintBlock>> {
    folded.try_reduce(Vec::new, |mut a, mut b| {
        a.append(&mut b);
        Ok(a)
    })
}

/// Rigid pin: three bilateral blocks forcing the plus end of I onto the
/// minus end of J, one per world axis.
pub fn collect_pin_links(
    rods: &[Sylinder],
    maps: &LinkMaps,
    directory: &DataDirectory<NearRod>,
    params: &LinkParams,
    collector: &mut ConstraintCollector,
) -> crate::Result<()> {
    let (found, displ) = find_partners(rods, |gid| maps.pins_of(gid), directory)?;

    let blocks = reduce_queues(rods.par_iter().enumerate().try_fold(
        Vec::new,
        |mut queue, (i, sy)| {
            for record in &found[displ[i]..displ[i + 1]] {
                let center_j = params.wrap_to_anchor(record.pos, &sy.pos, record.gid)?;
                let p_plus = sy.end_plus();
                let q_minus = center_j - record.direction * (0.5 * record.length);
                let rvec = p_plus - q_minus;
                let arm_i = p_plus - sy.pos;
                let arm_j = q_minus - center_j;

                for axis in 0..3 {
                    let mut normal = Vector3::zeros();
                    normal[axis] = 1.0;
                    let force_i = normal;
                    let force_j = -normal;
                    queue.push(
                        ConstraintBlock::two_body(
                            rvec[axis],
                            0.0,
                            (sy.gid, sy.global_index),
                            (record.gid, record.global_index),
                            force_i,
                            force_j,
                            arm_i.cross(&force_i),
                            arm_j.cross(&force_j),
                            p_plus,
                            q_minus,
                            false,
                            true,
                            0.0, // rigid
                        )
                        .with_stress(collision_stress(&normal, &p_plus, &q_minus)),
                    );
                }
            }
            Ok(queue)
        },
    ))?;
    collector.append(blocks);
    Ok(())
}

/// Extension spring: one soft bilateral block per link with target length
/// `radius_i + radius_j + gap`.
pub fn collect_extend_links(
    rods: &[Sylinder],
    maps: &LinkMaps,
    directory: &DataDirectory<NearRod>,
    params: &LinkParams,
    collector: &mut ConstraintCollector,
) -> crate::Result<()> {
    let (found, displ) = find_partners(rods, |gid| maps.extends_of(gid), directory)?;

    let blocks = reduce_queues(rods.par_iter().enumerate().try_fold(
        Vec::new,
        |mut queue, (i, sy)| {
            for record in &found[displ[i]..displ[i + 1]] {
                let center_j = params.wrap_to_anchor(record.pos, &sy.pos, record.gid)?;
                let p_plus = sy.end_plus();
                let q_minus = center_j - record.direction * (0.5 * record.length);
                let span = p_plus - q_minus;
                let length = span.norm();
                let delta0 = length - sy.radius - record.radius - params.extend_gap;
                let normal = if length > 1e-12 {
                    span / length
                } else {
                    sy.direction()
                };
                let force_i = normal;
                let force_j = -normal;
                let arm_i = p_plus - sy.pos;
                let arm_j = q_minus - center_j;
                queue.push(
                    ConstraintBlock::two_body(
                        delta0,
                        (-delta0).max(0.0),
                        (sy.gid, sy.global_index),
                        (record.gid, record.global_index),
                        force_i,
                        force_j,
                        arm_i.cross(&force_i),
                        arm_j.cross(&force_j),
                        p_plus,
                        q_minus,
                        false,
                        true,
                        params.extend_kappa,
                    )
                    .with_stress(collision_stress(&normal, &p_plus, &q_minus)),
                );
            }
            Ok(queue)
        },
    ))?;
    collector.append(blocks);
    Ok(())
}

/// Bending spring: three bilateral blocks on the relative orientation of I
/// and J about the mid-frame directors.
///
/// The mid frame is `slerp(q_i, q_j, 1/2)`; the curvature vector is the
/// vector part of `q_i* q_j - q_i q_j*`. The constraint applies pure
/// torques `-d_k` on I and `+d_k` on J with zero translational force.
pub fn collect_bend_links(
    rods: &[Sylinder],
    maps: &LinkMaps,
    directory: &DataDirectory<NearRod>,
    params: &LinkParams,
    collector: &mut ConstraintCollector,
) -> crate::Result<()> {
    let (found, displ) = find_partners(rods, |gid| maps.bends_of(gid), directory)?;

    let blocks = reduce_queues(rods.par_iter().enumerate().try_fold(
        Vec::new,
        |mut queue, (i, sy)| {
            for record in &found[displ[i]..displ[i + 1]] {
                let center_j = params.wrap_to_anchor(record.pos, &sy.pos, record.gid)?;
                let p_plus = sy.end_plus();
                let q_minus = center_j - record.direction * (0.5 * record.length);

                let q_i = sy.orientation;
                let q_j = quat_from_z_to(&record.direction);
                let q_mid = slerp_mid(&q_i, &q_j);
                let curvature = curvature_vec(&q_i, &q_j);

                for axis in 0..3 {
                    let mut body = Vector3::zeros();
                    body[axis] = 1.0;
                    let director = q_mid * body;
                    let torque_i = -director;
                    queue.push(ConstraintBlock::two_body(
                        curvature[axis] - params.preferred_curvature[axis],
                        0.0,
                        (sy.gid, sy.global_index),
                        (record.gid, record.global_index),
                        Vector3::zeros(),
                        Vector3::zeros(),
                        torque_i,
                        -torque_i,
                        p_plus,
                        q_minus,
                        false,
                        true,
                        params.bend_kappa[axis],
                    ));
                }
            }
            Ok(queue)
        },
    ))?;
    collector.append(blocks);
    Ok(())
}

/// Three-body chord bending: three bilateral blocks on the orientation
/// implied by the chords J->I and I->K.
///
/// The unit torque about each mid-frame director is distributed into
/// center-of-mass forces on J, I, K through the pseudo-inverse of the
/// rank-2 chord inertia tensor `d^2 (e e^T - I)`, whose action is `-d^2`
/// on the plane normal to the chord. The resulting forces have zero net
/// force and torque on the triple while producing the requested moment.
pub fn collect_tri_bend_links(
    rods: &[Sylinder],
    maps: &LinkMaps,
    directory: &DataDirectory<NearRod>,
    params: &LinkParams,
    collector: &mut ConstraintCollector,
) -> crate::Result<()> {
    // Partner pairs flatten to (left, right) per link, two finds per link.
    let mut gid_to_find = Vec::new();
    let mut displ = Vec::with_capacity(rods.len() + 1);
    displ.push(0);
    for sy in rods {
        for &(left, right) in maps.tri_bends_of(sy.gid) {
            gid_to_find.push(left);
            gid_to_find.push(right);
        }
        displ.push(gid_to_find.len() / 2);
    }
    let found = directory.find(&gid_to_find)?;

    let blocks = reduce_queues(rods.par_iter().enumerate().try_fold(
        Vec::new,
        |mut queue, (i, sy)| {
            for link in displ[i]..displ[i + 1] {
                let rec_j = &found[2 * link];
                let rec_k = &found[2 * link + 1];
                let center_i = sy.pos;
                let center_j = params.wrap_to_anchor(rec_j.pos, &center_i, rec_j.gid)?;
                let center_k = params.wrap_to_anchor(rec_k.pos, &center_i, rec_k.gid)?;

                let chord_ji = center_i - center_j;
                let chord_ik = center_k - center_i;
                let dist_ji = chord_ji.norm();
                let dist_ik = chord_ik.norm();
                if dist_ji <= 1e-12 || dist_ik <= 1e-12 {
                    continue; // coincident centers carry no chord direction
                }
                let e_ji = chord_ji / dist_ji;
                let e_ik = chord_ik / dist_ik;

                let q_ji = quat_from_z_to(&e_ji);
                let q_ik = quat_from_z_to(&e_ik);
                let q_mid = slerp_mid(&q_ji, &q_ik);
                let curvature = curvature_vec(&q_ji, &q_ik);

                // Pseudo-inverse of d^2 (e e^T - I): -(1/d^2) on the plane
                // normal to e, null along e.
                let pinv = |e: &Vector3<f64>, d: f64| -> Matrix3<f64> {
                    (Matrix3::identity() - e * e.transpose()) * (-1.0 / (d * d))
                };
                let pinv_ji = pinv(&e_ji, dist_ji);
                let pinv_ik = pinv(&e_ik, dist_ik);

                for axis in 0..3 {
                    let mut body = Vector3::zeros();
                    body[axis] = 1.0;
                    let director = q_mid * body;
                    let torque_ji = -director;
                    let torque_ik = director;

                    let lever_ji = pinv_ji * (chord_ji).cross(&torque_ji);
                    let lever_ik = pinv_ik * (chord_ik).cross(&torque_ik);
                    let force_j = -lever_ji;
                    let force_i = lever_ji - lever_ik;
                    let force_k = lever_ik;

                    queue.push(ConstraintBlock::three_body(
                        curvature[axis] - params.preferred_curvature[axis],
                        0.0,
                        (sy.gid, sy.global_index),
                        (rec_j.gid, rec_j.global_index),
                        (rec_k.gid, rec_k.global_index),
                        [force_i, force_j, force_k],
                        [Vector3::zeros(), Vector3::zeros(), Vector3::zeros()],
                        [center_i, center_j, center_k],
                        true,
                        params.bend_kappa[axis],
                    ));
                }
            }
            Ok(queue)
        },
    ))?;
    collector.append(blocks);
    Ok(())
}
