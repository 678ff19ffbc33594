//! Unilateral (collision) block generators.
//!
//! Two passes: rod-rod candidates from the neighbor search, and rod-boundary
//! contacts against the configured confinement primitives.

use nalgebra::Vector3;
use rayon::prelude::*;
use syl_geometry::{collision_stress, segment_closest_points, Boundary};
use syl_spatial::NearPair;
use syl_types::{LinkMaps, NearRod, Sylinder};

use crate::{ConstraintBlock, ConstraintCollector};

/// Fallback contact normal for exactly coincident closest points.
fn safe_normal(v: Vector3<f64>, norm: f64) -> Vector3<f64> {
    if norm > 1e-12 {
        v / norm
    } else {
        Vector3::z()
    }
}

/// Emit one unilateral block per neighbor pair whose separation is below
/// the collision buffer.
///
/// The symmetric (i, j) and (j, i) duplicates from the search are
/// deduplicated by keeping only `gid_i < gid_j`. Pairs joined by a pin link
/// are skipped: the rigid link holds the rods in contact on purpose. Pairs
/// where both rods are immovable are skipped as well, since no multiplier
/// can move either body.
pub fn collect_pair_collisions(
    rods: &[Sylinder],
    pairs: &[NearPair<NearRod>],
    links: &LinkMaps,
    buffer_ratio: f64,
    collector: &mut ConstraintCollector,
) {
    let blocks: Vec<ConstraintBlock> = pairs
        .par_iter()
        .fold(Vec::new, |mut queue, pair| {
            let target = &rods[pair.target_index];
            let source = &pair.source;
            if target.gid >= source.gid {
                return queue; // keep each unordered pair once
            }
            if target.is_immovable && source.is_immovable {
                return queue;
            }
            if links.pins_of(target.gid).contains(&source.gid)
                || links.pins_of(source.gid).contains(&target.gid)
            {
                return queue;
            }

            let center_j = source.pos + pair.shift;
            let dir_j = source.direction;
            let half_j = 0.5 * source.length_collision;
            let sep = segment_closest_points(
                &target.end_minus_collision(),
                &target.end_plus_collision(),
                &(center_j - dir_j * half_j),
                &(center_j + dir_j * half_j),
            );

            let r_i = target.radius_collision;
            let r_j = source.radius_collision;
            let gap = sep.distance - r_i - r_j;
            if gap >= buffer_ratio * r_i {
                return queue;
            }

            let normal = safe_normal(sep.point_j - sep.point_i, sep.distance);
            let force_i = -normal;
            let force_j = normal;
            let torque_i = (sep.point_i - target.pos).cross(&force_i);
            let torque_j = (sep.point_j - center_j).cross(&force_j);

            queue.push(
                ConstraintBlock::two_body(
                    gap,
                    (-gap).max(0.0),
                    (target.gid, target.global_index),
                    (source.gid, source.global_index),
                    force_i,
                    force_j,
                    torque_i,
                    torque_j,
                    sep.point_i,
                    sep.point_j,
                    false,
                    false,
                    0.0,
                )
                .with_stress(collision_stress(&normal, &sep.point_i, &sep.point_j)),
            );
            queue
        })
        .reduce(Vec::new, |mut a, mut b| {
            a.append(&mut b);
            a
        });
    collector.append(blocks);
}

/// Emit one-sided blocks for rods touching or escaping the confinement
/// boundaries.
///
/// Each rod end (or the center, for spherical rods) is projected on every
/// boundary. A point outside the boundary gets `delta0 = -|delta| - r`; a
/// point inside but within `(1 + 2 buffer) r` of the surface gets
/// `delta0 = |delta| - r`. The block is one-sided: the J fields duplicate I
/// and receive no mobility contribution.
pub fn collect_boundary_collisions(
    rods: &[Sylinder],
    boundaries: &[Boundary],
    buffer_ratio: f64,
    collector: &mut ConstraintCollector,
) {
    for boundary in boundaries {
        let blocks: Vec<ConstraintBlock> = rods
            .par_iter()
            .fold(Vec::new, |mut queue, sy| {
                if sy.is_immovable {
                    return queue;
                }
                let mut check_end = |queue: &mut Vec<ConstraintBlock>,
                                     query: nalgebra::Point3<f64>,
                                     radius: f64| {
                    let proj = boundary.project(&query);
                    let dist = proj.delta.norm();
                    if dist <= 1e-14 {
                        return; // point exactly on the surface; no direction
                    }
                    let normal = proj.delta / dist;
                    let escaped = (query - proj.point).dot(&proj.delta) < 0.0;
                    let delta0 = if escaped {
                        -dist - radius
                    } else if dist < (1.0 + 2.0 * buffer_ratio) * radius {
                        dist - radius
                    } else {
                        return;
                    };
                    let arm = query - sy.pos;
                    let torque = arm.cross(&normal);
                    queue.push(ConstraintBlock::two_body(
                        delta0,
                        0.0,
                        (sy.gid, sy.global_index),
                        (sy.gid, sy.global_index),
                        normal,
                        normal,
                        torque,
                        torque,
                        query,
                        proj.point,
                        true,
                        false,
                        0.0,
                    ));
                };

                if sy.is_sphere() {
                    let radius = 0.5 * sy.length_collision + sy.radius_collision;
                    check_end(&mut queue, sy.pos, radius);
                } else {
                    check_end(&mut queue, sy.end_minus_collision(), sy.radius_collision);
                    check_end(&mut queue, sy.end_plus_collision(), sy.radius_collision);
                }
                queue
            })
            .reduce(Vec::new, |mut a, mut b| {
                a.append(&mut b);
                a
            });
        collector.append(blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, UnitQuaternion};
    use syl_types::Gid;

    fn rod(gid: i64, x: f64, index: usize) -> Sylinder {
        let mut sy = Sylinder::new(
            Gid::new(gid),
            0.1,
            1.0,
            Point3::new(x, 0.0, 0.0),
            UnitQuaternion::identity(), // axis along z
        );
        sy.global_index = index;
        sy
    }

    fn pair_of(rods: &[Sylinder], t: usize, s: usize) -> NearPair<NearRod> {
        NearPair {
            target_index: t,
            source: NearRod::from_sylinder(&rods[s], 0.3),
            shift: Vector3::zeros(),
        }
    }

    #[test]
    fn overlapping_rods_produce_one_block() {
        // Two parallel rods 0.15 apart with radius 0.1: overlap of 0.05.
        let rods = vec![rod(0, 0.0, 0), rod(1, 0.15, 1)];
        let pairs = vec![pair_of(&rods, 0, 1), pair_of(&rods, 1, 0)];
        let mut collector = ConstraintCollector::new();
        collect_pair_collisions(&rods, &pairs, &LinkMaps::new(), 0.3, &mut collector);

        // The (1, 0) duplicate is dropped.
        assert_eq!(collector.len(), 1);
        let block = &collector.blocks()[0];
        assert!(block.gid_i < block.gid_j);
        assert_relative_eq!(block.delta0, -0.05, epsilon = 1e-12);
        assert_relative_eq!(block.gamma, 0.05, epsilon = 1e-12);
        assert!(!block.bilateral);

        // Force on J opposes force on I; torque is arm x force.
        assert_relative_eq!((block.force_i + block.force_j).norm(), 0.0, epsilon = 1e-14);
        assert_relative_eq!(block.force_j.x, 1.0, epsilon = 1e-12);
        let arm = block.lab_i - rods[0].pos;
        assert_relative_eq!(
            (block.torque_i - arm.cross(&block.force_i)).norm(),
            0.0,
            epsilon = 1e-14
        );
        // Buffer invariant.
        assert!(block.delta0 <= 0.3 * rods[0].radius_collision);
    }

    #[test]
    fn separated_rods_within_buffer() {
        // Gap of 0.02 < buffer 0.3 * 0.1 = 0.03: still a constraint.
        let rods = vec![rod(0, 0.0, 0), rod(1, 0.22, 1)];
        let pairs = vec![pair_of(&rods, 0, 1)];
        let mut collector = ConstraintCollector::new();
        collect_pair_collisions(&rods, &pairs, &LinkMaps::new(), 0.3, &mut collector);
        assert_eq!(collector.len(), 1);
        let block = &collector.blocks()[0];
        assert_relative_eq!(block.delta0, 0.02, epsilon = 1e-12);
        assert_relative_eq!(block.gamma, 0.0, epsilon = 1e-12);

        // Gap of 0.05 > 0.03: no constraint.
        let rods = vec![rod(0, 0.0, 0), rod(1, 0.25, 1)];
        let pairs = vec![pair_of(&rods, 0, 1)];
        let mut collector = ConstraintCollector::new();
        collect_pair_collisions(&rods, &pairs, &LinkMaps::new(), 0.3, &mut collector);
        assert!(collector.is_empty());
    }

    #[test]
    fn pinned_pairs_are_skipped() {
        let rods = vec![rod(0, 0.0, 0), rod(1, 0.15, 1)];
        let pairs = vec![pair_of(&rods, 0, 1)];
        let mut links = LinkMaps::new();
        links.insert_pin(syl_types::Link {
            prev: Gid::new(1),
            next: Gid::new(0),
        });
        let mut collector = ConstraintCollector::new();
        collect_pair_collisions(&rods, &pairs, &links, 0.3, &mut collector);
        assert!(collector.is_empty());
    }

    #[test]
    fn wall_sphere_block() {
        // A sphere of radius 0.5 at z = 0.4 above the z = 0 wall:
        // delta0 = 0.4 - 0.5 = -0.1.
        let mut sy = Sylinder::new(
            Gid::new(0),
            0.5,
            0.0,
            Point3::new(0.0, 0.0, 0.4),
            UnitQuaternion::identity(),
        );
        sy.length_collision = 0.0;
        let wall = Boundary::Wall {
            center: [0.0, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
        };
        let mut collector = ConstraintCollector::new();
        collect_boundary_collisions(&[sy], &[wall], 0.3, &mut collector);
        assert_eq!(collector.len(), 1);
        let block = &collector.blocks()[0];
        assert!(block.one_side);
        assert_relative_eq!(block.delta0, -0.1, epsilon = 1e-12);
        // The push is away from the wall.
        assert_relative_eq!(block.force_i.z, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn escaped_end_gets_negative_gap() {
        // A rod poking through the wall from above.
        let mut sy = Sylinder::new(
            Gid::new(0),
            0.1,
            1.0,
            Point3::new(0.0, 0.0, 0.2),
            UnitQuaternion::identity(),
        );
        sy.global_index = 0;
        let wall = Boundary::Wall {
            center: [0.0, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
        };
        let mut collector = ConstraintCollector::new();
        collect_boundary_collisions(&[sy], &[wall], 0.3, &mut collector);
        // The minus end is at z = -0.3 (escaped); the plus end at z = 0.7
        // is beyond the buffer band (1 + 0.6) * 0.1 = 0.16.
        assert_eq!(collector.len(), 1);
        let block = &collector.blocks()[0];
        assert_relative_eq!(block.delta0, -0.3 - 0.1, epsilon = 1e-12);
    }
}
