//! The rod record and its shippable "near" subset.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use syl_geometry::rotate_by_omega;

/// Globally unique rod identifier. Never reused within a simulation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Gid(pub i64);

impl Gid {
    /// Wrap a raw id.
    #[must_use]
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub fn raw(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Gid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One spherocylinder.
///
/// The body z-axis is the rod's long axis; the lab-frame direction is
/// `orientation * e_z`. Collision length and radius may differ from the
/// physical values by the configured ratios and are refreshed at the start
/// of every step. Force, torque and velocity accumulators are partitioned by
/// origin so the constraint solver and diagnostics can tell them apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sylinder {
    /// Globally unique id.
    pub gid: Gid,
    /// Contiguous global index, rebuilt each step after exchange.
    pub global_index: usize,
    /// Owning rank hint, refreshed after exchange.
    pub rank: usize,
    /// User grouping tag from the data file.
    pub group: i32,

    /// Center position.
    pub pos: Point3<f64>,
    /// Unit orientation; body z is the long axis.
    pub orientation: UnitQuaternion<f64>,
    /// Physical length of the cylindrical part.
    pub length: f64,
    /// Physical cap radius.
    pub radius: f64,
    /// Length used for collision geometry.
    pub length_collision: f64,
    /// Radius used for collision geometry.
    pub radius_collision: f64,
    /// Immovable rods have zero mobility and never move.
    pub is_immovable: bool,

    /// Known (externally set) force, plus mobility-applied part.
    pub force_ext: Vector3<f64>,
    /// Known torque.
    pub torque_ext: Vector3<f64>,
    /// Unilateral (collision) constraint force.
    pub force_col: Vector3<f64>,
    /// Unilateral constraint torque.
    pub torque_col: Vector3<f64>,
    /// Bilateral (link) constraint force.
    pub force_bi: Vector3<f64>,
    /// Bilateral constraint torque.
    pub torque_bi: Vector3<f64>,

    /// Known (non-Brownian, non-constraint) velocity.
    pub vel_known: Vector3<f64>,
    /// Known angular velocity.
    pub omega_known: Vector3<f64>,
    /// Brownian velocity for this step.
    pub vel_brown: Vector3<f64>,
    /// Brownian angular velocity.
    pub omega_brown: Vector3<f64>,
    /// Unilateral constraint velocity.
    pub vel_col: Vector3<f64>,
    /// Unilateral constraint angular velocity.
    pub omega_col: Vector3<f64>,
    /// Bilateral constraint velocity.
    pub vel_bi: Vector3<f64>,
    /// Bilateral constraint angular velocity.
    pub omega_bi: Vector3<f64>,
    /// Total velocity, summed just before integration.
    pub vel: Vector3<f64>,
    /// Total angular velocity.
    pub omega: Vector3<f64>,
}

impl Sylinder {
    /// Create a rod at `pos` with the given orientation. Collision geometry
    /// starts equal to the physical geometry.
    #[must_use]
    pub fn new(
        gid: Gid,
        radius: f64,
        length: f64,
        pos: Point3<f64>,
        orientation: UnitQuaternion<f64>,
    ) -> Self {
        Self {
            gid,
            global_index: 0,
            rank: 0,
            group: -1,
            pos,
            orientation,
            length,
            radius,
            length_collision: length,
            radius_collision: radius,
            is_immovable: false,
            force_ext: Vector3::zeros(),
            torque_ext: Vector3::zeros(),
            force_col: Vector3::zeros(),
            torque_col: Vector3::zeros(),
            force_bi: Vector3::zeros(),
            torque_bi: Vector3::zeros(),
            vel_known: Vector3::zeros(),
            omega_known: Vector3::zeros(),
            vel_brown: Vector3::zeros(),
            omega_brown: Vector3::zeros(),
            vel_col: Vector3::zeros(),
            omega_col: Vector3::zeros(),
            vel_bi: Vector3::zeros(),
            omega_bi: Vector3::zeros(),
            vel: Vector3::zeros(),
            omega: Vector3::zeros(),
        }
    }

    /// Create a rod from its two physical end points (cap centers).
    #[must_use]
    pub fn from_endpoints(gid: Gid, radius: f64, minus: Point3<f64>, plus: Point3<f64>) -> Self {
        let span = plus - minus;
        let length = span.norm();
        let orientation = if length > 1e-7 {
            syl_geometry::quat_from_z_to(&(span / length))
        } else {
            UnitQuaternion::identity()
        };
        let center = nalgebra::center(&minus, &plus);
        Self::new(gid, radius, length, center, orientation)
    }

    /// Lab-frame direction of the long axis.
    #[must_use]
    pub fn direction(&self) -> Vector3<f64> {
        self.orientation * Vector3::z()
    }

    /// Minus end of the collision centerline.
    #[must_use]
    pub fn end_minus_collision(&self) -> Point3<f64> {
        self.pos - self.direction() * (0.5 * self.length_collision)
    }

    /// Plus end of the collision centerline.
    #[must_use]
    pub fn end_plus_collision(&self) -> Point3<f64> {
        self.pos + self.direction() * (0.5 * self.length_collision)
    }

    /// Minus end of the physical centerline.
    #[must_use]
    pub fn end_minus(&self) -> Point3<f64> {
        self.pos - self.direction() * (0.5 * self.length)
    }

    /// Plus end of the physical centerline.
    #[must_use]
    pub fn end_plus(&self) -> Point3<f64> {
        self.pos + self.direction() * (0.5 * self.length)
    }

    /// Whether the collision geometry degenerates to a sphere.
    #[must_use]
    pub fn is_sphere(&self) -> bool {
        self.length_collision < 2.0 * self.radius_collision
    }

    /// Zero all per-step accumulators.
    pub fn clear(&mut self) {
        self.force_ext = Vector3::zeros();
        self.torque_ext = Vector3::zeros();
        self.force_col = Vector3::zeros();
        self.torque_col = Vector3::zeros();
        self.force_bi = Vector3::zeros();
        self.torque_bi = Vector3::zeros();
        self.vel_known = Vector3::zeros();
        self.omega_known = Vector3::zeros();
        self.vel_brown = Vector3::zeros();
        self.omega_brown = Vector3::zeros();
        self.vel_col = Vector3::zeros();
        self.omega_col = Vector3::zeros();
        self.vel_bi = Vector3::zeros();
        self.omega_bi = Vector3::zeros();
        self.vel = Vector3::zeros();
        self.omega = Vector3::zeros();
    }

    /// Advance position and orientation by one Euler step of the summed
    /// velocity, renormalising the orientation.
    pub fn step_euler(&mut self, dt: f64) {
        self.pos += self.vel * dt;
        self.orientation = rotate_by_omega(&self.orientation, &self.omega, dt);
    }
}

/// Read-only rod subset shipped between ranks.
///
/// Every rank that observes a rod sees bit-identical values, so quantities
/// derived from a `NearRod` (drag, mobility blocks) agree with the owner's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearRod {
    /// Globally unique id.
    pub gid: Gid,
    /// Contiguous global index at the time of publication.
    pub global_index: usize,
    /// Owning rank at the time of publication.
    pub rank: usize,
    /// Center position.
    pub pos: Point3<f64>,
    /// Lab-frame direction of the long axis.
    pub direction: Vector3<f64>,
    /// Physical length.
    pub length: f64,
    /// Collision length.
    pub length_collision: f64,
    /// Physical radius.
    pub radius: f64,
    /// Collision radius.
    pub radius_collision: f64,
    /// Collision buffer ratio in effect when published.
    pub col_buf: f64,
    /// Immovable flag, needed to rebuild the owner's mobility block.
    pub is_immovable: bool,
}

impl NearRod {
    /// Build the shippable record from an owned rod.
    #[must_use]
    pub fn from_sylinder(sy: &Sylinder, col_buf: f64) -> Self {
        Self {
            gid: sy.gid,
            global_index: sy.global_index,
            rank: sy.rank,
            pos: sy.pos,
            direction: sy.direction(),
            length: sy.length,
            length_collision: sy.length_collision,
            radius: sy.radius,
            radius_collision: sy.radius_collision,
            col_buf,
            is_immovable: sy.is_immovable,
        }
    }

    /// Radius of the bounding ball used by the neighbor search: half the
    /// collision centerline plus the buffered collision radius.
    #[must_use]
    pub fn search_radius(&self) -> f64 {
        0.5 * self.length_collision + self.radius_collision * (1.0 + self.col_buf)
    }

    /// Minus end of the collision centerline.
    #[must_use]
    pub fn end_minus_collision(&self) -> Point3<f64> {
        self.pos - self.direction * (0.5 * self.length_collision)
    }

    /// Plus end of the collision centerline.
    #[must_use]
    pub fn end_plus_collision(&self) -> Point3<f64> {
        self.pos + self.direction * (0.5 * self.length_collision)
    }

    /// Minus end of the physical centerline.
    #[must_use]
    pub fn end_minus(&self) -> Point3<f64> {
        self.pos - self.direction * (0.5 * self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn endpoints_roundtrip() {
        let m = Point3::new(-0.5, 0.0, 0.0);
        let p = Point3::new(0.5, 0.0, 0.0);
        let sy = Sylinder::from_endpoints(Gid::new(3), 0.1, m, p);
        assert_relative_eq!(sy.length, 1.0, epsilon = 1e-12);
        assert_relative_eq!((sy.end_minus() - m).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((sy.end_plus() - p).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn euler_step_reverses_to_second_order() {
        let mut sy = Sylinder::new(
            Gid::new(0),
            0.1,
            1.0,
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let q0 = sy.orientation;
        sy.vel = Vector3::new(1.0, -2.0, 0.5);
        sy.omega = Vector3::new(0.4, 0.0, -0.3);
        let dt = 1e-3;
        sy.step_euler(dt);
        sy.step_euler(-dt);
        assert_relative_eq!(sy.pos.coords.norm(), 0.0, epsilon = dt * dt);
        assert!(sy.orientation.angle_to(&q0) < dt * dt);
    }

    #[test]
    fn near_record_is_consistent() {
        let sy = Sylinder::new(
            Gid::new(7),
            0.1,
            1.0,
            Point3::new(1.0, 2.0, 3.0),
            UnitQuaternion::identity(),
        );
        let near = NearRod::from_sylinder(&sy, 0.3);
        assert_eq!(near.gid, sy.gid);
        assert_relative_eq!(
            near.search_radius(),
            0.5 + 0.1 * 1.3,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            (near.end_minus_collision() - sy.end_minus_collision()).norm(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn sphere_detection() {
        let mut sy = Sylinder::new(
            Gid::new(0),
            0.5,
            0.3,
            Point3::origin(),
            UnitQuaternion::identity(),
        );
        assert!(sy.is_sphere());
        sy.length_collision = 2.0;
        assert!(!sy.is_sphere());
    }
}
