//! End-to-end step scenarios on a single rank.

use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use syl_core::SylinderSystem;
use syl_geometry::{quat_from_z_to, segment_closest_points, Boundary};
use syl_spatial::Comm;
use syl_types::{Gid, LinkMaps, RunConfig, Sylinder};

fn base_config() -> RunConfig {
    RunConfig {
        sim_box_low: [-10.0; 3],
        sim_box_high: [10.0; 3],
        sim_box_pbc: [false; 3],
        dt: 0.1,
        time_snap: 1e6, // snapshots only when asked
        con_res_tol: 1e-10,
        con_max_ite: 10_000,
        init_pre_steps: 0,
        viscosity: 1.0,
        kbt: 0.0,
        ..RunConfig::default()
    }
}

fn x_rod(gid: i64, x: f64) -> Sylinder {
    Sylinder::new(
        Gid::new(gid),
        0.1,
        1.0,
        Point3::new(x, 0.0, 0.0),
        quat_from_z_to(&Vector3::x()),
    )
}

/// Two rods driven head-on must not interpenetrate after one step, and the
/// contact multiplier must be positive.
#[test]
fn head_on_pair_keeps_gap() {
    let mut system = SylinderSystem::from_parts(
        base_config(),
        vec![x_rod(0, -0.6), x_rod(1, 0.6)],
        LinkMaps::new(),
        Comm::solo(),
    )
    .unwrap();

    system.prepare_step().unwrap();
    // Drive the rods together at +-1.
    let mut velocity = vec![0.0; 12];
    velocity[0] = 1.0;
    velocity[6] = -1.0;
    system.set_velocity_external(velocity);
    system.run_step().unwrap();

    let rods = system.rods();
    let sep = segment_closest_points(
        &rods[0].end_minus(),
        &rods[0].end_plus(),
        &rods[1].end_minus(),
        &rods[1].end_plus(),
    );
    let gap = sep.distance - rods[0].radius - rods[1].radius;
    assert!(gap >= -1e-8, "rods interpenetrated: gap = {gap}");

    let contact = system
        .last_blocks()
        .iter()
        .find(|b| !b.bilateral)
        .expect("collision block must exist");
    assert!(contact.gamma > 0.0);
    assert!(contact.gid_i < contact.gid_j);
}

/// A sphere resting too close to a wall is pushed out to contact.
#[test]
fn wall_sphere_resolves_overlap() {
    let mut config = base_config();
    config.boundaries = vec![Boundary::Wall {
        center: [0.0, 0.0, 0.0],
        normal: [0.0, 0.0, 1.0],
    }];
    let mut sphere = Sylinder::new(
        Gid::new(0),
        0.5,
        0.0,
        Point3::new(0.0, 0.0, 0.4),
        quat_from_z_to(&Vector3::z()),
    );
    sphere.length_collision = 0.0;

    let mut system =
        SylinderSystem::from_parts(config, vec![sphere], LinkMaps::new(), Comm::solo()).unwrap();
    system.prepare_step().unwrap();
    system.run_step().unwrap();

    let z = system.rods()[0].pos.z;
    assert!(z >= 0.5 - 1e-8, "sphere still overlaps the wall: z = {z}");
}

/// Positions and orientations return to the start after a +dt/-dt pair of
/// steps within O(dt^2), with constraints quiet.
#[test]
fn euler_round_trip() {
    let mut system = SylinderSystem::from_parts(
        base_config(),
        vec![x_rod(0, -3.0), x_rod(1, 3.0)],
        LinkMaps::new(),
        Comm::solo(),
    )
    .unwrap();
    let start: Vec<(Point3<f64>, _)> = system
        .rods()
        .iter()
        .map(|sy| (sy.pos, sy.orientation))
        .collect();

    let dt = system.config().dt;
    let velocity = vec![0.3, -0.2, 0.5, 0.1, 0.0, -0.4, -0.6, 0.0, 0.2, 0.0, 0.3, 0.1];

    system.prepare_step().unwrap();
    system.set_velocity_external(velocity.clone());
    system.run_step().unwrap();

    system.prepare_step().unwrap();
    system.set_velocity_external(velocity.iter().map(|v| -v).collect());
    system.run_step().unwrap();

    for (sy, (pos0, orient0)) in system.rods().iter().zip(&start) {
        assert!((sy.pos - pos0).norm() <= dt * dt * 10.0);
        assert!(sy.orientation.angle_to(orient0) <= dt * dt * 10.0);
        // Orientation stays normalised through integration.
        assert_relative_eq!(sy.orientation.into_inner().norm(), 1.0, epsilon = 1e-12);
    }
}

/// Snapshot + restart descriptor round-trips the population.
#[test]
fn restart_roundtrip() {
    let out = tempfile::tempdir().unwrap();
    let mut system = SylinderSystem::from_parts(
        base_config(),
        vec![x_rod(0, -2.0), x_rod(1, 2.0)],
        LinkMaps::new(),
        Comm::solo(),
    )
    .unwrap();
    system.set_output_base(out.path().to_path_buf());
    system.prepare_step().unwrap();
    system.run_step().unwrap();
    system.write_result().unwrap();

    let restart = out.path().join("TimeStepInfo.txt");
    assert!(restart.exists());

    let resumed =
        SylinderSystem::reinitialize(base_config(), &restart, Comm::solo()).unwrap();
    assert_eq!(resumed.rods().len(), 2);
    assert_eq!(resumed.step_count(), system.step_count() + 1);
    // Restart advances the seed so the continuation draws fresh noise.
    let original = system.rods();
    for sy in resumed.rods() {
        let twin = original.iter().find(|o| o.gid == sy.gid).unwrap();
        assert!((sy.pos - twin.pos).norm() < 1e-6);
    }
}

/// The monolayer flag keeps motion in the mid-plane.
#[test]
fn monolayer_stays_planar() {
    let mut config = base_config();
    config.monolayer = true;
    let mid_z = 0.5 * (config.sim_box_high[2] + config.sim_box_low[2]);

    let mut rod = x_rod(0, 0.0);
    rod.pos.z = 3.3; // off-plane start
    let mut system =
        SylinderSystem::from_parts(config, vec![rod], LinkMaps::new(), Comm::solo()).unwrap();

    system.prepare_step().unwrap();
    let mut velocity = vec![0.0; 6];
    velocity[2] = 1.0; // try to push out of plane
    system.set_velocity_external(velocity);
    system.run_step().unwrap();

    assert_relative_eq!(system.rods()[0].pos.z, mid_z, epsilon = 1e-12);
}
