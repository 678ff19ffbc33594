//! A two-rank in-process world must reproduce the solo run bit-for-bit in
//! physics terms: same pairs, same multipliers, same trajectories.

use nalgebra::{Point3, Vector3};
use syl_core::SylinderSystem;
use syl_geometry::quat_from_z_to;
use syl_spatial::{Comm, CommWorld};
use syl_types::{Gid, LinkMaps, RunConfig, Sylinder};

fn config() -> RunConfig {
    RunConfig {
        sim_box_low: [-10.0; 3],
        sim_box_high: [10.0; 3],
        sim_box_pbc: [false; 3],
        dt: 0.05,
        time_snap: 1e6,
        con_res_tol: 1e-11,
        con_max_ite: 20_000,
        init_pre_steps: 0,
        viscosity: 1.0,
        kbt: 0.0,
        ..RunConfig::default()
    }
}

/// A loose chain of rods with several overlapping neighbors.
fn population() -> Vec<Sylinder> {
    (0..6)
        .map(|i| {
            let mut sy = Sylinder::new(
                Gid::new(i),
                0.1,
                1.0,
                Point3::new(i as f64 * 0.18 - 0.5, 0.02 * i as f64, 0.0),
                quat_from_z_to(&Vector3::z()),
            );
            sy.group = i as i32;
            sy
        })
        .collect()
}

fn run_steps(system: &mut SylinderSystem, steps: usize) -> Vec<(i64, Point3<f64>)> {
    for _ in 0..steps {
        system.prepare_step().unwrap();
        system.run_step().unwrap();
    }
    system
        .rods()
        .iter()
        .map(|sy| (sy.gid.raw(), sy.pos))
        .collect()
}

#[test]
fn two_ranks_match_solo() {
    let steps = 3;

    let mut solo = SylinderSystem::from_parts(
        config(),
        population(),
        LinkMaps::new(),
        Comm::solo(),
    )
    .unwrap();
    let out = tempfile::tempdir().unwrap();
    solo.set_output_base(out.path().to_path_buf());
    let mut reference = run_steps(&mut solo, steps);
    reference.sort_by_key(|(gid, _)| *gid);

    let world = CommWorld::new(2);
    let out2 = tempfile::tempdir().unwrap();
    let out2_path = out2.path().to_path_buf();
    let collected: Vec<Vec<(i64, Point3<f64>)>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let comm = Comm::world(&world, rank);
                let out_path = out2_path.clone();
                scope.spawn(move || {
                    let mine: Vec<Sylinder> = population()
                        .into_iter()
                        .filter(|sy| (sy.gid.raw() as usize) % 2 == rank)
                        .collect();
                    let mut system =
                        SylinderSystem::from_parts(config(), mine, LinkMaps::new(), comm)
                            .unwrap();
                    system.set_output_base(out_path);
                    run_steps(&mut system, steps)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut distributed: Vec<(i64, Point3<f64>)> =
        collected.into_iter().flatten().collect();
    distributed.sort_by_key(|(gid, _)| *gid);

    assert_eq!(distributed.len(), reference.len());
    for ((gid_a, pos_a), (gid_b, pos_b)) in reference.iter().zip(&distributed) {
        assert_eq!(gid_a, gid_b);
        let drift = (pos_a - pos_b).norm();
        assert!(
            drift < 1e-8,
            "gid {gid_a} diverged between solo and 2-rank runs: {drift}"
        );
    }
    // The overlapping chain must actually have produced contacts.
    assert!(!solo.last_blocks().is_empty());
}

#[test]
fn link_bookkeeping_is_collective() {
    let world = CommWorld::new(2);
    std::thread::scope(|scope| {
        for rank in 0..2 {
            let comm = Comm::world(&world, rank);
            scope.spawn(move || {
                let mine: Vec<Sylinder> = population()
                    .into_iter()
                    .filter(|sy| (sy.gid.raw() as usize) % 2 == rank)
                    .collect();
                let mut system =
                    SylinderSystem::from_parts(config(), mine, LinkMaps::new(), comm).unwrap();

                // Each rank proposes one link; both must end up everywhere.
                let proposal = vec![syl_types::Link {
                    prev: Gid::new(rank as i64),
                    next: Gid::new(rank as i64 + 2),
                }];
                system.add_new_extend_links(proposal);
                assert_eq!(system.links().extend_count(), 2);
                system.assert_links_consistent().unwrap();

                // New rods receive globally unique gids above the maximum.
                let fresh = system.add_new_sylinders(vec![Sylinder::new(
                    Gid::new(-1),
                    0.1,
                    1.0,
                    Point3::new(5.0 + rank as f64, 5.0, 5.0),
                    quat_from_z_to(&Vector3::z()),
                )]);
                assert_eq!(fresh.len(), 1);
                assert!(fresh[0].raw() > 5);
            });
        }
    });
}
