//! The distributed sylinder system and its timestep loop.
//!
//! Each rank owns a contiguous slice of the rod population (re-partitioned
//! by Morton-ordered sample sort as rods move) and drives the strictly
//! ordered step phases:
//!
//! 1. [`prepare_step`](SylinderSystem::prepare_step): box boundary
//!    conditions, exchange, accumulator reset, collision-geometry refresh,
//!    contiguous renumbering, directory publication, neighbor search,
//!    mobility rebuild;
//! 2. velocity setup: Brownian kicks and the known (external) velocity;
//! 3. constraint collection: pair and boundary collisions, then the four
//!    link passes;
//! 4. the bound-projected multiplier solve and write-back;
//! 5. snapshot output and the Euler update.
//!
//! Between `prepare_step` and [`run_step`](SylinderSystem::run_step) the
//! caller may inject external forces or velocities; rods must not be added,
//! removed or moved in that window.

use std::path::{Path, PathBuf};

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, LogNormal};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use syl_constraint::{
    collect_bend_links, collect_boundary_collisions, collect_extend_links,
    collect_pair_collisions, collect_pin_links, collect_tri_bend_links, solve_constraints,
    ConstraintBlock, ConstraintCollector, ConstraintOperator, LinkParams, MobilityMatrix,
    SolverChoice, SolverOptions,
};
use syl_geometry::quat_from_z_to;
use syl_spatial::{Comm, DataDirectory, MortonGrid, NearInteraction, NearPair};
use syl_types::{Gid, Link, LinkMaps, NearRod, RunConfig, Sylinder, TriLink};

use crate::io::{self, RestartInfo};
use crate::rng::RngPool;
use crate::{brownian, stats, SystemError};

/// A collection of sylinders distributed over the communicator's ranks.
pub struct SylinderSystem {
    config: RunConfig,
    comm: Comm,
    rng: RngPool,
    rods: Vec<Sylinder>,
    links: LinkMaps,
    directory: DataDirectory<NearRod>,
    near: NearInteraction,
    collector: ConstraintCollector,
    pairs: Vec<NearPair<NearRod>>,
    mobility: Option<MobilityMatrix>,
    last_blocks: Vec<ConstraintBlock>,
    force_external: Option<Vec<f64>>,
    vel_external: Option<Vec<f64>>,
    step_count: usize,
    snap_id: usize,
    restart_seed: u64,
    out_base: PathBuf,
}

impl SylinderSystem {
    /// Build a system from a configuration and an optional initial data
    /// file. With no file (or a missing file), the initial population is
    /// drawn from the configuration on rank 0.
    ///
    /// # Errors
    ///
    /// Configuration validation failures, unreadable data files, and any
    /// failure of the initial collision-resolution steps.
    pub fn new(
        config: RunConfig,
        data_file: Option<&Path>,
        comm: Comm,
    ) -> Result<Self, SystemError> {
        config.validate()?;
        let mut rods = Vec::new();
        let mut links = LinkMaps::new();
        match data_file {
            Some(path) if path.exists() => {
                info!("reading initial configuration from {}", path.display());
                // Links are global knowledge: every rank parses the same
                // file. Rods start on rank 0 and are spread by the first
                // exchange.
                let (file_rods, file_links) = io::read_dat(path)?;
                links = file_links;
                if comm.rank() == 0 {
                    rods = file_rods;
                }
            }
            _ => {
                if data_file.is_some() {
                    warn!("initial data file missing; falling back to configuration init");
                }
            }
        }

        let mut system = Self::from_parts(config, rods, links, comm)?;
        if system.comm.rank() == 0 && system.rods.is_empty() && system.config.sylinder_number > 0
        {
            system.init_from_config();
        }
        system.post_init()?;
        Ok(system)
    }

    /// Resume from a restart descriptor written by a previous run.
    ///
    /// The rng seed is advanced by one so the continuation does not replay
    /// the interrupted run's noise. A missing descriptor is an I/O error;
    /// the caller decides whether to fall back to
    /// [`new`](SylinderSystem::new).
    ///
    /// # Errors
    ///
    /// Unreadable descriptor or snapshot, or configuration problems.
    pub fn reinitialize(
        config: RunConfig,
        restart_path: &Path,
        comm: Comm,
    ) -> Result<Self, SystemError> {
        config.validate()?;
        let info = io::read_restart(restart_path)?;
        let out_base = restart_path.parent().unwrap_or(Path::new(".")).to_path_buf();

        // The descriptor records the parallel-VTK snapshot name; the ASCII
        // twin sits next to it.
        let ascii_name = info
            .snapshot_file
            .replace(".pvtp", ".dat")
            .replace("Sylinder_", "SylinderAscii_");
        let folder = io::result_folder(&out_base, info.snap_id, comm.size());
        let snapshot = folder.join(ascii_name);
        info!("restarting from {}", snapshot.display());

        let (file_rods, file_links) = io::read_dat(&snapshot)?;
        let rods = if comm.rank() == 0 { file_rods } else { Vec::new() };

        let mut system = Self::from_parts(config, rods, file_links, comm)?;
        system.restart_seed = info.rng_seed + 1;
        system.rng = RngPool::new(system.restart_seed);
        system.step_count = info.step_count + 1;
        system.snap_id = info.snap_id + 1;
        system.out_base = out_base;
        system.comm.barrier();
        system.apply_box_bc();
        system.exchange_rods();
        info!(
            "sylinder system restarted: {} local rods at step {}",
            system.rods.len(),
            system.step_count
        );
        Ok(system)
    }

    /// Assemble a system from explicit rank-local rods and link maps.
    ///
    /// Used by the loaders above and by tests; performs no exchange and no
    /// pre-step relaxation.
    ///
    /// # Errors
    ///
    /// Configuration validation failures.
    pub fn from_parts(
        config: RunConfig,
        rods: Vec<Sylinder>,
        links: LinkMaps,
        comm: Comm,
    ) -> Result<Self, SystemError> {
        config.validate()?;
        let rng = RngPool::new(config.rng_seed);
        let directory = DataDirectory::new(comm.clone());
        let mut near = NearInteraction::new(comm.clone());
        for k in 0..3 {
            near.set_period_length(k, config.period(k));
        }
        let restart_seed = config.rng_seed;
        Ok(Self {
            config,
            comm,
            rng,
            rods,
            links,
            directory,
            near,
            collector: ConstraintCollector::new(),
            pairs: Vec::new(),
            mobility: None,
            last_blocks: Vec::new(),
            force_external: None,
            vel_external: None,
            step_count: 0,
            snap_id: 0,
            restart_seed,
            out_base: PathBuf::from("."),
        })
    }

    /// Draw the initial population on rank 0 from the configuration.
    fn init_from_config(&mut self) {
        let c = &self.config;
        let edge: Vec<f64> = (0..3)
            .map(|k| c.init_box_high[k] - c.init_box_low[k])
            .collect();
        let max_length = 0.5 * edge.iter().cloned().fold(f64::INFINITY, f64::min);
        let radius = 0.5 * c.sylinder_diameter;

        let length_dist = (c.sylinder_length_sigma > 0.0).then(|| {
            // Parameterise so the distribution mean matches the configured
            // length.
            let sigma = c.sylinder_length_sigma;
            let mu = c.sylinder_length.ln() - 0.5 * sigma * sigma;
            LogNormal::new(mu, sigma)
        });

        let mut rods = Vec::with_capacity(c.sylinder_number);
        for i in 0..c.sylinder_number {
            let mut rng = self.rng.tagged_stream(i as u64);
            let length = match &length_dist {
                Some(Ok(dist)) => {
                    let mut length = dist.sample(&mut rng);
                    while length >= max_length {
                        length = dist.sample(&mut rng);
                    }
                    length
                }
                _ => c.sylinder_length,
            };
            let pos = Point3::new(
                c.init_box_low[0] + rng.gen::<f64>() * edge[0],
                c.init_box_low[1] + rng.gen::<f64>() * edge[1],
                c.init_box_low[2] + rng.gen::<f64>() * edge[2],
            );
            let orientation = initial_orientation(&c.init_orient, &mut rng);
            let mut sy = Sylinder::new(Gid::new(i as i64), radius, length, pos, orientation);
            sy.radius_collision = radius * c.sylinder_diameter_col_ratio;
            sy.length_collision = length * c.sylinder_length_col_ratio;
            rods.push(sy);
        }
        self.rods = rods;

        if c.init_circular_x {
            self.init_circular_cross_section();
        }
        info!("initialised {} rods from configuration", self.rods.len());
    }

    /// Squeeze the initial cross-section into the circle inscribed in the
    /// y-z extent of the init box.
    fn init_circular_cross_section(&mut self) {
        let c = &self.config;
        let center_y = 0.5 * (c.init_box_high[1] + c.init_box_low[1]);
        let center_z = 0.5 * (c.init_box_high[2] + c.init_box_low[2]);
        let radius = 0.5
            * (c.init_box_high[1] - c.init_box_low[1])
                .min(c.init_box_high[2] - c.init_box_low[2]);
        let pool = self.rng.clone();
        self.rods.par_iter_mut().for_each(|sy| {
            let mut rng = pool.rod_stream(sy.gid, usize::MAX);
            let r = radius * rng.gen::<f64>().sqrt();
            let theta = 2.0 * std::f64::consts::PI * rng.gen::<f64>();
            sy.pos.y = center_y + r * theta.cos();
            sy.pos.z = center_z + r * theta.sin();
        });
    }

    /// Shared tail of the loaders: distribute rods, report the packing, and
    /// relax initial overlaps with zero-noise steps.
    fn post_init(&mut self) -> Result<(), SystemError> {
        self.comm.barrier();
        self.apply_box_bc();
        self.exchange_rods();
        let _ = stats::volume_fraction(
            &self.rods,
            self.config.sim_box_low,
            self.config.sim_box_high,
            &self.comm,
        );

        if !self.config.sylinder_fixed && self.config.init_pre_steps > 0 {
            warn!("initial collision resolution begin");
            for _ in 0..self.config.init_pre_steps {
                self.prepare_step()?;
                self.calc_velocity_known();
                self.resolve_constraints()?;
                self.sum_force_velocity();
                self.step_euler();
            }
            warn!("initial collision resolution end");
        }
        info!(
            "sylinder system initialised: {} local rods",
            self.rods.len()
        );
        Ok(())
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// This rank's rods.
    #[must_use]
    pub fn rods(&self) -> &[Sylinder] {
        &self.rods
    }

    /// The global link maps.
    #[must_use]
    pub fn links(&self) -> &LinkMaps {
        &self.links
    }

    /// Steps completed.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Next snapshot id.
    #[must_use]
    pub fn snap_id(&self) -> usize {
        self.snap_id
    }

    /// The constraint blocks of the last solve, multipliers filled in.
    #[must_use]
    pub fn last_blocks(&self) -> &[ConstraintBlock] {
        &self.last_blocks
    }

    /// Simulated time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.step_count as f64 * self.config.dt
    }

    /// Override the output base directory (default: the working directory).
    pub fn set_output_base(&mut self, base: PathBuf) {
        self.out_base = base;
    }

    /// Wrap rod centers into the simulation box on periodic axes.
    fn apply_box_bc(&mut self) {
        for k in 0..3 {
            if !self.config.sim_box_pbc[k] {
                continue;
            }
            let low = self.config.sim_box_low[k];
            let period = self.config.sim_box_high[k] - low;
            for sy in &mut self.rods {
                sy.pos[k] = low + (sy.pos[k] - low).rem_euclid(period);
            }
        }
    }

    /// Re-partition rods over ranks by a Morton-ordered sample sort of
    /// their centers, then rebuild the contiguous global indices.
    fn exchange_rods(&mut self) {
        let size = self.comm.size();
        if size > 1 {
            let low = Point3::new(
                self.config.sim_box_low[0],
                self.config.sim_box_low[1],
                self.config.sim_box_low[2],
            );
            let extent = (0..3)
                .map(|k| self.config.sim_box_high[k] - self.config.sim_box_low[k])
                .fold(0.0_f64, f64::max);
            let grid = MortonGrid::new(low, extent, 10);

            let mut keyed: Vec<(u64, Sylinder)> = self
                .rods
                .drain(..)
                .map(|sy| (grid.key_of(&sy.pos), sy))
                .collect();
            keyed.sort_by_key(|(key, sy)| (*key, sy.gid));

            let stride = (keyed.len() / 32).max(1);
            let samples: Vec<u64> = keyed.iter().step_by(stride).map(|(k, _)| *k).collect();
            let mut all_samples = self.comm.all_gather_flat(samples);
            all_samples.sort_unstable();
            let splitters: Vec<u64> = if all_samples.is_empty() {
                vec![0; size - 1]
            } else {
                (1..size)
                    .map(|i| all_samples[i * all_samples.len() / size])
                    .collect()
            };

            let mut buckets: Vec<Vec<Sylinder>> = vec![Vec::new(); size];
            for (key, sy) in keyed {
                let dest = splitters.partition_point(|&s| s <= key);
                buckets[dest].push(sy);
            }
            self.rods = self
                .comm
                .all_to_all(buckets)
                .into_iter()
                .flatten()
                .collect();
            self.rods.sort_by_key(|sy| sy.gid);
        }
        self.renumber();
    }

    /// Rebuild the contiguous global index across ranks.
    fn renumber(&mut self) {
        let counts = self.comm.all_gather_flat(vec![self.rods.len()]);
        let base: usize = counts[..self.comm.rank()].iter().sum();
        let rank = self.comm.rank();
        for (i, sy) in self.rods.iter_mut().enumerate() {
            sy.global_index = base + i;
            sy.rank = rank;
        }
    }

    /// Phase 1 of a step. After this call and until
    /// [`run_step`](SylinderSystem::run_step), rods must not be added,
    /// removed or moved.
    ///
    /// # Errors
    ///
    /// Neighbor-search failures (inconsistent periods across ranks).
    pub fn prepare_step(&mut self) -> Result<(), SystemError> {
        debug!(step = self.step_count, "prepare step");
        self.apply_box_bc();
        self.exchange_rods();

        let c = &self.config;
        let diameter_ratio = c.sylinder_diameter_col_ratio;
        let length_ratio = c.sylinder_length_col_ratio;
        self.rods.par_iter_mut().for_each(|sy| {
            sy.clear();
            sy.radius_collision = sy.radius * diameter_ratio;
            sy.length_collision = sy.length * length_ratio;
        });

        if self.config.monolayer {
            let mid_z = 0.5 * (self.config.sim_box_high[2] + self.config.sim_box_low[2]);
            self.rods.par_iter_mut().for_each(|sy| {
                sy.pos.z = mid_z;
                let mut dir = sy.direction();
                dir.z = 0.0;
                if dir.norm() > 1e-12 {
                    sy.orientation = quat_from_z_to(&dir.normalize());
                }
            });
        }

        let col_buf = self.config.sylinder_col_buf;
        self.directory.publish(
            self.rods
                .iter()
                .map(|sy| (sy.gid, NearRod::from_sylinder(sy, col_buf))),
        );

        let records: Vec<NearRod> = self
            .rods
            .iter()
            .map(|sy| NearRod::from_sylinder(sy, col_buf))
            .collect();
        self.pairs = self.near.find_pairs(&records).map_err(|err| {
            error!("neighbor search failed: {err}");
            err
        })?;

        self.mobility = Some(MobilityMatrix::build(&self.rods, self.config.viscosity));
        self.collector.clear();
        self.last_blocks.clear();
        self.force_external = None;
        self.vel_external = None;
        Ok(())
    }

    /// Inject a per-rod external force/torque vector (6 entries per rod)
    /// for this step. The mobility is applied to it during velocity setup.
    pub fn set_force_external(&mut self, force: Vec<f64>) {
        assert_eq!(force.len(), 6 * self.rods.len());
        self.force_external = Some(force);
    }

    /// Inject a per-rod external velocity vector (6 entries per rod) for
    /// this step.
    pub fn set_velocity_external(&mut self, velocity: Vec<f64>) {
        assert_eq!(velocity.len(), 6 * self.rods.len());
        self.vel_external = Some(velocity);
    }

    /// Phases 2-5: velocities, constraint resolution, snapshot, Euler.
    ///
    /// # Errors
    ///
    /// Constraint failures (consistency or non-convergence) and snapshot
    /// I/O failures.
    pub fn run_step(&mut self) -> Result<(), SystemError> {
        if self.config.kbt > 0.0 {
            self.calc_velocity_brown();
        }
        self.calc_velocity_known();
        self.resolve_constraints()?;
        self.sum_force_velocity();
        if self.is_snapshot_step() {
            // Write before moving so data and geometry stay consistent.
            self.write_result()?;
        }
        self.step_euler();
        self.step_count += 1;
        Ok(())
    }

    /// Whether this step writes a snapshot.
    #[must_use]
    pub fn is_snapshot_step(&self) -> bool {
        let interval = (self.config.time_snap / self.config.dt).round().max(1.0) as usize;
        self.step_count % interval == 0
    }

    /// Draw this step's Brownian velocities.
    pub fn calc_velocity_brown(&mut self) {
        let kbt = self.config.kbt;
        let viscosity = self.config.viscosity;
        let dt = self.config.dt;
        let step = self.step_count;
        let pool = self.rng.clone();
        self.rods.par_iter_mut().for_each(|sy| {
            let mut rng = pool.rod_stream(sy.gid, step);
            let (vel, omega) = brownian::brownian_velocity(sy, kbt, viscosity, dt, &mut rng);
            sy.vel_brown = vel;
            sy.omega_brown = omega;
        });
    }

    /// Combine external forces and velocities into the known velocity:
    /// `v_known = v_ext + M f_ext`, with the monolayer projection applied.
    pub fn calc_velocity_known(&mut self) {
        let n = self.rods.len();
        let mut vel = vec![0.0; 6 * n];

        if let Some(force) = &self.force_external {
            if let Some(mobility) = &self.mobility {
                mobility.apply(force, &mut vel);
            }
            for (i, sy) in self.rods.iter_mut().enumerate() {
                sy.force_ext = Vector3::new(force[6 * i], force[6 * i + 1], force[6 * i + 2]);
                sy.torque_ext =
                    Vector3::new(force[6 * i + 3], force[6 * i + 4], force[6 * i + 5]);
            }
        }
        if let Some(extra) = &self.vel_external {
            for (v, e) in vel.iter_mut().zip(extra) {
                *v += e;
            }
        }

        for (i, sy) in self.rods.iter_mut().enumerate() {
            sy.vel_known = Vector3::new(vel[6 * i], vel[6 * i + 1], vel[6 * i + 2]);
            sy.omega_known = Vector3::new(vel[6 * i + 3], vel[6 * i + 4], vel[6 * i + 5]);
        }

        if self.config.monolayer {
            // In-plane motion only: no vertical drift, no out-of-plane
            // tumbling.
            for sy in &mut self.rods {
                sy.vel_known.z = 0.0;
                sy.omega_known.x = 0.0;
                sy.omega_known.y = 0.0;
                sy.vel_brown.z = 0.0;
                sy.omega_brown.x = 0.0;
                sy.omega_brown.y = 0.0;
            }
        }
    }

    /// Phase 3 and 4: collect every constraint block, assemble the
    /// operator, solve for the multipliers, and write the constraint
    /// forces and velocities back to the rods.
    ///
    /// # Errors
    ///
    /// Consistency failures in collection (unknown gids, overstretched
    /// periodic links) and solver non-convergence after all kernels.
    pub fn resolve_constraints(&mut self) -> Result<(), SystemError> {
        let c = &self.config;
        let link_params = LinkParams {
            sim_box_low: c.sim_box_low,
            sim_box_high: c.sim_box_high,
            pbc: c.sim_box_pbc,
            extend_kappa: c.end_link_kappa,
            extend_gap: c.end_link_gap,
            bend_kappa: c.bending_link_kappa,
            preferred_curvature: c.preferred_curvature,
        };
        let col_buf = c.sylinder_col_buf;

        debug!("collect collision constraints");
        collect_pair_collisions(
            &self.rods,
            &self.pairs,
            &self.links,
            col_buf,
            &mut self.collector,
        );
        collect_boundary_collisions(
            &self.rods,
            &self.config.boundaries,
            col_buf,
            &mut self.collector,
        );

        debug!("collect link constraints");
        let fail = |err| {
            error!("constraint collection failed: {err}");
            SystemError::Constraint(err)
        };
        collect_pin_links(
            &self.rods,
            &self.links,
            &self.directory,
            &link_params,
            &mut self.collector,
        )
        .map_err(fail)?;
        collect_extend_links(
            &self.rods,
            &self.links,
            &self.directory,
            &link_params,
            &mut self.collector,
        )
        .map_err(fail)?;
        collect_bend_links(
            &self.rods,
            &self.links,
            &self.directory,
            &link_params,
            &mut self.collector,
        )
        .map_err(fail)?;
        collect_tri_bend_links(
            &self.rods,
            &self.links,
            &self.directory,
            &link_params,
            &mut self.collector,
        )
        .map_err(fail)?;
        debug!(blocks = self.collector.len(), "constraints collected");

        // Resolve shadow records for every non-local rod any block touches.
        let local: HashSet<Gid> = self.rods.iter().map(|sy| sy.gid).collect();
        let mut wanted: Vec<Gid> = self
            .collector
            .blocks()
            .iter()
            .flat_map(|b| [Some(b.gid_i), Some(b.gid_j), b.gid_k])
            .flatten()
            .filter(|gid| !local.contains(gid))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();
        let found = self.directory.find(&wanted).map_err(|err| {
            error!("shadow lookup failed: {err}");
            SystemError::Spatial(err)
        })?;
        let shadows: HashMap<Gid, NearRod> = wanted.into_iter().zip(found).collect();

        let mobility = match self.mobility.clone() {
            Some(m) => m,
            None => MobilityMatrix::build(&self.rods, c.viscosity),
        };
        let blocks = self.collector.take_blocks();
        let mut op = ConstraintOperator::new(
            self.comm.clone(),
            blocks,
            &self.rods,
            &shadows,
            mobility,
            c.viscosity,
            c.dt,
        )
        .map_err(fail)?;

        // Known velocity seen by the constraints: Brownian plus external.
        let vel_known: Vec<f64> = self
            .rods
            .iter()
            .flat_map(|sy| {
                let v = sy.vel_known + sy.vel_brown;
                let w = sy.omega_known + sy.omega_brown;
                [v.x, v.y, v.z, w.x, w.y, w.z]
            })
            .collect();

        let options = SolverOptions {
            res_tol: c.con_res_tol,
            max_ite: c.con_max_ite,
            choice: SolverChoice::from_config(c.con_solver_choice),
        };
        debug!("solve constraints");
        let solution = solve_constraints(&mut op, &vel_known, &options).map_err(|err| {
            error!("constraint solve failed: {err}");
            SystemError::Constraint(err)
        })?;
        debug!(
            iterations = solution.report.iterations,
            residual = solution.report.residual,
            "constraints solved"
        );

        for (i, sy) in self.rods.iter_mut().enumerate() {
            let at = |v: &[f64], o: usize| Vector3::new(v[6 * i + o], v[6 * i + o + 1], v[6 * i + o + 2]);
            sy.vel_col = at(&solution.vel_uni, 0);
            sy.omega_col = at(&solution.vel_uni, 3);
            sy.force_col = at(&solution.force_uni, 0);
            sy.torque_col = at(&solution.force_uni, 3);
            sy.vel_bi = at(&solution.vel_bi, 0);
            sy.omega_bi = at(&solution.vel_bi, 3);
            sy.force_bi = at(&solution.force_bi, 0);
            sy.torque_bi = at(&solution.force_bi, 3);
        }
        self.last_blocks = op.blocks().cloned().collect();
        Ok(())
    }

    /// Sum the velocity and force partitions into the integration totals.
    pub fn sum_force_velocity(&mut self) {
        self.rods.par_iter_mut().for_each(|sy| {
            sy.vel = sy.vel_known + sy.vel_brown + sy.vel_col + sy.vel_bi;
            sy.omega = sy.omega_known + sy.omega_brown + sy.omega_col + sy.omega_bi;
        });
    }

    /// Advance every rod by one Euler step of its summed velocity.
    pub fn step_euler(&mut self) {
        if self.config.sylinder_fixed {
            return;
        }
        let dt = self.config.dt;
        self.rods.par_iter_mut().for_each(|sy| sy.step_euler(dt));
    }

    /// Write the snapshot set: the ASCII rod file (with link lines), the
    /// constraint-block dump, and the restart descriptor.
    ///
    /// # Errors
    ///
    /// I/O failures carry the offending path.
    pub fn write_result(&mut self) -> Result<(), SystemError> {
        let folder = io::result_folder(&self.out_base, self.snap_id, self.comm.size());
        if self.comm.rank() == 0 {
            std::fs::create_dir_all(&folder).map_err(|source| SystemError::Io {
                path: folder.clone(),
                source,
            })?;
        }
        self.comm.barrier();

        let mut all_rods = self.comm.all_gather_flat(self.rods.clone());
        let all_blocks = self.comm.all_gather_flat(self.last_blocks.clone());
        if self.comm.rank() == 0 {
            all_rods.sort_by_key(|sy| sy.gid);
            let dat = folder.join(format!("SylinderAscii_{}.dat", self.snap_id));
            io::write_dat(&dat, &all_rods, &self.links, self.time())?;

            let con = folder.join(format!("ConBlock_{}.dat", self.snap_id));
            io::write_constraint_blocks(&con, all_blocks.iter())?;

            io::write_restart(
                &self.out_base.join("TimeStepInfo.txt"),
                &RestartInfo {
                    rng_seed: self.restart_seed,
                    step_count: self.step_count,
                    snap_id: self.snap_id,
                    snapshot_file: format!("Sylinder_{}.pvtp", self.snap_id),
                },
            )?;
        }
        self.snap_id += 1;
        Ok(())
    }

    /// Log the run diagnostics: order parameters and constraint stress.
    pub fn record_diagnostics(&self) {
        let _ = stats::order_parameter(&self.rods, &self.comm);
        let n_global = self.comm.all_reduce_sum_usize(self.rods.len());
        let _ = stats::constraint_stress_record(
            self.last_blocks.iter(),
            n_global,
            self.config.kbt,
            &self.comm,
        );
    }

    /// Collective: append new rods on every rank, assigning fresh globally
    /// unique gids above the current maximum. Returns the gids given to
    /// this rank's additions.
    pub fn add_new_sylinders(&mut self, new: Vec<Sylinder>) -> Vec<Gid> {
        let max_local = self.rods.iter().map(|sy| sy.gid.raw()).max().unwrap_or(-1);
        let max_global = self.comm.all_reduce_max_i64(max_local);

        let counts = self.comm.all_gather_flat(vec![new.len()]);
        let total: usize = counts.iter().sum();
        // Identical shuffle on every rank keeps the assignment collective
        // without a broadcast.
        let mut fresh: Vec<i64> = (1..=total as i64).map(|i| max_global + i).collect();
        let mut shuffle_rng = self.rng.tagged_stream(0x6164_6400 + self.step_count as u64);
        fresh.shuffle(&mut shuffle_rng);

        let offset: usize = counts[..self.comm.rank()].iter().sum();
        let mine: Vec<Gid> = fresh[offset..offset + new.len()]
            .iter()
            .map(|&g| Gid::new(g))
            .collect();
        for (mut sy, &gid) in new.into_iter().zip(&mine) {
            sy.gid = gid;
            self.rods.push(sy);
        }
        self.renumber();
        mine
    }

    /// Collective: merge new pin links from every rank into the global map.
    pub fn add_new_pin_links(&mut self, new: Vec<Link>) {
        for link in self.comm.all_gather_flat(new) {
            self.links.insert_pin(link);
        }
    }

    /// Collective: merge new extend links from every rank.
    pub fn add_new_extend_links(&mut self, new: Vec<Link>) {
        for link in self.comm.all_gather_flat(new) {
            self.links.insert_extend(link);
        }
    }

    /// Collective: merge new bend links from every rank.
    pub fn add_new_bend_links(&mut self, new: Vec<Link>) {
        for link in self.comm.all_gather_flat(new) {
            self.links.insert_bend(link);
        }
    }

    /// Collective: merge new tri-bend links from every rank.
    pub fn add_new_tri_bend_links(&mut self, new: Vec<TriLink>) {
        for link in self.comm.all_gather_flat(new) {
            self.links.insert_tri_bend(link);
        }
    }

    /// Collective: verify that every rank holds identical link maps.
    ///
    /// # Errors
    ///
    /// A fingerprint mismatch is a fatal consistency error.
    pub fn assert_links_consistent(&self) -> Result<(), SystemError> {
        let prints = self
            .comm
            .all_gather_flat(vec![self.links.fingerprint()]);
        if prints.iter().any(|&p| p != prints[0]) {
            error!("link maps diverged across ranks");
            return Err(SystemError::LinkMapsDiverged);
        }
        Ok(())
    }
}

/// Orientation from the configured components; out-of-range components are
/// drawn uniformly, and a fully unconstrained orientation is drawn
/// uniformly on the sphere.
fn initial_orientation(init_orient: &[f64; 3], rng: &mut impl Rng) -> UnitQuaternion<f64> {
    let free = init_orient.iter().all(|&x| !(-1.0..=1.0).contains(&x));
    if free {
        // Uniform on SO(3) restricted to axis choice: normalise a Gaussian
        // 3-vector for the axis.
        let v = Vector3::new(
            rng.sample::<f64, _>(rand_distr::StandardNormal),
            rng.sample::<f64, _>(rand_distr::StandardNormal),
            rng.sample::<f64, _>(rand_distr::StandardNormal),
        );
        let norm = v.norm();
        if norm > 1e-12 {
            return quat_from_z_to(&(v / norm));
        }
        return UnitQuaternion::identity();
    }
    let mut p = Vector3::zeros();
    for k in 0..3 {
        p[k] = if (-1.0..=1.0).contains(&init_orient[k]) {
            init_orient[k]
        } else {
            2.0 * rng.gen::<f64>() - 1.0
        };
    }
    let norm = p.norm();
    if norm > 1e-12 {
        quat_from_z_to(&(p / norm))
    } else {
        UnitQuaternion::identity()
    }
}
