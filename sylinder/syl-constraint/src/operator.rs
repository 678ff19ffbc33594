//! Matrix-free application of the block constraint operator.
//!
//! The operator owns this rank's constraint blocks, partitioned into the
//! unilateral and bilateral sets, with each block's rod references resolved
//! to either a local row or a ghost row. Ghost rows belong to rods owned by
//! another rank; their mobility blocks are rebuilt locally from the shadow
//! records (bit-identical to the owner's), and their force rows are reduced
//! to the owner and broadcast back inside every application so that
//! `D gamma` sums contributions from every rank's blocks.
//!
//! One application of `M_c` to `[gamma_u; gamma_b]`:
//!
//! 1. scatter each block's unscaled forces and torques, scaled by its
//!    multiplier, into a two-column force multi-vector `[D_u g_u | D_b g_b]`
//!    over local + ghost rows;
//! 2. reduce ghost rows onto their owners, then pull the completed totals
//!    back into the ghost rows (identity on one rank);
//! 3. apply the block-diagonal mobility column-wise;
//! 4. gather `D^T` of the column sum per block, adding the diagonal spring
//!    compliance `gamma_b / (kappa dt)` to soft bilateral rows.
//!
//! The resulting operator is symmetric positive semi-definite.

use hashbrown::HashMap;
use nalgebra::{Matrix3, Vector3};
use syl_spatial::Comm;
use syl_types::{Gid, NearRod, Sylinder};

use crate::{ConstraintBlock, ConstraintError, MobilityMatrix};

/// A resolved rod reference inside a block.
#[derive(Debug, Clone, Copy)]
enum Row {
    Local(usize),
    Ghost(usize),
}

#[derive(Debug)]
struct BlockRef {
    block: ConstraintBlock,
    row_i: Row,
    row_j: Option<Row>,
    row_k: Option<Row>,
}

/// The assembled constraint operator of one rank.
#[derive(Debug)]
pub struct ConstraintOperator {
    comm: Comm,
    dt: f64,
    n_local: usize,
    mobility: MobilityMatrix,
    local_index: HashMap<Gid, usize>,
    ghost_gids: Vec<Gid>,
    ghost_owner: Vec<usize>,
    ghost_mobility: Vec<(Matrix3<f64>, Matrix3<f64>)>,
    uni: Vec<BlockRef>,
    bi: Vec<BlockRef>,
    // Two-column working vectors over local + ghost rows.
    force_uni: Vec<f64>,
    force_bi: Vec<f64>,
    vel_uni: Vec<f64>,
    vel_bi: Vec<f64>,
}

impl ConstraintOperator {
    /// Assemble the operator from this step's blocks.
    ///
    /// `shadows` must contain a record for every non-local gid any block
    /// references (the collection passes have them from the neighbor search
    /// and the directory).
    ///
    /// # Errors
    ///
    /// [`ConstraintError::MissingRod`] when a referenced gid has neither a
    /// local row nor a shadow record.
    pub fn new(
        comm: Comm,
        blocks: Vec<ConstraintBlock>,
        rods: &[Sylinder],
        shadows: &HashMap<Gid, NearRod>,
        mobility: MobilityMatrix,
        viscosity: f64,
        dt: f64,
    ) -> crate::Result<Self> {
        let n_local = rods.len();
        let local_index: HashMap<Gid, usize> =
            rods.iter().enumerate().map(|(i, sy)| (sy.gid, i)).collect();

        let mut ghost_lookup: HashMap<Gid, usize> = HashMap::new();
        let mut ghost_gids = Vec::new();
        let mut ghost_owner = Vec::new();
        let mut ghost_mobility = Vec::new();
        let mut resolve = |gid: Gid| -> crate::Result<Row> {
            if let Some(&i) = local_index.get(&gid) {
                return Ok(Row::Local(i));
            }
            if let Some(&g) = ghost_lookup.get(&gid) {
                return Ok(Row::Ghost(g));
            }
            let record = shadows
                .get(&gid)
                .ok_or(ConstraintError::MissingRod { gid })?;
            let g = ghost_gids.len();
            ghost_lookup.insert(gid, g);
            ghost_gids.push(gid);
            ghost_owner.push(record.rank);
            ghost_mobility.push(MobilityMatrix::block_from_near(record, viscosity));
            Ok(Row::Ghost(g))
        };

        let mut uni = Vec::new();
        let mut bi = Vec::new();
        for block in blocks {
            let row_i = resolve(block.gid_i)?;
            let row_j = if block.one_side {
                None
            } else {
                Some(resolve(block.gid_j)?)
            };
            let row_k = match block.gid_k {
                Some(gid) => Some(resolve(gid)?),
                None => None,
            };
            let entry = BlockRef {
                block,
                row_i,
                row_j,
                row_k,
            };
            if entry.block.bilateral {
                bi.push(entry);
            } else {
                uni.push(entry);
            }
        }

        let rows = 6 * (n_local + ghost_gids.len());
        Ok(Self {
            comm,
            dt,
            n_local,
            mobility,
            local_index,
            ghost_gids,
            ghost_owner,
            ghost_mobility,
            uni,
            bi,
            force_uni: vec![0.0; rows],
            force_bi: vec![0.0; rows],
            vel_uni: vec![0.0; rows],
            vel_bi: vec![0.0; rows],
        })
    }

    /// Local unilateral block count.
    #[must_use]
    pub fn n_uni(&self) -> usize {
        self.uni.len()
    }

    /// Local bilateral block count.
    #[must_use]
    pub fn n_bi(&self) -> usize {
        self.bi.len()
    }

    /// Length of the local multiplier vector `[gamma_u; gamma_b]`.
    #[must_use]
    pub fn gamma_len(&self) -> usize {
        self.uni.len() + self.bi.len()
    }

    /// Global constraint count.
    #[must_use]
    pub fn gamma_len_global(&self) -> usize {
        self.comm.all_reduce_sum_usize(self.gamma_len())
    }

    /// Initial multiplier guesses recorded by the generators.
    #[must_use]
    pub fn initial_guess(&self) -> Vec<f64> {
        self.uni
            .iter()
            .chain(self.bi.iter())
            .map(|b| b.block.gamma)
            .collect()
    }

    /// Project onto the feasible set: unilateral multipliers are clamped to
    /// be non-negative, bilateral multipliers are free.
    pub fn project(&self, x: &mut [f64]) {
        for v in &mut x[..self.uni.len()] {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
    }

    /// Global inner product over the distributed multiplier vector.
    #[must_use]
    pub fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        let local: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        self.comm.all_reduce_sum_scalar(local)
    }

    /// Global infinity norm.
    #[must_use]
    pub fn max_abs(&self, a: &[f64]) -> f64 {
        let local = a.iter().fold(0.0_f64, |m, &x| m.max(x.abs()));
        self.comm.all_reduce_max(&[local])[0]
    }

    /// Global elementwise sum of a small fixed payload (solver bookkeeping).
    #[must_use]
    pub fn reduce_sum(&self, values: &[f64]) -> Vec<f64> {
        self.comm.all_reduce_sum(values)
    }

    /// Apply `M_c`: `y = [D^T M D + K^{-1}/dt] x`. Collective; every rank
    /// must call with its local slice of the distributed vector.
    pub fn apply_gamma(&mut self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.gamma_len());
        debug_assert_eq!(y.len(), self.gamma_len());
        self.scatter_forces(x);
        self.reduce_ghost_rows();
        self.apply_mobility();

        let vsum: Vec<f64> = self
            .vel_uni
            .iter()
            .zip(&self.vel_bi)
            .map(|(a, b)| a + b)
            .collect();
        self.gather_transpose(&vsum, y);

        // Diagonal spring compliance relaxes soft bilateral constraints.
        let n_uni = self.uni.len();
        for (slot, entry) in self.bi.iter().enumerate() {
            if entry.block.kappa > 0.0 {
                y[n_uni + slot] += x[n_uni + slot] / (entry.block.kappa * self.dt);
            }
        }
    }

    /// Build the constant term `g = delta0/dt + D^T v_known`.
    ///
    /// Collective: ghost rows of the known velocity are fetched from their
    /// owners.
    #[must_use]
    pub fn known_velocity_rhs(&self, vel_known_local: &[f64]) -> Vec<f64> {
        let extended = self.extend_velocity(vel_known_local);
        let mut g = vec![0.0; self.gamma_len()];
        self.gather_transpose(&extended, &mut g);
        for (slot, entry) in self.uni.iter().chain(self.bi.iter()).enumerate() {
            g[slot] += entry.block.delta0 / self.dt;
        }
        g
    }

    /// Run one final application at the solution and keep the per-column
    /// force and velocity vectors for write-back.
    pub fn finalize(&mut self, x: &[f64]) {
        self.scatter_forces(x);
        self.reduce_ghost_rows();
        self.apply_mobility();
    }

    /// Store solved multipliers back into the blocks.
    pub fn write_back_gamma(&mut self, x: &[f64]) {
        let n_uni = self.uni.len();
        for (slot, entry) in self.uni.iter_mut().enumerate() {
            entry.block.gamma = x[slot];
        }
        for (slot, entry) in self.bi.iter_mut().enumerate() {
            entry.block.gamma = x[n_uni + slot];
        }
    }

    /// Unilateral constraint force rows of the local rods, valid after
    /// [`finalize`](ConstraintOperator::finalize).
    #[must_use]
    pub fn force_uni_local(&self) -> &[f64] {
        &self.force_uni[..6 * self.n_local]
    }

    /// Bilateral constraint force rows of the local rods.
    #[must_use]
    pub fn force_bi_local(&self) -> &[f64] {
        &self.force_bi[..6 * self.n_local]
    }

    /// Unilateral constraint velocity rows of the local rods.
    #[must_use]
    pub fn vel_uni_local(&self) -> &[f64] {
        &self.vel_uni[..6 * self.n_local]
    }

    /// Bilateral constraint velocity rows of the local rods.
    #[must_use]
    pub fn vel_bi_local(&self) -> &[f64] {
        &self.vel_bi[..6 * self.n_local]
    }

    /// The blocks, unilateral then bilateral, with solved multipliers after
    /// [`write_back_gamma`](ConstraintOperator::write_back_gamma).
    pub fn blocks(&self) -> impl Iterator<Item = &ConstraintBlock> {
        self.uni.iter().chain(self.bi.iter()).map(|e| &e.block)
    }

    fn row_offset(&self, row: Row) -> usize {
        match row {
            Row::Local(i) => 6 * i,
            Row::Ghost(g) => 6 * (self.n_local + g),
        }
    }

    /// `F = D x`, one column per constraint class.
    fn scatter_forces(&mut self, x: &[f64]) {
        self.force_uni.iter_mut().for_each(|v| *v = 0.0);
        self.force_bi.iter_mut().for_each(|v| *v = 0.0);
        let n_uni = self.uni.len();
        for (slot, entry) in self.uni.iter().enumerate() {
            Self::scatter_block(
                &mut self.force_uni,
                self.n_local,
                entry,
                x[slot],
            );
        }
        for (slot, entry) in self.bi.iter().enumerate() {
            Self::scatter_block(
                &mut self.force_bi,
                self.n_local,
                entry,
                x[n_uni + slot],
            );
        }
    }

    fn scatter_block(force: &mut [f64], n_local: usize, entry: &BlockRef, gamma: f64) {
        let offset_of = |row: Row| match row {
            Row::Local(i) => 6 * i,
            Row::Ghost(g) => 6 * (n_local + g),
        };
        let mut add = |row: Row, f: &Vector3<f64>, t: &Vector3<f64>| {
            let o = offset_of(row);
            force[o] += gamma * f.x;
            force[o + 1] += gamma * f.y;
            force[o + 2] += gamma * f.z;
            force[o + 3] += gamma * t.x;
            force[o + 4] += gamma * t.y;
            force[o + 5] += gamma * t.z;
        };
        add(entry.row_i, &entry.block.force_i, &entry.block.torque_i);
        if let Some(row) = entry.row_j {
            add(row, &entry.block.force_j, &entry.block.torque_j);
        }
        if let Some(row) = entry.row_k {
            add(row, &entry.block.force_k, &entry.block.torque_k);
        }
    }

    /// `y = D^T vel` for all blocks, unilateral then bilateral. One-sided
    /// blocks gather only their I row.
    fn gather_transpose(&self, vel: &[f64], y: &mut [f64]) {
        for (slot, entry) in self.uni.iter().chain(self.bi.iter()).enumerate() {
            let mut acc = 0.0;
            let mut take = |row: Row, f: &Vector3<f64>, t: &Vector3<f64>| {
                let o = self.row_offset(row);
                acc += f.x * vel[o] + f.y * vel[o + 1] + f.z * vel[o + 2];
                acc += t.x * vel[o + 3] + t.y * vel[o + 4] + t.z * vel[o + 5];
            };
            take(entry.row_i, &entry.block.force_i, &entry.block.torque_i);
            if let Some(row) = entry.row_j {
                take(row, &entry.block.force_j, &entry.block.torque_j);
            }
            if let Some(row) = entry.row_k {
                take(row, &entry.block.force_k, &entry.block.torque_k);
            }
            y[slot] = acc;
        }
    }

    /// Sum ghost-row contributions onto the owning ranks and pull the
    /// completed rows back. Identity on one rank with no ghosts, but still
    /// collective.
    fn reduce_ghost_rows(&mut self) {
        let size = self.comm.size();
        let mut outgoing: Vec<Vec<(Gid, [f64; 12])>> = vec![Vec::new(); size];
        for (g, &gid) in self.ghost_gids.iter().enumerate() {
            let o = 6 * (self.n_local + g);
            let mut row = [0.0; 12];
            row[..6].copy_from_slice(&self.force_uni[o..o + 6]);
            row[6..].copy_from_slice(&self.force_bi[o..o + 6]);
            outgoing[self.ghost_owner[g]].push((gid, row));
        }

        // Owners fold the partial rows into their local columns.
        let incoming = self.comm.all_to_all(outgoing);
        for bucket in &incoming {
            for &(gid, row) in bucket {
                let Some(&i) = self.local_index.get(&gid) else {
                    panic!("ghost row routed to non-owner for gid {gid}");
                };
                let o = 6 * i;
                for k in 0..6 {
                    self.force_uni[o + k] += row[k];
                    self.force_bi[o + k] += row[6 + k];
                }
            }
        }

        // Owners answer with the completed totals along the reverse path.
        let replies: Vec<Vec<(Gid, [f64; 12])>> = incoming
            .into_iter()
            .map(|bucket| {
                bucket
                    .into_iter()
                    .map(|(gid, _)| {
                        let i = self.local_index[&gid];
                        let o = 6 * i;
                        let mut row = [0.0; 12];
                        row[..6].copy_from_slice(&self.force_uni[o..o + 6]);
                        row[6..].copy_from_slice(&self.force_bi[o..o + 6]);
                        (gid, row)
                    })
                    .collect()
            })
            .collect();
        let totals = self.comm.all_to_all(replies);

        let ghost_lookup: HashMap<Gid, usize> = self
            .ghost_gids
            .iter()
            .enumerate()
            .map(|(g, &gid)| (gid, g))
            .collect();
        for bucket in totals {
            for (gid, row) in bucket {
                let Some(&g) = ghost_lookup.get(&gid) else {
                    panic!("ghost total delivered for unknown gid {gid}");
                };
                let o = 6 * (self.n_local + g);
                self.force_uni[o..o + 6].copy_from_slice(&row[..6]);
                self.force_bi[o..o + 6].copy_from_slice(&row[6..]);
            }
        }
    }

    /// `V = M F` per column, local and ghost rows.
    fn apply_mobility(&mut self) {
        let nl = 6 * self.n_local;
        self.mobility
            .apply(&self.force_uni[..nl], &mut self.vel_uni[..nl]);
        self.mobility
            .apply(&self.force_bi[..nl], &mut self.vel_bi[..nl]);
        for (g, (trans, rot)) in self.ghost_mobility.iter().enumerate() {
            let o = 6 * (self.n_local + g);
            for (force, vel) in [
                (&self.force_uni, &mut self.vel_uni),
                (&self.force_bi, &mut self.vel_bi),
            ] {
                let f = Vector3::new(force[o], force[o + 1], force[o + 2]);
                let t = Vector3::new(force[o + 3], force[o + 4], force[o + 5]);
                let v = trans * f;
                let w = rot * t;
                vel[o] = v.x;
                vel[o + 1] = v.y;
                vel[o + 2] = v.z;
                vel[o + 3] = w.x;
                vel[o + 4] = w.y;
                vel[o + 5] = w.z;
            }
        }
    }

    /// Extend a local 6-per-rod velocity vector with fetched ghost rows.
    fn extend_velocity(&self, vel_local: &[f64]) -> Vec<f64> {
        debug_assert_eq!(vel_local.len(), 6 * self.n_local);
        let size = self.comm.size();
        let mut extended = vec![0.0; 6 * (self.n_local + self.ghost_gids.len())];
        extended[..vel_local.len()].copy_from_slice(vel_local);

        let mut requests: Vec<Vec<(usize, Gid)>> = vec![Vec::new(); size];
        for (g, &gid) in self.ghost_gids.iter().enumerate() {
            requests[self.ghost_owner[g]].push((g, gid));
        }
        let incoming = self.comm.all_to_all(requests);
        let replies: Vec<Vec<(usize, [f64; 6])>> = incoming
            .into_iter()
            .map(|bucket| {
                bucket
                    .into_iter()
                    .map(|(slot, gid)| {
                        let Some(&i) = self.local_index.get(&gid) else {
                            panic!("velocity request routed to non-owner for gid {gid}");
                        };
                        let mut row = [0.0; 6];
                        row.copy_from_slice(&vel_local[6 * i..6 * i + 6]);
                        (slot, row)
                    })
                    .collect()
            })
            .collect();
        for bucket in self.comm.all_to_all(replies) {
            for (g, row) in bucket {
                let o = 6 * (self.n_local + g);
                extended[o..o + 6].copy_from_slice(&row);
            }
        }
        extended
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, UnitQuaternion};

    fn two_rod_setup() -> (Vec<Sylinder>, Vec<ConstraintBlock>) {
        let mut a = Sylinder::new(
            Gid::new(0),
            0.1,
            1.0,
            Point3::new(-0.05, 0.0, 0.0),
            UnitQuaternion::identity(),
        );
        a.global_index = 0;
        let mut b = Sylinder::new(
            Gid::new(1),
            0.1,
            1.0,
            Point3::new(0.05, 0.0, 0.0),
            UnitQuaternion::identity(),
        );
        b.global_index = 1;

        // One unilateral contact along x and one soft bilateral spring.
        let normal = Vector3::x();
        let contact = ConstraintBlock::two_body(
            -0.1,
            0.1,
            (Gid::new(0), 0),
            (Gid::new(1), 1),
            -normal,
            normal,
            Vector3::zeros(),
            Vector3::zeros(),
            Point3::origin(),
            Point3::origin(),
            false,
            false,
            0.0,
        );
        let spring = ConstraintBlock::two_body(
            0.2,
            0.0,
            (Gid::new(0), 0),
            (Gid::new(1), 1),
            normal,
            -normal,
            Vector3::zeros(),
            Vector3::zeros(),
            Point3::origin(),
            Point3::origin(),
            false,
            true,
            10.0,
        );
        (vec![a, b], vec![contact, spring])
    }

    fn build(rods: &[Sylinder], blocks: Vec<ConstraintBlock>) -> ConstraintOperator {
        let mobility = MobilityMatrix::build(rods, 1.0);
        ConstraintOperator::new(
            Comm::solo(),
            blocks,
            rods,
            &HashMap::new(),
            mobility,
            1.0,
            0.01,
        )
        .unwrap()
    }

    #[test]
    fn partitions_blocks() {
        let (rods, blocks) = two_rod_setup();
        let op = build(&rods, blocks);
        assert_eq!(op.n_uni(), 1);
        assert_eq!(op.n_bi(), 1);
        assert_eq!(op.gamma_len_global(), 2);
        assert_eq!(op.initial_guess(), vec![0.1, 0.0]);
    }

    #[test]
    fn operator_is_symmetric() {
        let (rods, blocks) = two_rod_setup();
        let mut op = build(&rods, blocks);
        // <x, A y> == <A x, y> for a few fixed vectors.
        let xs = [[1.0, 0.0], [0.3, -0.7], [0.0, 1.0], [-0.4, 0.9]];
        let ys = [[0.5, 0.5], [1.0, -1.0], [0.2, 0.8], [0.9, 0.1]];
        for (x, y) in xs.iter().zip(&ys) {
            let mut ax = vec![0.0; 2];
            let mut ay = vec![0.0; 2];
            op.apply_gamma(x, &mut ax);
            op.apply_gamma(y, &mut ay);
            let lhs = op.dot(x, &ay);
            let rhs = op.dot(&ax, y);
            assert_relative_eq!(lhs, rhs, epsilon = 1e-12, max_relative = 1e-10);
        }
    }

    #[test]
    fn operator_is_positive_semidefinite() {
        let (rods, blocks) = two_rod_setup();
        let mut op = build(&rods, blocks);
        for x in [[1.0, 0.0], [0.0, 1.0], [0.6, -0.8], [-1.0, -1.0]] {
            let mut ax = vec![0.0; 2];
            op.apply_gamma(&x, &mut ax);
            assert!(op.dot(&x, &ax) >= -1e-12);
        }
    }

    #[test]
    fn one_side_blocks_skip_j() {
        let mut sy = Sylinder::new(
            Gid::new(0),
            0.5,
            0.0,
            Point3::new(0.0, 0.0, 0.4),
            UnitQuaternion::identity(),
        );
        sy.global_index = 0;
        let wall = ConstraintBlock::two_body(
            -0.1,
            0.1,
            (Gid::new(0), 0),
            (Gid::new(0), 0),
            Vector3::z(),
            Vector3::z(),
            Vector3::zeros(),
            Vector3::zeros(),
            Point3::origin(),
            Point3::origin(),
            true,
            false,
            0.0,
        );
        let rods = vec![sy];
        let mut op = build(&rods, vec![wall]);
        let mut ax = vec![0.0];
        op.apply_gamma(&[1.0], &mut ax);
        // A two-sided self-block would double-count; the one-sided gather
        // must equal exactly the sphere mobility.
        let expect = 1.0 / (6.0 * std::f64::consts::PI * 0.5);
        assert_relative_eq!(ax[0], expect, epsilon = 1e-12);
    }

    #[test]
    fn projection_clamps_unilateral_only() {
        let (rods, blocks) = two_rod_setup();
        let op = build(&rods, blocks);
        let mut x = vec![-1.0, -1.0];
        op.project(&mut x);
        assert_eq!(x, vec![0.0, -1.0]);
    }

    #[test]
    fn missing_rod_is_reported() {
        let (rods, mut blocks) = two_rod_setup();
        blocks[0].gid_j = Gid::new(99);
        let mobility = MobilityMatrix::build(&rods, 1.0);
        let result = ConstraintOperator::new(
            Comm::solo(),
            blocks,
            &rods,
            &HashMap::new(),
            mobility,
            1.0,
            0.01,
        );
        assert!(matches!(
            result,
            Err(ConstraintError::MissingRod { gid }) if gid == Gid::new(99)
        ));
    }

    #[test]
    fn rhs_includes_gap_rate_and_known_velocity() {
        let (rods, blocks) = two_rod_setup();
        let op = build(&rods, blocks);
        // Rod 0 moving +x at 1, rod 1 moving -x at 1: closing.
        let mut vel = vec![0.0; 12];
        vel[0] = 1.0;
        vel[6] = -1.0;
        let g = op.known_velocity_rhs(&vel);
        // Contact row: delta0/dt + (F_i . v_i + F_j . v_j)
        //            = -0.1/0.01 + (-1 - 1) = -12.
        assert_relative_eq!(g[0], -12.0, epsilon = 1e-12);
        // Spring row: 0.2/0.01 + (1 + 1) = 22.
        assert_relative_eq!(g[1], 22.0, epsilon = 1e-12);
    }
}
