//! Constraint resolution pipeline for the sylinder simulation.
//!
//! Each timestep the system gathers one [`ConstraintBlock`] per scalar
//! constraint (unilateral non-penetration blocks from the collision passes,
//! bilateral blocks from the four link passes), then solves for the
//! Lagrange multipliers and turns them back into per-rod forces and
//! velocities.
//!
//! # The constraint operator
//!
//! With `D_u`/`D_b` the sparse geometry matrices whose columns hold each
//! block's unscaled forces and torques, `M` the block-diagonal mobility and
//! `K⁻¹` the diagonal of bilateral spring compliances, the solve works with
//! the symmetric positive semi-definite block operator
//!
//! ```text
//! M_c = [ Du^T M Du      Du^T M Db             ]
//!       [ Db^T M Du      Db^T M Db + K^-1 / dt ]
//! ```
//!
//! applied matrix-free by [`ConstraintOperator`]: scatter multipliers into a
//! two-column force multi-vector, reduce rows of non-local ("ghost") rods to
//! their owners and back, apply the mobility column-wise, and gather the
//! transposes.
//!
//! # Solvers
//!
//! The multipliers minimise `q(gamma) = gamma^T M_c gamma / 2 + g^T gamma`
//! subject to `gamma_u >= 0` (bilateral multipliers are free). Two
//! bound-projected kernels are provided, Barzilai-Borwein projected
//! gradient descent ([`SolverChoice::Bbpgd`]) and accelerated projected
//! gradient descent ([`SolverChoice::Apgd`]), and the driver retries with
//! the next kernel on non-convergence before reporting a numeric failure.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod block;
mod collector;
mod collide;
mod error;
mod links;
mod mobility;
mod operator;
mod solver;

pub use block::{constraint_stress, ConstraintBlock};
pub use collector::ConstraintCollector;
pub use collide::{collect_boundary_collisions, collect_pair_collisions};
pub use error::ConstraintError;
pub use links::{
    collect_bend_links, collect_extend_links, collect_pin_links, collect_tri_bend_links,
    LinkParams,
};
pub use mobility::MobilityMatrix;
pub use operator::ConstraintOperator;
pub use solver::{
    solve_constraints, ConstraintSolution, SolveReport, SolverChoice, SolverOptions,
};

/// Result type for the constraint pipeline.
pub type Result<T> = std::result::Result<T, ConstraintError>;
