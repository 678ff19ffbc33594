//! Driver crate for the distributed Brownian spherocylinder simulation.
//!
//! [`SylinderSystem`] owns the rod population of one rank and runs the
//! timestep loop: exchange and bookkeeping, Brownian and external
//! velocities, constraint collection and the bound-projected multiplier
//! solve (via [`syl_constraint`]), snapshot output and Euler integration.
//!
//! # A minimal run
//!
//! ```no_run
//! use syl_core::SylinderSystem;
//! use syl_spatial::Comm;
//! use syl_types::RunConfig;
//!
//! let config = RunConfig::from_yaml_file("RunConfig.yaml".as_ref())?;
//! let steps = (config.time_total / config.dt).round() as usize;
//! let mut system = SylinderSystem::new(config, None, Comm::solo())?;
//! for _ in 0..steps {
//!     system.prepare_step()?;
//!     system.run_step()?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Errors are structured ([`SystemError`]) all the way up; only the
//! `syl-run` binary turns them into a process abort, after logging on
//! every rank.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

mod brownian;
mod error;
pub mod io;
mod rng;
pub mod stats;
mod system;

pub use brownian::brownian_velocity;
pub use error::SystemError;
pub use rng::RngPool;
pub use system::SylinderSystem;

/// Result type for the driver crate.
pub type Result<T> = std::result::Result<T, SystemError>;
