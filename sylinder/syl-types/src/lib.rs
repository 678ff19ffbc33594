//! Core types for the distributed sylinder simulation.
//!
//! This crate provides the data model shared by every other crate in the
//! workspace:
//!
//! - [`Sylinder`]: the authoritative rod record owned by exactly one rank
//! - [`NearRod`]: the shippable read-only subset exchanged between ranks
//! - [`LinkMaps`]: the four global link multimaps (pin, extend, bend,
//!   tri-bend) with their reverse maps
//! - [`RunConfig`]: every recognised configuration key with its default
//! - [`ConfigError`]: startup-rejected configuration problems
//!
//! # Ownership
//!
//! The particle container on each rank is the unique owner of its rods; all
//! copies shipped through the data directory or the neighbor search are
//! read-only shadows invalidated at step boundaries. [`LinkMaps`] is global
//! knowledge: it must be identical on every rank and is only mutated through
//! collective operations.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod config;
mod error;
mod links;
mod rod;

pub use config::RunConfig;
pub use error::ConfigError;
pub use links::{Link, LinkMaps, TriLink};
pub use rod::{Gid, NearRod, Sylinder};

/// Result type for configuration handling.
pub type Result<T> = std::result::Result<T, ConfigError>;
