//! Distributed spatial infrastructure for the sylinder simulation.
//!
//! Three pieces live here:
//!
//! - [`Comm`]: an explicit communicator handle passed down the call tree.
//!   One backend is a trivial single-rank communicator; the other drives a
//!   fixed number of ranks as threads of one process through an in-process
//!   [`CommWorld`]. Collectives suspend the calling rank until every peer
//!   participates, matching the suspension model of the simulation.
//! - [`NearInteraction`]: the Morton-ordered neighbor search. All ranks
//!   cooperate in a sample sort on Morton keys so each rank owns a
//!   contiguous key interval; ghost copies (including periodic images with
//!   grid-quantised shifts) are exchanged so that every (target, source,
//!   shift) candidate pair can be enumerated locally with the true
//!   Euclidean ball-ball predicate.
//! - [`DataDirectory`]: owner-computes-hash lookup of arbitrary records by
//!   gid, regardless of which rank owns the record.
//!
//! # Fatal errors
//!
//! Collective misuse (mismatched participation, mismatched payload types)
//! indicates a rank divergence; there is no recovery path, so the world
//! panics rather than returning an error. Data-level inconsistencies that a
//! caller could have caused (unknown gid, mismatched period settings) are
//! reported as [`SpatialError`] and handled by the top-level driver.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod comm;
mod directory;
mod error;
mod morton;
mod near;

pub use comm::{Comm, CommWorld};
pub use directory::DataDirectory;
pub use error::SpatialError;
pub use morton::{morton_encode, MortonGrid, MAX_DEPTH};
pub use near::{NearInteraction, NearObject, NearPair};

/// Result type for spatial operations.
pub type Result<T> = std::result::Result<T, SpatialError>;
