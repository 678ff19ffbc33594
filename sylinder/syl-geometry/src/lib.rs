//! Geometry primitives for spherocylinder ("sylinder") dynamics.
//!
//! This crate provides the low-level math shared by the collision and link
//! constraint pipeline:
//!
//! - [`segment_closest_points`]: nearest points between two centerline
//!   segments, with a well-defined answer for parallel and coincident
//!   segments
//! - [`drag_coefficients`]: slender-body drag (parallel, perpendicular,
//!   rotational) with a Stokes-sphere fallback for stubby rods
//! - [`collision_stress`]: the virial stress contribution of a unit contact
//!   force
//! - [`Boundary`]: tagged confinement primitives (wall, tube, spherical
//!   shell) with a single projection operation
//! - quaternion helpers for orientation integration and curvature
//!   measurement
//!
//! # Conventions
//!
//! A rod's long axis is its body z-axis; the lab-frame direction is
//! `q * e_z`. All math is `f64` via [`nalgebra`].
//!
//! These functions are pure and allocation-free; they are called from tight
//! per-pair loops inside the constraint generators.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::suboptimal_flops)]

mod boundary;
mod drag;
mod pbc;
mod quat;
mod segment;
mod stress;

pub use boundary::{Boundary, Projection};
pub use drag::{drag_coefficients, mobility_blocks, DragCoeff};
pub use pbc::find_pbc_image;
pub use quat::{curvature_vec, quat_from_z_to, rotate_by_omega, slerp_mid};
pub use segment::{segment_closest_points, SegmentSeparation};
pub use stress::collision_stress;

// Re-export the math types used throughout the workspace.
pub use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};
