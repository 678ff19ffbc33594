//! Error types for the constraint pipeline.

use syl_types::Gid;
use thiserror::Error;

/// Failures in constraint collection or the multiplier solve.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConstraintError {
    /// A block references a rod with neither a local row nor a ghost
    /// record; the collection pass and the directory disagree.
    #[error("constraint references gid {gid} with no local or ghost record")]
    MissingRod {
        /// The unresolvable gid.
        gid: Gid,
    },

    /// A link partner's periodic image is more than half a period away; the
    /// link is stretched beyond the domain.
    #[error(transparent)]
    Spatial(#[from] syl_spatial::SpatialError),

    /// Every solver choice ran out of iterations.
    #[error(
        "constraint solver failed to converge: residual {residual:.3e} after \
         {iterations} iterations ({attempts} kernels tried)"
    )]
    NotConverged {
        /// Residual of the last attempt.
        residual: f64,
        /// Iterations of the last attempt.
        iterations: usize,
        /// Number of kernels tried.
        attempts: usize,
    },
}
