//! Top-level error type.
//!
//! Lower layers return structured errors at their module boundaries; this
//! enum funnels them to the driver binary, which is the only place allowed
//! to abort the process.

use std::path::PathBuf;
use thiserror::Error;

/// Any failure the simulation driver can encounter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SystemError {
    /// Configuration rejected at startup.
    #[error(transparent)]
    Config(#[from] syl_types::ConfigError),

    /// Consistency failure in the distributed spatial layer.
    #[error(transparent)]
    Spatial(#[from] syl_spatial::SpatialError),

    /// Constraint collection or solve failure.
    #[error(transparent)]
    Constraint(#[from] syl_constraint::ConstraintError),

    /// File could not be read or written.
    #[error("i/o failure on {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A data or restart file line could not be parsed.
    #[error("cannot parse {path} line {line}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// The global link maps are no longer identical on every rank.
    #[error("link maps diverged across ranks")]
    LinkMapsDiverged,
}
