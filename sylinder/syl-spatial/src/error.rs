//! Error types for the distributed spatial components.

use syl_types::Gid;
use thiserror::Error;

/// Consistency failures in the spatial layer. All of these indicate a
/// divergence between ranks or a caller bug; the top-level driver aborts on
/// them after logging on every rank.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpatialError {
    /// Ranks disagree on the periodic length of an axis.
    #[error("inconsistent period length on axis {axis} across ranks")]
    PeriodMismatch {
        /// Axis index 0..3.
        axis: usize,
    },

    /// A directory query asked for a gid no rank published.
    #[error("gid {gid} not found in the data directory")]
    UnknownGid {
        /// The missing gid.
        gid: Gid,
    },

    /// A periodic image could not be brought within half a period of its
    /// anchor; the link is stretched beyond the domain.
    #[error("periodic image of gid {gid} exceeds half a period on axis {axis}")]
    PbcImageOutOfRange {
        /// The rod whose image was sought.
        gid: Gid,
        /// Offending axis.
        axis: usize,
    },
}
