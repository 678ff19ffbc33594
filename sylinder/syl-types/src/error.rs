//! Configuration errors, rejected at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the run configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read. A missing configuration is
    /// fatal; there is no fallback.
    #[error("cannot read configuration {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`RunConfig`].
    ///
    /// [`RunConfig`]: crate::RunConfig
    #[error("cannot parse configuration {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_yaml::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
