//! Run configuration.
//!
//! All keys recognised by the simulation, with the documented defaults.
//! The YAML on disk uses camelCase key names.

use serde::{Deserialize, Serialize};
use syl_geometry::Boundary;

use crate::ConfigError;

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Random number seed.
    pub rng_seed: u64,

    /// Simulation box lower corner.
    pub sim_box_low: [f64; 3],
    /// Simulation box upper corner.
    pub sim_box_high: [f64; 3],
    /// Periodic flag per axis.
    #[serde(rename = "simBoxPBC")]
    pub sim_box_pbc: [bool; 3],
    /// Constrain motion to the mid-plane monolayer.
    pub monolayer: bool,

    /// Initialisation box lower corner.
    pub init_box_low: [f64; 3],
    /// Initialisation box upper corner.
    pub init_box_high: [f64; 3],
    /// Initial orientation; components outside `[-1, 1]` are drawn randomly.
    pub init_orient: [f64; 3],
    /// Squeeze the initial cross-section into a circle in the y-z plane.
    pub init_circular_x: bool,
    /// Number of zero-noise relaxation steps to resolve initial overlaps.
    pub init_pre_steps: usize,

    /// Fluid viscosity.
    pub viscosity: f64,
    /// Thermal energy; zero disables Brownian motion.
    #[serde(rename = "KBT")]
    pub kbt: f64,

    /// Stiffness of extend links.
    pub end_link_kappa: f64,
    /// Rest gap of extend links.
    pub end_link_gap: f64,
    /// Per-director stiffness of bend and tri-bend links.
    pub bending_link_kappa: [f64; 3],
    /// Preferred curvature of bend and tri-bend links.
    pub preferred_curvature: [f64; 3],

    /// Rods never move when set.
    pub sylinder_fixed: bool,
    /// Initial number of rods when starting from configuration.
    pub sylinder_number: usize,
    /// Rod length (mean of the log-normal when `sylinder_length_sigma > 0`).
    pub sylinder_length: f64,
    /// Log-normal sigma of the length distribution; negative means
    /// mono-disperse.
    pub sylinder_length_sigma: f64,
    /// Rod diameter.
    pub sylinder_diameter: f64,
    /// Collision diameter = ratio x physical diameter.
    pub sylinder_diameter_col_ratio: f64,
    /// Collision length = ratio x physical length.
    pub sylinder_length_col_ratio: f64,
    /// Collision buffer ratio: candidate pairs within
    /// `buffer x collision radius` become constraints.
    pub sylinder_col_buf: f64,

    /// Timestep size.
    pub dt: f64,
    /// Total simulated time.
    pub time_total: f64,
    /// Interval between snapshots.
    pub time_snap: f64,

    /// Constraint solver residual tolerance.
    pub con_res_tol: f64,
    /// Constraint solver iteration cap.
    pub con_max_ite: usize,
    /// Iterative solver choice: 0 = BBPGD, 1 = APGD.
    pub con_solver_choice: u32,

    /// Confinement boundaries.
    pub boundaries: Vec<Boundary>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rng_seed: 0,
            sim_box_low: [0.0; 3],
            sim_box_high: [1.0; 3],
            sim_box_pbc: [false; 3],
            monolayer: false,
            init_box_low: [0.0; 3],
            init_box_high: [1.0; 3],
            init_orient: [2.0; 3],
            init_circular_x: false,
            init_pre_steps: 100,
            viscosity: 1.0,
            kbt: 0.0,
            end_link_kappa: 0.0,
            end_link_gap: 0.0,
            bending_link_kappa: [0.0; 3],
            preferred_curvature: [0.0; 3],
            sylinder_fixed: false,
            sylinder_number: 0,
            sylinder_length: 1.0,
            sylinder_length_sigma: -1.0,
            sylinder_diameter: 0.1,
            sylinder_diameter_col_ratio: 1.0,
            sylinder_length_col_ratio: 1.0,
            sylinder_col_buf: 0.3,
            dt: 1e-3,
            time_total: 1e-3,
            time_snap: 1e-3,
            con_res_tol: 1e-5,
            con_max_ite: 2000,
            con_solver_choice: 0,
            boundaries: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Parse a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or malformed, or when [`validate`]
    /// rejects the values. A missing configuration file is fatal.
    ///
    /// [`validate`]: RunConfig::validate
    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the simulation cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first violated requirement.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dt <= 0.0 {
            return Err(ConfigError::Invalid("dt must be positive"));
        }
        if self.viscosity <= 0.0 {
            return Err(ConfigError::Invalid("viscosity must be positive"));
        }
        if self.kbt < 0.0 {
            return Err(ConfigError::Invalid("KBT must be non-negative"));
        }
        if self.sylinder_diameter <= 0.0 {
            return Err(ConfigError::Invalid("sylinderDiameter must be positive"));
        }
        for k in 0..3 {
            if self.sim_box_high[k] <= self.sim_box_low[k] {
                return Err(ConfigError::Invalid("simBox must have positive extent"));
            }
        }
        if self.sylinder_diameter_col_ratio <= 0.0 || self.sylinder_diameter_col_ratio > 1.0 {
            return Err(ConfigError::Invalid(
                "sylinderDiameterColRatio must be in (0, 1]",
            ));
        }
        if self.sylinder_length_col_ratio <= 0.0 || self.sylinder_length_col_ratio > 1.0 {
            return Err(ConfigError::Invalid(
                "sylinderLengthColRatio must be in (0, 1]",
            ));
        }
        if self.sylinder_col_buf < 0.0 {
            return Err(ConfigError::Invalid("sylinderColBuf must be non-negative"));
        }
        if self.con_res_tol <= 0.0 || self.con_max_ite == 0 {
            return Err(ConfigError::Invalid(
                "constraint solver tolerance and iteration cap must be positive",
            ));
        }
        if self.con_solver_choice > 1 {
            return Err(ConfigError::Invalid(
                "conSolverChoice must be 0 (BBPGD) or 1 (APGD)",
            ));
        }
        Ok(())
    }

    /// Periodic length of axis `k`, zero when the axis is open.
    #[must_use]
    pub fn period(&self, k: usize) -> f64 {
        if self.sim_box_pbc[k] {
            self.sim_box_high[k] - self.sim_box_low[k]
        } else {
            0.0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_dt_rejected() {
        let config = RunConfig {
            dt: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_camel_case_keys() {
        let yaml = r"
rngSeed: 42
simBoxLow: [0.0, 0.0, 0.0]
simBoxHigh: [10.0, 10.0, 10.0]
simBoxPBC: [true, true, false]
viscosity: 0.0009
KBT: 0.00411
sylinderNumber: 100
sylinderLength: 1.0
sylinderDiameter: 0.05
dt: 0.001
timeTotal: 1.0
timeSnap: 0.01
conResTol: 1.0e-6
conMaxIte: 5000
conSolverChoice: 1
boundaries:
  - type: wall
    center: [0.0, 0.0, 0.0]
    normal: [0.0, 0.0, 1.0]
";
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.rng_seed, 42);
        assert_eq!(config.sim_box_pbc, [true, true, false]);
        assert_eq!(config.con_solver_choice, 1);
        assert_eq!(config.boundaries.len(), 1);
        assert!(config.validate().is_ok());
        // Unset keys fall back to defaults.
        assert_eq!(config.init_pre_steps, 100);
        assert!((config.sylinder_col_buf - 0.3).abs() < 1e-15);
        assert!((config.sylinder_length_sigma + 1.0).abs() < 1e-15);
    }

    #[test]
    fn period_is_zero_on_open_axes() {
        let config = RunConfig {
            sim_box_low: [0.0; 3],
            sim_box_high: [4.0, 5.0, 6.0],
            sim_box_pbc: [true, false, true],
            ..Default::default()
        };
        assert_eq!(config.period(0), 4.0);
        assert_eq!(config.period(1), 0.0);
        assert_eq!(config.period(2), 6.0);
    }
}
