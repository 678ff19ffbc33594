//! Command-line driver.
//!
//! ```text
//! syl-run <RunConfig.yaml> [initial.dat]
//! ```
//!
//! If a restart descriptor (`TimeStepInfo.txt`) exists in the working
//! directory the run resumes from it; otherwise the system initialises
//! from the data file or, failing that, from the configuration. This is
//! the only place in the workspace that aborts the process: every error
//! below arrives structured and is logged before exiting.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{error, info};

use syl_core::SylinderSystem;
use syl_spatial::Comm;
use syl_types::RunConfig;

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next().map(PathBuf::from) else {
        return Err("usage: syl-run <RunConfig.yaml> [initial.dat]".into());
    };
    let data_path = args.next().map(PathBuf::from);

    let config = RunConfig::from_yaml_file(&config_path)?;
    let comm = Comm::solo();

    let restart = Path::new("TimeStepInfo.txt");
    let mut system = if restart.exists() {
        info!("found {}; resuming", restart.display());
        SylinderSystem::reinitialize(config, restart, comm)?
    } else {
        SylinderSystem::new(config, data_path.as_deref(), comm)?
    };

    let total_steps = (system.config().time_total / system.config().dt).round() as usize;
    info!(
        total_steps,
        start = system.step_count(),
        "entering main loop"
    );
    while system.step_count() < total_steps {
        system.prepare_step()?;
        let wrote_snapshot = system.is_snapshot_step();
        system.run_step()?;
        if wrote_snapshot {
            system.record_diagnostics();
        }
    }
    info!("run complete at t = {:.6}", system.time());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}
