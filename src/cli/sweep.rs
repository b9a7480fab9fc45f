use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use tpt::measurement::{DcBiasSweepSettings, MeasurementResult, SaturationSweepController, SweepSettings};
use tpt::report::{write_sweep_file, SweepSummary};

use super::bench::BenchTarget;

/// Run a saturation sweep and report it
pub fn run(target: &BenchTarget, settings: &SweepSettings, output: Option<PathBuf>) -> Result<()> {
    let mut controller = target.open()?;
    let result = SaturationSweepController::new(&mut controller)
        .run(settings)
        .context("Sweep aborted")?;
    report(&result, output)
}

/// Run a DC-bias sweep and report it
pub fn run_dc_bias(target: &BenchTarget, settings: &DcBiasSweepSettings, output: Option<PathBuf>) -> Result<()> {
    let mut controller = target.open()?;
    let result = SaturationSweepController::new(&mut controller)
        .run_dc_bias_sweep(settings)
        .context("DC-bias sweep aborted")?;
    report(&result, output)
}

fn report(result: &MeasurementResult, output: Option<PathBuf>) -> Result<()> {
    println!("{}", SweepSummary::new(result).format_colored());
    if let Some(path) = output {
        write_sweep_file(&path, result).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Session {} saved", result.session_id);
    }
    Ok(())
}
