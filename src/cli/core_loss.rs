use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;

use tpt::magnetics::{theoretical_inductance, CoreGeometry, CoreLossTiming, CoreLossTimingRequest, Material};
use tpt::measurement::CoreLossSession;
use tpt::pulse::{steady_period, FluxTarget};
use tpt::report::{write_core_loss_file, CoreLossSummary};

use super::bench::BenchTarget;
use super::config::CoreLossConfig;

/// Measure core loss at each configured frequency
pub fn run(target: &BenchTarget, settings: &CoreLossConfig, output: Option<PathBuf>) -> Result<()> {
    if settings.frequencies.is_empty() {
        anyhow::bail!("No core-loss frequencies given");
    }
    let mut controller = target.open()?;
    let mut session = CoreLossSession::new(&mut controller, settings.session.clone());

    let results = match (settings.flux_density, settings.negative_voltage) {
        (Some(flux_density), Some(negative_voltage)) => {
            let request = CoreLossTimingRequest {
                core: settings.core.clone(),
                material: settings.material.clone(),
                turns: settings.turns,
                air_gap: settings.air_gap,
                frequency: settings.frequencies[0],
                flux_density_pp: flux_density,
                dc_bias_flux_density: settings.dc_bias_flux_density,
                positive_voltage: settings.voltage,
                negative_voltage,
            };
            let timing = CoreLossTiming::from_request(&request)?;
            info!(
                "Half-bridge timing: t+ = {:.2} us at {} V, t- = {:.2} us at {} V ({:.1} kHz)",
                timing.t_positive * 1e6,
                settings.voltage,
                timing.t_negative * 1e6,
                negative_voltage.abs(),
                timing.actual_frequency / 1e3
            );
            let result = session
                .measure_from_timing(&timing, settings.voltage, negative_voltage.abs())
                .context("Core-loss measurement failed")?;
            vec![result]
        }
        (Some(flux_density), None) => {
            let core = CoreGeometry::lookup(&settings.core)?;
            let material = Material::lookup(&settings.material)?;
            let inductance = theoretical_inductance(&core, &material, settings.turns, settings.air_gap);

            let mut results = Vec::with_capacity(settings.frequencies.len());
            for frequency in settings.frequencies.iter().copied() {
                let flux_target = FluxTarget {
                    flux_density_ac_pp: flux_density,
                    flux_density_dc_bias: settings.dc_bias_flux_density,
                    frequency,
                    turns: settings.turns,
                    effective_area: core.effective_area,
                    inductance,
                };
                match session.run_flux_target(&flux_target) {
                    Ok(result) => results.push(result),
                    Err(e) => warn!("{:.1} kHz: {}", frequency / 1e3, e),
                }
            }
            results
        }
        (None, _) => {
            let mut ratio = settings.t_positive_ratio;
            if settings.optimize_timing {
                let period = 2.0 * steady_period(settings.frequencies[0]);
                let search = session
                    .find_optimal_timing(settings.voltage, period, (0.1 * period, 0.9 * period), settings.timing_steps)
                    .context("Timing search failed")?;
                match search {
                    Some(search) => ratio = search.optimal.t_positive / period,
                    None => warn!("Timing search found no usable capture, keeping t+ ratio {:.3}", ratio),
                }
            }
            info!("Core loss at {} V, t+ ratio {:.3}", settings.voltage, ratio);
            session
                .run_vs_frequency(settings.voltage, &settings.frequencies, ratio)
                .context("Core-loss sweep aborted")?
        }
    };

    println!("{}", CoreLossSummary::new(&results).format_colored());
    if let Some(path) = output {
        write_core_loss_file(&path, &results).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}
