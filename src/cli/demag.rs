use anyhow::{Context, Result};

use tpt::measurement::{DemagnetizationSequencer, DemagnetizationSettings};

use super::bench::BenchTarget;

/// Run the demagnetization ramp
pub fn run(target: &BenchTarget, settings: &DemagnetizationSettings) -> Result<()> {
    let mut controller = target.open()?;
    let report = DemagnetizationSequencer::new(settings.clone())
        .run(&mut controller)
        .context("Demagnetization failed")?;

    println!(
        "Demagnetized in {} steps ({:.2} V down to {:.2} V, {:.2} us pulses)",
        report.amplitudes.len(),
        report.amplitudes.first().copied().unwrap_or_default(),
        report.amplitudes.last().copied().unwrap_or_default(),
        report.steady_period * 1e6
    );
    Ok(())
}
