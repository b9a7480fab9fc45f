use anyhow::{Context, Result};
use std::path::PathBuf;

use tpt::analysis::{CoreLossIntegrator, InductanceExtractor};
use tpt::report::{read_trace_file, CoreLossSummary};

use super::AnalysisArg;

/// Run an extraction on a saved trace
pub fn run(trace: PathBuf, mode: AnalysisArg, voltage: Option<f64>, frequency: Option<f64>) -> Result<()> {
    let capture = read_trace_file(&trace).with_context(|| format!("Failed to read trace {}", trace.display()))?;
    let voltage = voltage.unwrap_or_else(|| capture.max_input_voltage());

    println!("Trace: {}", trace.display());
    println!(
        "  {} samples, {:.1} ns/sample, {:.1} us",
        capture.len(),
        capture.sampling_interval() * 1e9,
        capture.duration() * 1e6
    );
    println!("  Input peak: {:.3} V, current peak: {:.3} A", capture.max_input_voltage(), capture.peak_current());
    println!();

    match mode {
        AnalysisArg::Inductance => {
            let estimate = InductanceExtractor::default()
                .extract(&capture, voltage)
                .context("No usable positive pulse in the trace")?;
            println!("L = {:.4} mH from {} pulses", estimate.inductance * 1e3, estimate.slopes.len());
            println!("Peak current: {:.3} A", estimate.peak_current);
            if estimate.dc_buildup_suspected() {
                println!("Pulse spread {:.1}%: DC buildup suspected", estimate.spread_percent);
            }
        }
        AnalysisArg::DcBias => {
            let estimate = InductanceExtractor::default()
                .extract_dc_biased(&capture, voltage)
                .context("Not enough measurement pulses after the bias build-up")?;
            println!("L = {:.4} mH", estimate.inductance * 1e3);
            println!("DC current: {:.2} mA, ripple {:.2} mA", estimate.dc_current * 1e3, estimate.ac_ripple * 1e3);
        }
        AnalysisArg::CoreLoss => {
            let frequency = frequency.context("--frequency is required for core-loss analysis")?;
            let result = CoreLossIntegrator::default()
                .integrate(&capture, frequency)
                .context("Core-loss integration failed")?;
            println!("{}", CoreLossSummary::new(std::slice::from_ref(&result)).format_colored());
        }
    }
    Ok(())
}
