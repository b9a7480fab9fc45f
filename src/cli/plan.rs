use anyhow::{Context, Result};

use tpt::config::ProbeScales;
use tpt::pulse::{steady_period, CapturePlan, PulseMode, PulseTrainPlanner};

/// Print the train and capture plan for one excitation
pub fn run(
    mode: PulseMode,
    voltage: f64,
    frequency: f64,
    pulses: usize,
    dc_bias: f64,
    inductance: f64,
    t_positive: Option<f64>,
) -> Result<()> {
    let planner = PulseTrainPlanner::default();
    let params = match mode {
        PulseMode::Balanced => planner.balanced(voltage, frequency, pulses),
        PulseMode::Padded => planner.padded(voltage, frequency, pulses),
        PulseMode::DcBias => planner.dc_bias(voltage, frequency, dc_bias, pulses, inductance),
        PulseMode::Asymmetric => {
            let period = 2.0 * steady_period(frequency);
            let t_positive = t_positive.unwrap_or(period / 2.0);
            planner.asymmetric(voltage, voltage, t_positive, period - t_positive, pulses, 2.0)
        }
    }
    .with_context(|| format!("Cannot plan a {} train", mode))?;

    let capture = CapturePlan::for_parameters(&params, &ProbeScales::default());

    println!("Pulse Train");
    println!("===========");
    println!("Mode: {}", params.mode());
    println!("Rails: +{:.3} V / -{:.3} V", params.positive_voltage_peak(), params.negative_voltage_peak());
    println!("Current range hint: {:.3} A", params.current_peak());
    if let Some(bias) = params.dc_bias_current() {
        println!(
            "DC bias: {:.1} mA, first pulse {:.2} us",
            bias * 1e3,
            params.first_pulse_width().unwrap_or_default() * 1e6
        );
    }
    println!("Flux balanced: {}", params.is_flux_balanced());
    println!("Total duration: {:.2} us", params.total_duration() * 1e6);
    println!();

    println!("Pulses ({}):", params.pulse_periods().len());
    for (i, period) in params.pulse_periods().iter().enumerate() {
        let polarity = if i % 2 == 0 { '+' } else { '-' };
        println!("  {:3}. {} {:.3} us", i + 1, polarity, period * 1e6);
    }
    println!();

    println!("Capture:");
    println!("  Samples: {}", capture.number_samples);
    println!("  Sampling time: {:.1} ns", capture.desired_sampling_time * 1e9);
    println!("  Input range: {:.2} V", capture.input_voltage_range);
    println!("  Current range: {:.3} V at the scope", capture.current_range);
    println!("  Trigger: {:.2} V rising", capture.trigger_threshold);

    Ok(())
}
