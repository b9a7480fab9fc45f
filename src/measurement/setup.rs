use log::{debug, info, warn};

use super::MeasurementError;
use crate::config::ProbeScales;
use crate::instruments::{
    ChannelConfiguration, InstrumentError, Oscilloscope, PowerSupply, PulseBoard, ScopeChannel, NEGATIVE_RAIL,
    POSITIVE_RAIL,
};
use crate::pulse::{CapturePlan, TestParameters};

/// Current limit programmed on both rails at startup, in A
pub const STARTUP_CURRENT_LIMIT: f64 = 2.0;

/// Readback difference still attributed to the supply settling, in V
pub const RETRYABLE_READBACK_ERROR: f64 = 0.05;

fn round_millivolts(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Outcome of comparing a programmed voltage with the supply's readback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoltageReadback {
    /// Equal once both are rounded to the millivolt
    Match,
    /// Small difference, worth programming again
    Retryable { readback: f64 },
    /// The supply holds another value
    Fatal { readback: f64 },
}

impl VoltageReadback {
    pub fn classify(requested: f64, readback: f64) -> Self {
        let difference = (round_millivolts(requested) - round_millivolts(readback)).abs();
        if difference < 5e-4 {
            VoltageReadback::Match
        } else if difference <= RETRYABLE_READBACK_ERROR {
            VoltageReadback::Retryable { readback }
        } else {
            VoltageReadback::Fatal { readback }
        }
    }
}

/// What the controller remembers about the supply between acquisitions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SupplyState {
    pub initialized: bool,
    pub last_voltages: Option<(f64, f64)>,
}

fn program_rail<P: PowerSupply + ?Sized>(supply: &mut P, channel: u8, voltage: f64) -> Result<(), MeasurementError> {
    supply.set_source_voltage(channel, voltage)?;
    match VoltageReadback::classify(voltage, supply.source_voltage(channel)?) {
        VoltageReadback::Match => Ok(()),
        VoltageReadback::Retryable { readback } => {
            warn!("Supply channel {} reads {} V after programming {} V, retrying", channel, readback, voltage);
            supply.set_source_voltage(channel, voltage)?;
            let readback = supply.source_voltage(channel)?;
            match VoltageReadback::classify(voltage, readback) {
                VoltageReadback::Match => Ok(()),
                _ => Err(MeasurementError::VoltageMismatch {
                    channel,
                    requested: voltage,
                    readback,
                }),
            }
        }
        VoltageReadback::Fatal { readback } => Err(MeasurementError::VoltageMismatch {
            channel,
            requested: voltage,
            readback,
        }),
    }
}

/// Program both rails for a train.
///
/// The first call switches the outputs off, raises the limits and sets the
/// startup current limit. Rails are only reprogrammed when the requested
/// voltages change.
pub fn setup_power_supply<P: PowerSupply + ?Sized>(
    supply: &mut P,
    state: &mut SupplyState,
    parameters: &TestParameters,
) -> Result<(), MeasurementError> {
    let voltages = (parameters.positive_voltage_peak(), parameters.negative_voltage_peak());
    if state.initialized && state.last_voltages == Some(voltages) {
        return Ok(());
    }

    if !state.initialized {
        debug!("Initializing power supply");
        supply.disable_output(POSITIVE_RAIL)?;
        supply.disable_output(NEGATIVE_RAIL)?;
        supply.reset_limits()?;
        supply.set_current_limit(POSITIVE_RAIL, STARTUP_CURRENT_LIMIT)?;
        supply.set_current_limit(NEGATIVE_RAIL, STARTUP_CURRENT_LIMIT)?;
        state.initialized = true;
    }

    info!("Programming rails: +{:.3} V / -{:.3} V", voltages.0, voltages.1);
    state.last_voltages = None;
    program_rail(supply, POSITIVE_RAIL, voltages.0)?;
    program_rail(supply, NEGATIVE_RAIL, voltages.1)?;
    state.last_voltages = Some(voltages);
    Ok(())
}

/// Scope settings actually applied for one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSettings {
    /// Realised sampling interval, in s
    pub sampling_time: f64,
    pub number_samples: usize,
    /// Full-scale current the current channel can record, in A
    pub current_range: f64,
}

impl ScopeSettings {
    /// Length of the captured block, in s
    pub fn capture_duration(&self) -> f64 {
        self.number_samples as f64 * self.sampling_time
    }
}

/// Configure ranges, trigger and timebase, then arm the trigger.
///
/// The sample count is set before the sampling time since the scope picks
/// its timebase for the current sample count.
pub fn setup_oscilloscope<O: Oscilloscope + ?Sized>(
    scope: &mut O,
    plan: &CapturePlan,
    scales: &ProbeScales,
    timeout_ms: u32,
) -> Result<ScopeSettings, InstrumentError> {
    scope.set_channel_configuration(ScopeChannel::InputVoltage, ChannelConfiguration::dc(plan.input_voltage_range))?;
    scope.set_channel_configuration(ScopeChannel::OutputVoltage, ChannelConfiguration::dc(plan.output_voltage_range))?;
    let current_range = scope.set_channel_configuration(ScopeChannel::Current, ChannelConfiguration::dc(plan.current_range))?;

    scope.set_rising_trigger(ScopeChannel::InputVoltage, plan.trigger_threshold, timeout_ms)?;
    scope.arm_trigger(ScopeChannel::InputVoltage)?;

    scope.set_number_samples(plan.number_samples)?;
    let sampling_time = scope.set_sampling_time(plan.desired_sampling_time)?;

    scope.set_probe_scale(ScopeChannel::InputVoltage, scales.input_voltage)?;
    scope.set_probe_scale(ScopeChannel::OutputVoltage, scales.output_voltage)?;
    scope.set_probe_scale(ScopeChannel::Current, scales.current)?;

    let settings = ScopeSettings {
        sampling_time,
        number_samples: plan.number_samples,
        current_range: current_range * scales.current,
    };
    debug!(
        "Capture config: {} samples, {:.1} ns/sample, total={:.1} us",
        settings.number_samples,
        settings.sampling_time * 1e9,
        settings.capture_duration() * 1e6
    );
    Ok(settings)
}

/// Reset the board and load the train.
pub fn setup_board<B: PulseBoard + ?Sized>(board: &mut B, periods: &[f64]) -> Result<(), InstrumentError> {
    board.reset()?;
    board.clear_pulses()?;
    for period in periods {
        board.add_pulse(*period)?;
    }
    Ok(())
}

/// Switch both rails off, attempting the second even when the first fails.
pub fn disable_outputs<P: PowerSupply + ?Sized>(supply: &mut P) -> Result<(), InstrumentError> {
    let positive = supply.disable_output(POSITIVE_RAIL);
    let negative = supply.disable_output(NEGATIVE_RAIL);
    positive.and(negative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readback_classification() {
        assert_eq!(VoltageReadback::classify(6.4, 6.4004), VoltageReadback::Match);
        assert!(matches!(VoltageReadback::classify(6.4, 6.42), VoltageReadback::Retryable { .. }));
        assert!(matches!(VoltageReadback::classify(6.4, 5.0), VoltageReadback::Fatal { .. }));
    }

    #[test]
    fn test_capture_duration() {
        let settings = ScopeSettings {
            sampling_time: 1e-8,
            number_samples: 1_000,
            current_range: 0.1,
        };
        assert!((settings.capture_duration() - 1e-5).abs() < 1e-15);
    }
}
