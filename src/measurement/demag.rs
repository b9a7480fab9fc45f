use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::acquisition::AcquisitionController;
use super::clock::Clock;
use super::setup::disable_outputs;
use super::MeasurementError;
use crate::instruments::{Oscilloscope, PowerSupply, PulseBoard, NEGATIVE_RAIL, POSITIVE_RAIL};
use crate::pulse::steady_period;

const ENABLE_SETTLE: Duration = Duration::from_millis(10);
const STEP_SETTLE: Duration = Duration::from_millis(20);

/// Demagnetization ramp settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemagnetizationSettings {
    /// Amplitude of the first step, in V
    pub max_voltage: f64,
    /// Frequency of the pulse pairs, in Hz
    pub frequency: f64,
    pub num_steps: usize,
    /// Balanced pairs played at each step
    pub pulses_per_step: usize,
    /// Steps below this amplitude are skipped, in V
    pub minimum_voltage: f64,
}

impl Default for DemagnetizationSettings {
    fn default() -> Self {
        Self {
            max_voltage: 10.0,
            frequency: 10e3,
            num_steps: 10,
            pulses_per_step: 2,
            minimum_voltage: 0.5,
        }
    }
}

/// Step amplitudes `max·(n−i)/n`, without the steps below `minimum`.
///
/// Non-increasing; the explicit 0 V state is applied after the last step.
pub fn demag_amplitudes(max_voltage: f64, num_steps: usize, minimum_voltage: f64) -> Vec<f64> {
    (0..num_steps)
        .map(|i| max_voltage * (num_steps - i) as f64 / num_steps as f64)
        .filter(|v| *v >= minimum_voltage)
        .collect()
}

/// Steps actually played by a [`DemagnetizationSequencer`] run
#[derive(Debug, Clone, PartialEq)]
pub struct DemagnetizationReport {
    pub amplitudes: Vec<f64>,
    pub steady_period: f64,
}

/// Returns the core to zero flux with a decaying balanced pulse ramp.
#[derive(Debug, Clone, Default)]
pub struct DemagnetizationSequencer {
    pub settings: DemagnetizationSettings,
}

impl DemagnetizationSequencer {
    pub fn new(settings: DemagnetizationSettings) -> Self {
        Self { settings }
    }

    /// Play the ramp, then leave both rails at 0 V with outputs off.
    ///
    /// On an instrument error the outputs are switched off before the
    /// error is returned.
    pub fn run<P, O, B, C>(
        &self,
        controller: &mut AcquisitionController<P, O, B, C>,
    ) -> Result<DemagnetizationReport, MeasurementError>
    where
        P: PowerSupply,
        O: Oscilloscope,
        B: PulseBoard,
        C: Clock,
    {
        let settings = &self.settings;
        if !(settings.frequency.is_finite() && settings.frequency > 0.0) || settings.num_steps == 0 {
            return Err(MeasurementError::InvalidSetting(format!(
                "demagnetization needs a positive frequency and at least one step, got {} Hz, {} steps",
                settings.frequency, settings.num_steps
            )));
        }

        let amplitudes = demag_amplitudes(settings.max_voltage, settings.num_steps, settings.minimum_voltage);
        let half_period = steady_period(settings.frequency);
        info!(
            "Demagnetizing: {} steps from {:.2} V at {:.1} kHz",
            amplitudes.len(),
            settings.max_voltage,
            settings.frequency / 1e3
        );

        // The rails end up at values the controller did not program.
        controller.invalidate_supply();
        let outcome = self.play(controller, &amplitudes, half_period);
        if outcome.is_err() {
            if let Err(e) = controller.disable_outputs() {
                warn!("Could not disable outputs after a demagnetization error: {}", e);
            }
        }
        outcome?;

        Ok(DemagnetizationReport {
            amplitudes,
            steady_period: half_period,
        })
    }

    fn play<P, O, B, C>(
        &self,
        controller: &mut AcquisitionController<P, O, B, C>,
        amplitudes: &[f64],
        half_period: f64,
    ) -> Result<(), MeasurementError>
    where
        P: PowerSupply,
        O: Oscilloscope,
        B: PulseBoard,
        C: Clock,
    {
        let pulses = vec![half_period; 2 * self.settings.pulses_per_step];
        for (step, amplitude) in amplitudes.iter().enumerate() {
            debug!("Demag step {}: {:.2} V", step + 1, amplitude);
            let supply = controller.power_supply_mut();
            supply.set_source_voltage(POSITIVE_RAIL, *amplitude)?;
            supply.set_source_voltage(NEGATIVE_RAIL, *amplitude)?;

            let board = controller.board_mut();
            board.reset()?;
            board.clear_pulses()?;
            for period in &pulses {
                board.add_pulse(*period)?;
            }

            let supply = controller.power_supply_mut();
            supply.enable_output(POSITIVE_RAIL)?;
            supply.enable_output(NEGATIVE_RAIL)?;
            controller.clock().sleep(ENABLE_SETTLE);
            controller.board_mut().run_pulses(1)?;
            controller.clock().sleep(STEP_SETTLE);
            disable_outputs(controller.power_supply_mut())?;
        }

        let supply = controller.power_supply_mut();
        supply.set_source_voltage(POSITIVE_RAIL, 0.0)?;
        supply.set_source_voltage(NEGATIVE_RAIL, 0.0)?;
        disable_outputs(supply)?;
        Ok(())
    }
}
