use std::fmt;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::acquisition::AcquisitionController;
use super::clock::Clock;
use super::MeasurementError;
use crate::instruments::{Oscilloscope, PowerSupply, PulseBoard};
use crate::magnetics::{flux_density, theoretical_inductance, CoreGeometry, Material};
use crate::pulse::{log_spaced, PulseMode, PulseTrainPlanner, TestParameters};

/// Points averaged into the nominal inductance
pub const NOMINAL_POINTS: usize = 3;

/// Points needed before saturation is checked
pub const MIN_SATURATION_POINTS: usize = 4;

/// Peak current relative to the current range that counts as clipping
pub const CLIPPING_FRACTION: f64 = 0.9;

/// Inductance drop across a DC-bias sweep that warrants a warning, in %
pub const DC_BIAS_DROP_WARNING_PERCENT: f64 = 30.0;

/// Why a sweep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every point was visited
    Completed,
    /// Flux density above the configured ceiling
    FluxLimit,
    /// Peak current above the configured ceiling
    CurrentLimit,
    /// Peak current close to the current channel range
    ScopeClipping,
    /// Inductance dropped below the nominal value by more than the threshold
    Saturation,
}

impl StopReason {
    /// Whether the stop was a safety trip
    pub fn is_safety_trip(self) -> bool {
        matches!(self, StopReason::FluxLimit | StopReason::CurrentLimit)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Completed => "completed",
            StopReason::FluxLimit => "flux limit",
            StopReason::CurrentLimit => "current limit",
            StopReason::ScopeClipping => "scope clipping",
            StopReason::Saturation => "saturation",
        };
        f.write_str(text)
    }
}

/// One accepted sweep point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// Switching frequency, in Hz
    pub frequency: f64,
    /// Positive rail, in V
    pub voltage: f64,
    /// Inductance, in H
    pub inductance: f64,
    /// Peak current, in A
    pub peak_current: f64,
    /// `L·I/(N·Ae)`, in T (zero when the core is unknown)
    pub flux_density: f64,
    /// Bias requested for DC-bias points, in A
    pub dc_bias_target: Option<f64>,
    /// Bias measured over the second half of the capture, in A
    pub dc_current: Option<f64>,
    pub ac_ripple: Option<f64>,
    /// Attempts the acquisition needed
    pub attempts: usize,
}

/// Points of one session and how it ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub core: String,
    pub material: String,
    pub turns: u32,
    /// Inductance expected from the core data, in H
    pub theoretical_inductance: Option<f64>,
    pub points: Vec<MeasurementPoint>,
    /// Mean of the first points, set once saturation is checked
    pub nominal_inductance: Option<f64>,
    pub saturation_detected: bool,
    pub saturation_frequency: Option<f64>,
    pub stop_reason: StopReason,
    /// Points skipped after a failed acquisition or a per-point error
    pub failed_points: usize,
}

impl MeasurementResult {
    pub fn new(core: &str, material: &str, turns: u32) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            core: core.to_string(),
            material: material.to_string(),
            turns,
            theoretical_inductance: None,
            points: Vec::new(),
            nominal_inductance: None,
            saturation_detected: false,
            saturation_frequency: None,
            stop_reason: StopReason::Completed,
            failed_points: 0,
        }
    }

    pub fn inductances(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.inductance).collect()
    }

    pub fn max_flux_density(&self) -> Option<f64> {
        self.points.iter().map(|p| p.flux_density).reduce(f64::max)
    }

    /// `(L_max − L_min) / L_max` over all points, in %
    pub fn inductance_drop_percent(&self) -> Option<f64> {
        let max = self.points.iter().map(|p| p.inductance).reduce(f64::max)?;
        let min = self.points.iter().map(|p| p.inductance).reduce(f64::min)?;
        (max > 0.0).then(|| (max - min) / max * 100.0)
    }

    fn trip(&mut self, reason: StopReason, frequency: f64) {
        self.stop_reason = reason;
        if reason != StopReason::ScopeClipping {
            self.saturation_detected = true;
            self.saturation_frequency = Some(frequency);
        }
    }
}

/// Mean of the first (up to three) inductances.
pub fn nominal_inductance(inductances: &[f64]) -> Option<f64> {
    let count = inductances.len().min(NOMINAL_POINTS);
    (count > 0).then(|| inductances[..count].iter().sum::<f64>() / count as f64)
}

/// True when the latest inductance sits more than `threshold` below the
/// nominal value. Needs at least four points.
pub fn detect_saturation(inductances: &[f64], threshold: f64) -> bool {
    if inductances.len() < MIN_SATURATION_POINTS {
        return false;
    }
    let (Some(nominal), Some(latest)) = (nominal_inductance(inductances), inductances.last()) else {
        return false;
    };
    nominal > 0.0 && (nominal - latest) / nominal > threshold
}

/// Frequency sweep settings with saturation detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub core: String,
    pub material: String,
    pub turns: u32,
    /// Air gap, in m
    pub air_gap: f64,
    /// Test voltage on both rails, in V
    pub voltage: f64,
    /// First (highest) frequency, in Hz
    pub start_frequency: f64,
    /// Last (lowest) frequency, in Hz
    pub min_frequency: f64,
    pub frequency_steps: usize,
    /// Relative inductance drop that counts as saturation
    pub saturation_threshold: f64,
    /// Flux density ceiling, in T
    pub max_flux_density: f64,
    /// Peak current ceiling, in A
    pub max_current: f64,
    /// Pulse pairs per point
    pub num_pulses: usize,
    /// Balanced or padded trains
    pub train: PulseMode,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            core: "RM10".to_string(),
            material: "N87".to_string(),
            turns: 26,
            air_gap: 0.0,
            voltage: 1.0,
            start_frequency: 500e3,
            min_frequency: 1e3,
            frequency_steps: 25,
            saturation_threshold: 0.20,
            max_flux_density: 0.30,
            max_current: 10.0,
            num_pulses: 2,
            train: PulseMode::Balanced,
        }
    }
}

impl SweepSettings {
    /// Frequencies from `start_frequency` down to `min_frequency`
    pub fn frequencies(&self) -> Vec<f64> {
        log_spaced(self.start_frequency, self.min_frequency, self.frequency_steps)
    }
}

/// DC-bias sweep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcBiasSweepSettings {
    pub core: String,
    pub material: String,
    pub turns: u32,
    pub voltage: f64,
    pub frequency: f64,
    /// Bias currents to visit, in A
    pub dc_currents: Vec<f64>,
    /// Measurement cycles per point
    pub num_pulses: usize,
    /// Inductance used for the first bias pulse, in H
    pub inductance_estimate: f64,
}

impl Default for DcBiasSweepSettings {
    fn default() -> Self {
        Self {
            core: "RM10".to_string(),
            material: "N87".to_string(),
            turns: 26,
            voltage: 5.0,
            frequency: 100e3,
            dc_currents: vec![0.0, 0.02, 0.05, 0.1, 0.15],
            num_pulses: 5,
            inductance_estimate: 3e-3,
        }
    }
}

/// Spread of a constant-voltage inductance sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InductanceSweepSummary {
    pub points: Vec<MeasurementPoint>,
    pub attempted: usize,
    pub mean_inductance: Option<f64>,
    /// Population standard deviation, in H
    pub std_inductance: Option<f64>,
    /// Accepted points over attempted points
    pub success_rate: f64,
}

fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Runs acquisitions across a list of operating points and decides when to
/// stop.
pub struct SaturationSweepController<'a, P, O, B, C> {
    controller: &'a mut AcquisitionController<P, O, B, C>,
}

impl<'a, P, O, B, C> SaturationSweepController<'a, P, O, B, C>
where
    P: PowerSupply,
    O: Oscilloscope,
    B: PulseBoard,
    C: Clock,
{
    pub fn new(controller: &'a mut AcquisitionController<P, O, B, C>) -> Self {
        Self { controller }
    }

    fn plan_point(
        planner: &PulseTrainPlanner,
        train: PulseMode,
        voltage: f64,
        frequency: f64,
        num_pulses: usize,
    ) -> Result<TestParameters, MeasurementError> {
        let parameters = match train {
            PulseMode::Padded => planner.padded(voltage, frequency, num_pulses)?,
            PulseMode::Balanced => planner.balanced(voltage, frequency, num_pulses)?,
            other => {
                return Err(MeasurementError::InvalidSetting(format!(
                    "{} trains cannot drive an inductance sweep",
                    other
                )))
            }
        };
        Ok(parameters)
    }

    /// Descending frequency sweep that stops on the flux and current
    /// ceilings, on scope clipping or on saturation.
    pub fn run(&mut self, settings: &SweepSettings) -> Result<MeasurementResult, MeasurementError> {
        let core = CoreGeometry::lookup(&settings.core)?;
        let material = Material::lookup(&settings.material)?;
        if settings.turns == 0 {
            return Err(MeasurementError::InvalidSetting("turns must be positive".to_string()));
        }
        let planner = PulseTrainPlanner::default();
        let frequencies = settings.frequencies();

        let mut result = MeasurementResult::new(core.name, material.name, settings.turns);
        let theoretical = theoretical_inductance(&core, &material, settings.turns, settings.air_gap);
        result.theoretical_inductance = Some(theoretical);

        info!(
            "Inductance sweep on {} ({}), N={}: theoretical L = {:.2} mH, {} V, {:.1} kHz -> {:.1} kHz",
            core.name,
            material.name,
            settings.turns,
            theoretical * 1e3,
            settings.voltage,
            settings.start_frequency / 1e3,
            settings.min_frequency / 1e3
        );

        let outcome = self.sweep_frequencies(settings, &planner, &frequencies, core.effective_area, &mut result);
        let disabled = self.controller.disable_outputs();
        outcome?;
        disabled?;

        result.nominal_inductance = nominal_inductance(&result.inductances());
        if result.saturation_detected {
            info!(
                "Sweep stopped ({}) at {:.2} kHz after {} points",
                result.stop_reason,
                result.saturation_frequency.unwrap_or_default() / 1e3,
                result.points.len()
            );
        } else {
            info!("Sweep ended ({}) with {} points", result.stop_reason, result.points.len());
        }
        Ok(result)
    }

    fn sweep_frequencies(
        &mut self,
        settings: &SweepSettings,
        planner: &PulseTrainPlanner,
        frequencies: &[f64],
        effective_area: f64,
        result: &mut MeasurementResult,
    ) -> Result<(), MeasurementError> {
        for (i, frequency) in frequencies.iter().copied().enumerate() {
            info!("[{}/{}] Testing at {:.2} kHz", i + 1, frequencies.len(), frequency / 1e3);
            let label = format!("{:.2} kHz", frequency / 1e3);
            let acquisition =
                match Self::plan_point(planner, settings.train, settings.voltage, frequency, settings.num_pulses)
                    .and_then(|parameters| self.controller.measure_inductance(&parameters))
                {
                    Ok(acquisition) => acquisition,
                    Err(e) => {
                        skip_point(&label, e, &mut result.failed_points)?;
                        continue;
                    }
                };
            let Some(estimate) = acquisition.extraction else {
                warn!("Could not calculate inductance at {:.2} kHz", frequency / 1e3);
                result.failed_points += 1;
                continue;
            };

            let flux = flux_density(estimate.inductance, estimate.peak_current, settings.turns, effective_area);
            info!(
                "  L = {:.3} mH, I_peak = {:.3} A, B = {:.1} mT",
                estimate.inductance * 1e3,
                estimate.peak_current,
                flux * 1e3
            );
            result.points.push(MeasurementPoint {
                frequency,
                voltage: settings.voltage,
                inductance: estimate.inductance,
                peak_current: estimate.peak_current,
                flux_density: flux,
                dc_bias_target: None,
                dc_current: None,
                ac_ripple: None,
                attempts: acquisition.attempts,
            });

            if flux > settings.max_flux_density {
                warn!(
                    "Flux limit: B = {:.1} mT exceeds {:.0} mT",
                    flux * 1e3,
                    settings.max_flux_density * 1e3
                );
                result.trip(StopReason::FluxLimit, frequency);
                break;
            }
            if estimate.peak_current > settings.max_current {
                warn!(
                    "Safety stop: peak current {:.2} A exceeds {} A",
                    estimate.peak_current, settings.max_current
                );
                result.trip(StopReason::CurrentLimit, frequency);
                break;
            }
            if estimate.peak_current > CLIPPING_FRACTION * acquisition.scope.current_range {
                warn!(
                    "ADC clipping: peak current {:.1} mA approaching the {:.0} mA range",
                    estimate.peak_current * 1e3,
                    acquisition.scope.current_range * 1e3
                );
                result.trip(StopReason::ScopeClipping, frequency);
                break;
            }
            let inductances = result.inductances();
            if detect_saturation(&inductances, settings.saturation_threshold) {
                let nominal = nominal_inductance(&inductances).unwrap_or(estimate.inductance);
                warn!(
                    "Saturation detected at {:.2} kHz: L = {:.3} mH vs nominal {:.3} mH ({:.1}% drop)",
                    frequency / 1e3,
                    estimate.inductance * 1e3,
                    nominal * 1e3,
                    (1.0 - estimate.inductance / nominal) * 100.0
                );
                result.trip(StopReason::Saturation, frequency);
                break;
            }
        }
        Ok(())
    }

    /// Inductance at increasing DC bias, each point planned with the
    /// inductance measured at the previous one.
    pub fn run_dc_bias_sweep(&mut self, settings: &DcBiasSweepSettings) -> Result<MeasurementResult, MeasurementError> {
        let core = CoreGeometry::lookup(&settings.core)?;
        let material = Material::lookup(&settings.material)?;
        let planner = PulseTrainPlanner::default();
        let mut result = MeasurementResult::new(core.name, material.name, settings.turns);

        info!(
            "DC-bias sweep: {} V, {:.0} kHz, bias {:?} mA",
            settings.voltage,
            settings.frequency / 1e3,
            settings.dc_currents.iter().map(|i| i * 1e3).collect::<Vec<_>>()
        );

        let outcome = self.sweep_dc_bias(settings, &planner, core.effective_area, &mut result);
        let disabled = self.controller.disable_outputs();
        outcome?;
        disabled?;

        result.nominal_inductance = nominal_inductance(&result.inductances());
        if let Some(drop) = result.inductance_drop_percent() {
            info!("L drop across the bias sweep: {:.1}%", drop);
            if drop > DC_BIAS_DROP_WARNING_PERCENT {
                warn!("Significant inductance drop ({:.1}%), approaching saturation", drop);
            }
        }
        Ok(result)
    }

    fn sweep_dc_bias(
        &mut self,
        settings: &DcBiasSweepSettings,
        planner: &PulseTrainPlanner,
        effective_area: f64,
        result: &mut MeasurementResult,
    ) -> Result<(), MeasurementError> {
        let mut inductance_estimate = settings.inductance_estimate;
        for dc_current in settings.dc_currents.iter().copied() {
            let label = format!("I_dc={:.0} mA", dc_current * 1e3);
            let acquisition = match planner
                .dc_bias(
                    settings.voltage,
                    settings.frequency,
                    dc_current,
                    settings.num_pulses,
                    inductance_estimate,
                )
                .map_err(MeasurementError::from)
                .and_then(|parameters| self.controller.measure_dc_biased_inductance(&parameters))
            {
                Ok(acquisition) => acquisition,
                Err(e) => {
                    skip_point(&label, e, &mut result.failed_points)?;
                    continue;
                }
            };
            let Some(estimate) = acquisition.extraction else {
                warn!("I_dc={:.0} mA: failed", dc_current * 1e3);
                result.failed_points += 1;
                continue;
            };

            info!(
                "I_dc={:.0} mA: L={:.2} mH, actual_dc={:.1} mA",
                dc_current * 1e3,
                estimate.inductance * 1e3,
                estimate.dc_current * 1e3
            );
            result.points.push(MeasurementPoint {
                frequency: settings.frequency,
                voltage: settings.voltage,
                inductance: estimate.inductance,
                peak_current: estimate.peak_current,
                flux_density: flux_density(
                    estimate.inductance,
                    estimate.peak_current,
                    settings.turns,
                    effective_area,
                ),
                dc_bias_target: Some(dc_current),
                dc_current: Some(estimate.dc_current),
                ac_ripple: Some(estimate.ac_ripple),
                attempts: acquisition.attempts,
            });
            inductance_estimate = estimate.inductance;
        }
        Ok(())
    }

    /// Inductance at a fixed voltage over a frequency list, with its
    /// spread and the share of accepted points.
    pub fn run_inductance_sweep(
        &mut self,
        voltage: f64,
        frequencies: &[f64],
        num_pulses: usize,
    ) -> Result<InductanceSweepSummary, MeasurementError> {
        let planner = PulseTrainPlanner::default();
        let mut points = Vec::new();

        let outcome = self.sweep_constant_voltage(voltage, frequencies, num_pulses, &planner, &mut points);
        let disabled = self.controller.disable_outputs();
        outcome?;
        disabled?;

        let inductances: Vec<f64> = points.iter().map(|p| p.inductance).collect();
        let stats = mean_and_std(&inductances);
        let success_rate = if frequencies.is_empty() {
            0.0
        } else {
            points.len() as f64 / frequencies.len() as f64
        };
        if let Some((mean, std)) = stats {
            info!(
                "Inductance {:.3} mH ± {:.3} mH over {} of {} points",
                mean * 1e3,
                std * 1e3,
                points.len(),
                frequencies.len()
            );
        }

        Ok(InductanceSweepSummary {
            points,
            attempted: frequencies.len(),
            mean_inductance: stats.map(|s| s.0),
            std_inductance: stats.map(|s| s.1),
            success_rate,
        })
    }

    fn sweep_constant_voltage(
        &mut self,
        voltage: f64,
        frequencies: &[f64],
        num_pulses: usize,
        planner: &PulseTrainPlanner,
        points: &mut Vec<MeasurementPoint>,
    ) -> Result<(), MeasurementError> {
        let mut skipped = 0;
        for frequency in frequencies.iter().copied() {
            let measured = planner
                .balanced(voltage, frequency, num_pulses)
                .map_err(MeasurementError::from)
                .and_then(|parameters| self.controller.measure_inductance(&parameters));
            match measured {
                Ok(acquisition) => match acquisition.extraction {
                    Some(estimate) => points.push(MeasurementPoint {
                        frequency,
                        voltage,
                        inductance: estimate.inductance,
                        peak_current: estimate.peak_current,
                        flux_density: 0.0,
                        dc_bias_target: None,
                        dc_current: None,
                        ac_ripple: None,
                        attempts: acquisition.attempts,
                    }),
                    None => warn!("{:.1} kHz: FAILED", frequency / 1e3),
                },
                Err(e) => skip_point(&format!("{:.1} kHz", frequency / 1e3), e, &mut skipped)?,
            }
        }
        if skipped > 0 {
            warn!("{} of {} points skipped", skipped, frequencies.len());
        }
        Ok(())
    }
}

/// Count and log a failed point, or return the error when it ends the sweep.
fn skip_point(label: &str, error: MeasurementError, failed_points: &mut usize) -> Result<(), MeasurementError> {
    if error.aborts_sweep() {
        return Err(error);
    }
    warn!("{}: {}, point skipped", label, error);
    *failed_points += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_needs_four_points() {
        assert!(!detect_saturation(&[], 0.2));
        assert!(!detect_saturation(&[4e-3, 4e-3, 1e-3], 0.2));
        assert!(detect_saturation(&[4e-3, 4e-3, 4e-3, 3e-3], 0.2));
        assert!(!detect_saturation(&[4e-3, 4e-3, 4e-3, 3.5e-3], 0.2));
    }

    #[test]
    fn test_nominal_uses_first_three() {
        assert_eq!(nominal_inductance(&[]), None);
        assert_eq!(nominal_inductance(&[2.0, 4.0]), Some(3.0));
        assert_eq!(nominal_inductance(&[1.0, 2.0, 3.0, 100.0]), Some(2.0));
    }

    #[test]
    fn test_mean_and_std_is_population() {
        let (mean, std) = mean_and_std(&[1.0, 3.0]).unwrap();
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
    }

    #[test]
    fn test_trip_flags() {
        let mut result = MeasurementResult::new("RM10", "N87", 26);
        result.trip(StopReason::ScopeClipping, 1e3);
        assert!(!result.saturation_detected);
        result.trip(StopReason::FluxLimit, 2e3);
        assert!(result.saturation_detected);
        assert_eq!(result.saturation_frequency, Some(2e3));
        assert!(result.stop_reason.is_safety_trip());
    }

    #[test]
    fn test_default_frequencies_descend() {
        let frequencies = SweepSettings::default().frequencies();
        assert_eq!(frequencies.len(), 25);
        assert!(frequencies.windows(2).all(|w| w[1] < w[0]));
    }
}
