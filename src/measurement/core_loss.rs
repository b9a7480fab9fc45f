use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::acquisition::AcquisitionController;
use super::clock::Clock;
use super::MeasurementError;
use crate::analysis::{AnalysisError, CoreLossIntegrator, CoreLossResult, CoreLossSettings, FluxClosure};
use crate::capture::CaptureTrace;
use crate::instruments::{Oscilloscope, PowerSupply, PulseBoard};
use crate::magnetics::{steinmetz_reference_loss, CoreLossTiming};
use crate::pulse::{linspace, FluxTarget, PulseTrainPlanner, TestParameters};

/// Share of the period given to `t+` when no timing is supplied
pub const DEFAULT_T_POSITIVE_RATIO: f64 = 0.09;

/// Core-loss session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreLossSessionSettings {
    /// Output offset relative to V+ accepted by the rail balancing loop
    pub maximum_voltage_error: f64,
    /// Rail balancing iterations before the last capture is used as is
    pub max_iterations: usize,
    /// Pulse pairs per asymmetric train
    pub num_pulses: usize,
    /// Current range hint for asymmetric trains, in A
    pub current_range: f64,
    /// Peak current that aborts the session, in A
    pub max_current: f64,
    pub analysis: CoreLossSettings,
}

impl Default for CoreLossSessionSettings {
    fn default() -> Self {
        Self {
            maximum_voltage_error: 0.05,
            max_iterations: 8,
            num_pulses: 50,
            current_range: 2.0,
            max_current: 10.0,
            analysis: CoreLossSettings::default(),
        }
    }
}

/// One timing tried by [`CoreLossSession::find_optimal_timing`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingCandidate {
    pub t_positive: f64,
    pub t_negative: f64,
    /// Mean steady-cycle flux closure error, in %
    pub flux_error: f64,
}

/// Result of a `t+` sweep at fixed period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSearch {
    pub optimal: TimingCandidate,
    pub candidates: Vec<TimingCandidate>,
}

/// Core-loss measurements on top of an [`AcquisitionController`].
pub struct CoreLossSession<'a, P, O, B, C> {
    controller: &'a mut AcquisitionController<P, O, B, C>,
    settings: CoreLossSessionSettings,
    integrator: CoreLossIntegrator,
    planner: PulseTrainPlanner,
}

impl<'a, P, O, B, C> CoreLossSession<'a, P, O, B, C>
where
    P: PowerSupply,
    O: Oscilloscope,
    B: PulseBoard,
    C: Clock,
{
    pub fn new(controller: &'a mut AcquisitionController<P, O, B, C>, settings: CoreLossSessionSettings) -> Self {
        let integrator = CoreLossIntegrator::new(settings.analysis.clone());
        Self {
            controller,
            settings,
            integrator,
            planner: PulseTrainPlanner::default(),
        }
    }

    fn check_current(&self, result: &CoreLossResult) -> Result<(), MeasurementError> {
        if result.peak_current > self.settings.max_current {
            return Err(MeasurementError::SafetyTrip(format!(
                "peak current {:.2} A above {:.2} A",
                result.peak_current, self.settings.max_current
            )));
        }
        Ok(())
    }

    fn integrate_fallback(&self, trace: &CaptureTrace, frequency: f64) -> Result<CoreLossResult, MeasurementError> {
        warn!("Capture quality below threshold, integrating the best capture");
        Ok(self.integrator.integrate(trace, frequency)?.mark_failed())
    }

    /// Acquire one train and integrate its steady cycles.
    ///
    /// When no attempt passes the quality check the best capture is still
    /// integrated and the result is tagged `failed`.
    pub fn measure(&mut self, parameters: &TestParameters, frequency: f64) -> Result<CoreLossResult, MeasurementError> {
        let integrator = &self.integrator;
        let acquisition = self
            .controller
            .acquire(parameters, |trace| integrator.integrate(trace, frequency).ok())?;
        let result = match acquisition.extraction {
            Some(result) => result,
            None => self.integrate_fallback(&acquisition.trace, frequency)?,
        };
        self.check_current(&result)?;

        info!(
            "Core loss at {:.1} kHz: E = {:.3} uJ/cycle, P = {:.2} mW, flux error {:.1}% ({})",
            frequency / 1e3,
            result.energy_per_cycle * 1e6,
            result.power * 1e3,
            result.flux_error_percent,
            result.closure
        );
        Ok(result)
    }

    /// Asymmetric `t+`/`t-` train with both rails at `voltage`.
    pub fn measure_asymmetric(
        &mut self,
        voltage: f64,
        t_positive: f64,
        t_negative: f64,
    ) -> Result<CoreLossResult, MeasurementError> {
        self.measure_with_rails(voltage, voltage, t_positive, t_negative)
    }

    fn measure_with_rails(
        &mut self,
        positive_voltage: f64,
        negative_voltage: f64,
        t_positive: f64,
        t_negative: f64,
    ) -> Result<CoreLossResult, MeasurementError> {
        let parameters = self.planner.asymmetric(
            positive_voltage,
            negative_voltage,
            t_positive,
            t_negative,
            self.settings.num_pulses,
            self.settings.current_range,
        )?;
        let frequency = 1.0 / (t_positive + t_negative);
        Ok(self.measure(&parameters, frequency)?.with_timing(t_positive, t_negative))
    }

    /// Measure with the timing derived from a magnetic target and report
    /// the volumetric loss next to the ferrite reference figure.
    ///
    /// The rails must be the phase voltages the timing was derived for.
    pub fn measure_from_timing(
        &mut self,
        timing: &CoreLossTiming,
        positive_voltage: f64,
        negative_voltage: f64,
    ) -> Result<CoreLossResult, MeasurementError> {
        let result = self.measure_with_rails(positive_voltage, negative_voltage, timing.t_positive, timing.t_negative)?;
        let volumetric = timing.volumetric_loss(result.power);
        info!(
            "Volumetric loss {:.1} mW/cm³ (ferrite reference {:.1} mW/cm³ at {:.0} mT)",
            volumetric * 1e-3,
            steinmetz_reference_loss(timing.actual_frequency, timing.peak_flux_density),
            timing.peak_flux_density * 1e3
        );
        Ok(result)
    }

    /// Balance the rails until the output voltage of the best-closing loop
    /// is centred, then integrate.
    ///
    /// Each iteration shifts the rails by the measured offset. Iteration
    /// stops early when the offset grows; the capture with the smallest
    /// offset is then integrated with a warning, as it is after
    /// `max_iterations`. A result whose flux closure is invalid is an
    /// [`AnalysisError::OpenLoop`].
    pub fn run_flux_target(&mut self, target: &FluxTarget) -> Result<CoreLossResult, MeasurementError> {
        let mut parameters = self.planner.from_flux_target(target)?;
        let desired_dc_current =
            target.flux_density_dc_bias * f64::from(target.turns) * target.effective_area / target.inductance;
        let mut best: Option<(f64, CaptureTrace)> = None;

        for iteration in 0..self.settings.max_iterations.max(1) {
            let integrator = &self.integrator;
            let acquisition = self
                .controller
                .acquire(&parameters, |trace| integrator.analyze_loops(trace, target.frequency))?;
            let analysis = match acquisition.extraction {
                Some(analysis) => analysis,
                None => self
                    .integrator
                    .analyze_loops(&acquisition.trace, target.frequency)
                    .ok_or(AnalysisError::NoClosedLoop)?,
            };

            let correction = analysis.voltage_correction();
            let relative = correction.abs() / parameters.positive_voltage_peak();
            info!(
                "Iteration {}: output offset {:.3} V ({:.1}% of V+)",
                iteration + 1,
                -correction,
                relative * 100.0
            );
            if desired_dc_current > 0.0 {
                if let Some(proportion) = analysis.voltage_proportion(desired_dc_current, None) {
                    info!("Positive rail share for {:.1} mA bias: {:.3}", desired_dc_current * 1e3, proportion);
                }
            }

            if relative < self.settings.maximum_voltage_error {
                return self.finish_flux_target(&acquisition.trace, target.frequency);
            }
            if let Some((best_relative, _)) = &best {
                if relative >= *best_relative {
                    warn!(
                        "Output offset grew from {:.1}% to {:.1}% of V+, stopping",
                        best_relative * 100.0,
                        relative * 100.0
                    );
                    break;
                }
            }
            best = Some((relative, acquisition.trace));
            parameters = parameters.with_voltage_correction(-correction);
        }

        warn!("Rail balancing did not converge, using the best capture");
        match best {
            Some((_, trace)) => self.finish_flux_target(&trace, target.frequency),
            None => Err(AnalysisError::NoClosedLoop.into()),
        }
    }

    fn finish_flux_target(&self, trace: &CaptureTrace, frequency: f64) -> Result<CoreLossResult, MeasurementError> {
        let result = self.integrator.integrate(trace, frequency)?;
        self.check_current(&result)?;
        if result.closure == FluxClosure::Invalid {
            return Err(AnalysisError::OpenLoop(result.flux_error_percent).into());
        }
        info!(
            "Flux target at {:.1} kHz: P = {:.2} mW, flux error {:.1}% ({})",
            frequency / 1e3,
            result.power * 1e3,
            result.flux_error_percent,
            result.closure
        );
        Ok(result)
    }

    /// Sweep `t+` over `t_positive_range` at a fixed period and keep the
    /// timing with the smallest steady flux closure error.
    ///
    /// `None` when no capture had enough cycles to rank.
    pub fn find_optimal_timing(
        &mut self,
        voltage: f64,
        period: f64,
        t_positive_range: (f64, f64),
        num_steps: usize,
    ) -> Result<Option<TimingSearch>, MeasurementError> {
        info!(
            "Timing search at {:.1} kHz: t+ from {:.2} us to {:.2} us",
            1e-3 / period,
            t_positive_range.0 * 1e6,
            t_positive_range.1 * 1e6
        );

        let mut candidates = Vec::new();
        for t_positive in linspace(t_positive_range.0, t_positive_range.1, num_steps) {
            let t_negative = period - t_positive;
            if t_negative <= 0.0 {
                warn!("t+ = {:.2} us leaves no negative phase, skipped", t_positive * 1e6);
                continue;
            }
            let parameters = self.planner.asymmetric(
                voltage,
                voltage,
                t_positive,
                t_negative,
                self.settings.num_pulses,
                self.settings.current_range,
            )?;

            let integrator = &self.integrator;
            let acquisition = self
                .controller
                .acquire(&parameters, |trace| integrator.steady_flux_error(trace))?;
            let flux_error = acquisition
                .extraction
                .or_else(|| self.integrator.steady_flux_error(&acquisition.trace));
            match flux_error {
                Some(flux_error) => {
                    info!(
                        "  t+ = {:.2} us, t- = {:.2} us -> flux error = {:.1}%",
                        t_positive * 1e6,
                        t_negative * 1e6,
                        flux_error
                    );
                    candidates.push(TimingCandidate {
                        t_positive,
                        t_negative,
                        flux_error,
                    });
                }
                None => warn!("  t+ = {:.2} us: not enough cycles", t_positive * 1e6),
            }
        }

        let optimal = candidates
            .iter()
            .copied()
            .min_by(|a, b| a.flux_error.total_cmp(&b.flux_error));
        Ok(optimal.map(|optimal| {
            info!(
                "Optimal timing: t+ = {:.2} us, t- = {:.2} us, flux error {:.1}%",
                optimal.t_positive * 1e6,
                optimal.t_negative * 1e6,
                optimal.flux_error
            );
            TimingSearch { optimal, candidates }
        }))
    }

    /// Core loss at each frequency, with `t+` at `t_positive_ratio` of the
    /// period. Points whose measurement fails are logged and skipped.
    pub fn run_vs_frequency(
        &mut self,
        voltage: f64,
        frequencies: &[f64],
        t_positive_ratio: f64,
    ) -> Result<Vec<CoreLossResult>, MeasurementError> {
        if !(0.0..1.0).contains(&t_positive_ratio) || t_positive_ratio == 0.0 {
            return Err(MeasurementError::InvalidSetting(format!(
                "t+ ratio must lie in (0, 1), got {}",
                t_positive_ratio
            )));
        }

        let mut results = Vec::with_capacity(frequencies.len());
        for frequency in frequencies.iter().copied() {
            let period = 1.0 / frequency;
            let t_positive = period * t_positive_ratio;
            match self.measure_asymmetric(voltage, t_positive, period - t_positive) {
                Ok(result) => results.push(result),
                Err(e) if e.aborts_sweep() => return Err(e),
                Err(e) => warn!("{:.1} kHz: {}", frequency / 1e3, e),
            }
        }
        Ok(results)
    }
}
