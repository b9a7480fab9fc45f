use std::fmt;
use std::time::Duration;

use log::{debug, warn};

use super::clock::{seconds, Clock, SystemClock};
use super::setup::{
    disable_outputs, setup_board, setup_oscilloscope, setup_power_supply, ScopeSettings, SupplyState,
};
use super::MeasurementError;
use crate::analysis::{DcBiasEstimate, InductanceEstimate, InductanceExtractor};
use crate::capture::CaptureTrace;
use crate::config::{Bench, ProbeScales, DEFAULT_TIMEOUT_MS};
use crate::instruments::{Oscilloscope, PowerSupply, PulseBoard, NEGATIVE_RAIL, POSITIVE_RAIL};
use crate::pulse::{CapturePlan, TestParameters};

/// Attempts per acquisition unless configured otherwise
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Input voltage peak needed to accept a capture, relative to V+
pub const VOLTAGE_QUALITY_FRACTION: f64 = 0.7;

/// Distinct current codes needed to accept a capture
pub const MIN_DISTINCT_CURRENT_LEVELS: usize = 20;

const PAUSE_BETWEEN_RETRIES: Duration = Duration::from_millis(100);

/// Phase of the acquisition state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    /// Scope armed and train loaded
    Armed,
    /// Outputs on, train fired
    Exciting,
    /// Block read back, outputs off
    Captured,
    /// Quality and extraction evaluated
    Evaluated,
    Accepted,
    Retrying,
    /// Retry budget spent without an accepted capture
    Failed,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Armed => "armed",
            AcquisitionState::Exciting => "exciting",
            AcquisitionState::Captured => "captured",
            AcquisitionState::Evaluated => "evaluated",
            AcquisitionState::Accepted => "accepted",
            AcquisitionState::Retrying => "retrying",
            AcquisitionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Quality indicators of one capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureQuality {
    /// Input voltage peak above 70% of V+
    pub voltage_ok: bool,
    /// More than 20 distinct current codes
    pub resolution_ok: bool,
    pub distinct_current_levels: usize,
    /// `voltage_ok + resolution_ok + distinct/100`
    pub score: f64,
}

impl CaptureQuality {
    pub fn evaluate(trace: &CaptureTrace, expected_voltage: f64) -> Self {
        let voltage_ok = trace.max_input_voltage() > VOLTAGE_QUALITY_FRACTION * expected_voltage;
        let distinct_current_levels = trace.distinct_current_levels();
        let resolution_ok = distinct_current_levels > MIN_DISTINCT_CURRENT_LEVELS;
        let score = f64::from(u8::from(voltage_ok))
            + f64::from(u8::from(resolution_ok))
            + distinct_current_levels as f64 / 100.0;
        Self {
            voltage_ok,
            resolution_ok,
            distinct_current_levels,
            score,
        }
    }

    pub fn passes(&self) -> bool {
        self.voltage_ok && self.resolution_ok
    }
}

/// Outcome of [`AcquisitionController::acquire`].
///
/// When `failed` is set the trace is the best-scoring capture and
/// `extraction` is `None`.
#[derive(Debug, Clone)]
pub struct Acquisition<E> {
    pub trace: CaptureTrace,
    pub extraction: Option<E>,
    pub quality: CaptureQuality,
    pub scope: ScopeSettings,
    pub attempts: usize,
    pub failed: bool,
}

/// Pre-fire settle time, longer at low frequency.
pub fn settle_time(frequency: f64) -> Duration {
    if frequency < 30e3 {
        Duration::from_millis(50)
    } else if frequency < 100e3 {
        Duration::from_millis(20)
    } else {
        Duration::from_millis(10)
    }
}

/// Extra settle before a retry.
pub fn retry_settle_time(frequency: f64) -> Duration {
    if frequency < 50e3 {
        Duration::from_millis(150)
    } else {
        Duration::from_millis(50)
    }
}

/// Wait after firing: `max(100 ms, 2·capture + 100 ms)`.
pub fn capture_wait(capture_duration: f64) -> Duration {
    seconds((2.0 * capture_duration + 0.1).max(0.1))
}

/// Drives one excitation and capture against the three instruments.
///
/// The controller owns both rails for the duration of an attempt: outputs
/// are switched on after the scope and board are set up and switched off
/// once per attempt, whatever happened in between.
pub struct AcquisitionController<P, O, B, C = SystemClock> {
    power_supply: P,
    oscilloscope: O,
    board: B,
    clock: C,
    probe_scales: ProbeScales,
    timeout_ms: u32,
    max_retries: usize,
    supply_state: SupplyState,
    state: AcquisitionState,
}

/// Controller over boxed instruments, as built from a [`Bench`]
pub type BenchController<C = SystemClock> =
    AcquisitionController<Box<dyn PowerSupply>, Box<dyn Oscilloscope>, Box<dyn PulseBoard>, C>;

impl BenchController {
    /// Take ownership of connected instruments.
    pub fn from_bench(bench: Bench) -> Self {
        AcquisitionController::new(bench.power_supply, bench.oscilloscope, bench.board)
            .with_probe_scales(bench.probe_scales)
            .with_timeout_ms(bench.timeout_ms)
    }
}

impl<P: PowerSupply, O: Oscilloscope, B: PulseBoard> AcquisitionController<P, O, B> {
    pub fn new(power_supply: P, oscilloscope: O, board: B) -> Self {
        Self {
            power_supply,
            oscilloscope,
            board,
            clock: SystemClock,
            probe_scales: ProbeScales::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            supply_state: SupplyState::default(),
            state: AcquisitionState::Idle,
        }
    }
}

impl<P: PowerSupply, O: Oscilloscope, B: PulseBoard, C: Clock> AcquisitionController<P, O, B, C> {
    /// Replace the clock used for every wait.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> AcquisitionController<P, O, B, C2> {
        AcquisitionController {
            power_supply: self.power_supply,
            oscilloscope: self.oscilloscope,
            board: self.board,
            clock,
            probe_scales: self.probe_scales,
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
            supply_state: self.supply_state,
            state: self.state,
        }
    }

    pub fn with_probe_scales(mut self, probe_scales: ProbeScales) -> Self {
        self.probe_scales = probe_scales;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Attempts per acquisition; at least one is always made.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn probe_scales(&self) -> ProbeScales {
        self.probe_scales
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn power_supply_mut(&mut self) -> &mut P {
        &mut self.power_supply
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn oscilloscope_mut(&mut self) -> &mut O {
        &mut self.oscilloscope
    }

    /// Give the instruments back.
    pub fn into_instruments(self) -> (P, O, B) {
        (self.power_supply, self.oscilloscope, self.board)
    }

    /// Forget the programmed rail voltages so the next acquisition
    /// reprograms them.
    pub(crate) fn invalidate_supply(&mut self) {
        self.supply_state.last_voltages = None;
    }

    /// Program the rails for `parameters` without firing.
    pub fn prepare_supply(&mut self, parameters: &TestParameters) -> Result<(), MeasurementError> {
        setup_power_supply(&mut self.power_supply, &mut self.supply_state, parameters)
    }

    pub fn disable_outputs(&mut self) -> Result<(), MeasurementError> {
        Ok(disable_outputs(&mut self.power_supply)?)
    }

    fn transition(&mut self, next: AcquisitionState) {
        debug!("Acquisition {} -> {}", self.state, next);
        self.state = next;
    }

    /// Acquire with the default inductance extractor.
    pub fn measure_inductance(
        &mut self,
        parameters: &TestParameters,
    ) -> Result<Acquisition<InductanceEstimate>, MeasurementError> {
        let extractor = InductanceExtractor::default();
        let voltage = parameters.positive_voltage_peak();
        self.acquire(parameters, |trace| extractor.extract(trace, voltage))
    }

    /// Acquire a DC-bias train and extract the biased inductance.
    pub fn measure_dc_biased_inductance(
        &mut self,
        parameters: &TestParameters,
    ) -> Result<Acquisition<DcBiasEstimate>, MeasurementError> {
        let extractor = InductanceExtractor::default();
        let voltage = parameters.positive_voltage_peak();
        self.acquire(parameters, |trace| extractor.extract_dc_biased(trace, voltage))
    }

    /// Run attempts until one passes the quality check and `extract`
    /// returns a value, or the retry budget is spent.
    ///
    /// Exhaustion is not an error: the best capture comes back with
    /// `failed = true`. Instrument errors abort the acquisition after the
    /// outputs of the current attempt have been switched off.
    pub fn acquire<E, F>(&mut self, parameters: &TestParameters, mut extract: F) -> Result<Acquisition<E>, MeasurementError>
    where
        F: FnMut(&CaptureTrace) -> Option<E>,
    {
        self.transition(AcquisitionState::Idle);
        self.prepare_supply(parameters)?;

        let plan = CapturePlan::for_parameters(parameters, &self.probe_scales);
        let frequency = 1.0 / (2.0 * parameters.reference_period());
        let expected_voltage = parameters.positive_voltage_peak();
        let mut best: Option<(CaptureTrace, CaptureQuality, ScopeSettings, usize)> = None;

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                self.transition(AcquisitionState::Retrying);
                self.clock.sleep(retry_settle_time(frequency));
            }

            let (trace, scope) = self.attempt(parameters, &plan, frequency)?;
            let quality = CaptureQuality::evaluate(&trace, expected_voltage);
            self.transition(AcquisitionState::Evaluated);

            if quality.passes() {
                if let Some(extraction) = extract(&trace) {
                    self.transition(AcquisitionState::Accepted);
                    return Ok(Acquisition {
                        trace,
                        extraction: Some(extraction),
                        quality,
                        scope,
                        attempts: attempt,
                        failed: false,
                    });
                }
                warn!("Attempt {}: capture looks good but extraction failed", attempt);
            } else {
                warn!(
                    "Attempt {}: max_V={:.2}, unique_I={}",
                    attempt,
                    trace.max_input_voltage(),
                    quality.distinct_current_levels
                );
            }

            if best.as_ref().map_or(true, |(_, q, _, _)| quality.score > q.score) {
                best = Some((trace, quality, scope, attempt));
            }
            if attempt < self.max_retries {
                self.clock.sleep(PAUSE_BETWEEN_RETRIES);
            }
        }

        self.transition(AcquisitionState::Failed);
        let (trace, quality, scope, _) = best.ok_or_else(|| MeasurementError::InvalidSetting("no attempt was made".to_string()))?;
        Ok(Acquisition {
            trace,
            extraction: None,
            quality,
            scope,
            attempts: self.max_retries,
            failed: true,
        })
    }

    /// One excitation: set up scope and board, fire, read, outputs off.
    fn attempt(
        &mut self,
        parameters: &TestParameters,
        plan: &CapturePlan,
        frequency: f64,
    ) -> Result<(CaptureTrace, ScopeSettings), MeasurementError> {
        let scope = setup_oscilloscope(&mut self.oscilloscope, plan, &self.probe_scales, self.timeout_ms)?;
        setup_board(&mut self.board, parameters.pulse_periods())?;
        self.transition(AcquisitionState::Armed);

        let excited = self.excite(&scope, frequency);
        let disabled = disable_outputs(&mut self.power_supply);
        let trace = excited?;
        disabled?;
        self.transition(AcquisitionState::Captured);
        Ok((trace, scope))
    }

    fn excite(&mut self, scope: &ScopeSettings, frequency: f64) -> Result<CaptureTrace, MeasurementError> {
        self.power_supply.enable_output(POSITIVE_RAIL)?;
        self.power_supply.enable_output(NEGATIVE_RAIL)?;
        self.oscilloscope.run_acquisition_block()?;
        self.clock.sleep(settle_time(frequency));

        self.transition(AcquisitionState::Exciting);
        self.board.run_pulses(1)?;
        self.clock.sleep(capture_wait(scope.capture_duration()));
        Ok(self.oscilloscope.read_data()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_times() {
        assert_eq!(settle_time(10e3), Duration::from_millis(50));
        assert_eq!(settle_time(50e3), Duration::from_millis(20));
        assert_eq!(settle_time(500e3), Duration::from_millis(10));
        assert_eq!(retry_settle_time(10e3), Duration::from_millis(150));
        assert_eq!(retry_settle_time(100e3), Duration::from_millis(50));
    }

    #[test]
    fn test_capture_wait_floor() {
        assert_eq!(capture_wait(1e-5), seconds(0.10002));
        assert_eq!(capture_wait(0.0), Duration::from_millis(100));
        assert_eq!(capture_wait(0.5), Duration::from_millis(1100));
    }

    #[test]
    fn test_quality_score() {
        let current: Vec<f64> = (0..1000).map(|i| (i % 50) as f64 * 0.001).collect();
        let trace = CaptureTrace::new(1e-8, vec![5.0; 1000], vec![5.0; 1000], current).unwrap();
        let quality = CaptureQuality::evaluate(&trace, 5.0);
        assert!(quality.voltage_ok);
        assert!(quality.resolution_ok);
        assert_eq!(quality.distinct_current_levels, 50);
        assert!((quality.score - 2.5).abs() < 1e-12);

        let low = CaptureQuality::evaluate(&trace, 10.0);
        assert!(!low.passes());
        assert!((low.score - 1.5).abs() < 1e-12);
    }
}
