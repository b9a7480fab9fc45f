use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::AnalysisError;
use crate::capture::{CaptureTrace, VoltageChannel};
use crate::segment::{SegmentedTrace, SignalSegmenter};

/// Flux-closure error above which the loop is treated as open
pub const INFLATED_FLUX_ERROR_PERCENT: f64 = 5.0;

/// Flux-closure error above which the power figure is not trusted
pub const INVALID_FLUX_ERROR_PERCENT: f64 = 20.0;

/// Cycles dropped at each end when scoring timing candidates
const TIMING_SKIP_FIRST: usize = 10;
const TIMING_SKIP_LAST: usize = 5;

/// How well the analysed B-H loops close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FluxClosure {
    /// Error at or below 5%
    Closed,
    /// Error above 5%: reactive energy inflates the apparent loss
    Inflated,
    /// Error above 20%
    Invalid,
}

impl FluxClosure {
    pub fn from_error_percent(error: f64) -> Self {
        if error > INVALID_FLUX_ERROR_PERCENT {
            FluxClosure::Invalid
        } else if error > INFLATED_FLUX_ERROR_PERCENT {
            FluxClosure::Inflated
        } else {
            FluxClosure::Closed
        }
    }
}

impl std::fmt::Display for FluxClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FluxClosure::Closed => write!(f, "closed"),
            FluxClosure::Inflated => write!(f, "inflated"),
            FluxClosure::Invalid => write!(f, "invalid"),
        }
    }
}

/// Settings of the cycle-by-cycle energy integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreLossSettings {
    /// Startup cycles ignored before integrating
    pub skip_first: usize,
    /// Trailing cycles ignored
    pub skip_last: usize,
    /// Channel multiplied with the current
    pub voltage_channel: VoltageChannel,
}

impl Default for CoreLossSettings {
    fn default() -> Self {
        Self {
            skip_first: 10,
            skip_last: 5,
            voltage_channel: VoltageChannel::Output,
        }
    }
}

/// Energy and power of a steady-state pulse train.
#[derive(Debug, Clone, Serialize)]
pub struct CoreLossResult {
    /// Switching frequency, in Hz
    pub frequency: f64,
    /// Mean energy per cycle, in J
    pub energy_per_cycle: f64,
    /// `energy_per_cycle · frequency`, in W
    pub power: f64,
    /// Mean flux-closure error, in percent
    pub flux_error_percent: f64,
    pub closure: FluxClosure,
    pub cycles_analyzed: usize,
    /// Mean of the samples above the mid-level, in V
    pub voltage_positive: f64,
    /// Mean of the samples below the mid-level, in V
    pub voltage_negative: f64,
    /// Largest absolute current, in A
    pub peak_current: f64,
    /// Half the peak-to-peak flux linkage of the whole capture, in Wb
    pub peak_flux_linkage: f64,
    pub energies_per_cycle: Vec<f64>,
    pub flux_errors_per_cycle: Vec<f64>,
    /// Positive pulse width, when the caller knows it
    pub t_positive: Option<f64>,
    /// Negative pulse width, when the caller knows it
    pub t_negative: Option<f64>,
    /// Integrated from the best capture after every attempt failed the
    /// quality check
    pub failed: bool,
}

impl CoreLossResult {
    /// Tag a result integrated from a capture that failed the quality check.
    pub fn mark_failed(mut self) -> Self {
        self.failed = true;
        self
    }

    /// Attach the pulse timing that produced the capture.
    pub fn with_timing(mut self, t_positive: f64, t_negative: f64) -> Self {
        self.t_positive = Some(t_positive);
        self.t_negative = Some(t_negative);
        self
    }
}

/// Loop of two consecutive current segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopWindow {
    /// First sample of the loop
    pub start: usize,
    /// Last sample of the loop (inclusive)
    pub end: usize,
    /// `|I(end) − I(start)| / (I_max − I_min)` on the clean current
    pub closure_error: f64,
}

/// Best-closing loop of a segmented trace.
#[derive(Debug, Clone)]
pub struct LoopAnalysis {
    pub segmented: SegmentedTrace,
    pub window: LoopWindow,
}

impl LoopAnalysis {
    /// Offset that re-centres the cleaned output voltage of the loop.
    pub fn voltage_correction(&self) -> f64 {
        voltage_correction(&self.segmented, &self.window)
    }

    /// Supply split that drives `desired_dc_current` through the winding.
    pub fn voltage_proportion(&self, desired_dc_current: f64, current_proportion: Option<f64>) -> Option<f64> {
        voltage_proportion(&self.segmented, &self.window, desired_dc_current, current_proportion)
    }
}

/// Closed-loop core-loss integration.
#[derive(Debug, Clone, Default)]
pub struct CoreLossIntegrator {
    pub settings: CoreLossSettings,
    pub segmenter: SignalSegmenter,
}

impl CoreLossIntegrator {
    pub fn new(settings: CoreLossSettings) -> Self {
        Self {
            settings,
            segmenter: SignalSegmenter::default(),
        }
    }

    /// Integrate `V·I` over the steady-state cycles of a capture.
    ///
    /// Cycles run from one rising crossing of the voltage mid-level to the
    /// next. The first `skip_first` and last `skip_last` cycles are ignored
    /// and at least two cycles must remain.
    pub fn integrate(&self, trace: &CaptureTrace, frequency: f64) -> Result<CoreLossResult, AnalysisError> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(AnalysisError::InvalidFrequency(frequency));
        }
        let voltage = trace.voltage(self.settings.voltage_channel);
        let current = trace.current();
        let time = trace.time();
        let dt = trace.sampling_interval();

        let threshold = mid_level(voltage);
        let (voltage_positive, voltage_negative) = level_means(voltage, threshold);

        let flux = cumulative_flux(voltage, dt);
        let (flux_min, flux_max) = min_max(&flux);

        let edges = rising_edges(voltage, threshold);
        let required = self.settings.skip_first + self.settings.skip_last + 3;
        if edges.len() < required {
            return Err(AnalysisError::NotEnoughCycles {
                found: edges.len(),
                required,
            });
        }

        let mut energies = Vec::new();
        let mut flux_errors = Vec::new();
        for k in self.settings.skip_first..edges.len() - self.settings.skip_last - 1 {
            let (start, end) = (edges[k], edges[k + 1]);
            energies.push(trapezoid_power(&voltage[start..end], &current[start..end], &time[start..end]));
            if let Some(error) = cycle_flux_error(&voltage[start..end], dt) {
                flux_errors.push(error);
            }
        }

        let energy_per_cycle = mean(&energies);
        let flux_error_percent = if flux_errors.is_empty() { 0.0 } else { mean(&flux_errors) };
        let closure = FluxClosure::from_error_percent(flux_error_percent);
        match closure {
            FluxClosure::Invalid => warn!(
                "Flux closure error {:.1}% above {}%: loss figure is not reliable",
                flux_error_percent, INVALID_FLUX_ERROR_PERCENT
            ),
            FluxClosure::Inflated => warn!(
                "Flux closure error {:.1}%: loop not closed, reactive energy inflates the loss",
                flux_error_percent
            ),
            FluxClosure::Closed => {}
        }
        debug!(
            "{} cycles integrated, E = {:.3} uJ, P = {:.2} mW",
            energies.len(),
            energy_per_cycle * 1e6,
            energy_per_cycle * frequency * 1e3
        );

        Ok(CoreLossResult {
            frequency,
            energy_per_cycle,
            power: energy_per_cycle * frequency,
            flux_error_percent,
            closure,
            cycles_analyzed: energies.len(),
            voltage_positive,
            voltage_negative,
            peak_current: trace.peak_current(),
            peak_flux_linkage: (flux_max - flux_min) / 2.0,
            energies_per_cycle: energies,
            flux_errors_per_cycle: flux_errors,
            t_positive: None,
            t_negative: None,
            failed: false,
        })
    }

    /// Segment the trace and pick the loop whose current closes best.
    ///
    /// The current window is sized from the excitation `frequency`.
    pub fn analyze_loops(&self, trace: &CaptureTrace, frequency: f64) -> Option<LoopAnalysis> {
        let segmented = self
            .segmenter
            .for_period(1.0 / frequency, trace.sampling_interval())
            .segment(trace);
        let window = select_closed_loop(&segmented)?;
        debug!(
            "Best loop {}..={} with closure error {:.4}",
            window.start, window.end, window.closure_error
        );
        Some(LoopAnalysis { segmented, window })
    }

    /// Mean flux-closure error of the steady cycles, used to rank timings.
    ///
    /// Needs more than 15 rising edges; the first 10 and last 5 are dropped.
    pub fn steady_flux_error(&self, trace: &CaptureTrace) -> Option<f64> {
        let voltage = trace.voltage(self.settings.voltage_channel);
        let flux = cumulative_flux(voltage, trace.sampling_interval());
        let edges = rising_edges(voltage, mid_level(voltage));
        if edges.len() <= TIMING_SKIP_FIRST + TIMING_SKIP_LAST {
            return None;
        }
        let steady = &edges[TIMING_SKIP_FIRST..edges.len() - TIMING_SKIP_LAST];
        let errors: Vec<f64> = steady
            .windows(2)
            .filter_map(|pair| closure_percent(&flux[pair[0]..pair[1]]))
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(mean(&errors))
        }
    }
}

/// Window `[cp[k], cp[k+2]]` whose clean current returns closest to its
/// starting value, relative to its swing. The first minimum wins and
/// windows without swing are skipped.
pub fn select_closed_loop(segmented: &SegmentedTrace) -> Option<LoopWindow> {
    let indices = segmented.change_points.indices();
    let current = &segmented.clean_current;
    if current.is_empty() {
        return None;
    }
    let last = current.len() - 1;

    let mut best: Option<LoopWindow> = None;
    for k in 0..indices.len().saturating_sub(2) {
        let start = indices[k].min(last);
        let end = indices[k + 2].min(last);
        if end <= start {
            continue;
        }
        let window = &current[start..=end];
        let (lo, hi) = min_max(window);
        if hi - lo <= 0.0 {
            continue;
        }
        let closure_error = (window[window.len() - 1] - window[0]).abs() / (hi - lo);
        if best.map_or(true, |b| closure_error < b.closure_error) {
            best = Some(LoopWindow {
                start,
                end,
                closure_error,
            });
        }
    }
    best
}

/// `−(max + min) / 2` of the cleaned output voltage over the loop.
pub fn voltage_correction(segmented: &SegmentedTrace, window: &LoopWindow) -> f64 {
    let (lo, hi) = min_max(&segmented.clean_output_voltage[window.start..=window.end]);
    -(hi + lo) / 2.0
}

/// Fraction of the supply to put on the positive rail so the loop carries
/// `desired_dc_current`.
///
/// The loop's voltage unbalance over its mean current gives an effective
/// impedance; when the proportion used for the capture is known the result
/// is scaled by how far the measured proportion drifted from it. `None` when
/// the loop carries no DC current or no voltage swing, or when the measured
/// proportion is zero.
pub fn voltage_proportion(
    segmented: &SegmentedTrace,
    window: &LoopWindow,
    desired_dc_current: f64,
    current_proportion: Option<f64>,
) -> Option<f64> {
    let voltage = &segmented.clean_input_voltage[window.start..=window.end];
    let current = &segmented.clean_current[window.start..=window.end];
    let (v_min, v_max) = min_max(voltage);
    let peak_to_peak = v_max - v_min;
    let dc_current = mean(current);
    if peak_to_peak <= 0.0 || dc_current == 0.0 {
        return None;
    }

    let unbalance = v_max.abs() - v_min.abs();
    let impedance = unbalance / dc_current;
    let mut proportion = (desired_dc_current * impedance + peak_to_peak) / (2.0 * peak_to_peak);
    if let Some(applied) = current_proportion {
        let measured = (unbalance + peak_to_peak) / (2.0 * peak_to_peak);
        if measured <= 0.0 {
            return None;
        }
        proportion *= applied / measured;
    }
    proportion.is_finite().then_some(proportion)
}

/// `(max + min) / 2`
fn mid_level(signal: &[f64]) -> f64 {
    let (lo, hi) = min_max(signal);
    (hi + lo) / 2.0
}

/// Means of the samples strictly above and strictly below `threshold`.
fn level_means(signal: &[f64], threshold: f64) -> (f64, f64) {
    let above: Vec<f64> = signal.iter().copied().filter(|v| *v > threshold).collect();
    let below: Vec<f64> = signal.iter().copied().filter(|v| *v < threshold).collect();
    (mean(&above), mean(&below))
}

/// Indices `i` with `v[i] < threshold < v[i + 1]`.
pub fn rising_edges(signal: &[f64], threshold: f64) -> Vec<usize> {
    signal
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] < threshold && w[1] > threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Running volt-second integral.
pub fn cumulative_flux(voltage: &[f64], dt: f64) -> Vec<f64> {
    voltage
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v * dt;
            Some(*acc)
        })
        .collect()
}

fn cycle_flux_error(voltage: &[f64], dt: f64) -> Option<f64> {
    closure_percent(&cumulative_flux(voltage, dt))
}

/// `|λ_end − λ_start| / (λ_max − λ_min) · 100`
fn closure_percent(flux: &[f64]) -> Option<f64> {
    let (first, last) = (flux.first()?, flux.last()?);
    let (lo, hi) = min_max(flux);
    if hi - lo > 0.0 {
        Some((last - first).abs() / (hi - lo) * 100.0)
    } else {
        None
    }
}

fn trapezoid_power(voltage: &[f64], current: &[f64], time: &[f64]) -> f64 {
    (1..time.len())
        .map(|i| {
            let p0 = voltage[i - 1] * current[i - 1];
            let p1 = voltage[i] * current[i];
            (p0 + p1) / 2.0 * (time[i] - time[i - 1])
        })
        .sum()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}
