//! # Waveform Segmentation
//!
//! Change-point detection on captured traces and the denoised ("clean")
//! reconstructions built from those change points.
//!
//! - Voltages are piecewise constant: boundaries come from thresholding the
//!   first difference, and each plateau is replaced by its mean.
//! - Currents are piecewise linear: turning points come from sliding-window
//!   extrema, and the clean current interpolates between them.
//!
//! Nothing here mutates a trace; results are new vectors plus an explicit
//! [`ChangePointSet`].

mod current;
mod voltage;

pub use current::{clean_current, current_change_points};
pub use voltage::{clean_voltage, voltage_change_points};

use crate::capture::CaptureTrace;

/// Ordered segment boundaries with one representative value each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePointSet {
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl ChangePointSet {
    /// Pair indices with values; the shorter list bounds the result.
    pub fn new(mut indices: Vec<usize>, mut values: Vec<f64>) -> Self {
        let len = indices.len().min(values.len());
        indices.truncate(len);
        values.truncate(len);
        Self { indices, values }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Share of one excitation period covered by the current window
pub const CURRENT_WINDOW_PERIOD_FRACTION: f64 = 2.0 / 3.0;

/// Detection settings.
#[derive(Debug, Clone)]
pub struct SignalSegmenter {
    /// Minimum spacing between two voltage transitions, in samples
    pub voltage_window: usize,
    /// Fraction of the largest step that marks a voltage transition
    pub voltage_threshold: f64,
    /// Sliding window for current extrema, in samples
    pub current_window: usize,
    /// Windows per `current_window` (stride = window / sensitivity)
    pub sensitivity: usize,
}

impl Default for SignalSegmenter {
    fn default() -> Self {
        Self {
            voltage_window: 100,
            voltage_threshold: 0.3,
            current_window: 2000,
            sensitivity: 3,
        }
    }
}

/// Clean reconstructions of every channel, segmented on the current.
#[derive(Debug, Clone)]
pub struct SegmentedTrace {
    /// Turning points of the current channel
    pub change_points: ChangePointSet,
    /// Piecewise-linear current
    pub clean_current: Vec<f64>,
    /// Input voltage averaged between current turning points
    pub clean_input_voltage: Vec<f64>,
    /// Output voltage averaged between current turning points
    pub clean_output_voltage: Vec<f64>,
}

impl SignalSegmenter {
    /// Copy with the current window sized for a periodic train.
    ///
    /// The window spans two thirds of `period`, so no window holds two
    /// peaks of the same sign. Invalid inputs leave the settings unchanged.
    pub fn for_period(&self, period: f64, sampling_interval: f64) -> Self {
        let samples = period / sampling_interval * CURRENT_WINDOW_PERIOD_FRACTION;
        let mut sized = self.clone();
        if samples.is_finite() && samples >= 1.0 {
            sized.current_window = samples.round() as usize;
        }
        sized
    }

    /// Plateau boundaries of a voltage signal.
    pub fn voltage_change_points(&self, signal: &[f64]) -> Vec<usize> {
        voltage_change_points(signal, self.voltage_window, self.voltage_threshold)
    }

    /// Turning points of a current signal.
    pub fn current_change_points(&self, signal: &[f64]) -> ChangePointSet {
        current_change_points(signal, self.current_window, self.sensitivity)
    }

    /// Voltage signal cleaned on its own boundaries.
    pub fn clean_voltage(&self, signal: &[f64]) -> Vec<f64> {
        clean_voltage(signal, &self.voltage_change_points(signal))
    }

    /// Segment a whole trace on its current turning points.
    ///
    /// Both voltage channels are averaged between the current turning
    /// points so that every clean channel shares one segmentation.
    pub fn segment(&self, trace: &CaptureTrace) -> SegmentedTrace {
        let change_points = self.current_change_points(trace.current());
        let clean = clean_current(trace.len(), &change_points);
        let clean_input_voltage = clean_voltage(trace.input_voltage(), change_points.indices());
        let clean_output_voltage = clean_voltage(trace.output_voltage(), change_points.indices());

        SegmentedTrace {
            change_points,
            clean_current: clean,
            clean_input_voltage,
            clean_output_voltage,
        }
    }
}
