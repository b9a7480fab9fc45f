use super::TestParameters;
use crate::config::ProbeScales;

/// Samples captured across one reference period
pub const SAMPLES_PER_PULSE: f64 = 100.0;

/// Fastest sampling interval with three or four channels enabled, in s
pub const MIN_SAMPLING_TIME: f64 = 4e-9;

/// Sample count bounds for a single block
pub const MIN_SAMPLES: usize = 1_000;
pub const MAX_SAMPLES: usize = 100_000;

/// Capture window relative to the train length
const CAPTURE_MARGIN: f64 = 1.2;

/// Trigger threshold relative to the positive rail
const TRIGGER_FRACTION: f64 = 0.2;

/// Oscilloscope settings derived from a [`TestParameters`] set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePlan {
    /// Range requested on the input voltage channel, in scope volts
    pub input_voltage_range: f64,
    /// Range requested on the output voltage channel, in scope volts
    pub output_voltage_range: f64,
    /// Range requested on the current channel, in scope volts
    pub current_range: f64,
    /// Rising trigger threshold on the input voltage channel, in V
    pub trigger_threshold: f64,
    /// Samples per block
    pub number_samples: usize,
    /// Sampling interval asked of the scope, in s
    pub desired_sampling_time: f64,
}

impl CapturePlan {
    /// Plan a capture for one train.
    ///
    /// Ranges are twice the positive rail on the voltage channels and the
    /// current hint on the current channel, divided by the probe scale.
    pub fn for_parameters(parameters: &TestParameters, scales: &ProbeScales) -> Self {
        let v_pos = parameters.positive_voltage_peak();
        let desired_sampling_time = parameters.reference_period() / SAMPLES_PER_PULSE;
        let estimated_sampling_time = desired_sampling_time.max(MIN_SAMPLING_TIME);
        let desired_samples = (parameters.total_duration() * CAPTURE_MARGIN / estimated_sampling_time) as usize;

        Self {
            input_voltage_range: 2.0 * v_pos / scales.input_voltage,
            output_voltage_range: 2.0 * v_pos / scales.output_voltage,
            current_range: parameters.current_peak() / scales.current,
            trigger_threshold: v_pos * TRIGGER_FRACTION,
            number_samples: desired_samples.clamp(MIN_SAMPLES, MAX_SAMPLES),
            desired_sampling_time,
        }
    }

    /// Capture window length for a realised sampling interval.
    pub fn capture_duration(&self, sampling_time: f64) -> f64 {
        self.number_samples as f64 * sampling_time
    }
}
