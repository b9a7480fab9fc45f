//! # Captured Waveforms
//!
//! [`CaptureTrace`] holds one oscilloscope block: a shared time axis and the
//! input voltage, output voltage and current channels in physical units.
//! Traces are immutable once built; every analysis stage borrows them.
//!
//! When channel skews are not multiples of the sampling interval the
//! channels are resampled onto a finer common grid before the skew is
//! removed (see [`CaptureTrace::from_skewed_channels`]).

use serde::{Deserialize, Serialize};

/// Errors raised while assembling a trace
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A channel whose length differs from the time axis
    #[error("Channel {channel} has {actual} samples, expected {expected}")]
    LengthMismatch {
        channel: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Fewer samples than any analysis can use
    #[error("Trace too short: {0} samples")]
    TooShort(usize),

    /// Sampling interval that is zero, negative or not finite
    #[error("Invalid sampling interval: {0} s")]
    InvalidSamplingInterval(f64),

    /// NaN or infinite sample
    #[error("Channel {channel} has a non-finite sample at index {index}")]
    NonFinite { channel: &'static str, index: usize },
}

/// Voltage channel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageChannel {
    /// Bridge voltage applied to the winding
    Input,
    /// Voltage sensed across the winding
    #[default]
    Output,
}

/// One captured block.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTrace {
    time: Vec<f64>,
    input_voltage: Vec<f64>,
    output_voltage: Vec<f64>,
    current: Vec<f64>,
    sampling_interval: f64,
    upsampling_scale: usize,
}

fn check_length(channel: &'static str, expected: usize, data: &[f64]) -> Result<(), CaptureError> {
    if data.len() != expected {
        return Err(CaptureError::LengthMismatch {
            channel,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn check_finite(channel: &'static str, data: &[f64]) -> Result<(), CaptureError> {
    match data.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(CaptureError::NonFinite { channel, index }),
        None => Ok(()),
    }
}

impl CaptureTrace {
    /// Build a trace on a uniform time axis starting at zero.
    pub fn new(
        sampling_interval: f64,
        input_voltage: Vec<f64>,
        output_voltage: Vec<f64>,
        current: Vec<f64>,
    ) -> Result<Self, CaptureError> {
        if !(sampling_interval.is_finite() && sampling_interval > 0.0) {
            return Err(CaptureError::InvalidSamplingInterval(sampling_interval));
        }
        let n = input_voltage.len();
        if n < 2 {
            return Err(CaptureError::TooShort(n));
        }
        check_length("output_voltage", n, &output_voltage)?;
        check_length("current", n, &current)?;
        check_finite("input_voltage", &input_voltage)?;
        check_finite("output_voltage", &output_voltage)?;
        check_finite("current", &current)?;

        let time = (0..n).map(|i| i as f64 * sampling_interval).collect();
        Ok(Self {
            time,
            input_voltage,
            output_voltage,
            current,
            sampling_interval,
            upsampling_scale: 1,
        })
    }

    /// Build a trace from explicit columns, e.g. a CSV export.
    ///
    /// The sampling interval is taken from the first two time stamps.
    pub fn from_columns(
        time: Vec<f64>,
        input_voltage: Vec<f64>,
        output_voltage: Vec<f64>,
        current: Vec<f64>,
    ) -> Result<Self, CaptureError> {
        let n = time.len();
        if n < 2 {
            return Err(CaptureError::TooShort(n));
        }
        check_length("input_voltage", n, &input_voltage)?;
        check_length("output_voltage", n, &output_voltage)?;
        check_length("current", n, &current)?;
        check_finite("time", &time)?;
        check_finite("input_voltage", &input_voltage)?;
        check_finite("output_voltage", &output_voltage)?;
        check_finite("current", &current)?;

        let sampling_interval = time[1] - time[0];
        if !(sampling_interval.is_finite() && sampling_interval > 0.0) {
            return Err(CaptureError::InvalidSamplingInterval(sampling_interval));
        }
        Ok(Self {
            time,
            input_voltage,
            output_voltage,
            current,
            sampling_interval,
            upsampling_scale: 1,
        })
    }

    /// Build a trace from raw channels acquired with per-channel skews.
    ///
    /// The common grid is the greatest common divisor (in picoseconds) of
    /// the sampling interval and every non-zero skew. Channels are linearly
    /// interpolated onto that grid and rotated by their skew.
    pub fn from_skewed_channels(
        sampling_interval: f64,
        channels: [Vec<f64>; 3],
        skews: [f64; 3],
    ) -> Result<Self, CaptureError> {
        if !(sampling_interval.is_finite() && sampling_interval > 0.0) {
            return Err(CaptureError::InvalidSamplingInterval(sampling_interval));
        }
        let grid = common_grid(sampling_interval, &skews);
        let scale = ((sampling_interval / grid).round() as usize).max(1);
        let [input_voltage, output_voltage, current] = channels;

        if scale == 1 {
            return Self::new(sampling_interval, input_voltage, output_voltage, current);
        }

        let n = input_voltage.len();
        if n < 2 {
            return Err(CaptureError::TooShort(n));
        }
        check_length("output_voltage", n, &output_voltage)?;
        check_length("current", n, &current)?;
        check_finite("input_voltage", &input_voltage)?;
        check_finite("output_voltage", &output_voltage)?;
        check_finite("current", &current)?;

        let fine_interval = sampling_interval / scale as f64;
        let resample = |data: &[f64], skew: f64| -> Vec<f64> {
            let mut fine = upsample_linear(data, scale);
            let positions = (skew / fine_interval).round() as i64;
            let len = fine.len() as i64;
            if positions > 0 {
                fine.rotate_right((positions % len) as usize);
            } else if positions < 0 {
                fine.rotate_left((-positions % len) as usize);
            }
            fine
        };

        let input_voltage = resample(&input_voltage, skews[0]);
        let output_voltage = resample(&output_voltage, skews[1]);
        let current = resample(&current, skews[2]);
        let time = (0..input_voltage.len()).map(|i| i as f64 * fine_interval).collect();

        Ok(Self {
            time,
            input_voltage,
            output_voltage,
            current,
            sampling_interval: fine_interval,
            upsampling_scale: scale,
        })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn input_voltage(&self) -> &[f64] {
        &self.input_voltage
    }

    pub fn output_voltage(&self) -> &[f64] {
        &self.output_voltage
    }

    pub fn current(&self) -> &[f64] {
        &self.current
    }

    /// Samples of the selected voltage channel
    pub fn voltage(&self, channel: VoltageChannel) -> &[f64] {
        match channel {
            VoltageChannel::Input => &self.input_voltage,
            VoltageChannel::Output => &self.output_voltage,
        }
    }

    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Interval between consecutive samples after any resampling, in s
    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    /// Resampling factor applied to remove channel skew (1 when none)
    pub fn upsampling_scale(&self) -> usize {
        self.upsampling_scale
    }

    /// Time covered by the block, in s
    pub fn duration(&self) -> f64 {
        self.time.last().copied().unwrap_or(0.0) - self.time.first().copied().unwrap_or(0.0)
    }

    /// Highest sample on the input voltage channel
    pub fn max_input_voltage(&self) -> f64 {
        self.input_voltage.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Largest absolute sample on the current channel
    pub fn peak_current(&self) -> f64 {
        self.current.iter().fold(0.0_f64, |acc, i| acc.max(i.abs()))
    }

    /// Number of distinct values on the current channel, a proxy for the
    /// ADC resolution actually used.
    pub fn distinct_current_levels(&self) -> usize {
        let mut values = self.current.clone();
        values.sort_by(f64::total_cmp);
        values.dedup();
        values.len()
    }
}

/// Finest grid that holds the sampling interval and every skew, in s.
fn common_grid(sampling_interval: f64, skews: &[f64]) -> f64 {
    let mut grid_ps = (sampling_interval * 1e12).round() as u64;
    for skew in skews {
        let skew_ps = (skew.abs() * 1e12).round() as u64;
        if skew_ps == 0 {
            continue;
        }
        grid_ps = gcd(grid_ps, skew_ps);
    }
    grid_ps.max(1) as f64 / 1e12
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn upsample_linear(data: &[f64], scale: usize) -> Vec<f64> {
    let mut fine = Vec::with_capacity((data.len() - 1) * scale + 1);
    for pair in data.windows(2) {
        let step = (pair[1] - pair[0]) / scale as f64;
        for k in 0..scale {
            fine.push(pair[0] + step * k as f64);
        }
    }
    if let Some(last) = data.last() {
        fine.push(*last);
    }
    fine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_builds_time_axis() {
        let trace = CaptureTrace::new(1e-6, vec![0.0; 4], vec![0.0; 4], vec![0.0, 1.0, 1.0, 2.0]).unwrap();
        assert_eq!(trace.len(), 4);
        assert!((trace.time()[3] - 3e-6).abs() < 1e-18);
        assert_eq!(trace.distinct_current_levels(), 3);
        assert_eq!(trace.upsampling_scale(), 1);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = CaptureTrace::new(1e-6, vec![0.0; 4], vec![0.0; 3], vec![0.0; 4]).unwrap_err();
        assert!(matches!(err, CaptureError::LengthMismatch { channel: "output_voltage", .. }));
    }

    #[test]
    fn test_invalid_sampling_interval() {
        let err = CaptureTrace::new(0.0, vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidSamplingInterval(_)));
    }

    #[test]
    fn test_non_finite_samples_rejected() {
        let mut current = vec![0.0; 4];
        current[2] = f64::NAN;
        let err = CaptureTrace::new(1e-6, vec![0.0; 4], vec![0.0; 4], current).unwrap_err();
        assert!(matches!(err, CaptureError::NonFinite { channel: "current", index: 2 }));

        let err = CaptureTrace::from_columns(
            vec![0.0, 1e-6, 2e-6],
            vec![0.0, f64::INFINITY, 0.0],
            vec![0.0; 3],
            vec![0.0; 3],
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::NonFinite { channel: "input_voltage", index: 1 }));
    }

    #[test]
    fn test_gcd_grid() {
        assert!((common_grid(4e-9, &[2e-9, 0.0, 0.0]) - 2e-9).abs() < 1e-21);
        assert!((common_grid(4e-9, &[0.0, 0.0, 0.0]) - 4e-9).abs() < 1e-21);
        assert!((common_grid(10e-9, &[4e-9, 0.0, 6e-9]) - 2e-9).abs() < 1e-21);
    }

    #[test]
    fn test_skewed_channels_are_upsampled_and_rotated() {
        let ramp: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let trace = CaptureTrace::from_skewed_channels(
            4e-9,
            [ramp.clone(), ramp.clone(), ramp],
            [0.0, 0.0, 2e-9],
        )
        .unwrap();

        assert_eq!(trace.upsampling_scale(), 2);
        assert_eq!(trace.len(), 9);
        assert!((trace.sampling_interval() - 2e-9).abs() < 1e-21);
        assert!((trace.input_voltage()[1] - 0.5).abs() < 1e-12);
        // current channel shifted by one fine sample
        assert!((trace.current()[2] - 0.5).abs() < 1e-12);
        assert!((trace.current()[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_voltage_channel_selector() {
        let trace = CaptureTrace::new(1e-6, vec![1.0; 3], vec![2.0; 3], vec![0.0; 3]).unwrap();
        assert_eq!(trace.voltage(VoltageChannel::Input)[0], 1.0);
        assert_eq!(trace.voltage(VoltageChannel::Output)[0], 2.0);
        assert_eq!(trace.max_input_voltage(), 1.0);
    }
}
