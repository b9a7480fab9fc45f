use log::{debug, info};
use serde::Serialize;

use crate::capture::CaptureTrace;

/// Number of rising edges that belong to the bias pulse and the
/// stabilization cycles of a DC-bias train
pub const DC_BIAS_SKIPPED_EDGES: usize = 3;

/// Spread above which later pulses are considered affected by DC buildup
pub const DC_BUILDUP_SPREAD_PERCENT: f64 = 30.0;

/// Slope fitted inside one positive pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PulseSlope {
    /// First sample of the positive pulse
    pub start: usize,
    /// First sample after the positive pulse
    pub end: usize,
    /// dI/dt in A/s
    pub slope: f64,
    /// `|V/slope|` in H
    pub inductance: f64,
    /// Mean voltage over the fitted samples
    pub mean_voltage: f64,
}

/// Inductance of an unbiased train.
#[derive(Debug, Clone, Serialize)]
pub struct InductanceEstimate {
    /// Inductance from the first valid pulse, in H
    pub inductance: f64,
    /// Largest absolute current in the (smoothed) trace, in A
    pub peak_current: f64,
    /// Every valid pulse, in capture order
    pub slopes: Vec<PulseSlope>,
    /// Deviation of later pulses from the first, in percent of the first
    pub spread_percent: f64,
}

impl InductanceEstimate {
    /// Whether later pulses drift enough to indicate DC buildup.
    pub fn dc_buildup_suspected(&self) -> bool {
        self.spread_percent > DC_BUILDUP_SPREAD_PERCENT
    }
}

/// Inductance at a DC-bias operating point.
#[derive(Debug, Clone, Serialize)]
pub struct DcBiasEstimate {
    /// Mean inductance over the measurement pulses, in H
    pub inductance: f64,
    /// Largest absolute current inside the fitted segments, in A
    pub peak_current: f64,
    /// Mean current over the second half of the capture, in A
    pub dc_current: f64,
    /// Half the current swing over the second half of the capture, in A
    pub ac_ripple: f64,
    /// Measurement pulses, in capture order
    pub slopes: Vec<PulseSlope>,
}

/// Extracts inductance from the current slope during positive pulses.
#[derive(Debug, Clone)]
pub struct InductanceExtractor {
    /// Moving-average window applied to the current, `None` to disable
    pub smoothing_window: Option<usize>,
    /// Fraction of the expected voltage that marks a positive pulse
    pub threshold_fraction: f64,
    /// Fewest samples left for the fit after trimming the edges
    pub min_fit_points: usize,
    /// Slopes below this magnitude (A/s) are discarded
    pub min_slope: f64,
}

impl Default for InductanceExtractor {
    fn default() -> Self {
        Self {
            smoothing_window: Some(7),
            threshold_fraction: 0.5,
            min_fit_points: 5,
            min_slope: 0.001,
        }
    }
}

impl InductanceExtractor {
    /// Inductance from the first valid positive pulse of a trace.
    ///
    /// Each pulse is trimmed by 30% (under 50 samples), 25% (under 100) or
    /// 20% at both ends before an ordinary least-squares fit of current
    /// against time. `L = |mean(V) / slope|`.
    pub fn extract(&self, trace: &CaptureTrace, expected_voltage: f64) -> Option<InductanceEstimate> {
        let current = self.prepared_current(trace);
        let windows = positive_pulses(trace.input_voltage(), expected_voltage * self.threshold_fraction);

        let slopes: Vec<PulseSlope> = windows
            .iter()
            .filter_map(|&(start, end)| {
                let margin = (((end - start) as f64) * margin_fraction(end - start)) as usize;
                self.fit_pulse(trace, &current, start, end, margin)
            })
            .collect();

        let first = slopes.first()?;
        let inductance = first.inductance;
        let spread_percent = spread_about(first.inductance, &slopes);
        let peak_current = current.iter().fold(0.0_f64, |acc, i| acc.max(i.abs()));

        if spread_percent > DC_BUILDUP_SPREAD_PERCENT {
            info!(
                "Using first pulse only: later pulses vary by {:.0}% (DC buildup)",
                spread_percent
            );
        } else {
            debug!("{} pulses fitted, spread {:.1}%", slopes.len(), spread_percent);
        }

        Some(InductanceEstimate {
            inductance,
            peak_current,
            slopes,
            spread_percent,
        })
    }

    /// Inductance of the measurement cycles of a DC-bias train.
    ///
    /// The first [`DC_BIAS_SKIPPED_EDGES`] rising edges (bias pulse and
    /// stabilization) are skipped, a fixed 20% margin is used and the
    /// reported inductance is the mean over the remaining pulses.
    pub fn extract_dc_biased(&self, trace: &CaptureTrace, expected_voltage: f64) -> Option<DcBiasEstimate> {
        let current = self.prepared_current(trace);
        let threshold = expected_voltage * self.threshold_fraction;
        let positive: Vec<bool> = trace.input_voltage().iter().map(|v| *v > threshold).collect();

        let edges: Vec<usize> = (1..positive.len())
            .filter(|&i| positive[i] && !positive[i - 1])
            .collect();
        if edges.len() <= DC_BIAS_SKIPPED_EDGES {
            return None;
        }

        let mut slopes = Vec::new();
        let mut peak_current = 0.0_f64;
        for &start in &edges[DC_BIAS_SKIPPED_EDGES..] {
            let mut end = start;
            while end < positive.len() - 1 && positive[end] {
                end += 1;
            }
            let margin = ((end - start) as f64 * 0.2) as usize;
            if let Some(slope) = self.fit_pulse(trace, &current, start, end, margin) {
                let segment = &current[start + margin..end - margin];
                peak_current = segment.iter().fold(peak_current, |acc, i| acc.max(i.abs()));
                slopes.push(slope);
            }
        }
        if slopes.is_empty() {
            return None;
        }

        let inductance = slopes.iter().map(|s| s.inductance).sum::<f64>() / slopes.len() as f64;
        let raw = trace.current();
        let second_half = &raw[raw.len() / 2..];
        let dc_current = second_half.iter().sum::<f64>() / second_half.len() as f64;
        let (lo, hi) = min_max(second_half);

        Some(DcBiasEstimate {
            inductance,
            peak_current,
            dc_current,
            ac_ripple: (hi - lo) / 2.0,
            slopes,
        })
    }

    fn prepared_current(&self, trace: &CaptureTrace) -> Vec<f64> {
        match self.smoothing_window {
            Some(window) if window > 1 => smooth(trace.current(), window),
            _ => trace.current().to_vec(),
        }
    }

    fn fit_pulse(&self, trace: &CaptureTrace, current: &[f64], start: usize, end: usize, margin: usize) -> Option<PulseSlope> {
        let seg_start = start + margin;
        let seg_end = end.checked_sub(margin)?;
        if seg_end <= seg_start || seg_end - seg_start < self.min_fit_points {
            return None;
        }

        let t = &trace.time()[seg_start..seg_end];
        let i = &current[seg_start..seg_end];
        let v = &trace.input_voltage()[seg_start..seg_end];

        let slope = ols_slope(t, i)?;
        if slope.abs() < self.min_slope {
            return None;
        }
        let mean_voltage = v.iter().sum::<f64>() / v.len() as f64;
        Some(PulseSlope {
            start,
            end,
            slope,
            inductance: (mean_voltage / slope).abs(),
            mean_voltage,
        })
    }
}

/// Edge margin for a pulse of `length` samples.
fn margin_fraction(length: usize) -> f64 {
    if length < 50 {
        0.30
    } else if length < 100 {
        0.25
    } else {
        0.20
    }
}

/// `(start, end)` windows where the voltage stays above `threshold`.
///
/// A pulse still high at the end of the trace has no falling edge and is
/// not reported.
pub fn positive_pulses(voltage: &[f64], threshold: f64) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    let mut start = None;
    for (i, &v) in voltage.iter().enumerate() {
        match (v > threshold, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                windows.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    windows
}

/// Centered moving average; the first and last `window / 2` samples are
/// copied unchanged.
pub fn smooth(signal: &[f64], window: usize) -> Vec<f64> {
    if window < 2 || signal.len() < window {
        return signal.to_vec();
    }
    let half = window / 2;
    let mut smoothed = signal.to_vec();
    let mut sum: f64 = signal[..window].iter().sum();
    // window covers [i - half, i - half + window)
    for i in half..signal.len() - (window - half) + 1 {
        if i > half {
            sum += signal[i - half + window - 1] - signal[i - half - 1];
        }
        smoothed[i] = sum / window as f64;
    }
    let tail = signal.len() - half;
    smoothed[tail..].copy_from_slice(&signal[tail..]);
    smoothed
}

/// Ordinary least-squares slope of `y` against `x`.
pub fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let x_mean = x[..n].iter().sum::<f64>() / n as f64;
    let y_mean = y[..n].iter().sum::<f64>() / n as f64;
    let (num, den) = x[..n]
        .iter()
        .zip(&y[..n])
        .fold((0.0, 0.0), |(num, den), (xi, yi)| {
            let dx = xi - x_mean;
            (num + dx * (yi - y_mean), den + dx * dx)
        });
    if den > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

fn spread_about(reference: f64, slopes: &[PulseSlope]) -> f64 {
    if slopes.len() < 2 || reference <= 0.0 {
        return 0.0;
    }
    let variance = slopes
        .iter()
        .map(|s| (s.inductance - reference).powi(2))
        .sum::<f64>()
        / (slopes.len() - 1) as f64;
    variance.sqrt() / reference * 100.0
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}
