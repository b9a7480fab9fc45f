use std::fmt;

use serde::{Deserialize, Serialize};

use super::PlanError;

/// Strategy used to lay out the pulse train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseMode {
    /// Even count of equal half-periods, zero net volt-seconds
    Balanced,
    /// Long first pulse that builds a DC current, then recovery,
    /// stabilization and measurement cycles
    DcBias,
    /// Equal pairs followed by one padding pulse up to the minimum capture time
    Padded,
    /// Unequal `t+`/`t-` pairs balanced through timing
    Asymmetric,
}

impl fmt::Display for PulseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulseMode::Balanced => write!(f, "balanced"),
            PulseMode::DcBias => write!(f, "dc-bias"),
            PulseMode::Padded => write!(f, "padded"),
            PulseMode::Asymmetric => write!(f, "asymmetric"),
        }
    }
}

/// Excitation settings for one acquisition.
///
/// Pulses alternate polarity starting with the positive rail: even indices
/// are driven at `positive_voltage_peak`, odd indices at
/// `-negative_voltage_peak`. Values are fixed at construction; corrections
/// produce a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestParameters {
    mode: PulseMode,
    positive_voltage_peak: f64,
    negative_voltage_peak: f64,
    current_peak: f64,
    pulse_periods: Vec<f64>,
    total_duration: f64,
    steady_period: Option<f64>,
    dc_bias_current: Option<f64>,
    first_pulse_width: Option<f64>,
}

impl TestParameters {
    /// Validate and build a parameter set.
    ///
    /// Every duration must be positive and finite; a balanced train must
    /// hold an even number of durations.
    pub fn new(
        mode: PulseMode,
        positive_voltage_peak: f64,
        negative_voltage_peak: f64,
        current_peak: f64,
        pulse_periods: Vec<f64>,
    ) -> Result<Self, PlanError> {
        if pulse_periods.is_empty() {
            return Err(PlanError::EmptyTrain);
        }
        if let Some((index, &value)) = pulse_periods
            .iter()
            .enumerate()
            .find(|(_, p)| !(p.is_finite() && **p > 0.0))
        {
            return Err(PlanError::NonPositiveDuration { index, value });
        }
        if mode == PulseMode::Balanced && pulse_periods.len() % 2 != 0 {
            return Err(PlanError::OddBalancedCount(pulse_periods.len()));
        }
        if !(current_peak.is_finite() && current_peak > 0.0) {
            return Err(PlanError::InvalidInput(format!(
                "current range must be positive, got {current_peak}"
            )));
        }

        let total_duration = pulse_periods.iter().sum();
        Ok(Self {
            mode,
            positive_voltage_peak,
            negative_voltage_peak,
            current_peak,
            pulse_periods,
            total_duration,
            steady_period: None,
            dc_bias_current: None,
            first_pulse_width: None,
        })
    }

    /// Attach the steady half-period used for capture planning.
    pub fn with_steady_period(mut self, steady_period: f64) -> Self {
        self.steady_period = Some(steady_period);
        self
    }

    /// Attach the DC-bias target and the width of the bias-building pulse.
    pub fn with_dc_bias(mut self, dc_bias_current: f64, first_pulse_width: f64) -> Self {
        self.dc_bias_current = Some(dc_bias_current);
        self.first_pulse_width = Some(first_pulse_width);
        self
    }

    /// Copy with the rails shifted against a measured imbalance:
    /// `V+ - correction` and `V- + correction`.
    pub fn with_voltage_correction(&self, correction: f64) -> Self {
        let mut corrected = self.clone();
        corrected.positive_voltage_peak -= correction;
        corrected.negative_voltage_peak += correction;
        corrected
    }

    /// Copy with both rails replaced.
    pub fn with_voltages(&self, positive_voltage_peak: f64, negative_voltage_peak: f64) -> Self {
        let mut updated = self.clone();
        updated.positive_voltage_peak = positive_voltage_peak;
        updated.negative_voltage_peak = negative_voltage_peak;
        updated
    }

    pub fn mode(&self) -> PulseMode {
        self.mode
    }

    pub fn positive_voltage_peak(&self) -> f64 {
        self.positive_voltage_peak
    }

    pub fn negative_voltage_peak(&self) -> f64 {
        self.negative_voltage_peak
    }

    /// Current range hint for the current channel, in A
    pub fn current_peak(&self) -> f64 {
        self.current_peak
    }

    pub fn pulse_periods(&self) -> &[f64] {
        &self.pulse_periods
    }

    /// Sum of all pulse durations, in s
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn steady_period(&self) -> Option<f64> {
        self.steady_period
    }

    pub fn dc_bias_current(&self) -> Option<f64> {
        self.dc_bias_current
    }

    pub fn first_pulse_width(&self) -> Option<f64> {
        self.first_pulse_width
    }

    /// Net volt-seconds applied by the train (positive minus negative phases).
    pub fn net_volt_seconds(&self) -> f64 {
        self.pulse_periods
            .iter()
            .enumerate()
            .map(|(i, period)| {
                if i % 2 == 0 {
                    self.positive_voltage_peak * period
                } else {
                    -self.negative_voltage_peak * period
                }
            })
            .sum()
    }

    /// Whether the train returns the core to its starting flux.
    ///
    /// True when the count is even and every positive phase is cancelled by
    /// the negative phase that follows it.
    pub fn is_flux_balanced(&self) -> bool {
        if self.pulse_periods.len() % 2 != 0 {
            return false;
        }
        self.pulse_periods.chunks_exact(2).all(|pair| {
            let positive = self.positive_voltage_peak * pair[0];
            let negative = self.negative_voltage_peak * pair[1];
            let scale = positive.abs().max(negative.abs()).max(f64::MIN_POSITIVE);
            (positive - negative).abs() / scale < 1e-9
        })
    }

    /// Reference period for capture planning.
    ///
    /// The steady half-period when known; otherwise the shortest pulse that
    /// is at least half the longest, which ignores short padding pulses.
    pub fn reference_period(&self) -> f64 {
        if let Some(steady) = self.steady_period {
            return steady;
        }
        let longest = self.pulse_periods.iter().copied().fold(0.0_f64, f64::max);
        self.pulse_periods
            .iter()
            .copied()
            .filter(|p| *p >= longest * 0.5)
            .fold(longest, f64::min)
    }
}
