use log::debug;

use super::{PlanError, PulseMode, TestParameters};

/// Inductance assumed when sizing the current range without a measurement
pub const DEFAULT_INDUCTANCE_ESTIMATE: f64 = 0.004;

/// Shortest train the scope is asked to capture, in s
pub const MIN_CAPTURE_TIME: f64 = 200e-6;

/// Number of steady pairs in a flux-target train
pub const STEADY_REPETITIONS: usize = 64;

/// Stabilization cycles between the bias pulse and the measurement cycles
pub const STABILIZATION_CYCLES: usize = 2;

const MIN_CURRENT_RANGE: f64 = 0.050;
const MIN_PADDED_CURRENT_RANGE: f64 = 0.100;
const MAX_CURRENT_RANGE: f64 = 2.0;

/// Magnetic target expressed as flux density swing and bias.
#[derive(Debug, Clone, Copy)]
pub struct FluxTarget {
    /// Peak-to-peak AC flux density in T
    pub flux_density_ac_pp: f64,
    /// DC bias flux density in T
    pub flux_density_dc_bias: f64,
    /// Switching frequency in Hz
    pub frequency: f64,
    /// Winding turns
    pub turns: u32,
    /// Effective magnetic area in m²
    pub effective_area: f64,
    /// Inductance in H
    pub inductance: f64,
}

/// Builds [`TestParameters`] for the supported pulse modes.
#[derive(Debug, Clone)]
pub struct PulseTrainPlanner {
    /// Inductance used for ripple estimates in balanced and padded modes
    pub inductance_estimate: f64,
    /// Minimum total train length for padded and DC-bias modes
    pub min_capture_time: f64,
}

impl Default for PulseTrainPlanner {
    fn default() -> Self {
        Self {
            inductance_estimate: DEFAULT_INDUCTANCE_ESTIMATE,
            min_capture_time: MIN_CAPTURE_TIME,
        }
    }
}

/// Half of the switching period.
pub fn steady_period(frequency: f64) -> f64 {
    1.0 / (2.0 * frequency)
}

fn check_excitation(voltage: f64, frequency: f64) -> Result<(), PlanError> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return Err(PlanError::InvalidInput(format!("frequency must be positive, got {frequency}")));
    }
    if !(voltage.is_finite() && voltage > 0.0) {
        return Err(PlanError::InvalidInput(format!("voltage must be positive, got {voltage}")));
    }
    Ok(())
}

impl PulseTrainPlanner {
    /// Create a planner with a specific inductance estimate.
    pub fn with_inductance_estimate(inductance_estimate: f64) -> Self {
        Self {
            inductance_estimate,
            ..Default::default()
        }
    }

    fn ripple_estimate(&self, voltage: f64, frequency: f64) -> f64 {
        voltage / (2.0 * frequency * self.inductance_estimate)
    }

    /// Exactly `2·num_pulses` equal half-periods at `±voltage`.
    ///
    /// Ends at the flux it started from. The current range is five times
    /// the expected ripple.
    pub fn balanced(&self, voltage: f64, frequency: f64, num_pulses: usize) -> Result<TestParameters, PlanError> {
        check_excitation(voltage, frequency)?;
        if num_pulses == 0 {
            return Err(PlanError::InvalidInput("balanced train needs at least one pulse pair".to_string()));
        }

        let half_period = steady_period(frequency);
        let current_peak = (self.ripple_estimate(voltage, frequency) * 5.0).clamp(MIN_CURRENT_RANGE, MAX_CURRENT_RANGE);
        let periods = vec![half_period; 2 * num_pulses];

        debug!("Balanced train: {} half-periods of {:.3} us", periods.len(), half_period * 1e6);
        Ok(TestParameters::new(PulseMode::Balanced, voltage, voltage, current_peak, periods)?.with_steady_period(half_period))
    }

    /// Equal pairs plus one padding pulse when the train is shorter than the
    /// minimum capture time.
    ///
    /// The padding pulse leaves residual flux; demagnetize afterwards.
    pub fn padded(&self, voltage: f64, frequency: f64, num_pulses: usize) -> Result<TestParameters, PlanError> {
        check_excitation(voltage, frequency)?;
        if num_pulses == 0 {
            return Err(PlanError::InvalidInput("padded train needs at least one pulse pair".to_string()));
        }

        let half_period = steady_period(frequency);
        let current_peak =
            (self.ripple_estimate(voltage, frequency) * 20.0).clamp(MIN_PADDED_CURRENT_RANGE, MAX_CURRENT_RANGE);

        let mut periods = vec![half_period; 2 * num_pulses];
        self.pad_to_capture_time(&mut periods);

        Ok(TestParameters::new(PulseMode::Padded, voltage, voltage, current_peak, periods)?.with_steady_period(half_period))
    }

    /// Triple-pulse train that establishes `dc_bias_current` before measuring.
    ///
    /// `t1 = I0·L/V + 0.5·steady_period`, then one recovery half-period,
    /// two stabilization cycles and `num_measurement_pulses` cycles.
    pub fn dc_bias(
        &self,
        voltage: f64,
        frequency: f64,
        dc_bias_current: f64,
        num_measurement_pulses: usize,
        inductance_estimate: f64,
    ) -> Result<TestParameters, PlanError> {
        check_excitation(voltage, frequency)?;
        if !(inductance_estimate.is_finite() && inductance_estimate > 0.0) {
            return Err(PlanError::InvalidInput(format!(
                "inductance estimate must be positive, got {inductance_estimate}"
            )));
        }
        if dc_bias_current < 0.0 {
            return Err(PlanError::InvalidInput(format!(
                "DC bias current must not be negative, got {dc_bias_current}"
            )));
        }

        let half_period = steady_period(frequency);
        let first_pulse_width = first_pulse_width(voltage, frequency, dc_bias_current, inductance_estimate);

        let ripple = voltage * half_period / inductance_estimate;
        let current_peak = (dc_bias_current + 2.0 * ripple).clamp(MIN_CURRENT_RANGE, MAX_CURRENT_RANGE);

        let mut periods = Vec::with_capacity(2 + 2 * (STABILIZATION_CYCLES + num_measurement_pulses) + 1);
        periods.push(first_pulse_width);
        periods.push(half_period);
        for _ in 0..STABILIZATION_CYCLES + num_measurement_pulses {
            periods.push(half_period);
            periods.push(half_period);
        }
        self.pad_to_capture_time(&mut periods);

        debug!(
            "DC-bias train: I0 = {:.1} mA, t1 = {:.2} us, {} pulses",
            dc_bias_current * 1e3,
            first_pulse_width * 1e6,
            periods.len()
        );
        Ok(TestParameters::new(PulseMode::DcBias, voltage, voltage, current_peak, periods)?
            .with_steady_period(half_period)
            .with_dc_bias(dc_bias_current, first_pulse_width))
    }

    /// `num_pulses` pairs of `t_positive` at `positive_voltage` and
    /// `t_negative` at `-negative_voltage`.
    pub fn asymmetric(
        &self,
        positive_voltage: f64,
        negative_voltage: f64,
        t_positive: f64,
        t_negative: f64,
        num_pulses: usize,
        current_peak: f64,
    ) -> Result<TestParameters, PlanError> {
        if num_pulses == 0 {
            return Err(PlanError::InvalidInput("asymmetric train needs at least one pulse pair".to_string()));
        }
        let mut periods = Vec::with_capacity(2 * num_pulses);
        for _ in 0..num_pulses {
            periods.push(t_positive);
            periods.push(t_negative);
        }
        Ok(TestParameters::new(
            PulseMode::Asymmetric,
            positive_voltage,
            negative_voltage.abs(),
            current_peak,
            periods,
        )?
        .with_steady_period(t_positive.min(t_negative)))
    }

    /// Train that produces a requested flux density swing and bias.
    ///
    /// `V = N·Ae·ΔB / steady_period`; without bias the result is a balanced
    /// train of [`STEADY_REPETITIONS`] pairs, with bias the DC-bias mode is
    /// used with `I0 = B_dc·N·Ae / L`.
    pub fn from_flux_target(&self, target: &FluxTarget) -> Result<TestParameters, PlanError> {
        if target.turns == 0 || target.effective_area <= 0.0 || target.inductance <= 0.0 {
            return Err(PlanError::InvalidInput(
                "flux target needs turns, effective area and inductance".to_string(),
            ));
        }
        if !(target.frequency.is_finite() && target.frequency > 0.0) {
            return Err(PlanError::InvalidInput(format!(
                "frequency must be positive, got {}",
                target.frequency
            )));
        }

        let n_ae = f64::from(target.turns) * target.effective_area;
        let half_period = steady_period(target.frequency);
        let voltage = n_ae * target.flux_density_ac_pp / half_period;
        let current_pp = target.flux_density_ac_pp * n_ae / target.inductance;
        let current_dc = target.flux_density_dc_bias * n_ae / target.inductance;

        if target.flux_density_dc_bias > 0.0 {
            return self.dc_bias(voltage, target.frequency, current_dc, STEADY_REPETITIONS, target.inductance);
        }

        check_excitation(voltage, target.frequency)?;
        // the train starts from zero current and swings up to the full ripple
        let current_peak = current_pp.clamp(MIN_CURRENT_RANGE, MAX_CURRENT_RANGE);
        let periods = vec![half_period; 2 * STEADY_REPETITIONS];
        Ok(TestParameters::new(PulseMode::Balanced, voltage, voltage, current_peak, periods)?.with_steady_period(half_period))
    }

    fn pad_to_capture_time(&self, periods: &mut Vec<f64>) {
        let total: f64 = periods.iter().sum();
        if total < self.min_capture_time {
            periods.push(self.min_capture_time - total);
        }
    }
}

/// Width of the bias-building pulse: `t1 = I0·L/V + 0.5·steady_period`.
pub fn first_pulse_width(voltage: f64, frequency: f64, dc_bias_current: f64, inductance: f64) -> f64 {
    dc_bias_current * inductance / voltage + 0.5 * steady_period(frequency)
}

/// `steps` frequencies spaced evenly in log between `start` and `stop`,
/// both ends included.
pub fn log_spaced(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let (log_start, log_stop) = (start.log10(), stop.log10());
            let step = (log_stop - log_start) / (steps - 1) as f64;
            (0..steps)
                .map(|i| 10f64.powf(log_start + step * i as f64))
                .collect()
        }
    }
}

/// `steps` values spaced evenly between `start` and `stop`, both included.
pub fn linspace(start: f64, stop: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (steps - 1) as f64;
            (0..steps).map(|i| start + step * i as f64).collect()
        }
    }
}
