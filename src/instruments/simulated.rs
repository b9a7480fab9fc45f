use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::range::{pico_2408b_timebase, select_input_range, PICO_2408B_RANGES};
use super::{
    ChannelConfiguration, InstrumentError, Oscilloscope, PowerSupply, PulseBoard, ScopeChannel, NEGATIVE_RAIL,
    POSITIVE_RAIL,
};
use crate::capture::CaptureTrace;

const ADC_LEVELS: f64 = 256.0;
const SUBSTEPS: usize = 4;
const MAX_SUPPLY_VOLTAGE: f64 = 30.0;
const MIN_PULSE_PERIOD: f64 = 50e-9;
const MAX_PULSE_PERIOD: f64 = 1.0;

/// Winding under test: a soft-saturating inductor with copper resistance
/// in series and a core-loss resistance in parallel.
///
/// `L(i) = L0 / (1 + (|i| / Isat)^k)`
#[derive(Debug, Clone, PartialEq)]
pub struct InductorModel {
    /// Small-signal inductance L0, in H
    pub inductance: f64,
    /// Current at which the inductance has halved, in A
    pub saturation_current: f64,
    /// Sharpness k of the saturation knee
    pub saturation_exponent: f64,
    /// Winding resistance, in ohm
    pub series_resistance: f64,
    /// Equivalent core-loss resistance, in ohm
    pub core_loss_resistance: f64,
}

impl Default for InductorModel {
    /// Close to an ungapped RM10/N87 core with 26 turns.
    fn default() -> Self {
        Self {
            inductance: 4e-3,
            saturation_current: 0.25,
            saturation_exponent: 4.0,
            series_resistance: 0.1,
            core_loss_resistance: 2_000.0,
        }
    }
}

impl InductorModel {
    pub fn inductance_at(&self, current: f64) -> f64 {
        self.inductance / (1.0 + (current.abs() / self.saturation_current).powf(self.saturation_exponent))
    }
}

struct ScopeState {
    ranges: [f64; 3],
    probe_scales: [f64; 3],
    number_samples: usize,
    sampling_time: f64,
    trigger_threshold: f64,
    trigger_armed: bool,
    block_running: bool,
    strict_ranges: bool,
    captured: Option<[Vec<f64>; 3]>,
}

struct BenchState {
    model: InductorModel,
    rng: StdRng,
    noise_fraction: f64,
    rails: [f64; 2],
    outputs_enabled: [bool; 2],
    enable_events: [usize; 2],
    disable_events: [usize; 2],
    readback_offset: f64,
    pulses: Vec<f64>,
    fired_trains: usize,
    missed_triggers: usize,
    scope: ScopeState,
}

impl BenchState {
    fn bridge_levels(&self) -> (f64, f64) {
        let positive = if self.outputs_enabled[0] { self.rails[0] } else { 0.0 };
        let negative = if self.outputs_enabled[1] { self.rails[1] } else { 0.0 };
        (positive, negative)
    }

    fn fire(&mut self, repetitions: u32) {
        self.fired_trains += 1;
        let scope_ready = self.scope.block_running && self.scope.trigger_armed && self.scope.captured.is_none();
        if !scope_ready {
            debug!("Simulated train fired without an armed block");
            return;
        }
        if self.missed_triggers > 0 {
            self.missed_triggers -= 1;
            debug!("Simulated trigger missed");
            return;
        }

        let (positive, negative) = self.bridge_levels();
        if positive / self.scope.probe_scales[0] < self.scope.trigger_threshold {
            debug!("Simulated trigger not reached: bridge at {} V", positive);
            return;
        }

        let mut segments = Vec::with_capacity(self.pulses.len() * repetitions as usize);
        for _ in 0..repetitions {
            for (i, period) in self.pulses.iter().enumerate() {
                let level = if i % 2 == 0 { positive } else { -negative };
                segments.push((*period, level));
            }
        }
        let channels = self.simulate(&segments);
        self.scope.captured = Some(channels);
        self.scope.trigger_armed = false;
    }

    /// Integrate the winding over the train, sampled as the scope would.
    fn simulate(&mut self, segments: &[(f64, f64)]) -> [Vec<f64>; 3] {
        let n = self.scope.number_samples;
        let dt = self.scope.sampling_time;
        let pre_trigger = n / 50;
        let h = dt / SUBSTEPS as f64;

        let model = self.model.clone();
        let divider = 1.0 + model.series_resistance / model.core_loss_resistance;
        let mut input = Vec::with_capacity(n);
        let mut output = Vec::with_capacity(n);
        let mut current = Vec::with_capacity(n);

        let mut segment = 0;
        let mut segment_end = segments.first().map_or(0.0, |s| s.0);
        let mut magnetizing = 0.0;
        let level_at = |t: f64, segment: &mut usize, segment_end: &mut f64| -> f64 {
            if t < 0.0 {
                return 0.0;
            }
            while *segment < segments.len() && t >= *segment_end {
                *segment += 1;
                if let Some(next) = segments.get(*segment) {
                    *segment_end += next.0;
                }
            }
            segments.get(*segment).map_or(0.0, |s| s.1)
        };

        for k in 0..n {
            let t = (k as f64 - pre_trigger as f64) * dt;
            let level = level_at(t, &mut segment, &mut segment_end);
            let winding = (level - model.series_resistance * magnetizing) / divider;
            input.push(level);
            output.push(winding);
            current.push(magnetizing + winding / model.core_loss_resistance);

            for s in 0..SUBSTEPS {
                let ts = t + s as f64 * h;
                let level = level_at(ts, &mut segment, &mut segment_end);
                let winding = (level - model.series_resistance * magnetizing) / divider;
                magnetizing += winding / model.inductance_at(magnetizing) * h;
            }
        }

        let input = self.digitize(&input, 0);
        let output = self.digitize(&output, 1);
        let current = self.digitize(&current, 2);
        [input, output, current]
    }

    /// Noise, clipping and 8-bit quantization of one channel.
    fn digitize(&mut self, values: &[f64], channel: usize) -> Vec<f64> {
        let range = self.scope.ranges[channel];
        let scale = self.scope.probe_scales[channel];
        let step = 2.0 * range / ADC_LEVELS;
        let noise = Normal::new(0.0, self.noise_fraction * range).ok();
        values
            .iter()
            .map(|v| {
                let jitter = noise.map_or(0.0, |n| n.sample(&mut self.rng));
                let at_input = (v / scale + jitter).clamp(-range, range);
                (at_input / step).round() * step * scale
            })
            .collect()
    }

    fn idle_block(&mut self) -> [Vec<f64>; 3] {
        let zeros = vec![0.0; self.scope.number_samples];
        [
            self.digitize(&zeros, 0),
            self.digitize(&zeros, 1),
            self.digitize(&zeros, 2),
        ]
    }
}

/// Simulated supply, pulse board and scope wired to one [`InductorModel`].
///
/// A train fired on the board is only captured when the scope block was
/// started and its trigger armed beforehand; otherwise the scope times out
/// and returns noise.
#[derive(Clone)]
pub struct VirtualBench {
    state: Rc<RefCell<BenchState>>,
}

impl VirtualBench {
    pub fn new(model: InductorModel, seed: u64) -> Self {
        let state = BenchState {
            model,
            rng: StdRng::seed_from_u64(seed),
            noise_fraction: 0.002,
            rails: [0.0; 2],
            outputs_enabled: [false; 2],
            enable_events: [0; 2],
            disable_events: [0; 2],
            readback_offset: 0.0,
            pulses: Vec::new(),
            fired_trains: 0,
            missed_triggers: 0,
            scope: ScopeState {
                ranges: [20.0; 3],
                probe_scales: [1.0; 3],
                number_samples: 1_000,
                sampling_time: 1e-8,
                trigger_threshold: 0.0,
                trigger_armed: false,
                block_running: false,
                strict_ranges: false,
                captured: None,
            },
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Gaussian noise per channel, as a fraction of the channel range.
    pub fn with_noise(self, fraction: f64) -> Self {
        self.state.borrow_mut().noise_fraction = fraction.max(0.0);
        self
    }

    /// Reject ranges that are not an exact scope range.
    pub fn with_strict_ranges(self, strict: bool) -> Self {
        self.state.borrow_mut().scope.strict_ranges = strict;
        self
    }

    /// Drop the next `count` triggers.
    pub fn miss_triggers(&self, count: usize) {
        self.state.borrow_mut().missed_triggers = count;
    }

    /// Offset added to the programmed voltage on readback.
    pub fn set_readback_offset(&self, offset: f64) {
        self.state.borrow_mut().readback_offset = offset;
    }

    pub fn power_supply(&self) -> SimulatedPowerSupply {
        SimulatedPowerSupply {
            state: Rc::clone(&self.state),
        }
    }

    pub fn pulse_board(&self) -> SimulatedPulseBoard {
        SimulatedPulseBoard {
            state: Rc::clone(&self.state),
        }
    }

    pub fn oscilloscope(&self) -> SimulatedOscilloscope {
        SimulatedOscilloscope {
            state: Rc::clone(&self.state),
        }
    }

    pub fn model(&self) -> InductorModel {
        self.state.borrow().model.clone()
    }

    pub fn outputs_enabled(&self) -> [bool; 2] {
        self.state.borrow().outputs_enabled
    }

    /// Times each rail was switched on, `[positive, negative]`
    pub fn enable_events(&self) -> [usize; 2] {
        self.state.borrow().enable_events
    }

    /// Times each rail was switched off, `[positive, negative]`
    pub fn disable_events(&self) -> [usize; 2] {
        self.state.borrow().disable_events
    }

    pub fn rail_voltages(&self) -> [f64; 2] {
        self.state.borrow().rails
    }

    pub fn fired_trains(&self) -> usize {
        self.state.borrow().fired_trains
    }

    pub fn loaded_pulses(&self) -> Vec<f64> {
        self.state.borrow().pulses.clone()
    }
}

fn rail_index(channel: u8) -> Result<usize, InstrumentError> {
    match channel {
        POSITIVE_RAIL => Ok(0),
        NEGATIVE_RAIL => Ok(1),
        other => Err(InstrumentError::InvalidChannel(other)),
    }
}

pub struct SimulatedPowerSupply {
    state: Rc<RefCell<BenchState>>,
}

impl PowerSupply for SimulatedPowerSupply {
    fn enable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        let index = rail_index(channel)?;
        let mut state = self.state.borrow_mut();
        state.outputs_enabled[index] = true;
        state.enable_events[index] += 1;
        Ok(())
    }

    fn disable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        let index = rail_index(channel)?;
        let mut state = self.state.borrow_mut();
        state.outputs_enabled[index] = false;
        state.disable_events[index] += 1;
        Ok(())
    }

    fn set_source_voltage(&mut self, channel: u8, voltage: f64) -> Result<(), InstrumentError> {
        let index = rail_index(channel)?;
        if !(0.0..=MAX_SUPPLY_VOLTAGE).contains(&voltage) {
            return Err(InstrumentError::InvalidSetting(format!(
                "voltage {} V outside 0..={} V",
                voltage, MAX_SUPPLY_VOLTAGE
            )));
        }
        self.state.borrow_mut().rails[index] = voltage;
        Ok(())
    }

    fn source_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        let index = rail_index(channel)?;
        let state = self.state.borrow();
        Ok(((state.rails[index] + state.readback_offset) * 1000.0).round() / 1000.0)
    }

    fn set_current_limit(&mut self, channel: u8, _limit: f64) -> Result<(), InstrumentError> {
        rail_index(channel).map(|_| ())
    }

    fn set_voltage_limit(&mut self, channel: u8, _limit: f64) -> Result<(), InstrumentError> {
        rail_index(channel).map(|_| ())
    }

    fn measured_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        let index = rail_index(channel)?;
        let state = self.state.borrow();
        Ok(if state.outputs_enabled[index] { state.rails[index] } else { 0.0 })
    }

    fn measured_current(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        rail_index(channel).map(|_| 0.0)
    }

    fn measured_power(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        rail_index(channel).map(|_| 0.0)
    }

    fn reset_limits(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

pub struct SimulatedPulseBoard {
    state: Rc<RefCell<BenchState>>,
}

impl PulseBoard for SimulatedPulseBoard {
    fn reset(&mut self) -> Result<(), InstrumentError> {
        self.state.borrow_mut().pulses.clear();
        Ok(())
    }

    fn clear_pulses(&mut self) -> Result<(), InstrumentError> {
        self.state.borrow_mut().pulses.clear();
        Ok(())
    }

    fn add_pulse(&mut self, period: f64) -> Result<(), InstrumentError> {
        if !(MIN_PULSE_PERIOD..=MAX_PULSE_PERIOD).contains(&period) {
            return Err(InstrumentError::InvalidSetting(format!("pulse period {} s out of range", period)));
        }
        self.state.borrow_mut().pulses.push(period);
        Ok(())
    }

    fn read_pulses(&mut self) -> Result<Vec<f64>, InstrumentError> {
        Ok(self.state.borrow().pulses.clone())
    }

    fn run_pulses(&mut self, repetitions: u32) -> Result<(), InstrumentError> {
        self.state.borrow_mut().fire(repetitions);
        Ok(())
    }

    fn identification(&mut self) -> Result<String, InstrumentError> {
        Ok("TPT,SIMULATED-BOARD".to_string())
    }

    fn version(&mut self) -> Result<String, InstrumentError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn minimum_period(&mut self) -> Result<f64, InstrumentError> {
        Ok(MIN_PULSE_PERIOD)
    }

    fn maximum_period(&mut self) -> Result<f64, InstrumentError> {
        Ok(MAX_PULSE_PERIOD)
    }
}

/// Three-channel 8-bit scope with the ranges and timebases of a 2408B.
pub struct SimulatedOscilloscope {
    state: Rc<RefCell<BenchState>>,
}

impl Oscilloscope for SimulatedOscilloscope {
    fn set_channel_configuration(
        &mut self,
        channel: ScopeChannel,
        configuration: ChannelConfiguration,
    ) -> Result<f64, InstrumentError> {
        let mut state = self.state.borrow_mut();
        let range = select_input_range(configuration.input_range, &PICO_2408B_RANGES, state.scope.strict_ranges)?;
        state.scope.ranges[channel.index()] = range;
        Ok(range)
    }

    fn set_rising_trigger(&mut self, _channel: ScopeChannel, threshold: f64, _timeout_ms: u32) -> Result<(), InstrumentError> {
        self.state.borrow_mut().scope.trigger_threshold = threshold;
        Ok(())
    }

    fn arm_trigger(&mut self, _channel: ScopeChannel) -> Result<(), InstrumentError> {
        self.state.borrow_mut().scope.trigger_armed = true;
        Ok(())
    }

    fn disarm_trigger(&mut self, _channel: ScopeChannel) -> Result<(), InstrumentError> {
        self.state.borrow_mut().scope.trigger_armed = false;
        Ok(())
    }

    fn set_number_samples(&mut self, number_samples: usize) -> Result<(), InstrumentError> {
        if number_samples < 2 {
            return Err(InstrumentError::InvalidSetting(format!("{} samples", number_samples)));
        }
        self.state.borrow_mut().scope.number_samples = number_samples;
        Ok(())
    }

    fn set_sampling_time(&mut self, sampling_time: f64) -> Result<f64, InstrumentError> {
        let (_, actual) = pico_2408b_timebase(sampling_time);
        self.state.borrow_mut().scope.sampling_time = actual;
        Ok(actual)
    }

    fn set_probe_scale(&mut self, channel: ScopeChannel, scale: f64) -> Result<(), InstrumentError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(InstrumentError::InvalidSetting(format!("probe scale {}", scale)));
        }
        self.state.borrow_mut().scope.probe_scales[channel.index()] = scale;
        Ok(())
    }

    fn run_acquisition_block(&mut self) -> Result<(), InstrumentError> {
        let mut state = self.state.borrow_mut();
        state.scope.block_running = true;
        state.scope.captured = None;
        Ok(())
    }

    fn read_data(&mut self) -> Result<CaptureTrace, InstrumentError> {
        let mut state = self.state.borrow_mut();
        if !state.scope.block_running {
            return Err(InstrumentError::NoData);
        }
        state.scope.block_running = false;
        let channels = match state.scope.captured.take() {
            Some(channels) => channels,
            None => state.idle_block(),
        };
        let [input, output, current] = channels;
        Ok(CaptureTrace::new(state.scope.sampling_time, input, output, current)?)
    }
}
