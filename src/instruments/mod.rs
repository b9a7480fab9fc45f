//! # Instruments
//!
//! The measurement engine drives three collaborators through traits:
//!
//! - [`PowerSupply`]: the two rails feeding the half bridge (channel 1 is
//!   the positive rail, channel 2 the negative one).
//! - [`Oscilloscope`]: a block-mode scope with three channels (input
//!   voltage, output voltage, current).
//! - [`PulseBoard`]: the pulse sequencer that switches the bridge.
//!
//! Drivers shipped here:
//!
//! | Trait | Drivers |
//! |---|---|
//! | `PowerSupply` | [`Bk9129b`] (SCPI over serial), [`SimulatedPowerSupply`] |
//! | `Oscilloscope` | [`SimulatedOscilloscope`]; vendor SDK scopes implement the trait downstream |
//! | `PulseBoard` | [`NucleoBoard`] (SCPI over serial), [`SimulatedPulseBoard`] |
//!
//! The simulated drivers share one [`VirtualBench`] so that an excitation
//! fired on the board shows up on the scope.

mod bk;
mod error;
mod nucleo;
mod range;
mod scpi;
mod simulated;

pub use bk::Bk9129b;
pub use error::InstrumentError;
pub use nucleo::NucleoBoard;
pub use range::{pico_2408b_timebase, select_input_range, PICO_2408B_RANGES};
pub use scpi::{open_serial, ScpiPort};
pub use simulated::{
    InductorModel, SimulatedOscilloscope, SimulatedPowerSupply, SimulatedPulseBoard, VirtualBench,
};

use serde::{Deserialize, Serialize};

use crate::capture::CaptureTrace;

/// Positive rail of the bridge supply
pub const POSITIVE_RAIL: u8 = 1;
/// Negative rail of the bridge supply
pub const NEGATIVE_RAIL: u8 = 2;

/// Scope channel assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeChannel {
    InputVoltage,
    OutputVoltage,
    Current,
}

impl ScopeChannel {
    pub const ALL: [ScopeChannel; 3] = [
        ScopeChannel::InputVoltage,
        ScopeChannel::OutputVoltage,
        ScopeChannel::Current,
    ];

    /// Zero-based hardware index (A, B, C)
    pub fn index(self) -> usize {
        match self {
            ScopeChannel::InputVoltage => 0,
            ScopeChannel::OutputVoltage => 1,
            ScopeChannel::Current => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScopeChannel::InputVoltage => "Input Voltage",
            ScopeChannel::OutputVoltage => "Output Voltage",
            ScopeChannel::Current => "Current",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Coupling {
    Ac,
    #[default]
    Dc,
}

/// Front-end settings of one scope channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfiguration {
    /// Requested full-scale range, in V at the scope input
    pub input_range: f64,
    pub coupling: Coupling,
    pub analog_offset: f64,
}

impl ChannelConfiguration {
    pub fn dc(input_range: f64) -> Self {
        Self {
            input_range,
            coupling: Coupling::Dc,
            analog_offset: 0.0,
        }
    }
}

/// Dual-rail bench supply.
pub trait PowerSupply {
    fn enable_output(&mut self, channel: u8) -> Result<(), InstrumentError>;
    fn disable_output(&mut self, channel: u8) -> Result<(), InstrumentError>;
    fn set_source_voltage(&mut self, channel: u8, voltage: f64) -> Result<(), InstrumentError>;
    /// Programmed (not measured) voltage
    fn source_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError>;
    fn set_current_limit(&mut self, channel: u8, limit: f64) -> Result<(), InstrumentError>;
    fn set_voltage_limit(&mut self, channel: u8, limit: f64) -> Result<(), InstrumentError>;
    fn measured_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError>;
    fn measured_current(&mut self, channel: u8) -> Result<f64, InstrumentError>;
    fn measured_power(&mut self, channel: u8) -> Result<f64, InstrumentError>;
    /// Raise current and voltage limits of every channel to their maximum
    fn reset_limits(&mut self) -> Result<(), InstrumentError>;
}

/// Block-mode oscilloscope.
pub trait Oscilloscope {
    /// Configure a channel; returns the range actually selected.
    fn set_channel_configuration(
        &mut self,
        channel: ScopeChannel,
        configuration: ChannelConfiguration,
    ) -> Result<f64, InstrumentError>;
    fn set_rising_trigger(&mut self, channel: ScopeChannel, threshold: f64, timeout_ms: u32) -> Result<(), InstrumentError>;
    fn arm_trigger(&mut self, channel: ScopeChannel) -> Result<(), InstrumentError>;
    fn disarm_trigger(&mut self, channel: ScopeChannel) -> Result<(), InstrumentError>;
    fn set_number_samples(&mut self, number_samples: usize) -> Result<(), InstrumentError>;
    /// Request a sampling interval; returns the interval actually used.
    fn set_sampling_time(&mut self, sampling_time: f64) -> Result<f64, InstrumentError>;
    /// Units per volt at the scope input (V/V for voltage, A/V for current)
    fn set_probe_scale(&mut self, channel: ScopeChannel, scale: f64) -> Result<(), InstrumentError>;
    fn run_acquisition_block(&mut self) -> Result<(), InstrumentError>;
    /// Read the last block in physical units.
    fn read_data(&mut self) -> Result<CaptureTrace, InstrumentError>;
}

/// Pulse sequencer switching the bridge.
pub trait PulseBoard {
    fn reset(&mut self) -> Result<(), InstrumentError>;
    fn clear_pulses(&mut self) -> Result<(), InstrumentError>;
    /// Append one pulse of `period` seconds; pulses alternate polarity.
    fn add_pulse(&mut self, period: f64) -> Result<(), InstrumentError>;
    fn read_pulses(&mut self) -> Result<Vec<f64>, InstrumentError>;
    fn run_pulses(&mut self, repetitions: u32) -> Result<(), InstrumentError>;
    fn identification(&mut self) -> Result<String, InstrumentError>;
    fn version(&mut self) -> Result<String, InstrumentError>;
    fn minimum_period(&mut self) -> Result<f64, InstrumentError>;
    fn maximum_period(&mut self) -> Result<f64, InstrumentError>;
}

impl<T: PowerSupply + ?Sized> PowerSupply for Box<T> {
    fn enable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        (**self).enable_output(channel)
    }
    fn disable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        (**self).disable_output(channel)
    }
    fn set_source_voltage(&mut self, channel: u8, voltage: f64) -> Result<(), InstrumentError> {
        (**self).set_source_voltage(channel, voltage)
    }
    fn source_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        (**self).source_voltage(channel)
    }
    fn set_current_limit(&mut self, channel: u8, limit: f64) -> Result<(), InstrumentError> {
        (**self).set_current_limit(channel, limit)
    }
    fn set_voltage_limit(&mut self, channel: u8, limit: f64) -> Result<(), InstrumentError> {
        (**self).set_voltage_limit(channel, limit)
    }
    fn measured_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        (**self).measured_voltage(channel)
    }
    fn measured_current(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        (**self).measured_current(channel)
    }
    fn measured_power(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        (**self).measured_power(channel)
    }
    fn reset_limits(&mut self) -> Result<(), InstrumentError> {
        (**self).reset_limits()
    }
}

impl<T: Oscilloscope + ?Sized> Oscilloscope for Box<T> {
    fn set_channel_configuration(
        &mut self,
        channel: ScopeChannel,
        configuration: ChannelConfiguration,
    ) -> Result<f64, InstrumentError> {
        (**self).set_channel_configuration(channel, configuration)
    }
    fn set_rising_trigger(&mut self, channel: ScopeChannel, threshold: f64, timeout_ms: u32) -> Result<(), InstrumentError> {
        (**self).set_rising_trigger(channel, threshold, timeout_ms)
    }
    fn arm_trigger(&mut self, channel: ScopeChannel) -> Result<(), InstrumentError> {
        (**self).arm_trigger(channel)
    }
    fn disarm_trigger(&mut self, channel: ScopeChannel) -> Result<(), InstrumentError> {
        (**self).disarm_trigger(channel)
    }
    fn set_number_samples(&mut self, number_samples: usize) -> Result<(), InstrumentError> {
        (**self).set_number_samples(number_samples)
    }
    fn set_sampling_time(&mut self, sampling_time: f64) -> Result<f64, InstrumentError> {
        (**self).set_sampling_time(sampling_time)
    }
    fn set_probe_scale(&mut self, channel: ScopeChannel, scale: f64) -> Result<(), InstrumentError> {
        (**self).set_probe_scale(channel, scale)
    }
    fn run_acquisition_block(&mut self) -> Result<(), InstrumentError> {
        (**self).run_acquisition_block()
    }
    fn read_data(&mut self) -> Result<CaptureTrace, InstrumentError> {
        (**self).read_data()
    }
}

impl<T: PulseBoard + ?Sized> PulseBoard for Box<T> {
    fn reset(&mut self) -> Result<(), InstrumentError> {
        (**self).reset()
    }
    fn clear_pulses(&mut self) -> Result<(), InstrumentError> {
        (**self).clear_pulses()
    }
    fn add_pulse(&mut self, period: f64) -> Result<(), InstrumentError> {
        (**self).add_pulse(period)
    }
    fn read_pulses(&mut self) -> Result<Vec<f64>, InstrumentError> {
        (**self).read_pulses()
    }
    fn run_pulses(&mut self, repetitions: u32) -> Result<(), InstrumentError> {
        (**self).run_pulses(repetitions)
    }
    fn identification(&mut self) -> Result<String, InstrumentError> {
        (**self).identification()
    }
    fn version(&mut self) -> Result<String, InstrumentError> {
        (**self).version()
    }
    fn minimum_period(&mut self) -> Result<f64, InstrumentError> {
        (**self).minimum_period()
    }
    fn maximum_period(&mut self) -> Result<f64, InstrumentError> {
        (**self).maximum_period()
    }
}
