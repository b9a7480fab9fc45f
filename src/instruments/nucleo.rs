use std::io::{Read, Write};
use std::time::Duration;

use super::scpi::{open_serial, ScpiPort};
use super::{InstrumentError, PulseBoard};

const BAUD_RATE: u32 = 115_200;

/// NUCLEO-H503RB pulse sequencer firmware over SCPI.
pub struct NucleoBoard<T> {
    port: ScpiPort<T>,
}

impl NucleoBoard<Box<dyn serialport::SerialPort>> {
    pub fn open(path: &str, timeout: Duration) -> Result<Self, InstrumentError> {
        Ok(Self::new(open_serial(path, BAUD_RATE, timeout)?))
    }
}

impl<T: Read + Write> NucleoBoard<T> {
    pub fn new(port: ScpiPort<T>) -> Self {
        Self { port }
    }
}

impl<T: Read + Write> PulseBoard for NucleoBoard<T> {
    fn reset(&mut self) -> Result<(), InstrumentError> {
        self.port.write("*RST")
    }

    fn clear_pulses(&mut self) -> Result<(), InstrumentError> {
        self.port.write("CONF:PUL:CLEAR")
    }

    // range checks are left to the caller to avoid a query per pulse
    fn add_pulse(&mut self, period: f64) -> Result<(), InstrumentError> {
        self.port.write(&format!("CONF:PUL:ADD {}", period))
    }

    fn read_pulses(&mut self) -> Result<Vec<f64>, InstrumentError> {
        self.port.query_list("CONF:PUL?")
    }

    fn run_pulses(&mut self, repetitions: u32) -> Result<(), InstrumentError> {
        self.port.write(&format!("APP:PUL:RUN {}", repetitions))
    }

    fn identification(&mut self) -> Result<String, InstrumentError> {
        self.port.query("*IDN?")
    }

    fn version(&mut self) -> Result<String, InstrumentError> {
        self.port.query("SYST:VERS?")
    }

    fn minimum_period(&mut self) -> Result<f64, InstrumentError> {
        self.port.query_f64("CONF:PUL:MIN?")
    }

    fn maximum_period(&mut self) -> Result<f64, InstrumentError> {
        self.port.query_f64("CONF:PUL:MAX?")
    }
}
