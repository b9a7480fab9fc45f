use std::io::{Read, Write};
use std::time::Duration;

use log::info;

use super::scpi::{open_serial, ScpiPort};
use super::{InstrumentError, PowerSupply};

const CHANNELS: u8 = 3;
const BAUD_RATE: u32 = 9600;

/// B&K Precision 9129B triple-output supply over SCPI.
///
/// The supply programs all three channels at once (`APP:VOLT a,b,c`), so the
/// driver keeps the last programmed voltages and rewrites them together.
pub struct Bk9129b<T> {
    port: ScpiPort<T>,
    voltages: [f64; CHANNELS as usize],
}

impl Bk9129b<Box<dyn serialport::SerialPort>> {
    /// Open the supply on a serial port.
    pub fn open(path: &str, timeout: Duration) -> Result<Self, InstrumentError> {
        Self::new(open_serial(path, BAUD_RATE, timeout)?)
    }
}

impl<T: Read + Write> Bk9129b<T> {
    /// Enter remote mode, run the self test and read back the programmed
    /// voltages.
    pub fn new(mut port: ScpiPort<T>) -> Result<Self, InstrumentError> {
        port.write("SYST:REM")?;
        port.write("*WAI")?;
        let test = port.query("*TST?")?;
        if test != "0" {
            return Err(InstrumentError::SelfTestFailed(test));
        }

        let programmed = port.query_list("APP:VOLT?")?;
        let mut voltages = [0.0; CHANNELS as usize];
        if programmed.len() == voltages.len() {
            voltages.copy_from_slice(&programmed);
        }
        info!("BK9129B ready, programmed voltages {:?}", voltages);
        Ok(Self { port, voltages })
    }

    fn check_channel(channel: u8) -> Result<usize, InstrumentError> {
        if (1..=CHANNELS).contains(&channel) {
            Ok((channel - 1) as usize)
        } else {
            Err(InstrumentError::InvalidChannel(channel))
        }
    }

    fn select(&mut self, channel: u8) -> Result<(), InstrumentError> {
        Self::check_channel(channel)?;
        self.port.write(&format!("INST:NSEL {}", channel))?;
        self.port.write("*WAI")
    }

    fn set_output_state(&mut self, channel: u8, on: bool) -> Result<(), InstrumentError> {
        let state = if on { "1" } else { "0" };
        self.select(channel)?;
        self.port.write(&format!("CHAN:OUTP:STAT {}", state))?;
        self.port.write("*WAI")?;
        self.port.expect("CHAN:OUTP:STAT?", state)
    }

    fn set_selected(&mut self, channel: u8, command: String) -> Result<(), InstrumentError> {
        self.select(channel)?;
        self.port.write(&command)?;
        self.port.write("*WAI")?;
        self.port.expect("*OPC?", "1")
    }

    fn query_selected(&mut self, channel: u8, command: &str) -> Result<f64, InstrumentError> {
        self.select(channel)?;
        self.port.query_f64(command)
    }
}

impl<T: Read + Write> PowerSupply for Bk9129b<T> {
    fn enable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        self.set_output_state(channel, true)
    }

    fn disable_output(&mut self, channel: u8) -> Result<(), InstrumentError> {
        self.set_output_state(channel, false)
    }

    fn set_source_voltage(&mut self, channel: u8, voltage: f64) -> Result<(), InstrumentError> {
        let index = Self::check_channel(channel)?;
        self.voltages[index] = voltage;
        let [a, b, c] = self.voltages;
        self.port.write(&format!("APP:VOLT {},{},{}", a, b, c))?;
        self.port.write("*WAI")?;
        self.port.expect("*OPC?", "1")
    }

    fn source_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        let index = Self::check_channel(channel)?;
        let voltages = self.port.query_list("APP:VOLT?")?;
        voltages
            .get(index)
            .copied()
            .ok_or_else(|| InstrumentError::UnexpectedResponse {
                command: "APP:VOLT?".to_string(),
                response: format!("{:?}", voltages),
            })
    }

    fn set_current_limit(&mut self, channel: u8, limit: f64) -> Result<(), InstrumentError> {
        self.set_selected(channel, format!("CURR {}", limit))
    }

    fn set_voltage_limit(&mut self, channel: u8, limit: f64) -> Result<(), InstrumentError> {
        self.set_selected(channel, format!("VOLT:LIMIT {}", limit))
    }

    fn measured_voltage(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        self.query_selected(channel, "MEAS:VOLT?")
    }

    fn measured_current(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        self.query_selected(channel, "MEAS:CURR?")
    }

    fn measured_power(&mut self, channel: u8) -> Result<f64, InstrumentError> {
        self.query_selected(channel, "MEAS:POW?")
    }

    fn reset_limits(&mut self) -> Result<(), InstrumentError> {
        for channel in 1..=CHANNELS {
            let max_current = self.query_selected(channel, "CURR? MAX")?;
            self.set_current_limit(channel, max_current)?;
            let max_voltage = self.query_selected(channel, "VOLT:LIMIT? MAX")?;
            self.set_voltage_limit(channel, max_voltage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::scpi::loopback::Loopback;

    fn supply(replies: &[&str]) -> Bk9129b<Loopback> {
        let mut all = vec!["0", "1.0,2.0,0.0"];
        all.extend_from_slice(replies);
        Bk9129b::new(ScpiPort::new(Loopback::new(&all))).unwrap()
    }

    fn commands(supply: Bk9129b<Loopback>) -> Vec<String> {
        supply.port.into_inner().commands()
    }

    #[test]
    fn test_connect_sequence() {
        let supply = supply(&[]);
        assert_eq!(supply.voltages, [1.0, 2.0, 0.0]);
        assert_eq!(commands(supply), vec!["SYST:REM", "*WAI", "*TST?", "APP:VOLT?"]);
    }

    #[test]
    fn test_failed_self_test() {
        let port = ScpiPort::new(Loopback::new(&["1"]));
        assert!(matches!(Bk9129b::new(port), Err(InstrumentError::SelfTestFailed(_))));
    }

    #[test]
    fn test_set_voltage_rewrites_all_channels() {
        let mut supply = supply(&["1"]);
        supply.set_source_voltage(2, 4.5).unwrap();
        let sent = commands(supply);
        assert_eq!(&sent[4..], &["APP:VOLT 1,4.5,0", "*WAI", "*OPC?"]);
    }

    #[test]
    fn test_enable_output_checks_state() {
        let mut supply = supply(&["1", "0"]);
        supply.enable_output(1).unwrap();
        let err = supply.enable_output(2).unwrap_err();
        assert!(matches!(err, InstrumentError::UnexpectedResponse { .. }));

        let sent = commands(supply);
        assert_eq!(&sent[4..8], &["INST:NSEL 1", "*WAI", "CHAN:OUTP:STAT 1", "*WAI"]);
    }

    #[test]
    fn test_measurements_and_readback() {
        let mut supply = supply(&["5.01", "0.25", "1.0,6.4,0.0"]);
        assert_eq!(supply.measured_voltage(1).unwrap(), 5.01);
        assert_eq!(supply.measured_current(1).unwrap(), 0.25);
        assert_eq!(supply.source_voltage(2).unwrap(), 6.4);
    }

    #[test]
    fn test_invalid_channel() {
        let mut supply = supply(&[]);
        assert!(matches!(supply.enable_output(4), Err(InstrumentError::InvalidChannel(4))));
    }
}
