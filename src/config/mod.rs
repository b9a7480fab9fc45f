//! # Hardware Configuration
//!
//! The bench is described by a small JSON document naming the three
//! instruments, their serial ports and the probe scales:
//!
//! ```json
//! {
//!     "power_supply": "BK9129B",
//!     "oscilloscope": "PicoScope2408B",
//!     "board": "NUCLEO-H503RB",
//!     "power_supply_port": "/dev/ttyUSB0",
//!     "oscilloscope_port": "",
//!     "board_port": "/dev/ttyACM0",
//!     "input_voltage_probe_scale": 1,
//!     "output_voltage_probe_scale": 1,
//!     "current_probe_scale": 0.1
//! }
//! ```
//!
//! Model names are a closed set resolved once by [`HardwareConfig::connect`].
//! `"Simulated"` for all three selects the [`VirtualBench`].

mod error;

pub use error::ConfigError;

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::instruments::{
    Bk9129b, InductorModel, NucleoBoard, Oscilloscope, PowerSupply, PulseBoard, VirtualBench,
};

/// Trigger timeout used when the configuration does not set one
pub const DEFAULT_TIMEOUT_MS: u32 = 5_000;

const POWER_SUPPLY_TIMEOUT: Duration = Duration::from_secs(10);
const BOARD_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSupplyModel {
    #[serde(rename = "BK9129B")]
    Bk9129b,
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OscilloscopeModel {
    #[serde(rename = "PicoScope2408B")]
    PicoScope2408b,
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardModel {
    #[serde(rename = "NUCLEO-H503RB")]
    NucleoH503rb,
    Simulated,
}

/// Physical units per scope volt on each channel (V/V, V/V, A/V).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeScales {
    pub input_voltage: f64,
    pub output_voltage: f64,
    pub current: f64,
}

impl Default for ProbeScales {
    fn default() -> Self {
        Self {
            input_voltage: 1.0,
            output_voltage: 1.0,
            current: 1.0,
        }
    }
}

impl ProbeScales {
    /// Reject zero, negative or non-finite scales.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (channel, value) in [
            ("input_voltage", self.input_voltage),
            ("output_voltage", self.output_voltage),
            ("current", self.current),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidProbeScale { channel, value });
            }
        }
        Ok(())
    }
}

fn default_scale() -> f64 {
    1.0
}

/// Instrument selection and wiring of one bench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub power_supply: PowerSupplyModel,
    pub oscilloscope: OscilloscopeModel,
    pub board: BoardModel,
    #[serde(default)]
    pub power_supply_port: String,
    #[serde(default)]
    pub oscilloscope_port: String,
    #[serde(default)]
    pub board_port: String,
    #[serde(default = "default_scale")]
    pub input_voltage_probe_scale: f64,
    #[serde(default = "default_scale")]
    pub output_voltage_probe_scale: f64,
    #[serde(default = "default_scale")]
    pub current_probe_scale: f64,
    /// Trigger timeout in ms
    #[serde(default)]
    pub timeout_ms: Option<u32>,
    /// Reject scope ranges that need rounding up
    #[serde(default)]
    pub strict_ranges: bool,
}

/// Connected instruments, ready for a measurement session.
pub struct Bench {
    pub power_supply: Box<dyn PowerSupply>,
    pub oscilloscope: Box<dyn Oscilloscope>,
    pub board: Box<dyn PulseBoard>,
    pub probe_scales: ProbeScales,
    pub timeout_ms: u32,
    /// Handle on the simulation when the bench is virtual
    pub virtual_bench: Option<VirtualBench>,
}

impl HardwareConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents)?;
        config.probe_scales().validate()?;
        Ok(config)
    }

    /// Fully simulated bench with unit probe scales.
    pub fn simulated() -> Self {
        Self {
            power_supply: PowerSupplyModel::Simulated,
            oscilloscope: OscilloscopeModel::Simulated,
            board: BoardModel::Simulated,
            power_supply_port: String::new(),
            oscilloscope_port: String::new(),
            board_port: String::new(),
            input_voltage_probe_scale: 1.0,
            output_voltage_probe_scale: 1.0,
            current_probe_scale: 1.0,
            timeout_ms: None,
            strict_ranges: false,
        }
    }

    pub fn probe_scales(&self) -> ProbeScales {
        ProbeScales {
            input_voltage: self.input_voltage_probe_scale,
            output_voltage: self.output_voltage_probe_scale,
            current: self.current_probe_scale,
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn is_simulated(&self) -> bool {
        self.power_supply == PowerSupplyModel::Simulated
            && self.oscilloscope == OscilloscopeModel::Simulated
            && self.board == BoardModel::Simulated
    }

    /// Open every instrument named by the configuration.
    pub fn connect(&self) -> Result<Bench, ConfigError> {
        self.connect_with_model(InductorModel::default(), 0)
    }

    /// Like [`connect`](Self::connect), choosing the simulated winding and
    /// noise seed when the bench is virtual.
    pub fn connect_with_model(&self, model: InductorModel, seed: u64) -> Result<Bench, ConfigError> {
        let probe_scales = self.probe_scales();
        probe_scales.validate()?;

        let any_simulated = self.power_supply == PowerSupplyModel::Simulated
            || self.oscilloscope == OscilloscopeModel::Simulated
            || self.board == BoardModel::Simulated;
        if any_simulated && !self.is_simulated() {
            return Err(ConfigError::InconsistentModels(format!(
                "{:?}/{:?}/{:?}: simulated instruments only work together",
                self.power_supply, self.oscilloscope, self.board
            )));
        }

        if self.is_simulated() {
            info!("Connecting to the virtual bench");
            let bench = VirtualBench::new(model, seed).with_strict_ranges(self.strict_ranges);
            return Ok(Bench {
                power_supply: Box::new(bench.power_supply()),
                oscilloscope: Box::new(bench.oscilloscope()),
                board: Box::new(bench.pulse_board()),
                probe_scales,
                timeout_ms: self.timeout_ms(),
                virtual_bench: Some(bench),
            });
        }

        // The scope is driven through its vendor SDK, which implements
        // `Oscilloscope` outside this crate.
        if self.oscilloscope == OscilloscopeModel::PicoScope2408b {
            return Err(ConfigError::DriverUnavailable(
                "PicoScope2408B needs the vendor SDK binding".to_string(),
            ));
        }
        Err(ConfigError::DriverUnavailable(format!("{:?}", self.oscilloscope)))
    }

    /// Open the serial instruments and pair them with an externally driven
    /// scope.
    pub fn connect_with_oscilloscope(&self, oscilloscope: Box<dyn Oscilloscope>) -> Result<Bench, ConfigError> {
        let probe_scales = self.probe_scales();
        probe_scales.validate()?;

        let power_supply: Box<dyn PowerSupply> = match self.power_supply {
            PowerSupplyModel::Bk9129b => {
                info!("Opening BK9129B on {}", self.power_supply_port);
                Box::new(Bk9129b::open(&self.power_supply_port, POWER_SUPPLY_TIMEOUT)?)
            }
            PowerSupplyModel::Simulated => {
                return Err(ConfigError::InconsistentModels(
                    "simulated power supply with a physical scope".to_string(),
                ))
            }
        };
        let board: Box<dyn PulseBoard> = match self.board {
            BoardModel::NucleoH503rb => {
                info!("Opening NUCLEO-H503RB on {}", self.board_port);
                Box::new(NucleoBoard::open(&self.board_port, BOARD_TIMEOUT)?)
            }
            BoardModel::Simulated => {
                return Err(ConfigError::InconsistentModels(
                    "simulated pulse board with a physical scope".to_string(),
                ))
            }
        };

        Ok(Bench {
            power_supply,
            oscilloscope,
            board,
            probe_scales,
            timeout_ms: self.timeout_ms(),
            virtual_bench: None,
        })
    }
}
