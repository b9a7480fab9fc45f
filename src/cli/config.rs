//! TOML measurement settings.
//!
//! Every table is optional and every field inside a table falls back to
//! its default; command-line flags override both:
//!
//! ```toml
//! # tpt.toml
//! [sweep]
//! core = "RM10"
//! material = "N87"
//! turns = 26
//! voltage = 2.0
//! train = "padded"
//!
//! [dc_bias]
//! dc_currents = [0.0, 0.05, 0.1]
//!
//! [core_loss]
//! voltage = 5.0
//! frequencies = [50e3, 100e3, 200e3]
//! max_iterations = 6
//!
//! [demag]
//! max_voltage = 8.0
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use tpt::measurement::{
    CoreLossSessionSettings, DcBiasSweepSettings, DemagnetizationSettings, SweepSettings, DEFAULT_T_POSITIVE_RATIO,
};

/// Root of a `tpt.toml` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sweep: SweepSettings,
    pub dc_bias: DcBiasSweepSettings,
    pub core_loss: CoreLossConfig,
    pub demag: DemagnetizationSettings,
}

/// `[core_loss]`: session settings plus the operating points.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreLossConfig {
    /// Rail voltage in V
    pub voltage: f64,
    /// Frequencies in Hz
    pub frequencies: Vec<f64>,
    pub t_positive_ratio: f64,
    pub optimize_timing: bool,
    /// Timing candidates tried by the search
    pub timing_steps: usize,
    /// Peak-to-peak flux density target in T
    pub flux_density: Option<f64>,
    /// Negative rail in V; with a flux target the phases are timed for
    /// volt-second balance instead of balancing the rails
    pub negative_voltage: Option<f64>,
    /// DC bias flux density in T (flux targets only)
    pub dc_bias_flux_density: f64,
    pub core: String,
    pub material: String,
    pub turns: u32,
    pub air_gap: f64,
    #[serde(flatten)]
    pub session: CoreLossSessionSettings,
}

impl Default for CoreLossConfig {
    fn default() -> Self {
        Self {
            voltage: 5.0,
            frequencies: vec![20e3, 50e3, 100e3, 200e3],
            t_positive_ratio: DEFAULT_T_POSITIVE_RATIO,
            optimize_timing: false,
            timing_steps: 9,
            flux_density: None,
            negative_voltage: None,
            dc_bias_flux_density: 0.0,
            core: "RM10".to_string(),
            material: "N87".to_string(),
            turns: 26,
            air_gap: 0.0,
            session: CoreLossSessionSettings::default(),
        }
    }
}

impl Config {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_str(&content)
    }

    /// Parse settings from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpt::pulse::PulseMode;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [sweep]
            core = "RM8"
            turns = 20
            voltage = 2.5
            train = "padded"

            [dc_bias]
            dc_currents = [0.0, 0.05]

            [core_loss]
            voltage = 4.0
            frequencies = [50e3, 100e3]
            max_iterations = 3

            [demag]
            max_voltage = 8.0
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.sweep.core, "RM8");
        assert_eq!(config.sweep.turns, 20);
        assert_eq!(config.sweep.train, PulseMode::Padded);
        assert_eq!(config.sweep.material, "N87");
        assert_eq!(config.dc_bias.dc_currents, vec![0.0, 0.05]);
        assert_eq!(config.core_loss.voltage, 4.0);
        assert_eq!(config.core_loss.frequencies, vec![50e3, 100e3]);
        assert_eq!(config.core_loss.session.max_iterations, 3);
        assert_eq!(config.demag.max_voltage, 8.0);
        assert_eq!(config.demag.num_steps, 10);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_str("[demag]\nnum_steps = 4\n").unwrap();
        assert_eq!(config.demag.num_steps, 4);
        assert_eq!(config.sweep.frequency_steps, SweepSettings::default().frequency_steps);
    }

    #[test]
    fn test_empty_config() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.core_loss.t_positive_ratio, DEFAULT_T_POSITIVE_RATIO);
        assert!(config.core_loss.flux_density.is_none());
        assert!(config.core_loss.negative_voltage.is_none());
    }

    #[test]
    fn test_half_bridge_core_loss_config() {
        let toml = r#"
            [core_loss]
            voltage = 10.0
            negative_voltage = 5.0
            flux_density = 0.2
            frequencies = [13.3e3]
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.core_loss.negative_voltage, Some(5.0));
        assert_eq!(config.core_loss.flux_density, Some(0.2));
        assert_eq!(config.core_loss.session.max_iterations, CoreLossSessionSettings::default().max_iterations);
    }

    #[test]
    fn test_bad_config() {
        assert!(Config::from_str("[sweep]\nturns = \"many\"\n").is_err());
    }
}
