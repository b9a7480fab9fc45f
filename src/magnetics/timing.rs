use log::{info, warn};

use super::{CoreGeometry, Material, MU_0};
use crate::config::ConfigError;

/// Magnetic target for an asymmetric core-loss excitation.
#[derive(Debug, Clone)]
pub struct CoreLossTimingRequest {
    /// Core designation from the geometry table
    pub core: String,
    /// Material grade from the material table
    pub material: String,
    /// Winding turns
    pub turns: u32,
    /// Air gap in m (0 for ungapped)
    pub air_gap: f64,
    /// Requested switching frequency in Hz
    pub frequency: f64,
    /// Peak-to-peak AC flux density in T
    pub flux_density_pp: f64,
    /// DC bias flux density in T
    pub dc_bias_flux_density: f64,
    /// Voltage across the winding during the positive phase
    pub positive_voltage: f64,
    /// Voltage across the winding during the negative phase (sign ignored)
    pub negative_voltage: f64,
}

impl Default for CoreLossTimingRequest {
    fn default() -> Self {
        Self {
            core: "RM10".to_string(),
            material: "N87".to_string(),
            turns: 26,
            air_gap: 0.0,
            frequency: 100e3,
            flux_density_pp: 0.1,
            dc_bias_flux_density: 0.0,
            positive_voltage: 6.4,
            negative_voltage: 0.7,
        }
    }
}

/// Electrical timing derived from a [`CoreLossTimingRequest`].
///
/// Volt-second balance is reached through timing alone:
/// `V+·t+ = |V-|·t- = N·Ae·Bpp/2`.
#[derive(Debug, Clone)]
pub struct CoreLossTiming {
    /// Core geometry used for the derivation
    pub core: CoreGeometry,
    /// Material used for the derivation
    pub material: Material,
    /// Small-signal inductance in H
    pub inductance: f64,
    /// Volt-seconds applied in each half of the cycle
    pub volt_seconds: f64,
    /// Positive phase duration in s
    pub t_positive: f64,
    /// Negative phase duration in s
    pub t_negative: f64,
    /// Frequency realised by `t+ + t-`
    pub actual_frequency: f64,
    /// Peak flux density including DC bias, in T
    pub peak_flux_density: f64,
    /// Expected peak magnetising current in A
    pub peak_current: f64,
}

impl CoreLossTiming {
    /// Derive the timing for a magnetic target.
    pub fn from_request(request: &CoreLossTimingRequest) -> Result<Self, ConfigError> {
        let core = CoreGeometry::lookup(&request.core)?;
        let material = Material::lookup(&request.material)?;

        if request.positive_voltage <= 0.0 || request.negative_voltage == 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "core-loss phase voltages must be non-zero (V+ = {}, V- = {})",
                request.positive_voltage, request.negative_voltage
            )));
        }
        if request.turns == 0 || request.flux_density_pp <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "core-loss target needs turns > 0 and a positive flux swing".to_string(),
            ));
        }

        let n = f64::from(request.turns);
        let ae = core.effective_area;
        let le = core.effective_length;
        let mu_r = material.initial_permeability;

        let inductance = if request.air_gap <= 0.0 {
            MU_0 * mu_r * n * n * ae / le
        } else {
            let mu_eff = le / (le / mu_r + request.air_gap);
            MU_0 * mu_eff * n * n * ae / le
        };

        let volt_seconds = n * ae * (request.flux_density_pp / 2.0);
        let t_positive = volt_seconds / request.positive_voltage;
        let t_negative = volt_seconds / request.negative_voltage.abs();
        let actual_frequency = 1.0 / (t_positive + t_negative);

        let peak_flux_density = request.flux_density_pp / 2.0 + request.dc_bias_flux_density;
        let peak_current = if request.air_gap <= 0.0 {
            peak_flux_density * le / (MU_0 * mu_r * n)
        } else {
            n * ae * peak_flux_density / inductance
        };

        info!(
            "Core-loss timing for {} {}: L = {:.3} mH, t+ = {:.3} us, t- = {:.3} us, f = {:.1} kHz",
            core.name,
            material.name,
            inductance * 1e3,
            t_positive * 1e6,
            t_negative * 1e6,
            actual_frequency / 1e3
        );

        if peak_flux_density > 0.8 * material.saturation_flux_density {
            warn!(
                "Peak flux density {:.0} mT is above 80% of Bsat ({:.0} mT)",
                peak_flux_density * 1e3,
                material.saturation_flux_density * 1e3
            );
        }
        if request.frequency > 0.0
            && (actual_frequency - request.frequency).abs() / request.frequency > 0.1
        {
            warn!(
                "Realised frequency {:.1} kHz differs from requested {:.1} kHz",
                actual_frequency / 1e3,
                request.frequency / 1e3
            );
        }

        Ok(Self {
            core,
            material,
            inductance,
            volt_seconds,
            t_positive,
            t_negative,
            actual_frequency,
            peak_flux_density,
            peak_current,
        })
    }

    /// Volumetric loss in W/m³ for a measured power.
    pub fn volumetric_loss(&self, power: f64) -> f64 {
        power / self.core.effective_volume
    }
}
