//! # Magnetic Core Data
//!
//! Geometry and material tables for the cores the bench is routinely used
//! with, plus the closed-form relations that turn a magnetic target
//! (flux density swing, DC bias) into electrical quantities.
//!
//! ## Example
//!
//! ```rust
//! use tpt::magnetics::{CoreGeometry, Material, theoretical_inductance};
//!
//! let core = CoreGeometry::lookup("RM10")?;
//! let material = Material::lookup("N87")?;
//! let inductance = theoretical_inductance(&core, &material, 26, 0.0);
//! assert!(inductance > 1e-3);
//! # Ok::<(), tpt::config::ConfigError>(())
//! ```

mod timing;

pub use timing::{CoreLossTiming, CoreLossTimingRequest};

use crate::config::ConfigError;

/// Vacuum permeability in H/m.
pub const MU_0: f64 = 4.0 * std::f64::consts::PI * 1e-7;

/// Effective geometry of a core set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreGeometry {
    /// Core designation (e.g. "RM10")
    pub name: &'static str,
    /// Effective magnetic area Ae in m²
    pub effective_area: f64,
    /// Effective magnetic path length le in m
    pub effective_length: f64,
    /// Effective volume Ve in m³
    pub effective_volume: f64,
}

const CORES: &[CoreGeometry] = &[
    CoreGeometry {
        name: "RM10",
        effective_area: 96.6e-6,
        effective_length: 44.6e-3,
        effective_volume: 4310e-9,
    },
    CoreGeometry {
        name: "RM8",
        effective_area: 64.0e-6,
        effective_length: 38.0e-3,
        effective_volume: 2430e-9,
    },
    CoreGeometry {
        name: "RM12",
        effective_area: 146e-6,
        effective_length: 52.0e-3,
        effective_volume: 7590e-9,
    },
];

impl CoreGeometry {
    /// Look up a core by designation (case-insensitive).
    pub fn lookup(name: &str) -> Result<Self, ConfigError> {
        CORES
            .iter()
            .find(|core| core.name.eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| ConfigError::UnknownCore {
                name: name.to_string(),
                available: Self::names().join(", "),
            })
    }

    /// Designations of every known core.
    pub fn names() -> Vec<&'static str> {
        CORES.iter().map(|core| core.name).collect()
    }
}

/// Ferrite material properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Material grade (e.g. "N87")
    pub name: &'static str,
    /// Initial relative permeability μi
    pub initial_permeability: f64,
    /// Saturation flux density in T (at 100 °C)
    pub saturation_flux_density: f64,
}

const MATERIALS: &[Material] = &[
    Material {
        name: "N87",
        initial_permeability: 2200.0,
        saturation_flux_density: 0.39,
    },
    Material {
        name: "N97",
        initial_permeability: 2300.0,
        saturation_flux_density: 0.41,
    },
    Material {
        name: "N49",
        initial_permeability: 1500.0,
        saturation_flux_density: 0.49,
    },
];

impl Material {
    /// Look up a material by grade (case-insensitive).
    pub fn lookup(name: &str) -> Result<Self, ConfigError> {
        MATERIALS
            .iter()
            .find(|material| material.name.eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| ConfigError::UnknownMaterial {
                name: name.to_string(),
                available: Self::names().join(", "),
            })
    }

    /// Grades of every known material.
    pub fn names() -> Vec<&'static str> {
        MATERIALS.iter().map(|material| material.name).collect()
    }
}

/// Inductance from core geometry, series reluctance model.
///
/// Ungapped: `L = μ0·μr·N²·Ae/le`. With an air gap `g` (m) the gap
/// reluctance `g/(μ0·Ae)` is added to the core reluctance `le/(μ0·μr·Ae)`.
pub fn theoretical_inductance(core: &CoreGeometry, material: &Material, turns: u32, air_gap: f64) -> f64 {
    let n = f64::from(turns);
    let ae = core.effective_area;
    let le = core.effective_length;
    let mu_r = material.initial_permeability;

    if air_gap <= 0.0 {
        MU_0 * mu_r * n * n * ae / le
    } else {
        let reluctance_gap = air_gap / (MU_0 * ae);
        let reluctance_core = le / (MU_0 * mu_r * ae);
        n * n / (reluctance_gap + reluctance_core)
    }
}

/// Peak flux density reached for a given inductance and current.
///
/// `B = L·I / (N·Ae)`
pub fn flux_density(inductance: f64, current: f64, turns: u32, effective_area: f64) -> f64 {
    inductance * current / (f64::from(turns) * effective_area)
}

/// Reference core-loss density for N87-class ferrite, in mW/cm³.
///
/// Steinmetz form anchored at 100 mW/cm³ for 100 kHz and 100 mT peak.
pub fn steinmetz_reference_loss(frequency: f64, peak_flux_density: f64) -> f64 {
    let f_khz = frequency / 1000.0;
    let b_mt = peak_flux_density * 1000.0;
    100.0 * (f_khz / 100.0).powf(1.5) * (b_mt / 100.0).powf(2.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_core() {
        let core = CoreGeometry::lookup("rm10").unwrap();
        assert_eq!(core.name, "RM10");
        assert!((core.effective_area - 96.6e-6).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_core_is_config_error() {
        let err = CoreGeometry::lookup("ETD59").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCore { .. }));
        assert!(err.to_string().contains("RM8"));
    }

    #[test]
    fn test_unknown_material_is_config_error() {
        let err = Material::lookup("3C90").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMaterial { .. }));
    }

    #[test]
    fn test_ungapped_inductance() {
        let core = CoreGeometry::lookup("RM10").unwrap();
        let material = Material::lookup("N87").unwrap();
        let l = theoretical_inductance(&core, &material, 26, 0.0);
        let expected = MU_0 * 2200.0 * 26.0 * 26.0 * 96.6e-6 / 44.6e-3;
        assert!((l - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_gap_reduces_inductance() {
        let core = CoreGeometry::lookup("RM8").unwrap();
        let material = Material::lookup("N97").unwrap();
        let ungapped = theoretical_inductance(&core, &material, 20, 0.0);
        let gapped = theoretical_inductance(&core, &material, 20, 0.2e-3);
        assert!(gapped < ungapped / 5.0);
    }

    #[test]
    fn test_steinmetz_anchor() {
        assert!((steinmetz_reference_loss(100e3, 0.1) - 100.0).abs() < 1e-9);
    }
}
