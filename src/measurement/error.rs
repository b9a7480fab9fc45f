use crate::analysis::AnalysisError;
use crate::config::ConfigError;
use crate::instruments::InstrumentError;
use crate::pulse::PlanError;

/// Errors raised while driving the bench
#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    /// Instrument I/O or protocol failure
    #[error("Instrument error: {0}")]
    InstrumentError(#[from] InstrumentError),

    /// Invalid pulse train request
    #[error("Plan error: {0}")]
    PlanError(#[from] PlanError),

    /// Core, material or hardware configuration problem
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Waveform analysis could not produce a figure
    #[error("Analysis error: {0}")]
    AnalysisError(#[from] AnalysisError),

    /// The supply reports a programmed voltage other than the one requested
    #[error("Supply channel {channel} reads back {readback} V, expected {requested} V")]
    VoltageMismatch { channel: u8, requested: f64, readback: f64 },

    /// Flux density or current ceiling exceeded
    #[error("Safety trip: {0}")]
    SafetyTrip(String),

    /// Session settings outside their valid domain
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

impl MeasurementError {
    /// Whether the error ends a whole sweep rather than a single point.
    pub fn aborts_sweep(&self) -> bool {
        matches!(
            self,
            MeasurementError::SafetyTrip(_) | MeasurementError::ConfigError(_) | MeasurementError::InvalidSetting(_)
        )
    }
}
