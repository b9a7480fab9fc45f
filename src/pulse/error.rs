use crate::config::ConfigError;

/// Errors raised while building a pulse train
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A pulse duration that is zero, negative or not finite
    #[error("Pulse {index} has a non-positive duration: {value} s")]
    NonPositiveDuration { index: usize, value: f64 },

    /// A train without any pulse
    #[error("Pulse train is empty")]
    EmptyTrain,

    /// Balanced trains need an even number of half-periods
    #[error("Balanced pulse train needs an even number of half-periods, got {0}")]
    OddBalancedCount(usize),

    /// Frequency, voltage or count outside its valid domain
    #[error("Invalid planner input: {0}")]
    InvalidInput(String),

    /// Core or material lookup failed
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}
