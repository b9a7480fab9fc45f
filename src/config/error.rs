/// Errors raised while loading configuration or resolving names against the
/// built-in tables
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading a configuration file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed hardware configuration
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Core designation not in the geometry table
    #[error("Unknown core type: {name} (available: {available})")]
    UnknownCore { name: String, available: String },

    /// Material grade not in the material table
    #[error("Unknown material: {name} (available: {available})")]
    UnknownMaterial { name: String, available: String },

    /// Probe scale must be a positive finite number
    #[error("Invalid probe scale for {channel}: {value}")]
    InvalidProbeScale { channel: &'static str, value: f64 },

    /// Instrument model that cannot be driven from this crate
    #[error("No driver available for {0}")]
    DriverUnavailable(String),

    /// Simulated and physical instruments cannot share a bench
    #[error("Inconsistent instrument set: {0}")]
    InconsistentModels(String),

    /// Instrument could not be opened
    #[error("Instrument error: {0}")]
    InstrumentError(#[from] crate::instruments::InstrumentError),

    /// A numeric setting outside its valid domain
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
