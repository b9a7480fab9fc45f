/// Errors raised while talking to an instrument
#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    /// I/O error on the underlying transport
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(#[from] serialport::Error),

    /// No reply before the transport timeout
    #[error("Timed out waiting for a reply to '{command}'")]
    ProtocolTimeout { command: String },

    /// Reply that does not parse or does not match the expected value
    #[error("Unexpected reply to '{command}': '{response}'")]
    UnexpectedResponse { command: String, response: String },

    /// Requested input range above what the channel supports (strict mode)
    #[error("Input range {requested} V not available (available: {available})")]
    Range { requested: f64, available: String },

    /// Channel index the instrument does not have
    #[error("Invalid channel: {0}")]
    InvalidChannel(u8),

    /// Power-on self test reported a failure
    #[error("Self test failed: {0}")]
    SelfTestFailed(String),

    /// Setting the instrument cannot honour
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// Data requested before a block was acquired
    #[error("No acquisition available")]
    NoData,

    /// Trace assembled from the acquired channels is inconsistent
    #[error("Capture error: {0}")]
    CaptureError(#[from] crate::capture::CaptureError),
}
