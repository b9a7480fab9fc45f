use crate::capture::CaptureError;

/// Errors raised while writing or reading report files
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// I/O error on the report file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// CSV encoding or decoding error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Required column absent from the header
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),

    /// Cell that does not parse as a number
    #[error("Row {row}, column {column}: cannot parse '{value}'")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },

    /// Columns that do not form a valid trace
    #[error("Invalid trace: {0}")]
    CaptureError(#[from] CaptureError),
}
