//! Error types for the printer bridge

use serde::Serialize;
use thiserror::Error;

/// Printer error types
#[derive(Debug, Error)]
pub enum PrintError {
    /// Another job is already in flight
    #[error("Another print operation is already in progress.")]
    Busy,

    /// No transport handle could be bound for the printer
    #[error("Printer unavailable: {0}")]
    PrinterUnavailable(String),

    /// Link-level failure reported by the transport (retriable by default)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Fault reported by the printer itself
    #[error("Printer error: {0}")]
    Printer(String),

    /// No completion signal before the deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Payload could not be turned into printer commands
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Missing or malformed request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The job was cancelled by its caller
    #[error("Print operation was cancelled.")]
    Cancelled,

    /// Discovery or pairing failure
    #[error("Bluetooth error: {0}")]
    Discovery(String),

    /// IO error talking to the device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structured error classification handed to the host bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Busy,
    PrinterUnavailable,
    ConnectionFailed,
    PrinterError,
    Timeout,
    EncodingError,
    InvalidRequest,
    Cancelled,
    Discovery,
    Io,
}

impl PrintError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrintError::Busy => ErrorKind::Busy,
            PrintError::PrinterUnavailable(_) => ErrorKind::PrinterUnavailable,
            PrintError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            PrintError::Printer(_) => ErrorKind::PrinterError,
            PrintError::Timeout(_) => ErrorKind::Timeout,
            PrintError::Encoding(_) => ErrorKind::EncodingError,
            PrintError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PrintError::Cancelled => ErrorKind::Cancelled,
            PrintError::Discovery(_) => ErrorKind::Discovery,
            PrintError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Error payload as it crosses the host boundary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PrintError> for ErrorReport {
    fn from(err: &PrintError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, PrintError>;
