use std::io;
use thiserror::Error;

/// Errors raised by the serial link and the command layer.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("invalid command {command:?}: {reason}")]
    InvalidCommand { command: String, reason: String },
    #[error("device not ready: {0}")]
    NotReady(String),
}

/// Reasons a single extracted frame is rejected by the decoder.
///
/// The decode pipeline recovers from these locally: the frame is dropped and
/// parsing resumes with the next one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("frame does not start with '#' (found {0:#04x})")]
    MissingStartMarker(u8),
    #[error("frame is {actual} bytes but its header declares {expected}")]
    Truncated { expected: usize, actual: usize },
    #[error("checkbyte is {0}, expected 1")]
    Checkbyte(u8),
}

/// Terminal failures of one acquisition call.
///
/// These never cross the controller boundary as `Err`; they are rendered into
/// the error message of an [`AcquisitionResult`](crate::AcquisitionResult).
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Invalid {option} option given: {value}")]
    InvalidOption { option: &'static str, value: i64 },
    #[error("Could not connect to port {port}")]
    Port {
        port: String,
        #[source]
        source: DriverError,
    },
    #[error("Could not connect to sensor: Could not determine sensor id: {0}")]
    Identification(String),
    #[error("Could not complete measurement cycle: {0}")]
    Measurement(#[source] DriverError),
}

pub type Result<T> = std::result::Result<T, DriverError>;
