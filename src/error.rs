///
/// error.rs
///
/// Error types for frame construction, hex composition and device commands.
///
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),
}

/// Reasons an edit-mode buffer cannot become a frame. The display text is what the
/// operator sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("Invalid message format (too much data).")]
    TooManySegments,
    #[error("ID outside of range.")]
    IdOutOfRange,
    #[error("Odd number of hexadecimal digits.")]
    OddDigitCount,
    #[error("Invalid hexadecimal digit.")]
    InvalidHexDigit,
    #[error("Too much data.")]
    PayloadTooLong,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device command failed: {0}")]
    CommandFailed(String),

    #[error("Error setting up device: {0}")]
    SetupFailed(String),

    #[error("Not a SLCAN device ({0}).")]
    NotSlcanDevice(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("No reply from device within {0} ms")]
    Timeout(u64),

    #[error("Device is not connected")]
    Disconnected,
}

impl DeviceError {
    /// Process exit code when this error ends the program during setup.
    pub fn exit_code(&self) -> u8 {
        match self {
            DeviceError::NotSlcanDevice(_) => 1,
            _ => 113,
        }
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
