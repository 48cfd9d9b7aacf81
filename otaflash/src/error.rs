//! Error types for otaflash.
//!
//! Errors fall into a few families that drive the retry-versus-abort
//! decisions of an update session:
//!
//! - transport failures ([`Error::Io`], [`Error::Serial`], [`Error::Timeout`])
//! - malformed bytes on the wire ([`FramingError`])
//! - responses that are not valid for the current step ([`ProtocolError`])
//! - explicit device-side failures ([`DeviceError`])
//! - exhausted retry budgets ([`Error::RetriesExhausted`])

use crate::protocol::Response;
use std::{fmt, io};
use thiserror::Error;

/// Result type for otaflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for otaflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the byte channel or a file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device did not deliver a complete frame in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed frame.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Response not valid for the current step.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error reported by the device.
    #[error("Device error: {0}")]
    Device(DeviceError),

    /// A step or packet used up its retry budget.
    #[error("{step} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Step that was being retried.
        step: String,
        /// Attempts made.
        attempts: u32,
    },

    /// Firmware image cannot be sent.
    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),

    /// The session already reached a terminal state.
    #[error("Update session already finished")]
    SessionFinished,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is a transient link failure that may be retried.
    ///
    /// Timeouts, transport errors and malformed frames qualify. Explicit
    /// rejections from the device never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::Framing(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

/// Malformed bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Fewer bytes available than the header declares.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required by the header.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Trailing checksum does not match the frame contents.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },

    /// Leading byte is not a recognized code.
    #[error("unknown code {0:#04x}")]
    UnknownCode(u8),

    /// Payload does not fit the 1-byte length field.
    #[error("payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),
}

/// The device answered with something the current step cannot accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Response is valid on the wire but not for this step.
    #[error("unexpected response to {step}: {actual:?}")]
    UnexpectedResponse {
        /// Step awaiting a response.
        step: &'static str,
        /// Response received instead.
        actual: Response,
    },

    /// The device rejected the command.
    #[error("{0} rejected by device (NACK)")]
    Nack(String),

    /// Response payload has the wrong shape.
    #[error("invalid {what} payload: expected {expected} bytes, got {actual}")]
    InvalidPayload {
        /// Payload being decoded.
        what: &'static str,
        /// Required length.
        expected: usize,
        /// Received length.
        actual: usize,
    },
}

/// Device error codes and their meaning.
pub const DEVICE_ERROR_MESSAGES: &[(u8, &str)] = &[
    (1, "Bad length"),
    (2, "Update already in progress"),
    (3, "Invalid file size"),
    (4, "Invalid target address"),
    (5, "Flash erase failed"),
];

/// Error decoded from an `Error` response.
///
/// The payload carries a 1-byte code, or nothing for a generic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError {
    code: Option<u8>,
}

impl DeviceError {
    /// Create a device error from its code.
    pub fn new(code: Option<u8>) -> Self {
        Self { code }
    }

    /// Decode from an `Error` response payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self::new(payload.first().copied())
    }

    /// The raw code, if the device sent one.
    pub fn code(&self) -> Option<u8> {
        self.code
    }

    /// Human-readable reason.
    pub fn message(&self) -> String {
        match self.code {
            Some(code) => DEVICE_ERROR_MESSAGES
                .iter()
                .find(|(c, _)| *c == code)
                .map_or_else(|| format!("Unknown error {code}"), |(_, msg)| (*msg).to_string()),
            None => "Generic device error".to_string(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}
