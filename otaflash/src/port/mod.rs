//! Byte-channel abstraction the protocol runs over.
//!
//! The protocol layer only needs a duplex byte stream whose reads give up
//! after a timeout. [`Port`] captures that, so the same session code drives a
//! real serial port, the in-memory [`DeviceEmulator`](crate::emulator::DeviceEmulator),
//! or a scripted test double.
//!
//! ```text
//! +------------------+
//! |  UpdateSession   |
//! +--------+---------+
//!          |
//! +--------+---------+
//! |  CommandChannel  |
//! +--------+---------+
//!          |
//! +--------+---------+     +------------------+
//! |    Port trait    +---->|    NativePort    |
//! +------------------+     |   (serialport)   |
//!                          +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default serial baud rate of the target.
pub const DEFAULT_BAUD: u32 = 115200;

/// Default per-read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial port configuration.
///
/// The link is always 8 data bits, no parity, one stop bit, no flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Duplex byte channel with timed reads.
///
/// Reads must return `ErrorKind::TimedOut` (or `Ok(0)`) once the configured
/// timeout elapses without data, never block indefinitely.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
