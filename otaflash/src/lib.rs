//! # otaflash
//!
//! Host-side engine for dual-bank firmware updates over a serial link.
//!
//! The device keeps two flash banks. The host asks which bank holds the
//! running firmware, streams the new image into the other one in small
//! checksummed packets, and commits it. If anything goes wrong mid-transfer,
//! the host aborts and the running firmware stays untouched.
//!
//! This crate provides:
//!
//! - the wire frame codec and message payloads ([`protocol`])
//! - the update state machine with retry and abort handling ([`session`])
//! - a byte-channel abstraction with a native serial backend ([`port`])
//! - an in-memory device for tests and dry runs ([`emulator`])
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use otaflash::{FirmwareImage, SerialConfig, SessionConfig, SessionOutcome, UpdateSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let serial = SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let mut session = UpdateSession::open(&serial, SessionConfig::default())?;
//!
//!         match session.run_update(image.data(), 2)? {
//!             SessionOutcome::Completed { target_address, .. } => {
//!                 println!("Installed to 0x{target_address:08X}");
//!             },
//!             SessionOutcome::Failed(e) | SessionOutcome::Aborted(e) => return Err(e.into()),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod emulator;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    emulator::DeviceEmulator,
    error::{DeviceError, Error, FramingError, ProtocolError, Result},
    image::{FirmwareImage, MAX_FIRMWARE_SIZE, test_pattern},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        BANK_A, BANK_B, Command, CommandChannel, Frame, PacketRecord, Reply, Response,
        UpdateTarget, VersionInfo,
    },
    session::{
        PacketTransfer, SessionConfig, SessionOutcome, SessionState, UpdateSession,
        select_target_bank,
    },
};
