//! In-memory device that speaks the update protocol.
//!
//! [`DeviceEmulator`] implements [`Port`], so an [`UpdateSession`](crate::session::UpdateSession)
//! can drive it exactly like a serial link. Frames written to it are handled
//! synchronously and the replies become readable immediately. Faults can be
//! injected to exercise the retry and abort paths.
//!
//! ## Example
//!
//! ```rust
//! use otaflash::{DeviceEmulator, SessionConfig, UpdateSession, BANK_A};
//!
//! let mut session = UpdateSession::new(DeviceEmulator::new(), SessionConfig::default());
//! let outcome = session.run_update(&[0x5A; 40], 1).unwrap();
//! assert!(outcome.is_completed());
//!
//! let device = session.into_port();
//! assert_eq!(device.version_info().current_address, BANK_A);
//! assert_eq!(device.bank(BANK_A), &[0x5A; 40]);
//! ```

use crate::error::Result;
use crate::image::MAX_FIRMWARE_SIZE;
use crate::port::Port;
use crate::protocol::frame::{HEADER_LEN, wire_len};
use crate::protocol::{
    BANK_A, BANK_B, Command, Frame, PACKET_DATA_LEN, PacketRecord, Response, UpdateTarget,
    VersionInfo,
};
use log::{debug, trace};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::time::Duration;

/// `InitUpdate` payload has the wrong length.
pub const ERR_BAD_LENGTH: u8 = 1;
/// An update is already in progress.
pub const ERR_IN_PROGRESS: u8 = 2;
/// Image size is zero or too large.
pub const ERR_BAD_SIZE: u8 = 3;
/// Target address is not a bank.
pub const ERR_BAD_ADDRESS: u8 = 4;
/// Erasing the target bank failed.
pub const ERR_ERASE_FAILED: u8 = 5;

/// Largest command payload the device reads; longer headers are discarded.
pub const MAX_COMMAND_PAYLOAD: u8 = 250;

#[derive(Debug, Clone)]
struct UpdateState {
    target: UpdateTarget,
    bytes_received: u32,
    expected_packet: u16,
}

#[derive(Debug, Default)]
struct Faults {
    corrupt: HashMap<u16, u32>,
    reject: HashSet<u16>,
    fail_erase: bool,
    silent: bool,
}

/// Emulated dual-bank device.
#[derive(Debug)]
pub struct DeviceEmulator {
    versions: VersionInfo,
    update: Option<UpdateState>,
    banks: HashMap<u32, Vec<u8>>,
    input: Vec<u8>,
    output: VecDeque<u8>,
    received: Vec<Command>,
    faults: Faults,
    timeout: Duration,
}

impl Default for DeviceEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEmulator {
    /// A blank device with nothing installed.
    pub fn new() -> Self {
        Self {
            versions: VersionInfo::default(),
            update: None,
            banks: HashMap::new(),
            input: Vec::new(),
            output: VecDeque::new(),
            received: Vec::new(),
            faults: Faults::default(),
            timeout: Duration::ZERO,
        }
    }

    /// A device already running `version` from `address`.
    #[must_use]
    pub fn with_installed(mut self, version: u32, address: u32) -> Self {
        self.versions.current_version = version;
        self.versions.current_address = address;
        self
    }

    /// Answer the next `times` deliveries of packet `sequence` with a checksum error.
    #[must_use]
    pub fn corrupt_packet(mut self, sequence: u16, times: u32) -> Self {
        self.faults.corrupt.insert(sequence, times);
        self
    }

    /// Reject packet `sequence` with a NACK.
    #[must_use]
    pub fn reject_packet(mut self, sequence: u16) -> Self {
        self.faults.reject.insert(sequence);
        self
    }

    /// Make bank erasure fail.
    #[must_use]
    pub fn fail_erase(mut self) -> Self {
        self.faults.fail_erase = true;
        self
    }

    /// Stop or resume replying to commands.
    pub fn set_silent(&mut self, silent: bool) {
        self.faults.silent = silent;
    }

    /// Installed versions.
    pub fn version_info(&self) -> VersionInfo {
        self.versions
    }

    /// Bytes written to the bank at `address` by the latest update into it.
    pub fn bank(&self, address: u32) -> &[u8] {
        self.banks.get(&address).map_or(&[], Vec::as_slice)
    }

    /// Whether an update is in progress.
    pub fn is_updating(&self) -> bool {
        self.update.is_some()
    }

    /// Every valid command received, in order.
    pub fn commands(&self) -> &[Command] {
        &self.received
    }

    /// Number of valid `command` frames received.
    pub fn count(&self, command: Command) -> usize {
        self.received.iter().filter(|&&c| c == command).count()
    }

    fn process_input(&mut self) {
        while self.input.len() >= HEADER_LEN {
            // The firmware drops just the header and resyncs on what follows.
            if self.input[1] > MAX_COMMAND_PAYLOAD {
                debug!("Emulator dropped header with length {}", self.input[1]);
                self.input.drain(..HEADER_LEN);
                continue;
            }

            let needed = wire_len(self.input[1]);
            if self.input.len() < needed {
                return;
            }

            let bytes: Vec<u8> = self.input.drain(..needed).collect();
            match Frame::decode(&bytes) {
                Ok(frame) => self.handle(&frame),
                Err(e) => debug!("Emulator dropped frame: {e}"),
            }
        }
    }

    fn handle(&mut self, frame: &Frame) {
        let Ok(command) = Command::try_from(frame.code()) else {
            debug!("Emulator got unknown command 0x{:02X}", frame.code());
            self.respond(Response::Error, &[]);
            return;
        };
        trace!("Emulator got {command:?}");
        self.received.push(command);

        match command {
            Command::InitUpdate => self.init_update(frame.payload()),
            Command::SendPacket => self.receive_packet(frame.payload()),
            Command::FinishUpdate => self.finish_update(),
            Command::GetVersion => {
                let payload = self.versions.encode();
                self.respond(Response::VersionInfo, &payload);
            },
            Command::AbortUpdate => {
                let response = if self.update.take().is_some() {
                    Response::Ack
                } else {
                    Response::Nack
                };
                self.respond(response, &[]);
            },
        }
    }

    fn init_update(&mut self, payload: &[u8]) {
        let Ok(target) = UpdateTarget::parse(payload) else {
            self.respond(Response::Error, &[ERR_BAD_LENGTH]);
            return;
        };
        if self.update.is_some() {
            self.respond(Response::Error, &[ERR_IN_PROGRESS]);
            return;
        }
        if target.file_size == 0 || target.file_size as usize > MAX_FIRMWARE_SIZE {
            self.respond(Response::Error, &[ERR_BAD_SIZE]);
            return;
        }
        if target.target_address != BANK_A && target.target_address != BANK_B {
            self.respond(Response::Error, &[ERR_BAD_ADDRESS]);
            return;
        }
        if self.faults.fail_erase {
            self.respond(Response::Error, &[ERR_ERASE_FAILED]);
            return;
        }

        self.banks.insert(target.target_address, Vec::new());
        self.update = Some(UpdateState {
            target,
            bytes_received: 0,
            expected_packet: 0,
        });
        self.respond(Response::Ready, &[]);
    }

    fn receive_packet(&mut self, payload: &[u8]) {
        let Some(state) = self.update.as_mut() else {
            self.respond(Response::Nack, &[]);
            return;
        };
        let Ok(packet) = PacketRecord::parse(payload) else {
            self.respond(Response::Nack, &[]);
            return;
        };
        if packet.sequence != state.expected_packet || self.faults.reject.contains(&packet.sequence) {
            self.respond(Response::Nack, &[]);
            return;
        }
        if let Some(remaining) = self.faults.corrupt.get_mut(&packet.sequence) {
            if *remaining > 0 {
                *remaining -= 1;
                self.respond(Response::ChecksumError, &[]);
                return;
            }
        }
        if !packet.is_intact() {
            self.respond(Response::ChecksumError, &[]);
            return;
        }

        let left = state.target.file_size.saturating_sub(state.bytes_received) as usize;
        let count = left.min(PACKET_DATA_LEN);
        self.banks
            .entry(state.target.target_address)
            .or_default()
            .extend_from_slice(&packet.data[..count]);
        #[allow(clippy::cast_possible_truncation)]
        let written = count as u32;
        state.bytes_received += written;
        state.expected_packet = state.expected_packet.wrapping_add(1);

        self.respond(Response::Ack, &[]);
    }

    fn finish_update(&mut self) {
        match &self.update {
            Some(state) if state.bytes_received == state.target.file_size => {
                let target = state.target;
                self.versions.backup_version = self.versions.current_version;
                self.versions.backup_address = self.versions.current_address;
                self.versions.current_version = target.new_version;
                self.versions.current_address = target.target_address;
                self.update = None;
                self.respond(Response::Ack, &[]);
            },
            _ => self.respond(Response::Nack, &[]),
        }
    }

    fn respond(&mut self, response: Response, payload: &[u8]) {
        if self.faults.silent {
            trace!("Emulator silent, dropping {response:?}");
            return;
        }
        match Frame::encode(response.code(), payload) {
            Ok(bytes) => self.output.extend(bytes),
            Err(e) => debug!("Emulator cannot encode {response:?}: {e}"),
        }
    }
}

impl io::Read for DeviceEmulator {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl io::Write for DeviceEmulator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.input.extend_from_slice(buf);
        self.process_input();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for DeviceEmulator {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.input.clear();
        self.output.clear();
        Ok(())
    }
}
