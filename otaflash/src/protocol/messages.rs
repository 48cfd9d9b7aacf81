//! Command and response payloads.
//!
//! All multi-byte fields are little-endian.

use crate::error::{ProtocolError, Result};
use crate::protocol::frame::xor_checksum;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// First firmware bank.
pub const BANK_A: u32 = 0x200000;

/// Second firmware bank.
pub const BANK_B: u32 = 0x300000;

/// Firmware bytes carried by one packet.
pub const PACKET_DATA_LEN: usize = 16;

/// `SendPacket` payload size: sequence(2) + checksum(1) + data(16).
pub const PACKET_PAYLOAD_LEN: usize = 2 + 1 + PACKET_DATA_LEN;

/// Fill byte for the tail of the last packet.
pub const PAD_BYTE: u8 = 0xFF;

/// `VersionInfo` payload size.
pub const VERSION_INFO_LEN: usize = 16;

/// `InitUpdate` payload size.
pub const UPDATE_TARGET_LEN: usize = 12;

/// Installed firmware versions and the banks they live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VersionInfo {
    /// Running firmware version, 0 when nothing is installed.
    pub current_version: u32,
    /// Previous firmware version.
    pub backup_version: u32,
    /// Bank of the running firmware.
    pub current_address: u32,
    /// Bank of the previous firmware.
    pub backup_address: u32,
}

impl VersionInfo {
    /// Parse a `VersionInfo` response payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != VERSION_INFO_LEN {
            return Err(ProtocolError::InvalidPayload {
                what: "version info",
                expected: VERSION_INFO_LEN,
                actual: payload.len(),
            }
            .into());
        }

        let mut rdr = payload;
        Ok(Self {
            current_version: rdr.read_u32::<LittleEndian>()?,
            backup_version: rdr.read_u32::<LittleEndian>()?,
            current_address: rdr.read_u32::<LittleEndian>()?,
            backup_address: rdr.read_u32::<LittleEndian>()?,
        })
    }

    /// Encode as a response payload.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VERSION_INFO_LEN);
        buf.write_u32::<LittleEndian>(self.current_version).unwrap();
        buf.write_u32::<LittleEndian>(self.backup_version).unwrap();
        buf.write_u32::<LittleEndian>(self.current_address).unwrap();
        buf.write_u32::<LittleEndian>(self.backup_address).unwrap();
        buf
    }

    /// Whether no firmware has been installed yet.
    pub fn is_blank(&self) -> bool {
        self.current_version == 0
    }
}

/// `InitUpdate` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTarget {
    /// Version being installed.
    pub new_version: u32,
    /// Bank receiving the image.
    pub target_address: u32,
    /// Image size in bytes.
    pub file_size: u32,
}

impl UpdateTarget {
    /// Encode as an `InitUpdate` payload.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(UPDATE_TARGET_LEN);
        buf.write_u32::<LittleEndian>(self.new_version).unwrap();
        buf.write_u32::<LittleEndian>(self.target_address).unwrap();
        buf.write_u32::<LittleEndian>(self.file_size).unwrap();
        buf
    }

    /// Parse an `InitUpdate` payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != UPDATE_TARGET_LEN {
            return Err(ProtocolError::InvalidPayload {
                what: "init update",
                expected: UPDATE_TARGET_LEN,
                actual: payload.len(),
            }
            .into());
        }

        let mut rdr = payload;
        Ok(Self {
            new_version: rdr.read_u32::<LittleEndian>()?,
            target_address: rdr.read_u32::<LittleEndian>()?,
            file_size: rdr.read_u32::<LittleEndian>()?,
        })
    }
}

/// One sequenced chunk of the firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Position of the chunk in the image, counted in packets.
    pub sequence: u16,
    /// XOR of `data`.
    pub checksum: u8,
    /// Chunk contents, padded with [`PAD_BYTE`].
    pub data: [u8; PACKET_DATA_LEN],
}

impl PacketRecord {
    /// Build a packet from a chunk of at most [`PACKET_DATA_LEN`] bytes.
    pub fn new(sequence: u16, chunk: &[u8]) -> Self {
        debug_assert!(chunk.len() <= PACKET_DATA_LEN);

        let mut data = [PAD_BYTE; PACKET_DATA_LEN];
        let len = chunk.len().min(PACKET_DATA_LEN);
        data[..len].copy_from_slice(&chunk[..len]);

        Self {
            sequence,
            checksum: xor_checksum(&data),
            data,
        }
    }

    /// Encode as a `SendPacket` payload.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_PAYLOAD_LEN);
        buf.write_u16::<LittleEndian>(self.sequence).unwrap();
        buf.push(self.checksum);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse a `SendPacket` payload without validating the checksum.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != PACKET_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidPayload {
                what: "packet",
                expected: PACKET_PAYLOAD_LEN,
                actual: payload.len(),
            }
            .into());
        }

        let mut rdr = payload;
        let sequence = rdr.read_u16::<LittleEndian>()?;
        let checksum = rdr.read_u8()?;
        let mut data = [0u8; PACKET_DATA_LEN];
        data.copy_from_slice(rdr);

        Ok(Self {
            sequence,
            checksum,
            data,
        })
    }

    /// Whether `checksum` matches `data`.
    pub fn is_intact(&self) -> bool {
        xor_checksum(&self.data) == self.checksum
    }
}
