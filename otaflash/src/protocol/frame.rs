//! Command/response framing.
//!
//! Both directions use the same frame layout:
//!
//! ```text
//! +------+--------+-----------------+----------+
//! | Code | Length |     Payload     | Checksum |
//! +------+--------+-----------------+----------+
//! |  1   |   1    |  Length bytes   |    1     |
//! +------+--------+-----------------+----------+
//! ```
//!
//! The checksum is the XOR of every byte before it. `Code` carries a
//! [`Command`] on host-to-device frames and a [`Response`] on the way back.

use crate::error::FramingError;
use std::fmt;

/// Header size (code + length).
pub const HEADER_LEN: usize = 2;

/// Largest payload the length byte can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Host-to-device command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Start an update: version, target address, file size.
    InitUpdate = 0x01,
    /// One sequenced data packet.
    SendPacket = 0x02,
    /// Commit the transferred image.
    FinishUpdate = 0x03,
    /// Query installed versions and their banks.
    GetVersion = 0x04,
    /// Cancel the update in progress.
    AbortUpdate = 0x05,
}

impl Command {
    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = FramingError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Self::InitUpdate),
            0x02 => Ok(Self::SendPacket),
            0x03 => Ok(Self::FinishUpdate),
            0x04 => Ok(Self::GetVersion),
            0x05 => Ok(Self::AbortUpdate),
            other => Err(FramingError::UnknownCode(other)),
        }
    }
}

/// Device-to-host response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Response {
    /// Command accepted.
    Ack = 0x10,
    /// Command rejected.
    Nack = 0x11,
    /// Flash erased, ready for packets.
    Ready = 0x12,
    /// Packet payload failed its checksum.
    ChecksumError = 0x13,
    /// Version information follows.
    VersionInfo = 0x14,
    /// Device error, optional 1-byte code follows.
    Error = 0x15,
}

impl Response {
    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Response {
    type Error = FramingError;

    fn try_from(code: u8) -> Result<Self, FramingError> {
        match code {
            0x10 => Ok(Self::Ack),
            0x11 => Ok(Self::Nack),
            0x12 => Ok(Self::Ready),
            0x13 => Ok(Self::ChecksumError),
            0x14 => Ok(Self::VersionInfo),
            0x15 => Ok(Self::Error),
            other => Err(FramingError::UnknownCode(other)),
        }
    }
}

/// XOR of all bytes.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Total wire length of a frame whose length byte is `length`.
pub fn wire_len(length: u8) -> usize {
    HEADER_LEN + usize::from(length) + 1
}

/// A single frame: code plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    code: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, checking the payload fits the length byte.
    pub fn new(code: u8, payload: impl Into<Vec<u8>>) -> Result<Self, FramingError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FramingError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { code, payload })
    }

    /// Encode `code` and `payload` into wire bytes.
    pub fn encode(code: u8, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
        Ok(Self::new(code, payload)?.build())
    }

    /// Decode a frame from wire bytes.
    ///
    /// `bytes` must hold exactly one frame. A buffer longer than its length
    /// byte declares is a checksum mismatch, so a damaged length byte can never
    /// shift the checksum onto a payload byte. The code is not interpreted;
    /// see [`decode_response`] for device replies.
    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < HEADER_LEN {
            return Err(FramingError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let total = wire_len(bytes[1]);
        if bytes.len() < total {
            return Err(FramingError::Truncated {
                expected: total,
                actual: bytes.len(),
            });
        }

        if bytes.len() > total {
            let last = bytes.len() - 1;
            return Err(FramingError::ChecksumMismatch {
                expected: xor_checksum(&bytes[..last]),
                actual: bytes[last],
            });
        }

        let expected = xor_checksum(&bytes[..total - 1]);
        let actual = bytes[total - 1];
        if expected != actual {
            return Err(FramingError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            code: bytes[0],
            payload: bytes[HEADER_LEN..total - 1].to_vec(),
        })
    }

    /// Build the wire bytes.
    #[allow(clippy::cast_possible_truncation)] // length checked in new()
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(wire_len(self.payload.len() as u8));
        buf.push(self.code);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.push(xor_checksum(&buf));
        buf
    }

    /// Raw code byte.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame and return its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// A decoded device reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response code.
    pub response: Response,
    /// Response payload.
    pub payload: Vec<u8>,
}

impl Reply {
    /// Reply without payload.
    pub fn bare(response: Response) -> Self {
        Self {
            response,
            payload: Vec::new(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({} bytes)", self.response, self.payload.len())
    }
}

/// Decode and validate a device reply.
///
/// Truncation and checksum are checked before the code is interpreted, so a
/// corrupted frame reports [`FramingError::ChecksumMismatch`] rather than
/// [`FramingError::UnknownCode`].
pub fn decode_response(bytes: &[u8]) -> Result<Reply, FramingError> {
    let frame = Frame::decode(bytes)?;
    let response = Response::try_from(frame.code())?;
    Ok(Reply {
        response,
        payload: frame.into_payload(),
    })
}

/// Hex preview of the first bytes of a frame, for trace logs.
pub(crate) fn hex_preview(bytes: &[u8]) -> String {
    const PREVIEW: usize = 10;

    let mut out = bytes
        .iter()
        .take(PREVIEW)
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > PREVIEW {
        out.push_str(" ...");
    }
    out
}
