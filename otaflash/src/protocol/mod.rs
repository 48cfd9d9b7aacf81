//! Wire protocol: framing, payloads and the command channel.

pub mod channel;
pub mod frame;
pub mod messages;

// Re-export common types
pub use channel::CommandChannel;
pub use frame::{Command, Frame, Reply, Response, decode_response, xor_checksum};
pub use messages::{
    BANK_A, BANK_B, PACKET_DATA_LEN, PAD_BYTE, PacketRecord, UpdateTarget, VersionInfo,
};
