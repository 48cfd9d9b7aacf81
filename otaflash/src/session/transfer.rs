//! Chunked packet transfer with per-packet retry.
//!
//! The image is cut into [`PACKET_DATA_LEN`]-byte chunks, numbered from 0 in
//! offset order. Each chunk is sent as a `SendPacket` command and must be
//! acknowledged before the next one goes out.

use crate::error::{DeviceError, Error, ProtocolError, Result};
use crate::port::Port;
use crate::protocol::{Command, CommandChannel, PACKET_DATA_LEN, PacketRecord, Response};
use crate::session::SessionConfig;
use log::{debug, trace, warn};

/// Most packets a `u16` sequence number can address.
pub const MAX_PACKETS: usize = u16::MAX as usize + 1;

/// Log progress every this many packets.
const PROGRESS_LOG_INTERVAL: usize = 50;

/// Number of packets needed for an image of `file_size` bytes.
///
/// An empty image needs no packets.
pub fn packet_count(file_size: usize) -> usize {
    file_size.div_ceil(PACKET_DATA_LEN)
}

/// Split an image into sequenced packets, padding the last one.
///
/// Sequence numbers wrap past [`MAX_PACKETS`]; callers reject such images
/// before transferring.
#[allow(clippy::cast_possible_truncation)]
pub fn packets(image: &[u8]) -> impl Iterator<Item = PacketRecord> + '_ {
    image
        .chunks(PACKET_DATA_LEN)
        .enumerate()
        .map(|(index, chunk)| PacketRecord::new(index as u16, chunk))
}

/// Drives the send/ack/retry loop for one image.
pub struct PacketTransfer<'a, P: Port> {
    channel: &'a mut CommandChannel<P>,
    config: &'a SessionConfig,
}

impl<'a, P: Port> PacketTransfer<'a, P> {
    /// Create a transfer over an initialized channel.
    pub fn new(channel: &'a mut CommandChannel<P>, config: &'a SessionConfig) -> Self {
        Self { channel, config }
    }

    /// Send every packet of `image` in order.
    ///
    /// `progress` receives (bytes acknowledged, image size) after each
    /// acknowledged packet. Returns the number of packets sent.
    ///
    /// Stops at the first packet that is rejected (`Nack`), answered with a
    /// device error, or not acknowledged within the retry budget.
    pub fn run<F>(&mut self, image: &[u8], mut progress: F) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        let total = packet_count(image.len());
        debug!("Sending {total} packets ({} bytes)", image.len());

        for (index, packet) in packets(image).enumerate() {
            self.send_packet(&packet)?;

            let acknowledged = ((index + 1) * PACKET_DATA_LEN).min(image.len());
            progress(acknowledged, image.len());

            if index % PROGRESS_LOG_INTERVAL == 0 || index + 1 == total {
                #[allow(clippy::cast_precision_loss)]
                let percent = (index + 1) as f64 / total as f64 * 100.0;
                debug!("Progress: {percent:.1}% ({}/{total})", index + 1);
            }
        }

        Ok(total)
    }

    /// Send one packet until it is acknowledged or the budget runs out.
    fn send_packet(&mut self, packet: &PacketRecord) -> Result<()> {
        let seq = packet.sequence;
        let payload = packet.encode();
        let attempts = self.config.attempts();

        let mut stale = false;

        for attempt in 1..=attempts {
            trace!("Sending packet {seq} (attempt {attempt}/{attempts})");

            // A late reply to the last attempt must not answer this one.
            if stale {
                self.channel.discard_input()?;
                stale = false;
            }

            if let Err(e) = self.channel.send(Command::SendPacket, &payload) {
                warn!("Failed to send packet {seq} (attempt {attempt}/{attempts}): {e}");
                continue;
            }

            match self.channel.receive(self.config.response_timeout) {
                Ok(reply) => match reply.response {
                    Response::Ack => {
                        trace!("Packet {seq} ACKed");
                        return Ok(());
                    },
                    Response::ChecksumError => {
                        warn!("Checksum error for packet {seq} (attempt {attempt}/{attempts})");
                    },
                    Response::Nack => {
                        return Err(ProtocolError::Nack(format!("packet {seq}")).into());
                    },
                    Response::Error => {
                        return Err(DeviceError::from_payload(&reply.payload).into());
                    },
                    other => {
                        warn!(
                            "Unexpected response {other:?} for packet {seq} (attempt {attempt}/{attempts})"
                        );
                    },
                },
                Err(e) if e.is_transient() => {
                    warn!("No valid reply for packet {seq} (attempt {attempt}/{attempts}): {e}");
                    stale = true;
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetriesExhausted {
            step: format!("packet {seq}"),
            attempts,
        })
    }
}
