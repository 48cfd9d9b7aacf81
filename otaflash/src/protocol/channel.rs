//! One-command-at-a-time exchange over a [`Port`].

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{self, Command, Frame, HEADER_LEN, Reply};
use log::trace;
use std::io::{ErrorKind, Read};
use std::time::Duration;

/// Sends command frames and reads response frames.
///
/// The protocol carries no request IDs, so a reply belongs to whichever
/// command was written last. Callers must read the reply (or give up on it)
/// before sending the next command.
pub struct CommandChannel<P: Port> {
    port: P,
}

impl<P: Port> CommandChannel<P> {
    /// Wrap an opened port.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the channel and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Encode and write one command frame.
    pub fn send(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let data = Frame::encode(command.code(), payload)?;
        trace!(
            "Sending {command:?}: {} ({} bytes)",
            frame::hex_preview(&data),
            data.len()
        );

        self.port.write_all_bytes(&data)
    }

    /// Read and validate one response frame.
    ///
    /// The header, the payload and the checksum are each read within
    /// `timeout`; a short read is reported as [`Error::Timeout`].
    pub fn receive(&mut self, timeout: Duration) -> Result<Reply> {
        self.port.set_timeout(timeout)?;

        let mut data = self.read_exact(HEADER_LEN, "response header")?;
        let length = usize::from(data[1]);
        if length > 0 {
            data.extend(self.read_exact(length, "response payload")?);
        }
        data.extend(self.read_exact(1, "response checksum")?);

        trace!("Received {} ({} bytes)", frame::hex_preview(&data), data.len());

        Ok(frame::decode_response(&data)?)
    }

    /// Drop any buffered input, such as a reply that arrived after its
    /// receive timed out, so it cannot be paired with the next command.
    pub fn discard_input(&mut self) -> Result<()> {
        trace!("Discarding buffered input");
        self.port.clear_buffers()
    }

    /// Send a command and read its reply.
    pub fn transact(&mut self, command: Command, payload: &[u8], timeout: Duration) -> Result<Reply> {
        self.send(command, payload)?;
        self.receive(timeout)
    }

    /// Read exactly `n` bytes, relying on the port timeout to bound each read.
    fn read_exact(&mut self, n: usize, what: &str) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if filled < n {
            return Err(Error::Timeout(format!(
                "{what}: got {filled} of {n} bytes"
            )));
        }

        Ok(buf)
    }
}
