//! Scripted port for unit tests.
//!
//! Reads and writes are independent: replies are queued up front and every
//! written byte is captured. An empty read queue reads as `TimedOut`.

use crate::error::Result;
use crate::port::Port;
use crate::protocol::{Command, Frame, Response};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// Encode a device reply.
pub(crate) fn reply(response: Response, payload: &[u8]) -> Vec<u8> {
    Frame::encode(response.code(), payload).unwrap()
}

pub(crate) struct MockPort {
    read_buf: VecDeque<u8>,
    write_buf: Vec<u8>,
    max_read: usize,
    failing_writes: usize,
    timeout: Duration,
    clears: usize,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            read_buf: VecDeque::new(),
            write_buf: Vec::new(),
            max_read: usize::MAX,
            failing_writes: 0,
            timeout: Duration::ZERO,
            clears: 0,
        }
    }

    /// Queue raw bytes for the host to read.
    pub(crate) fn queue(&mut self, bytes: &[u8]) {
        self.read_buf.extend(bytes);
    }

    /// Queue a well-formed reply.
    pub(crate) fn queue_reply(&mut self, response: Response, payload: &[u8]) {
        self.queue(&reply(response, payload));
    }

    /// Limit how many bytes a single read returns.
    pub(crate) fn set_max_read(&mut self, max: usize) {
        self.max_read = max;
    }

    /// Fail the next `count` writes with `BrokenPipe`.
    pub(crate) fn fail_writes(&mut self, count: usize) {
        self.failing_writes = count;
    }

    /// Number of `clear_buffers` calls.
    pub(crate) fn clears(&self) -> usize {
        self.clears
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.write_buf
    }

    /// Decode every frame the host wrote.
    pub(crate) fn sent_commands(&self) -> Vec<(Command, Vec<u8>)> {
        let mut out = Vec::new();
        let mut rest = self.write_buf.as_slice();
        while !rest.is_empty() {
            let (head, tail) = rest.split_at(crate::protocol::frame::wire_len(rest[1]));
            let frame = Frame::decode(head).unwrap();
            rest = tail;
            let command = Command::try_from(frame.code()).unwrap();
            out.push((command, frame.into_payload()));
        }
        out
    }

    /// Count frames of one command type.
    pub(crate) fn count(&self, command: Command) -> usize {
        self.sent_commands()
            .iter()
            .filter(|(c, _)| *c == command)
            .count()
    }
}

impl io::Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len()).min(self.max_read);
        for b in buf.iter_mut().take(n) {
            *b = self.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl io::Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Counted but not applied, so scripted replies survive.
    fn clear_buffers(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }
}
