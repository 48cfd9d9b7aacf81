//! Host-side update session.
//!
//! An [`UpdateSession`] owns the channel to one device and walks it through a
//! single update:
//!
//! ```text
//! Idle -> QueryingVersion -> SelectingTarget -> Initializing
//!      -> AwaitingReady -> Transferring -> Finalizing -> Completed
//! ```
//!
//! Any step may end the session in `Failed`. Once packets are flowing, a
//! failure first sends `AbortUpdate` and ends in `Aborted`. Terminal states
//! are final; a new update needs a new session.

pub mod transfer;

use crate::error::{DeviceError, Error, ProtocolError, Result};
use crate::port::Port;
use crate::protocol::{BANK_A, BANK_B, Command, CommandChannel, Response, UpdateTarget, VersionInfo};
use log::{debug, info, warn};
use std::fmt;
use std::thread;
use std::time::Duration;

pub use transfer::{MAX_PACKETS, PacketTransfer, packet_count, packets};

/// Default attempts per retried step.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default time to wait for each response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between `Ready` polls.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry and timing policy of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Attempts per packet and per `Ready` wait. Zero is treated as one.
    pub max_retries: u32,
    /// Time to wait for each response.
    pub response_timeout: Duration,
    /// Pause between `Ready` polls.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl SessionConfig {
    /// Set the attempts per retried step.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the pause between `Ready` polls.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Attempts actually made per retried step.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Where a session is in the update sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet.
    Idle,
    /// Waiting for the installed version.
    QueryingVersion,
    /// Choosing the target bank.
    SelectingTarget,
    /// Sending `InitUpdate`.
    Initializing,
    /// Polling for `Ready` while the device erases the bank.
    AwaitingReady,
    /// Sending packets.
    Transferring,
    /// Waiting for the `FinishUpdate` acknowledgement.
    Finalizing,
    /// The device accepted the new firmware.
    Completed,
    /// The update stopped before any packet was in flight, or was not committed.
    Failed,
    /// The update stopped during the transfer and `AbortUpdate` was sent.
    Aborted,
}

impl SessionState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::QueryingVersion => "querying version",
            Self::SelectingTarget => "selecting target",
            Self::Initializing => "initializing",
            Self::AwaitingReady => "awaiting ready",
            Self::Transferring => "transferring",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// How an update ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The device committed the new firmware.
    Completed {
        /// Bank the image was written to.
        target_address: u32,
        /// Packets sent.
        packets: usize,
    },
    /// The update failed; no `AbortUpdate` was needed.
    Failed(Error),
    /// The transfer was abandoned and `AbortUpdate` sent.
    Aborted(Error),
}

impl SessionOutcome {
    /// Whether the update completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The error that ended an unsuccessful update.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed(e) | Self::Aborted(e) => Some(e),
        }
    }

    /// Terminal state matching this outcome.
    pub fn state(&self) -> SessionState {
        match self {
            Self::Completed { .. } => SessionState::Completed,
            Self::Failed(_) => SessionState::Failed,
            Self::Aborted(_) => SessionState::Aborted,
        }
    }
}

/// Bank that should receive the next image.
///
/// A blank device gets bank A. Otherwise the bank not holding the running
/// firmware is chosen, so the two banks alternate.
pub fn select_target_bank(info: &VersionInfo) -> u32 {
    if info.is_blank() {
        BANK_A
    } else if info.current_address == BANK_A {
        BANK_B
    } else {
        BANK_A
    }
}

/// One update conversation with one device.
pub struct UpdateSession<P: Port> {
    channel: CommandChannel<P>,
    config: SessionConfig,
    state: SessionState,
}

impl<P: Port> UpdateSession<P> {
    /// Create a session over an opened port.
    pub fn new(port: P, config: SessionConfig) -> Self {
        Self {
            channel: CommandChannel::new(port),
            config,
            state: SessionState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Retry and timing policy.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        self.channel.port()
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.channel.into_port()
    }

    /// Ask the device for its installed versions.
    ///
    /// Usable at any time; does not change the session state.
    pub fn query_version(&mut self) -> Result<VersionInfo> {
        let reply = self
            .channel
            .transact(Command::GetVersion, &[], self.config.response_timeout)?;

        match reply.response {
            Response::VersionInfo => VersionInfo::parse(&reply.payload),
            Response::Nack => Err(ProtocolError::Nack("GetVersion".into()).into()),
            Response::Error => Err(DeviceError::from_payload(&reply.payload).into()),
            other => Err(ProtocolError::UnexpectedResponse {
                step: "GetVersion",
                actual: other,
            }
            .into()),
        }
    }

    /// Install `firmware` as `new_version`.
    ///
    /// Protocol failures are reported through the returned [`SessionOutcome`].
    /// `Err` is only returned when the session was already used.
    pub fn run_update(&mut self, firmware: &[u8], new_version: u32) -> Result<SessionOutcome> {
        self.run_update_with_progress(firmware, new_version, |_, _| {})
    }

    /// Like [`run_update`](Self::run_update), reporting (bytes acknowledged,
    /// image size) after every acknowledged packet.
    pub fn run_update_with_progress<F>(
        &mut self,
        firmware: &[u8],
        new_version: u32,
        mut progress: F,
    ) -> Result<SessionOutcome>
    where
        F: FnMut(usize, usize),
    {
        if self.state != SessionState::Idle {
            return Err(Error::SessionFinished);
        }

        Ok(self.drive(firmware, new_version, &mut progress))
    }

    fn drive(
        &mut self,
        firmware: &[u8],
        new_version: u32,
        progress: &mut dyn FnMut(usize, usize),
    ) -> SessionOutcome {
        self.advance(SessionState::QueryingVersion);
        let info = match self.query_version() {
            Ok(info) => info,
            Err(e) => return self.fail(e),
        };
        info!(
            "Installed: version {} at 0x{:08X}, backup version {} at 0x{:08X}",
            info.current_version, info.current_address, info.backup_version, info.backup_address
        );

        self.advance(SessionState::SelectingTarget);
        let target = match plan_update(&info, firmware, new_version) {
            Ok(target) => target,
            Err(e) => return self.fail(e),
        };
        info!(
            "Installing version {} ({} bytes) to bank 0x{:08X}",
            target.new_version, target.file_size, target.target_address
        );

        self.advance(SessionState::Initializing);
        if let Err(e) = self.channel.send(Command::InitUpdate, &target.encode()) {
            return self.fail(e);
        }

        self.advance(SessionState::AwaitingReady);
        if let Err(e) = self.await_ready() {
            return self.fail(e);
        }

        self.advance(SessionState::Transferring);
        let sent = PacketTransfer::new(&mut self.channel, &self.config).run(firmware, progress);
        let packets = match sent {
            Ok(packets) => packets,
            Err(e) => return self.abort(e),
        };

        self.advance(SessionState::Finalizing);
        match self.finish() {
            Ok(()) => {
                self.advance(SessionState::Completed);
                info!("Update to version {new_version} completed");
                SessionOutcome::Completed {
                    target_address: target.target_address,
                    packets,
                }
            },
            Err(e) => self.fail(e),
        }
    }

    /// Poll for `Ready` without resending `InitUpdate`.
    fn await_ready(&mut self) -> Result<()> {
        let attempts = self.config.attempts();

        for attempt in 1..=attempts {
            match self.channel.receive(self.config.response_timeout) {
                Ok(reply) => match reply.response {
                    Response::Ready => {
                        debug!("Device ready for data");
                        return Ok(());
                    },
                    Response::Error => {
                        return Err(DeviceError::from_payload(&reply.payload).into());
                    },
                    Response::Nack => {
                        return Err(ProtocolError::Nack("InitUpdate".into()).into());
                    },
                    other => {
                        warn!("Expected READY, got {other:?} (attempt {attempt}/{attempts})");
                    },
                },
                Err(e) if e.is_transient() => {
                    warn!("Waiting for READY (attempt {attempt}/{attempts}): {e}");
                    if attempt < attempts {
                        self.channel.discard_input()?;
                    }
                },
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                thread::sleep(self.config.retry_delay);
            }
        }

        Err(Error::RetriesExhausted {
            step: "Waiting for READY".into(),
            attempts,
        })
    }

    fn finish(&mut self) -> Result<()> {
        let reply = self
            .channel
            .transact(Command::FinishUpdate, &[], self.config.response_timeout)?;

        match reply.response {
            Response::Ack => Ok(()),
            Response::Nack => Err(ProtocolError::Nack("FinishUpdate".into()).into()),
            Response::Error => Err(DeviceError::from_payload(&reply.payload).into()),
            other => Err(ProtocolError::UnexpectedResponse {
                step: "FinishUpdate",
                actual: other,
            }
            .into()),
        }
    }

    /// Send `AbortUpdate` once; its reply is informational.
    fn abort(&mut self, reason: Error) -> SessionOutcome {
        warn!("Aborting update: {reason}");

        match self.channel.send(Command::AbortUpdate, &[]) {
            Ok(()) => match self.channel.receive(self.config.response_timeout) {
                Ok(reply) => debug!("Abort answered with {reply}"),
                Err(e) => debug!("No reply to abort: {e}"),
            },
            Err(e) => warn!("Failed to send abort: {e}"),
        }

        self.advance(SessionState::Aborted);
        SessionOutcome::Aborted(reason)
    }

    fn fail(&mut self, reason: Error) -> SessionOutcome {
        warn!("Update failed while {}: {reason}", self.state);
        self.advance(SessionState::Failed);
        SessionOutcome::Failed(reason)
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(!self.state.is_terminal(), "transition out of {}", self.state);
        debug!("Session: {} -> {next}", self.state);
        self.state = next;
    }
}

/// Build the `InitUpdate` parameters, rejecting images the protocol cannot carry.
fn plan_update(info: &VersionInfo, firmware: &[u8], new_version: u32) -> Result<UpdateTarget> {
    let count = packet_count(firmware.len());
    if count > MAX_PACKETS {
        return Err(Error::InvalidFirmware(format!(
            "{} bytes need {count} packets, at most {MAX_PACKETS} are addressable",
            firmware.len()
        )));
    }
    let file_size = u32::try_from(firmware.len())
        .map_err(|_| Error::InvalidFirmware(format!("{} bytes is too large", firmware.len())))?;

    Ok(UpdateTarget {
        new_version,
        target_address: select_target_bank(info),
        file_size,
    })
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Duration, Error, Result, SessionConfig, UpdateSession, debug, thread, warn};
    use crate::port::{NativePort, Port, SerialConfig};

    const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
    const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

    /// Time the device needs after the port opens before it listens.
    const SETTLE_DELAY: Duration = Duration::from_secs(2);

    impl UpdateSession<NativePort> {
        /// Open a serial port and prepare it for a session.
        ///
        /// Opening is retried a few times. After opening, waits for the device
        /// to settle and discards anything already buffered.
        pub fn open(serial: &SerialConfig, config: SessionConfig) -> Result<Self> {
            let mut port = open_with_retry(serial)?;

            debug!("Waiting {SETTLE_DELAY:?} for device to settle");
            thread::sleep(SETTLE_DELAY);
            port.clear_buffers()?;

            Ok(Self::new(port, config))
        }
    }

    fn open_with_retry(serial: &SerialConfig) -> Result<NativePort> {
        let mut last_error = None;

        for attempt in 1..=MAX_OPEN_PORT_ATTEMPTS {
            match NativePort::open(serial) {
                Ok(port) => {
                    if attempt > 1 {
                        debug!("Port opened on attempt {attempt}");
                    }
                    return Ok(port);
                },
                Err(e) => {
                    warn!(
                        "Failed to open port {} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}",
                        serial.port_name
                    );
                    last_error = Some(e);

                    if attempt < MAX_OPEN_PORT_ATTEMPTS {
                        thread::sleep(OPEN_RETRY_DELAY);
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Config(format!("cannot open {}", serial.port_name))))
    }
}
