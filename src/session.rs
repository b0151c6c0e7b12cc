//! Link session handling: connection establishment, stop-and-wait data
//! transfer, and teardown. The figure below outlines one connection between
//! the two roles in time sequence.
//!
//! ```plain
//!             |                                      |
//!             |  open()                       open() |
//!             |--------+                   +---------|
//!             |        |--------SET------->|         |
//!             |        |<-------UA---------|         |
//!             |        |                   |         |
//!             |  send()             receive()        |
//! TRANSMITTER |        |--------I0-------->|         | RECEIVER
//!             |        |<-------RR1--------|         |
//!             |        |--------I1-------->|         |
//!             |        |<-------RR0--------|         |
//!             |        |        ...        |         |
//!             | close()               close()        |
//!             |        |-------DISC------->|         |
//!             |        |<------DISC--------|         |
//!             |        |--------UA-------->|         |
//!             |<-------+                   +-------->|
//!             |                                      |
//! ```
//!
//! Exactly one information frame is in flight at any time. The transmitter
//! arms a deadline when it sends, retransmits on expiry, and gives up after
//! the configured retry budget. The receiver acknowledges each frame with
//! `RR` carrying the next expected sequence bit, rejects corrupted payloads
//! with `REJ`, and silently re-acknowledges duplicate retransmissions so the
//! caller sees every payload exactly once.

use crate::{
    frame::{
        self, encode_information, encode_supervision, ADDR_RX, ADDR_TX, CTRL_DISC, CTRL_SET,
        CTRL_UA, MAX_PAYLOAD,
    },
    reader::{FrameReader, Outcome, Vocabulary},
    serial::{Serial, SerialError},
    timer::Timer,
};
use log::{debug, info, trace, warn};
use thiserror::Error;

/// How long a single blocking read may wait while the session has no
/// deadline armed (receiver-side waits have no retry budget).
const POLL_INTERVAL_MS: u32 = 100;

/// Enumeration of possible link session errors.
///
/// Checksum failures never appear here: a corrupted header is discarded
/// silently and a corrupted payload is answered with `REJ`, both absorbed by
/// retransmission. Only exhausted retry budgets and transport failures are
/// fatal to the caller.
#[derive(Debug, Error)]
pub enum LinkError<RE, WE> {
    /// Error occurred during serial read.
    #[error("serial device read error")]
    SerialReadErr(RE),
    /// Error occurred during serial write.
    #[error("serial device write error")]
    SerialWriteErr(WE),
    /// Expected response absent within the allotted window.
    #[error("operation timed out")]
    Timeout,
    /// Connection establishment exhausted its retry budget.
    #[error("connection establishment failed")]
    ConnectionFailed,
    /// An information frame was never acknowledged within the retry budget.
    #[error("frame not acknowledged, link failure")]
    LinkFailure,
    /// The teardown handshake exhausted its retry budget. The serial device
    /// is released regardless.
    #[error("teardown handshake failed")]
    CloseFailed,
    /// The peer restarted its connection handshake mid-session. The caller
    /// is expected to re-open.
    #[error("peer restarted the connection handshake")]
    ConnectionReset,
    /// The peer initiated disconnection. The caller should proceed to
    /// [`close`](Session::close).
    #[error("peer initiated disconnection")]
    PeerDisconnecting,
    /// The payload exceeds [`MAX_PAYLOAD`]. Nothing was transmitted.
    #[error("payload exceeds the maximum frame payload size")]
    PayloadTooLarge,
}

#[doc(hidden)]
/// Implement conversion from [`SerialError`] to [`LinkError`].
impl<RE, WE> From<SerialError<RE, WE>> for LinkError<RE, WE> {
    fn from(se: SerialError<RE, WE>) -> Self {
        match se {
            SerialError::ReadError(e) => LinkError::SerialReadErr(e),
            SerialError::WriteError(e) => LinkError::SerialWriteErr(e),
            SerialError::Timeout => LinkError::Timeout,
        }
    }
}

/// Which side of the link this session drives. Fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the connection, sends information frames, initiates
    /// teardown.
    Transmitter,
    /// Accepts the connection, delivers information frames, follows
    /// teardown.
    Receiver,
}

/// Per-connection configuration, fixed at open time.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Which side of the link this session drives.
    pub role: Role,
    /// Retransmission deadline armed at the start of each attempt.
    pub timeout_ms: u32,
    /// How many timeout-driven retransmissions are allowed per exchange
    /// before the operation fails. The first transmission is not a retry,
    /// so an exchange makes at most `max_retries + 1` attempts.
    pub max_retries: usize,
}

/// Monotonic session counters, accumulated for the lifetime of the session
/// and reported at close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames written to the serial device, supervision included.
    pub frames_sent: u64,
    /// Retransmissions triggered, whether by timeout or by `REJ`.
    pub retransmissions: u64,
    /// Deadline expiries observed while waiting for a response.
    pub timeouts: u64,
}

/// One side of one link-layer connection.
///
/// Created by [`open`](Session::open), destroyed by [`close`](Session::close)
/// (or by drop, which releases the serial device without the teardown
/// handshake). All operations run on the calling thread; nothing happens in
/// the background.
#[derive(Debug)]
pub struct Session<S, T>
where
    S: Serial,
    T: Timer,
{
    serial: S,
    timer: T,
    config: LinkConfig,
    /// Sequence bit of the next information frame to send. Flips exactly
    /// once per acknowledged frame.
    send_sequence: u8,
    /// Sequence bit of the next information frame expected from the peer.
    /// Anything else is a duplicate retransmission.
    expected_sequence: u8,
    /// Set when [`receive`](Session::receive) has already consumed the
    /// peer's DISC, so close does not wait for a retransmission of it.
    peer_disc_seen: bool,
    stats: LinkStats,
}

/// Public methods.
impl<S, T> Session<S, T>
where
    S: Serial,
    T: Timer,
{
    /// Establish a connection over the given serial device.
    ///
    /// The transmitter repeatedly sends SET and waits for UA, bounded by the
    /// configured retry budget. The receiver blocks until a valid SET
    /// arrives and replies UA unconditionally; receiver-side open fails only
    /// if the transport does.
    ///
    /// # Returns
    /// - `Ok(Session)`: Connection established.
    /// - [`Err(LinkError::ConnectionFailed)`](LinkError): The transmitter
    ///   exhausted its retries without seeing UA.
    /// - [`Err(LinkError)`](LinkError): The transport failed.
    pub fn open(
        serial: S,
        timer: T,
        config: LinkConfig,
    ) -> Result<Self, LinkError<S::ReadError, S::WriteError>> {
        let mut session = Self {
            serial,
            timer,
            config,
            send_sequence: 0,
            expected_sequence: 0,
            peer_disc_seen: false,
            stats: LinkStats::default(),
        };
        match config.role {
            Role::Transmitter => session.connect()?,
            Role::Receiver => session.accept()?,
        }
        Ok(session)
    }

    /// Send one information frame carrying `payload`, stop-and-wait.
    ///
    /// Returns once the peer acknowledges the frame, retransmitting on
    /// timeout up to the retry budget. A `REJ` from the peer (payload
    /// arrived corrupted) triggers an immediate retransmission that does not
    /// consume a retry slot.
    ///
    /// # Returns
    /// - `Ok(usize)`: Number of payload bytes acknowledged.
    /// - [`Err(LinkError::PayloadTooLarge)`](LinkError): Payload exceeds
    ///   [`MAX_PAYLOAD`]; nothing was transmitted.
    /// - [`Err(LinkError::LinkFailure)`](LinkError): Retry budget exhausted.
    /// - [`Err(LinkError)`](LinkError): The transport failed.
    pub fn send(
        &mut self,
        payload: &[u8],
    ) -> Result<usize, LinkError<S::ReadError, S::WriteError>> {
        if payload.len() > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge);
        }

        let encoded = encode_information(self.send_sequence, payload);
        let mut timeouts = 0usize;

        'transmit: loop {
            self.write_frame(&encoded)?;
            trace!(
                "sent I{} carrying {} bytes",
                self.send_sequence,
                payload.len()
            );

            let update_timeout = self.get_timeout_update_func(self.config.timeout_ms);
            let mut reader = FrameReader::new(Vocabulary::Transfer, ADDR_TX);
            loop {
                match self.read_outcome(&mut reader, &update_timeout) {
                    Ok(Outcome::Accepted(f))
                        if f.control == frame::rr_control(self.send_sequence ^ 1) =>
                    {
                        trace!("I{} acknowledged", self.send_sequence);
                        self.send_sequence ^= 1;
                        return Ok(payload.len());
                    }
                    Ok(Outcome::Accepted(f))
                        if f.control == frame::rej_control(self.send_sequence) =>
                    {
                        // Request-driven retransmission: the peer saw the
                        // frame but the payload checksum failed. Does not
                        // consume a retry slot.
                        debug!("REJ{} received, retransmitting", self.send_sequence);
                        self.stats.retransmissions += 1;
                        continue 'transmit;
                    }
                    // Stale acknowledgement or an unrelated frame: the
                    // current wait continues.
                    Ok(_) => continue,
                    Err(LinkError::Timeout) => {
                        self.stats.timeouts += 1;
                        timeouts += 1;
                        if timeouts > self.config.max_retries {
                            warn!(
                                "I{} not acknowledged after {} attempts",
                                self.send_sequence, timeouts
                            );
                            return Err(LinkError::LinkFailure);
                        }
                        debug!("timeout waiting for acknowledgement, retransmitting");
                        self.stats.retransmissions += 1;
                        continue 'transmit;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Receive one information frame and return its payload.
    ///
    /// Blocks until a frame addressed to this session resolves. Corrupted
    /// payloads are answered with `REJ` and the wait continues; duplicate
    /// retransmissions are re-acknowledged and discarded, so each payload is
    /// delivered exactly once.
    ///
    /// # Returns
    /// - `Ok(Vec<u8>)`: The payload, acknowledged to the peer.
    /// - [`Err(LinkError::ConnectionReset)`](LinkError): The peer restarted
    ///   its open handshake mid-session.
    /// - [`Err(LinkError::PeerDisconnecting)`](LinkError): The peer started
    ///   teardown; proceed to [`close`](Session::close).
    /// - [`Err(LinkError)`](LinkError): The transport failed.
    pub fn receive(&mut self) -> Result<Vec<u8>, LinkError<S::ReadError, S::WriteError>> {
        loop {
            match self.wait_frame_blocking(Vocabulary::Transfer, ADDR_TX)? {
                Outcome::Accepted(f) if frame::is_info_control(f.control) => {
                    let sequence = frame::info_sequence(f.control);
                    if sequence == self.expected_sequence {
                        self.write_frame(&encode_supervision(
                            ADDR_TX,
                            frame::rr_control(sequence ^ 1),
                        ))?;
                        self.expected_sequence ^= 1;
                        trace!("delivered I{} carrying {} bytes", sequence, f.payload.len());
                        return Ok(f.payload);
                    }
                    // Duplicate retransmission of a frame already
                    // acknowledged. Re-send the same acknowledgement and
                    // discard the payload.
                    debug!("duplicate I{} suppressed", sequence);
                    self.write_frame(&encode_supervision(
                        ADDR_TX,
                        frame::rr_control(self.expected_sequence),
                    ))?;
                }
                Outcome::Accepted(f) if f.control == CTRL_SET => {
                    warn!("SET received mid-session");
                    return Err(LinkError::ConnectionReset);
                }
                Outcome::Accepted(f) if f.control == CTRL_DISC => {
                    debug!("DISC received, peer is disconnecting");
                    self.peer_disc_seen = true;
                    return Err(LinkError::PeerDisconnecting);
                }
                // A stray acknowledgement echo carries nothing for us.
                Outcome::Accepted(_) => continue,
                Outcome::Rejected { sequence } => {
                    debug!("I{sequence} failed the payload checksum, sending REJ");
                    self.write_frame(&encode_supervision(
                        ADDR_TX,
                        frame::rej_control(sequence),
                    ))?;
                }
            }
        }
    }

    /// Tear down the connection and release the serial device.
    ///
    /// The transmitter sends DISC, waits for the receiver's DISC (bounded by
    /// the retry budget) and replies with the final UA. The receiver waits
    /// for DISC (unless [`receive`](Session::receive) already surfaced it),
    /// replies with its own DISC, and waits bounded for the final UA.
    ///
    /// The serial device is released regardless of the result; a failed
    /// close never leaks the handle.
    ///
    /// # Returns
    /// - `Ok(LinkStats)`: Teardown completed; the session counters.
    /// - [`Err(LinkError::CloseFailed)`](LinkError): The bounded wait
    ///   exhausted its retries.
    /// - [`Err(LinkError)`](LinkError): The transport failed.
    pub fn close(
        mut self,
        report_stats: bool,
    ) -> Result<LinkStats, LinkError<S::ReadError, S::WriteError>> {
        let result = match self.config.role {
            Role::Transmitter => self.close_transmitter(),
            Role::Receiver => self.close_receiver(),
        };
        if report_stats {
            info!(
                "session closed: {} frames sent, {} retransmissions, {} timeouts",
                self.stats.frames_sent, self.stats.retransmissions, self.stats.timeouts
            );
        }
        // Dropping `self` releases the serial device either way.
        result.map(|()| self.stats)
    }

    /// The session counters accumulated so far.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}

/// Private methods.
impl<S, T> Session<S, T>
where
    S: Serial,
    T: Timer,
{
    /// Return a closure to get updated timeout based on elapsed time. When
    /// the returned closure is called, it returns the remaining time until
    /// the deadline, counted from the creation time of the closure.
    ///
    /// # Returned Closure Parameters
    /// - `timer`: A mutable reference to a [`Timer`] instance.
    ///
    /// # Returned Closure Returns
    /// - `Ok(u32)`: Remaining time in milliseconds.
    /// - [`Err(LinkError::Timeout)`](LinkError): The deadline has passed.
    fn get_timeout_update_func(
        &mut self,
        timeout_ms: u32,
    ) -> impl Fn(&mut T) -> Result<u32, LinkError<S::ReadError, S::WriteError>> {
        let create_time = self.timer.get_timestamp_ms();

        move |timer| {
            let cur_time = timer.get_timestamp_ms();
            let elapsed_time = cur_time.wrapping_sub(create_time);
            let remaining_time = timeout_ms.saturating_sub(elapsed_time);

            if remaining_time == 0 {
                Err(LinkError::Timeout)
            } else {
                Ok(remaining_time)
            }
        }
    }

    /// Write one complete frame to the serial device.
    fn write_frame(
        &mut self,
        bytes: &[u8],
    ) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        self.serial.write_bytes(bytes)?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Drive `reader` with bytes from the serial device until one frame
    /// resolves or the deadline tracked by `update_timeout` passes. The
    /// deadline is re-checked after every bounded read, so a device that
    /// returns early ("no data this quantum") simply loops.
    fn read_outcome<F>(
        &mut self,
        reader: &mut FrameReader,
        update_timeout: &F,
    ) -> Result<Outcome, LinkError<S::ReadError, S::WriteError>>
    where
        F: Fn(&mut T) -> Result<u32, LinkError<S::ReadError, S::WriteError>>,
    {
        loop {
            let remaining = update_timeout(&mut self.timer)?;
            match self.serial.read_byte_with_timeout(remaining) {
                Ok(byte) => {
                    if let Some(outcome) = reader.push(byte) {
                        return Ok(outcome);
                    }
                }
                // No byte this quantum; the deadline check at the top of the
                // loop decides whether to keep waiting.
                Err(SerialError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait for one frame with no deadline. Used by the receiver-side waits
    /// that the protocol leaves unbounded; only a transport failure ends
    /// them.
    fn wait_frame_blocking(
        &mut self,
        vocabulary: Vocabulary,
        expected_address: u8,
    ) -> Result<Outcome, LinkError<S::ReadError, S::WriteError>> {
        let mut reader = FrameReader::new(vocabulary, expected_address);
        loop {
            match self.serial.read_byte_with_timeout(POLL_INTERVAL_MS) {
                Ok(byte) => {
                    if let Some(outcome) = reader.push(byte) {
                        return Ok(outcome);
                    }
                }
                Err(SerialError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Transmitter-side handshake: SET until UA, bounded.
    fn connect(&mut self) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        debug!("opening link as transmitter");
        let mut timeouts = 0usize;

        loop {
            self.write_frame(&encode_supervision(ADDR_TX, CTRL_SET))?;

            let update_timeout = self.get_timeout_update_func(self.config.timeout_ms);
            let mut reader = FrameReader::new(Vocabulary::Handshake, ADDR_TX);
            loop {
                match self.read_outcome(&mut reader, &update_timeout) {
                    Ok(Outcome::Accepted(f)) if f.control == CTRL_UA => {
                        debug!("handshake complete");
                        return Ok(());
                    }
                    Ok(_) => continue,
                    Err(LinkError::Timeout) => {
                        self.stats.timeouts += 1;
                        timeouts += 1;
                        if timeouts > self.config.max_retries {
                            warn!("handshake failed after {timeouts} attempts");
                            return Err(LinkError::ConnectionFailed);
                        }
                        debug!("timeout waiting for UA, retransmitting SET");
                        self.stats.retransmissions += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Receiver-side handshake: block until SET, reply UA.
    fn accept(&mut self) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        debug!("opening link as receiver");
        loop {
            match self.wait_frame_blocking(Vocabulary::Handshake, ADDR_TX)? {
                Outcome::Accepted(f) if f.control == CTRL_SET => {
                    self.write_frame(&encode_supervision(ADDR_TX, CTRL_UA))?;
                    debug!("handshake complete");
                    return Ok(());
                }
                _ => continue,
            }
        }
    }

    /// Transmitter-side teardown: DISC until the peer's DISC, then the
    /// final UA.
    fn close_transmitter(&mut self) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        debug!("closing link as transmitter");
        let mut timeouts = 0usize;

        loop {
            self.write_frame(&encode_supervision(ADDR_TX, CTRL_DISC))?;

            let update_timeout = self.get_timeout_update_func(self.config.timeout_ms);
            let mut reader = FrameReader::new(Vocabulary::Teardown, ADDR_RX);
            loop {
                match self.read_outcome(&mut reader, &update_timeout) {
                    Ok(Outcome::Accepted(f)) if f.control == CTRL_DISC => {
                        self.write_frame(&encode_supervision(ADDR_RX, CTRL_UA))?;
                        debug!("teardown complete");
                        return Ok(());
                    }
                    Ok(_) => continue,
                    Err(LinkError::Timeout) => {
                        self.stats.timeouts += 1;
                        timeouts += 1;
                        if timeouts > self.config.max_retries {
                            warn!("no DISC reply after {timeouts} attempts");
                            return Err(LinkError::CloseFailed);
                        }
                        debug!("timeout waiting for DISC, retransmitting");
                        self.stats.retransmissions += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Receiver-side teardown: wait for DISC (unless already seen), reply
    /// with DISC, wait bounded for the final UA.
    fn close_receiver(&mut self) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        debug!("closing link as receiver");

        if !self.peer_disc_seen {
            loop {
                match self.wait_frame_blocking(Vocabulary::Teardown, ADDR_TX)? {
                    Outcome::Accepted(f) if f.control == CTRL_DISC => break,
                    _ => continue,
                }
            }
        }

        let mut timeouts = 0usize;
        loop {
            self.write_frame(&encode_supervision(ADDR_RX, CTRL_DISC))?;

            let update_timeout = self.get_timeout_update_func(self.config.timeout_ms);
            let mut reader = FrameReader::new(Vocabulary::Teardown, ADDR_RX);
            loop {
                match self.read_outcome(&mut reader, &update_timeout) {
                    Ok(Outcome::Accepted(f)) if f.control == CTRL_UA => {
                        debug!("teardown complete");
                        return Ok(());
                    }
                    Ok(_) => continue,
                    Err(LinkError::Timeout) => {
                        self.stats.timeouts += 1;
                        timeouts += 1;
                        if timeouts > self.config.max_retries {
                            warn!("no final UA after {timeouts} attempts");
                            return Err(LinkError::CloseFailed);
                        }
                        debug!("timeout waiting for UA, retransmitting DISC");
                        self.stats.retransmissions += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
