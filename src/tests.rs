//! Shared test doubles and two-ended exchanges. The single-ended unit tests
//! in the other modules borrow the doubles defined here; the tests in this
//! module connect two real sessions through an in-memory channel pair and
//! run full conversations across threads.

use crate::{
    serial::{Serial, SerialError},
    session::{LinkConfig, LinkError, Role, Session},
    timer::Timer,
    transfer,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendError, Sender};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One end of an in-memory serial link. Two of these, cross-wired over
/// unbounded channels, emulate a duplex cable between threads.
pub(crate) struct MockSerial {
    sender: Sender<u8>,
    receiver: Receiver<u8>,
}

impl MockSerial {
    /// Build a cross-wired pair. Bytes written to one end become readable
    /// at the other.
    pub(crate) fn new_pair() -> (MockSerial, MockSerial) {
        let (sender_a, receiver_a) = channel::unbounded();
        let (sender_b, receiver_b) = channel::unbounded();
        (
            MockSerial {
                sender: sender_a,
                receiver: receiver_b,
            },
            MockSerial {
                sender: sender_b,
                receiver: receiver_a,
            },
        )
    }
}

impl Serial for MockSerial {
    type ReadError = RecvTimeoutError;
    type WriteError = SendError<u8>;

    fn read_byte_with_timeout(
        &mut self,
        timeout_ms: u32,
    ) -> Result<u8, SerialError<Self::ReadError, Self::WriteError>> {
        match self
            .receiver
            .recv_timeout(Duration::from_millis(timeout_ms as u64))
        {
            Ok(byte) => Ok(byte),
            Err(RecvTimeoutError::Timeout) => Err(SerialError::Timeout),
            Err(e) => Err(SerialError::ReadError(e)),
        }
    }

    fn write_bytes(
        &mut self,
        bytes: &[u8],
    ) -> Result<(), SerialError<Self::ReadError, Self::WriteError>> {
        for &byte in bytes {
            self.sender.send(byte).map_err(SerialError::WriteError)?;
        }
        Ok(())
    }
}

/// Wall-clock timer for the threaded exchanges.
pub(crate) struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    pub(crate) fn new() -> SystemTimer {
        SystemTimer {
            start: Instant::now(),
        }
    }
}

impl Timer for SystemTimer {
    fn get_timestamp_ms(&mut self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// A timer stuck at zero. Deadlines armed against it never expire, so tests
/// using it must resolve through the serial script alone.
pub(crate) struct FrozenTimer;

impl Timer for FrozenTimer {
    fn get_timestamp_ms(&mut self) -> u32 {
        0
    }
}

/// A timer that jumps forward by a fixed step on every reading, forcing
/// deadline expiries without any real waiting.
#[derive(Debug)]
pub(crate) struct TickTimer {
    now: u32,
    step: u32,
}

impl TickTimer {
    pub(crate) fn new(step: u32) -> TickTimer {
        TickTimer { now: 0, step }
    }
}

impl Timer for TickTimer {
    fn get_timestamp_ms(&mut self) -> u32 {
        self.now += self.step;
        self.now
    }
}

/// A single-ended serial device fed a fixed byte script. Reads pop the
/// script; writes accumulate for inspection. An exhausted script reads as a
/// device failure so a misbehaving test fails instead of hanging.
pub(crate) struct ScriptedSerial {
    incoming: VecDeque<u8>,
    pub(crate) written: Vec<u8>,
}

impl ScriptedSerial {
    pub(crate) fn new(incoming: &[u8]) -> ScriptedSerial {
        ScriptedSerial {
            incoming: incoming.iter().copied().collect(),
            written: Vec::new(),
        }
    }
}

impl Serial for ScriptedSerial {
    type ReadError = ();
    type WriteError = ();

    fn read_byte_with_timeout(
        &mut self,
        _timeout_ms: u32,
    ) -> Result<u8, SerialError<Self::ReadError, Self::WriteError>> {
        self.incoming
            .pop_front()
            .ok_or(SerialError::ReadError(()))
    }

    fn write_bytes(
        &mut self,
        bytes: &[u8],
    ) -> Result<(), SerialError<Self::ReadError, Self::WriteError>> {
        self.written.extend_from_slice(bytes);
        Ok(())
    }
}

/// A serial device whose peer never answers: every read times out. Writes
/// are recorded one frame per call, shared across clones so the test can
/// inspect them after the session consumed its device.
#[derive(Clone, Debug)]
pub(crate) struct SilentSerial {
    writes: std::rc::Rc<std::cell::RefCell<Vec<Vec<u8>>>>,
}

impl SilentSerial {
    pub(crate) fn new() -> SilentSerial {
        SilentSerial {
            writes: std::rc::Rc::new(std::cell::RefCell::new(Vec::new())),
        }
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.borrow().clone()
    }
}

impl Serial for SilentSerial {
    type ReadError = ();
    type WriteError = ();

    fn read_byte_with_timeout(
        &mut self,
        _timeout_ms: u32,
    ) -> Result<u8, SerialError<Self::ReadError, Self::WriteError>> {
        Err(SerialError::Timeout)
    }

    fn write_bytes(
        &mut self,
        bytes: &[u8],
    ) -> Result<(), SerialError<Self::ReadError, Self::WriteError>> {
        self.writes.borrow_mut().push(bytes.to_vec());
        Ok(())
    }
}

fn config(role: Role) -> LinkConfig {
    LinkConfig {
        role,
        timeout_ms: 1000,
        max_retries: 3,
    }
}

/// Full conversation: open, two payloads, three-way teardown. The receiver
/// learns of the teardown through `receive` surfacing the peer's DISC.
#[test]
fn hello_world_over_channel_pair() {
    let (serial_tx, serial_rx) = MockSerial::new_pair();

    let transmitter = std::thread::spawn(move || {
        let mut session =
            Session::open(serial_tx, SystemTimer::new(), config(Role::Transmitter)).unwrap();
        assert_eq!(session.send(b"Hello, World!").unwrap(), 13);
        assert_eq!(session.send(b"Goodbye!").unwrap(), 8);
        session.close(true).unwrap();
    });

    let mut session =
        Session::open(serial_rx, SystemTimer::new(), config(Role::Receiver)).unwrap();
    assert_eq!(session.receive().unwrap(), b"Hello, World!");
    assert_eq!(session.receive().unwrap(), b"Goodbye!");
    assert!(matches!(
        session.receive().unwrap_err(),
        LinkError::PeerDisconnecting
    ));
    session.close(false).unwrap();

    transmitter.join().unwrap();
}

/// Payloads containing the delimiter and escape bytes survive the wire
/// unchanged, and the sequence bit keeps alternating across many frames.
#[test]
fn reserved_bytes_survive_the_wire() {
    let payloads: Vec<Vec<u8>> = vec![
        vec![0x7e, 0x7d, 0x7e, 0x7d],
        (0..=255).collect(),
        vec![0x00],
        b"plain text".to_vec(),
    ];

    let (serial_tx, serial_rx) = MockSerial::new_pair();

    let sent = payloads.clone();
    let transmitter = std::thread::spawn(move || {
        let mut session =
            Session::open(serial_tx, SystemTimer::new(), config(Role::Transmitter)).unwrap();
        for payload in &sent {
            session.send(payload).unwrap();
        }
        session.close(false).unwrap();
    });

    let mut session =
        Session::open(serial_rx, SystemTimer::new(), config(Role::Receiver)).unwrap();
    for payload in &payloads {
        assert_eq!(&session.receive().unwrap(), payload);
    }
    // Teardown without a prior receive of DISC: close waits for it.
    session.close(false).unwrap();

    transmitter.join().unwrap();
}

/// A stream larger than one frame travels as START, several DATA chunks and
/// END, and reassembles byte-identical.
#[test]
fn stream_transfer_roundtrip() {
    let stream: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();

    let (serial_tx, serial_rx) = MockSerial::new_pair();

    let sent = stream.clone();
    let transmitter = std::thread::spawn(move || {
        let mut session =
            Session::open(serial_tx, SystemTimer::new(), config(Role::Transmitter)).unwrap();
        transfer::send_stream(&mut session, &sent).unwrap();
        session.close(false).unwrap();
    });

    let mut session =
        Session::open(serial_rx, SystemTimer::new(), config(Role::Receiver)).unwrap();
    let received = transfer::receive_stream(&mut session).unwrap();
    assert_eq!(received, stream);
    session.close(false).unwrap();

    transmitter.join().unwrap();
}

/// An empty stream is a legal transfer: START and END with no DATA between.
#[test]
fn empty_stream_transfer() {
    let (serial_tx, serial_rx) = MockSerial::new_pair();

    let transmitter = std::thread::spawn(move || {
        let mut session =
            Session::open(serial_tx, SystemTimer::new(), config(Role::Transmitter)).unwrap();
        transfer::send_stream(&mut session, &[]).unwrap();
        session.close(false).unwrap();
    });

    let mut session =
        Session::open(serial_rx, SystemTimer::new(), config(Role::Receiver)).unwrap();
    assert!(transfer::receive_stream(&mut session).unwrap().is_empty());
    session.close(false).unwrap();

    transmitter.join().unwrap();
}
