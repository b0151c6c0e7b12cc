//! A stop-and-wait data-link protocol over serial lines.
//!
//! The client provides a serial device instance and a timer instance, which
//! respectively implement the [`Serial`] and [`Timer`] traits. A [`Session`]
//! opened over them establishes a connection with the peer, carries payloads
//! as delimited, checksummed, byte-stuffed frames, and recovers from
//! corruption and loss by retransmission. Each connection has a fixed
//! [`Transmitter`](Role::Transmitter) and a fixed [`Receiver`](Role::Receiver)
//! end; the transmitter calls [`send`](Session::send), the receiver calls
//! [`receive`](Session::receive), and either end finishes with
//! [`close`](Session::close).
//!
//! The [`transfer`] module layers a packetized byte-stream transfer on top of
//! single-frame sends.
//!
//! Below shows an example.
//!
//! ```rust
//! use crossbeam::channel::{self, Receiver, RecvError, SendError, Sender};
//! use serlink::{LinkConfig, Role, Serial, SerialError, Session, Timer};
//! use std::{
//!     thread,
//!     time::{Duration, Instant},
//! };
//!
//! fn main() {
//!     // Create a pair of connected serial devices.
//!     let (serial0, serial1) = MockSerial::new_pair();
//!
//!     // Start a thread that accepts the connection and collects one payload.
//!     let thread_receive = thread::spawn(|| {
//!         let config = LinkConfig {
//!             role: Role::Receiver,
//!             timeout_ms: 1000,
//!             max_retries: 3,
//!         };
//!         let mut sess = Session::open(serial0, MockTimer::new(), config).unwrap();
//!
//!         let payload = sess.receive().unwrap();
//!         assert_eq!(payload, b"hello world!");
//!
//!         sess.close(false).unwrap();
//!     });
//!
//!     // Start a thread that connects and sends "hello world!".
//!     let thread_send = thread::spawn(|| {
//!         let config = LinkConfig {
//!             role: Role::Transmitter,
//!             timeout_ms: 1000,
//!             max_retries: 3,
//!         };
//!         let mut sess = Session::open(serial1, MockTimer::new(), config).unwrap();
//!
//!         sess.send("hello world!".as_bytes()).unwrap();
//!
//!         sess.close(false).unwrap();
//!     });
//!
//!     thread_receive.join().unwrap();
//!     thread_send.join().unwrap();
//! }
//!
//! /// Simulated timer counting from its creation.
//! struct MockTimer {
//!     start: Instant,
//! }
//!
//! impl MockTimer {
//!     fn new() -> Self {
//!         Self {
//!             start: Instant::now(),
//!         }
//!     }
//! }
//!
//! impl Timer for MockTimer {
//!     fn get_timestamp_ms(&mut self) -> u32 {
//!         self.start.elapsed().as_millis() as u32
//!     }
//! }
//!
//! /// Simulated serial device. It is simulated with `crossbeam`'s MPMC queues.
//! struct MockSerial {
//!     send: Sender<u8>,
//!     recv: Receiver<u8>,
//! }
//!
//! impl MockSerial {
//!     /// Get a pair of connected serial devices.
//!     fn new_pair() -> (Self, Self) {
//!         let (send0, recv0) = channel::unbounded();
//!         let (send1, recv1) = channel::unbounded();
//!
//!         (
//!             Self {
//!                 send: send0,
//!                 recv: recv1,
//!             },
//!             Self {
//!                 send: send1,
//!                 recv: recv0,
//!             },
//!         )
//!     }
//! }
//!
//! impl Serial for MockSerial {
//!     type ReadError = RecvError;
//!     type WriteError = SendError<u8>;
//!
//!     /// Read a byte from the channel with a timeout.
//!     fn read_byte_with_timeout(
//!         &mut self,
//!         timeout_ms: u32,
//!     ) -> Result<u8, SerialError<Self::ReadError, Self::WriteError>> {
//!         // MUST map the timeout error to the specific `SerialError` variant
//!         // because the protocol stack treats timeout in a special way as it
//!         // is sometimes recoverable.
//!         self.recv
//!             .recv_timeout(Duration::from_millis(timeout_ms as u64))
//!             .map_err(|e| match e {
//!                 channel::RecvTimeoutError::Timeout => SerialError::Timeout,
//!                 channel::RecvTimeoutError::Disconnected => SerialError::ReadError(RecvError),
//!             })
//!     }
//!
//!     /// Write bytes to the channel.
//!     fn write_bytes(
//!         &mut self,
//!         bytes: &[u8],
//!     ) -> Result<(), SerialError<Self::ReadError, Self::WriteError>> {
//!         for &byte in bytes {
//!             self.send.send(byte).map_err(SerialError::WriteError)?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

mod frame;
mod reader;
mod serial;
mod session;
mod timer;

pub mod transfer;

#[cfg(test)]
mod tests;

pub use frame::MAX_PAYLOAD;
pub use serial::{Serial, SerialError};
pub use session::{LinkConfig, LinkError, LinkStats, Role, Session};
pub use timer::Timer;
