//! Serial device abstraction. The protocol engine is written against the
//! [`Serial`] trait rather than any concrete device, so the same session code
//! runs over a real UART, a USB-serial adapter, or an in-memory channel pair
//! in tests.
//!
//! A device implementation must map its own "no byte arrived in time"
//! condition to [`SerialError::Timeout`]. The session layer treats that
//! variant as recoverable and uses it to poll its retransmission deadline;
//! every other error is considered a transport failure and is propagated
//! without retry.

use thiserror::Error;

/// Enumeration of possible serial device errors.
///
/// # Generic Parameters
/// - `RE`: Device specific read error type.
/// - `WE`: Device specific write error type.
#[derive(Debug, Error)]
pub enum SerialError<RE, WE> {
    /// Error occurred during serial read.
    #[error("serial device read error")]
    ReadError(RE),
    /// Error occurred during serial write.
    #[error("serial device write error")]
    WriteError(WE),
    /// No byte arrived within the allotted window.
    #[error("serial read timed out")]
    Timeout,
}

/// A duplex byte-oriented serial device.
pub trait Serial {
    /// Device specific read error type.
    type ReadError;
    /// Device specific write error type.
    type WriteError;

    /// Read a single byte, blocking for at most `timeout_ms` milliseconds.
    ///
    /// # Returns
    /// - `Ok(u8)`: Byte read successfully.
    /// - [`Err(SerialError::Timeout)`](SerialError): No byte arrived in time.
    /// - [`Err(SerialError)`](SerialError): The device failed.
    fn read_byte_with_timeout(
        &mut self,
        timeout_ms: u32,
    ) -> Result<u8, SerialError<Self::ReadError, Self::WriteError>>;

    /// Write all of the given bytes to the device.
    fn write_bytes(
        &mut self,
        bytes: &[u8],
    ) -> Result<(), SerialError<Self::ReadError, Self::WriteError>>;
}
