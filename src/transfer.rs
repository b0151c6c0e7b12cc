//! Data transfer on top of a [`Session`]: a byte stream of arbitrary length
//! is carried as a START control packet, a run of DATA packets each fitting
//! one information frame, and an END control packet.
//!
//! Control packets announce the total size as a type-length-value field:
//!
//! ```plain
//! +------+----------+----------+----------+-----------+
//! | kind | TLV_SIZE | len = 2  | size lo  | size hi   |
//! +------+----------+----------+----------+-----------+
//! ```
//!
//! DATA packets carry a big-endian length so the receiver can verify it
//! against the frame payload:
//!
//! ```plain
//! +------+---------+---------+-----------------+
//! | kind | len hi  | len lo  | up to 997 bytes |
//! +------+---------+---------+-----------------+
//! ```
//!
//! The END packet repeats the size announced by START; a mismatch between
//! the announcement and the accumulated bytes fails the transfer.

use crate::{
    frame::MAX_PAYLOAD,
    serial::Serial,
    session::{LinkError, Session},
    timer::Timer,
};
use log::{debug, trace};
use thiserror::Error;

/// Packet kind: transfer start announcement.
const KIND_START: u8 = 0x01;

/// Packet kind: one chunk of the stream.
const KIND_DATA: u8 = 0x02;

/// Packet kind: transfer end announcement.
const KIND_END: u8 = 0x03;

/// TLV field tag for the total transfer size.
const TLV_SIZE: u8 = 0x00;

/// Bytes of packet framing prepended to each DATA chunk.
const DATA_HEADER: usize = 3;

/// The largest stream chunk one DATA packet can carry.
pub const MAX_CHUNK: usize = MAX_PAYLOAD - DATA_HEADER;

/// Enumeration of possible transfer errors.
#[derive(Debug, Error)]
pub enum TransferError<RE, WE> {
    /// The underlying link session failed.
    #[error("link session error")]
    Link(LinkError<RE, WE>),
    /// A packet arrived whose framing does not follow the transfer
    /// contract.
    #[error("malformed transfer packet")]
    BadPacket,
    /// The accumulated stream does not match the size announced at start.
    #[error("transfer size mismatch: announced {announced}, received {received}")]
    SizeMismatch { announced: usize, received: usize },
    /// The stream is too large to announce in the 16-bit size field.
    #[error("stream exceeds the announceable transfer size")]
    StreamTooLarge,
}

/// Implement conversion from [`LinkError`] to [`TransferError`].
impl<RE, WE> From<LinkError<RE, WE>> for TransferError<RE, WE> {
    fn from(le: LinkError<RE, WE>) -> Self {
        TransferError::Link(le)
    }
}

/// Build a START or END control packet announcing `size`.
fn encode_control(kind: u8, size: u16) -> [u8; 5] {
    let [lo, hi] = size.to_le_bytes();
    [kind, TLV_SIZE, 0x02, lo, hi]
}

/// Parse a START or END control packet, returning the announced size.
fn decode_control(packet: &[u8], kind: u8) -> Option<usize> {
    match packet {
        [k, TLV_SIZE, 0x02, lo, hi] if *k == kind => {
            Some(u16::from_le_bytes([*lo, *hi]) as usize)
        }
        _ => None,
    }
}

/// Send an entire byte stream over the session: START, the DATA chunks, END.
///
/// # Returns
/// - `Ok(())`: Every chunk was acknowledged.
/// - [`Err(TransferError::StreamTooLarge)`](TransferError): `stream` does
///   not fit the announceable size; nothing was transmitted.
/// - [`Err(TransferError)`](TransferError): The link failed mid-transfer.
pub fn send_stream<S, T>(
    session: &mut Session<S, T>,
    stream: &[u8],
) -> Result<(), TransferError<S::ReadError, S::WriteError>>
where
    S: Serial,
    T: Timer,
{
    let size = u16::try_from(stream.len()).map_err(|_| TransferError::StreamTooLarge)?;

    debug!("starting transfer of {size} bytes");
    session.send(&encode_control(KIND_START, size))?;

    for chunk in stream.chunks(MAX_CHUNK) {
        let mut packet = Vec::with_capacity(DATA_HEADER + chunk.len());
        packet.push(KIND_DATA);
        packet.push((chunk.len() >> 8) as u8);
        packet.push((chunk.len() & 0xff) as u8);
        packet.extend_from_slice(chunk);
        session.send(&packet)?;
        trace!("sent data chunk of {} bytes", chunk.len());
    }

    session.send(&encode_control(KIND_END, size))?;
    debug!("transfer complete");
    Ok(())
}

/// Receive an entire byte stream over the session: wait for START,
/// accumulate DATA chunks until END, verify the announced size.
///
/// # Returns
/// - `Ok(Vec<u8>)`: The reassembled stream.
/// - [`Err(TransferError::BadPacket)`](TransferError): A packet violated
///   the transfer contract.
/// - [`Err(TransferError::SizeMismatch)`](TransferError): The END
///   announcement disagrees with the bytes accumulated.
/// - [`Err(TransferError)`](TransferError): The link failed mid-transfer.
pub fn receive_stream<S, T>(
    session: &mut Session<S, T>,
) -> Result<Vec<u8>, TransferError<S::ReadError, S::WriteError>>
where
    S: Serial,
    T: Timer,
{
    let start = session.receive()?;
    let announced = decode_control(&start, KIND_START).ok_or(TransferError::BadPacket)?;
    debug!("incoming transfer of {announced} bytes");

    let mut stream = Vec::with_capacity(announced);
    loop {
        let packet = session.receive()?;
        match packet.first() {
            Some(&KIND_DATA) => {
                if packet.len() < DATA_HEADER {
                    return Err(TransferError::BadPacket);
                }
                let declared = ((packet[1] as usize) << 8) | packet[2] as usize;
                let chunk = &packet[DATA_HEADER..];
                if declared != chunk.len() {
                    return Err(TransferError::BadPacket);
                }
                stream.extend_from_slice(chunk);
                trace!("received data chunk of {} bytes", chunk.len());
            }
            Some(&KIND_END) => {
                let end_size = decode_control(&packet, KIND_END).ok_or(TransferError::BadPacket)?;
                if end_size != announced || stream.len() != announced {
                    return Err(TransferError::SizeMismatch {
                        announced,
                        received: stream.len(),
                    });
                }
                debug!("transfer complete, {} bytes", stream.len());
                return Ok(stream);
            }
            _ => return Err(TransferError::BadPacket),
        }
    }
}
