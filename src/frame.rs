//! Frame construction and byte stuffing.
//!
//! Two frame shapes travel on the wire. Supervision frames carry control
//! information only and are always exactly five bytes:
//!
//! ```plain
//! +------+---------+---------+-----------+------+
//! | FLAG | address | control | addr^ctrl | FLAG |
//! +------+---------+---------+-----------+------+
//! ```
//!
//! Information frames additionally carry a payload and a second checksum,
//! the xor of all unstuffed payload bytes:
//!
//! ```plain
//! +------+---------+---------+------+-----------------+------+------+
//! | FLAG | address | seq<<7  | bcc1 | stuffed payload | bcc2 | FLAG |
//! +------+---------+---------+------+-----------------+------+------+
//! ```
//!
//! The [`FLAG`] byte appears only as a frame delimiter in well-formed
//! traffic. Payload occurrences of [`FLAG`] or [`ESCAPE`] are transmitted as
//! the two-byte sequence `[ESCAPE, byte ^ XOR_MASK]`. The `bcc2` checksum is
//! computed over the unstuffed payload and is itself stuffed when it happens
//! to collide with a reserved byte; skipping that step would corrupt the
//! frame boundary.

use static_assertions::const_assert;
use thiserror::Error;

/// The frame delimiter, also used as the resynchronization sentinel.
pub(crate) const FLAG: u8 = 0x7e;

/// The escape byte.
pub(crate) const ESCAPE: u8 = 0x7d;

/// The xor pattern applied to each escaped byte.
const XOR_MASK: u8 = 0x20;

/// Address of transmitter commands and of receiver replies to them.
pub(crate) const ADDR_TX: u8 = 0x03;

/// Address of receiver commands and of transmitter replies to them.
pub(crate) const ADDR_RX: u8 = 0x01;

/// Control byte: connection request.
pub(crate) const CTRL_SET: u8 = 0x03;

/// Control byte: unnumbered acknowledgement.
pub(crate) const CTRL_UA: u8 = 0x07;

/// Control byte: disconnect request.
pub(crate) const CTRL_DISC: u8 = 0x0b;

/// Control byte base for receiver-ready acknowledgements. `RR(n)` reports
/// `n` as the next expected information frame number.
const CTRL_RR0: u8 = 0xaa;

/// Control byte base for rejects. `REJ(n)` reports `n` as the rejected
/// information frame number.
const CTRL_REJ0: u8 = 0x54;

/// The maximum number of payload bytes an information frame can carry,
/// before stuffing.
pub const MAX_PAYLOAD: usize = 1000;

/// Return whether the given byte must be escaped before transmission.
pub(crate) const fn need_escape(byte: u8) -> bool {
    byte == FLAG || byte == ESCAPE
}

/// The escape procedure is sound if escaping the bytes that need escape
/// yields bytes that need no further escape.
#[allow(dead_code)]
const fn is_escape_sound() -> bool {
    need_escape(FLAG)
        && need_escape(ESCAPE)
        && !need_escape(FLAG ^ XOR_MASK)
        && !need_escape(ESCAPE ^ XOR_MASK)
}
const_assert!(is_escape_sound());

/// Truncated escape sequence: an [`ESCAPE`] byte was the final byte of the
/// stream, leaving nothing to un-escape.
#[derive(Debug, PartialEq, Eq, Error)]
#[error("escape byte terminates the stream")]
pub(crate) struct MalformedEscape;

/// Xor-fold the given bytes into a single checksum byte.
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Control byte of an information frame carrying sequence bit `seq`.
pub(crate) const fn info_control(seq: u8) -> u8 {
    (seq & 1) << 7
}

/// Return whether `control` denotes an information frame.
pub(crate) const fn is_info_control(control: u8) -> bool {
    control == info_control(0) || control == info_control(1)
}

/// Sequence bit carried by an information frame control byte.
pub(crate) const fn info_sequence(control: u8) -> u8 {
    control >> 7
}

/// Receiver-ready control byte acknowledging everything before
/// `next_expected` and asking for that frame number next.
pub(crate) const fn rr_control(next_expected: u8) -> u8 {
    CTRL_RR0 + (next_expected & 1)
}

/// Return whether `control` is a receiver-ready acknowledgement.
pub(crate) const fn is_rr_control(control: u8) -> bool {
    control == rr_control(0) || control == rr_control(1)
}

/// Reject control byte naming the information frame number being rejected.
pub(crate) const fn rej_control(rejected: u8) -> u8 {
    CTRL_REJ0 + (rejected & 1)
}

/// Return whether `control` is a reject.
pub(crate) const fn is_rej_control(control: u8) -> bool {
    control == rej_control(0) || control == rej_control(1)
}

/// Apply the unescape transform to a byte that followed an [`ESCAPE`].
pub(crate) const fn unescape(byte: u8) -> u8 {
    byte ^ XOR_MASK
}

/// Transcode a payload into its escaped on-wire representation. The output
/// is never shorter than the input and at most twice as long.
pub(crate) fn stuff(payload: &[u8]) -> Vec<u8> {
    let mut stuffed = Vec::with_capacity(payload.len() * 2);
    for &byte in payload {
        if need_escape(byte) {
            stuffed.push(ESCAPE);
            stuffed.push(byte ^ XOR_MASK);
        } else {
            stuffed.push(byte);
        }
    }
    stuffed
}

/// Reverse the [`stuff`] transform.
///
/// # Returns
/// - `Ok(Vec<u8>)`: The original payload.
/// - `Err(MalformedEscape)`: The stream ended on an [`ESCAPE`] byte.
pub(crate) fn destuff(bytes: &[u8]) -> Result<Vec<u8>, MalformedEscape> {
    let mut payload = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&byte) = iter.next() {
        if byte == ESCAPE {
            let &next = iter.next().ok_or(MalformedEscape)?;
            payload.push(unescape(next));
        } else {
            payload.push(byte);
        }
    }
    Ok(payload)
}

/// Build a supervision frame: SET, UA, DISC, RR(n) or REJ(n).
pub(crate) fn encode_supervision(address: u8, control: u8) -> [u8; 5] {
    [FLAG, address, control, address ^ control, FLAG]
}

/// Build an information frame carrying `payload` under sequence bit `seq`.
/// The buffer is sized once for the worst case (every byte escaped plus the
/// framing overhead) and never reallocated.
pub(crate) fn encode_information(seq: u8, payload: &[u8]) -> Vec<u8> {
    let control = info_control(seq);
    let bcc2 = checksum(payload);

    let mut frame = Vec::with_capacity(payload.len() * 2 + 7);
    frame.push(FLAG);
    frame.push(ADDR_TX);
    frame.push(control);
    frame.push(ADDR_TX ^ control);
    frame.extend_from_slice(&stuff(payload));
    if need_escape(bcc2) {
        frame.push(ESCAPE);
        frame.push(bcc2 ^ XOR_MASK);
    } else {
        frame.push(bcc2);
    }
    frame.push(FLAG);
    frame
}

/// Unit tests for the [`frame`](crate::frame) module.
#[cfg(test)]
mod tests {
    use super::*;

    /// Round-trip: `destuff(stuff(b)) == b` for payloads containing the
    /// reserved bytes.
    #[test]
    fn stuff_roundtrip() {
        let payloads: &[&[u8]] = &[
            b"",
            b"Hello, World",
            &[FLAG],
            &[ESCAPE],
            &[FLAG, ESCAPE, FLAG, ESCAPE],
            &[0x00, 0x7e, 0x7d, 0x20, 0xff],
        ];
        for &payload in payloads {
            assert_eq!(destuff(&stuff(payload)).unwrap(), payload);
        }
    }

    /// Round-trip over every possible byte value.
    #[test]
    fn stuff_roundtrip_all_bytes() {
        let payload: Vec<u8> = (0..=255).collect();
        let stuffed = stuff(&payload);
        assert!(stuffed.len() >= payload.len());
        assert_eq!(destuff(&stuffed).unwrap(), payload);
    }

    /// Stuffed output never contains a bare reserved byte.
    #[test]
    fn stuffed_output_has_no_bare_flag() {
        let stuffed = stuff(&[FLAG, ESCAPE, 0x42]);
        assert_eq!(
            stuffed,
            [ESCAPE, FLAG ^ 0x20, ESCAPE, ESCAPE ^ 0x20, 0x42]
        );
    }

    #[test]
    fn destuff_truncated_escape() {
        assert_eq!(destuff(&[0x42, ESCAPE]), Err(MalformedEscape));
    }

    #[test]
    fn checksum_is_xor_fold() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(&[0xaa]), 0xaa);
        assert_eq!(checksum(&[0x0f, 0xf0, 0xff]), 0);
        assert_eq!(checksum(b"HELLO"), b'H' ^ b'E' ^ b'L' ^ b'L' ^ b'O');
    }

    #[test]
    fn supervision_frame_shape() {
        let frame = encode_supervision(ADDR_TX, CTRL_SET);
        assert_eq!(frame, [FLAG, 0x03, 0x03, 0x00, FLAG]);

        let frame = encode_supervision(ADDR_TX, CTRL_UA);
        assert_eq!(frame, [FLAG, 0x03, 0x07, 0x03 ^ 0x07, FLAG]);
    }

    #[test]
    fn information_frame_shape() {
        let frame = encode_information(0, b"HELLO");
        let bcc2 = checksum(b"HELLO");
        assert_eq!(frame[0], FLAG);
        assert_eq!(frame[1], ADDR_TX);
        assert_eq!(frame[2], 0x00);
        assert_eq!(frame[3], ADDR_TX);
        assert_eq!(&frame[4..9], b"HELLO");
        assert_eq!(frame[9], bcc2);
        assert_eq!(frame[10], FLAG);
    }

    #[test]
    fn information_frame_sequence_one() {
        let frame = encode_information(1, b"x");
        assert_eq!(frame[2], 0x80);
        assert_eq!(frame[3], ADDR_TX ^ 0x80);
    }

    /// A payload whose checksum collides with a reserved byte must have the
    /// checksum itself escaped on the wire.
    #[test]
    fn information_frame_stuffs_colliding_checksum() {
        // Single-byte payload equal to FLAG: bcc2 == FLAG as well, so both
        // the payload byte and the checksum appear escaped.
        let frame = encode_information(0, &[FLAG]);
        assert_eq!(
            frame,
            [
                FLAG,
                ADDR_TX,
                0x00,
                ADDR_TX,
                ESCAPE,
                FLAG ^ 0x20,
                ESCAPE,
                FLAG ^ 0x20,
                FLAG,
            ]
        );
    }

    #[test]
    fn rr_and_rej_controls() {
        assert_eq!(rr_control(0), 0xaa);
        assert_eq!(rr_control(1), 0xab);
        assert_eq!(rej_control(0), 0x54);
        assert_eq!(rej_control(1), 0x55);
        assert!(is_rr_control(0xaa) && is_rr_control(0xab));
        assert!(is_rej_control(0x54) && is_rej_control(0x55));
        assert!(!is_rr_control(0x54) && !is_rej_control(0xaa));
    }

    #[test]
    fn info_controls() {
        assert_eq!(info_control(0), 0x00);
        assert_eq!(info_control(1), 0x80);
        assert_eq!(info_sequence(0x80), 1);
        assert_eq!(info_sequence(0x00), 0);
        assert!(is_info_control(0x00) && is_info_control(0x80));
        assert!(!is_info_control(CTRL_SET));
    }
}
