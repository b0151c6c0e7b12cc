//! Byte-at-a-time frame recognition.
//!
//! [`FrameReader`] is a pure state machine: the session layer feeds it one
//! byte at a time straight off the serial device and owns all blocking and
//! deadline bookkeeping. The reader resolves each well-formed frame into an
//! [`Outcome`] and silently re-synchronizes on everything else, so a stray
//! delimiter or a corrupted header never costs more than the frame it
//! belongs to.
//!
//! ```plain
//! AwaitingDelimiter --FLAG--> DelimiterSeen --addr--> AddressSeen
//!     --ctrl--> ControlSeen --addr^ctrl--> HeaderValidated   (supervision)
//!                                      \-> ReadingPayload    (information)
//! ```
//!
//! A [`FLAG`](crate::frame) byte received in any state outside the payload
//! restarts framing at `DelimiterSeen` rather than discarding it, which is
//! what makes resynchronization free. Inside the payload the flag terminates
//! the frame: the accumulated bytes are destuffed, and their xor, which
//! folds in the transmitted `bcc2` as its final byte, must come out zero for
//! the frame to be accepted.

use crate::frame::{self, is_info_control, FLAG, MAX_PAYLOAD};

/// The longest stuffed byte run a legal information frame can put between
/// its header and its closing delimiter: payload and checksum, every byte
/// escaped.
const MAX_STUFFED: usize = (MAX_PAYLOAD + 1) * 2;

/// Which control bytes are legal, given the protocol phase the session is
/// currently in. Anything outside the vocabulary aborts frame recognition
/// the same way a corrupted control byte would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Vocabulary {
    /// Connection establishment: SET and UA only.
    Handshake,
    /// Data transfer: information frames, their acknowledgements, and the
    /// peer restarting (SET) or tearing down (DISC) the connection.
    Transfer,
    /// Connection teardown: DISC and UA only.
    Teardown,
}

impl Vocabulary {
    fn accepts(self, control: u8) -> bool {
        match self {
            Vocabulary::Handshake => {
                matches!(control, frame::CTRL_SET | frame::CTRL_UA)
            }
            Vocabulary::Transfer => {
                matches!(control, frame::CTRL_SET | frame::CTRL_DISC)
                    || is_info_control(control)
                    || frame::is_rr_control(control)
                    || frame::is_rej_control(control)
            }
            Vocabulary::Teardown => {
                matches!(control, frame::CTRL_DISC | frame::CTRL_UA)
            }
        }
    }
}

/// Parser state. One variant per position within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingDelimiter,
    DelimiterSeen,
    AddressSeen,
    ControlSeen,
    HeaderValidated,
    ReadingPayload,
}

/// A frame that survived header validation and, for information frames, the
/// payload checksum.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RecvFrame {
    pub(crate) control: u8,
    /// Unstuffed payload, without the trailing checksum. Empty for
    /// supervision frames.
    pub(crate) payload: Vec<u8>,
}

/// Resolution of one frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Both checksums matched.
    Accepted(RecvFrame),
    /// The header was valid but the payload checksum was not (or the final
    /// escape sequence was truncated). Carries the sequence bit from the
    /// control byte so the session can reject the right frame number.
    Rejected { sequence: u8 },
}

/// The byte-at-a-time frame parser.
pub(crate) struct FrameReader {
    vocabulary: Vocabulary,
    expected_address: u8,
    state: State,
    address: u8,
    control: u8,
    /// Stuffed payload bytes as they came off the wire, checksum included.
    stuffed: Vec<u8>,
}

impl FrameReader {
    /// Create a parser accepting frames addressed with `expected_address`
    /// and carrying controls legal under `vocabulary`.
    pub(crate) fn new(vocabulary: Vocabulary, expected_address: u8) -> Self {
        Self {
            vocabulary,
            expected_address,
            state: State::AwaitingDelimiter,
            address: 0,
            control: 0,
            stuffed: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::AwaitingDelimiter;
        self.address = 0;
        self.control = 0;
        self.stuffed.clear();
    }

    /// Consume one byte. Returns `Some` when a frame resolves, after which
    /// the parser is ready for the next frame.
    pub(crate) fn push(&mut self, byte: u8) -> Option<Outcome> {
        match self.state {
            State::AwaitingDelimiter => {
                if byte == FLAG {
                    self.state = State::DelimiterSeen;
                }
                None
            }
            State::DelimiterSeen => {
                if byte == FLAG {
                    // Repeated delimiters restart framing in place.
                } else if byte == self.expected_address {
                    self.address = byte;
                    self.state = State::AddressSeen;
                } else {
                    self.state = State::AwaitingDelimiter;
                }
                None
            }
            State::AddressSeen => {
                if byte == FLAG {
                    self.state = State::DelimiterSeen;
                } else if self.vocabulary.accepts(byte) {
                    self.control = byte;
                    self.state = State::ControlSeen;
                } else {
                    self.state = State::AwaitingDelimiter;
                }
                None
            }
            State::ControlSeen => {
                if byte == FLAG {
                    self.state = State::DelimiterSeen;
                } else if byte == self.address ^ self.control {
                    // Header checksum holds; the payload may now be trusted.
                    if is_info_control(self.control) {
                        self.stuffed.clear();
                        self.state = State::ReadingPayload;
                    } else {
                        self.state = State::HeaderValidated;
                    }
                } else {
                    self.state = State::AwaitingDelimiter;
                }
                None
            }
            State::HeaderValidated => {
                if byte == FLAG {
                    let control = self.control;
                    self.reset();
                    return Some(Outcome::Accepted(RecvFrame {
                        control,
                        payload: Vec::new(),
                    }));
                }
                self.state = State::AwaitingDelimiter;
                None
            }
            State::ReadingPayload => {
                if byte == FLAG {
                    self.finish_information()
                } else if self.stuffed.len() >= MAX_STUFFED {
                    // No legal frame is this long. Treat the run as line
                    // noise and wait for the next delimiter.
                    self.reset();
                    None
                } else {
                    self.stuffed.push(byte);
                    None
                }
            }
        }
    }

    /// Close out an information frame on its terminating delimiter. The
    /// accumulated bytes include the transmitted `bcc2`, so the destuffed
    /// run must xor to zero for the payload checksum to match.
    fn finish_information(&mut self) -> Option<Outcome> {
        let sequence = frame::info_sequence(self.control);
        let control = self.control;
        let stuffed = std::mem::take(&mut self.stuffed);
        self.reset();

        match frame::destuff(&stuffed) {
            Ok(mut payload) if !payload.is_empty() && frame::checksum(&payload) == 0 => {
                // Strip the checksum byte; everything before it is payload.
                payload.pop();
                Some(Outcome::Accepted(RecvFrame { control, payload }))
            }
            _ => Some(Outcome::Rejected { sequence }),
        }
    }
}
