//! Timestamp source used for retransmission deadlines. The session layer
//! never sleeps on the timer; it records a start timestamp when an attempt
//! begins and re-checks the elapsed time after every bounded serial read.

/// A millisecond-resolution monotonic timestamp source.
pub trait Timer {
    /// Get the current timestamp in milliseconds. The epoch is arbitrary but
    /// must not move backwards during a session.
    fn get_timestamp_ms(&mut self) -> u32;
}
