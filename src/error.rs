use thiserror::Error;
use crate::frame::SeqNum;

/// Error kinds of the protocol engines. None of them is fatal to a session: malformed datagrams
///  are dropped, a full queue is a regular admission refusal, and an unrecoverable gap shows up
///  as missing data downstream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RudpError {
    #[error("malformed header: expected at least {expected} bytes, got {actual}")]
    MalformedHeader {
        expected: usize,
        actual: usize,
    },

    #[error("unknown signal value {0}")]
    UnknownSignal(u8),

    #[error("{0} is full")]
    QueueFull(&'static str),

    /// A retransmission was requested for frames that were already purged from the send buffer
    #[error("frames {from}..={to} are no longer available for retransmission")]
    UnrecoverableGap {
        from: SeqNum,
        to: SeqNum,
    },
}
