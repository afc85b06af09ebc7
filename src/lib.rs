//! A reliable, ordered, flow-controlled stream of frames on top of UDP. One peer generates
//!  numbered frames and sends them, the other peer reorders them and hands them to the
//!  application strictly in sequence.
//!
//! ## Design
//!
//! * There are exactly two roles: a *sender* that generates and transmits frames, and a
//!    *receiver* that acknowledges, reorders and delivers them. There is no handshake, the
//!    receiver learns the sender's address from the first data datagram it gets.
//! * Every frame is acknowledged individually. The sender keeps unacknowledged frames and sends
//!    no new frames while any frame is unacknowledged.
//! * The receiver detects gaps in the sequence and asks for a range of frames to be
//!    retransmitted. Retransmitted frames are flagged as such on the wire and are kept in a
//!    separate buffer on the receiving side.
//! * The receiver's buffer for out-of-order frames is bounded. When it is full, the receiver
//!    answers with STOP and the sender pauses until it gets RESUME. Retransmitted frames are
//!    accepted while the sender is stopped, so a gap can always be filled.
//! * Both engines are driven by periodic ticks. Each engine has an *active loop* running the ticks
//!    on the tokio runtime, but the ticks can also be called directly, e.g. for deterministic
//!    tests.
//! * Sequence numbers start at zero and do not wrap around. The sender stops generating frames
//!    before the sequence space is exhausted.
//!
//! ## Header
//!
//! Every datagram starts with a fixed-size header, all numbers in network byte order (BE):
//!
//! ```ascii
//! 0: sequence number (u32): the frame's sequence number in a data datagram; the first
//!     requested sequence number in a retransmission request
//! 4: ack number (u32): the acknowledged sequence number in a control datagram; the last
//!     requested sequence number in a retransmission request
//! 8: signal (u8):
//!     * 0 none - a plain acknowledgement
//!     * 1 STOP - the receiver discarded the frame and accepts no new frames until RESUME
//!     * 2 RESUME - the receiver accepts new frames again
//!     * 3 retransmission request for the (inclusive) range of sequence and ack number
//! 9: retransmit flag (u8): 1 if the datagram carries a retransmitted frame, 0 otherwise
//! ```
//!
//! A datagram with a payload after the header is a data datagram, travelling from sender to
//!  receiver. A datagram without payload is a control datagram, travelling from receiver to
//!  sender.
//!
//! ## Flow of a frame
//!
//! ```ascii
//!   sender                                          receiver
//!
//!   frame tick: generate -> send queue
//!   transmission tick: send queue -> unacked  --->  data     -> pending buffer (or STOP)
//!                                                   data (r) -> retransmit buffer
//!   remove from unacked                       <---  ack
//!                                                   reorder tick: next frame -> delivery queue
//!   resend missing frames of the range        <---  retransmission request (on a gap)
//!                                                   consume tick: delivery queue -> consumer
//! ```

pub mod config;
pub mod end_point;
pub mod error;
pub mod frame;
pub mod frame_consumer;
pub mod packet_header;
pub mod receiver;
pub mod send_pipeline;
pub mod sender;
pub mod test_util;
