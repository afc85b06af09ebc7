use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::{Display, Formatter};

/// Sequence number of a frame in the stream. The sender starts at zero and never reuses a
///  number; there is no wrap-around, the sequence space ends at `u32::MAX`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SeqNum(u32);

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);
    pub const MAX: SeqNum = SeqNum(u32::MAX);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Option<SeqNum> {
        self.0.checked_add(1).map(SeqNum)
    }

    pub fn prev(&self) -> Option<SeqNum> {
        self.0.checked_sub(1).map(SeqNum)
    }
}

/// A unit of application data with its sequence number. The payload is an owned, cheaply
///  cloneable buffer, so moving a frame between queues never copies its data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub seq_num: SeqNum,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(seq_num: SeqNum, payload: Bytes) -> Frame {
        Frame { seq_num, payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Produces the payload for newly generated frames on the sender side.
pub trait FrameSource: Send + Sync + 'static {
    fn next_payload(&mut self, seq_num: SeqNum, frame_size: usize) -> Bytes;
}

/// Fills each frame with its own sequence number (u32 BE), repeated, so a receiver can verify
///  that it got the right content for a given sequence number.
#[derive(Default)]
pub struct PatternFrameSource;

impl PatternFrameSource {
    pub fn payload_for(seq_num: SeqNum, frame_size: usize) -> Bytes {
        let pattern = seq_num.to_raw().to_be_bytes();

        let mut buf = BytesMut::with_capacity(frame_size);
        for i in 0..frame_size {
            buf.put_u8(pattern[i % pattern.len()]);
        }
        buf.freeze()
    }
}

impl FrameSource for PatternFrameSource {
    fn next_payload(&mut self, seq_num: SeqNum, frame_size: usize) -> Bytes {
        Self::payload_for(seq_num, frame_size)
    }
}
