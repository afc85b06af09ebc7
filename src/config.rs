use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;

pub struct SenderConfig {
    /// The receiver's address, i.e. where data frames are sent
    pub peer_addr: SocketAddr,
    /// The local address the sender binds to; port 0 lets the OS pick one
    pub bind_addr: SocketAddr,

    /// Payload size of every frame in bytes. Header and payload must fit in a single UDP
    ///  datagram without IP level fragmentation.
    pub frame_size: usize,

    /// Maximum number of generated frames waiting for their first transmission. Frames generated
    ///  while the queue is full are dropped, which bounds memory usage on the sender side.
    pub send_queue_capacity: usize,

    pub frame_interval: Duration,
    pub transmit_interval: Duration,

    /// Stop generating after this many frames; `None` generates until the session stops
    pub max_frames: Option<u32>,
}

impl SenderConfig {
    pub fn new(peer_addr: SocketAddr) -> SenderConfig {
        let bind_addr = if peer_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        }
        else {
            SocketAddr::from(([0u16; 8], 0))
        };

        SenderConfig {
            peer_addr,
            bind_addr,
            frame_size: 1024,
            send_queue_capacity: 64,
            frame_interval: Duration::from_millis(10),
            transmit_interval: Duration::from_millis(10),
            max_frames: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.frame_size == 0 {
            bail!("frame size must be positive");
        }
        if self.frame_size > Self::MAX_FRAME_SIZE {
            bail!("frame size {} does not fit into a UDP datagram (max {})", self.frame_size, Self::MAX_FRAME_SIZE);
        }
        if self.send_queue_capacity == 0 {
            bail!("send queue capacity must be positive");
        }
        if self.frame_interval.is_zero() || self.transmit_interval.is_zero() {
            bail!("frame and transmit intervals must be positive");
        }
        Ok(())
    }

    /// maximum UDP payload (IP V4) minus the protocol header
    pub const MAX_FRAME_SIZE: usize = 65507 - crate::packet_header::PacketHeader::SERIALIZED_LEN;
}

/// The unit in which the receiver's pending buffer is bounded
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferCapacity {
    Frames(usize),
    Bytes(usize),
}

impl BufferCapacity {
    pub fn limit(&self) -> usize {
        match *self {
            BufferCapacity::Frames(n) => n,
            BufferCapacity::Bytes(n) => n,
        }
    }
}

pub struct ReceiverConfig {
    pub listen_addr: SocketAddr,

    pub pending_capacity: BufferCapacity,
    /// When intake is stopped, the receiver resumes it once free space in the pending buffer
    ///  *exceeds* this threshold. It is measured in the same unit as `pending_capacity`.
    pub resume_threshold: usize,

    /// reorder period while frames are released in order
    pub reorder_interval_fast: Duration,
    /// reorder period when there was no progress, and the minimum distance between two
    ///  retransmission requests
    pub reorder_interval_slow: Duration,

    pub consume_interval: Duration,
    pub consume_batch_size: usize,
}

impl ReceiverConfig {
    pub fn new(listen_addr: SocketAddr) -> ReceiverConfig {
        ReceiverConfig {
            listen_addr,
            pending_capacity: BufferCapacity::Bytes(9999),
            resume_threshold: 4096,
            reorder_interval_fast: Duration::from_millis(10),
            reorder_interval_slow: Duration::from_millis(200),
            consume_interval: Duration::from_millis(33),
            consume_batch_size: 200,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pending_capacity.limit() == 0 {
            bail!("pending buffer capacity must be positive");
        }
        if self.resume_threshold >= self.pending_capacity.limit() {
            bail!("resume threshold {} must be below the pending buffer capacity {:?}", self.resume_threshold, self.pending_capacity);
        }
        if self.reorder_interval_fast.is_zero() || self.consume_interval.is_zero() {
            bail!("reorder and consume intervals must be positive");
        }
        if self.reorder_interval_slow < self.reorder_interval_fast {
            bail!("slow reorder interval must not be shorter than the fast one");
        }
        if self.consume_batch_size == 0 {
            bail!("consume batch size must be positive");
        }
        Ok(())
    }
}
