use std::cmp::{min, Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use tokio::select;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info, trace, warn};
use crate::config::{BufferCapacity, ReceiverConfig};
use crate::error::RudpError;
use crate::frame::{Frame, SeqNum};
use crate::frame_consumer::FrameConsumer;
use crate::packet_header::{PacketHeader, Signal};
use crate::send_pipeline::SendPipeline;

/// Holding area for fresh frames that arrived ahead of `next_expected_seq`, bounded by frame
///  count or by payload bytes
struct PendingBuffer {
    capacity: BufferCapacity,
    frames: BTreeMap<SeqNum, Bytes>,
    num_bytes: usize,
}

impl PendingBuffer {
    fn new(capacity: BufferCapacity) -> PendingBuffer {
        PendingBuffer {
            capacity,
            frames: BTreeMap::default(),
            num_bytes: 0,
        }
    }

    fn used(&self) -> usize {
        match self.capacity {
            BufferCapacity::Frames(_) => self.frames.len(),
            BufferCapacity::Bytes(_) => self.num_bytes,
        }
    }

    fn free(&self) -> usize {
        self.capacity.limit().saturating_sub(self.used())
    }

    fn has_room_for(&self, frame: &Frame) -> bool {
        match self.capacity {
            BufferCapacity::Frames(max_frames) => self.frames.len() < max_frames,
            BufferCapacity::Bytes(max_bytes) => self.num_bytes + frame.len() <= max_bytes,
        }
    }

    fn try_insert(&mut self, frame: Frame) -> Result<(), RudpError> {
        if !self.has_room_for(&frame) {
            return Err(RudpError::QueueFull("pending buffer"));
        }
        self.num_bytes += frame.len();
        if let Some(replaced) = self.frames.insert(frame.seq_num, frame.payload) {
            self.num_bytes -= replaced.len();
        }
        Ok(())
    }

    fn contains(&self, seq_num: SeqNum) -> bool {
        self.frames.contains_key(&seq_num)
    }

    fn first_key(&self) -> Option<SeqNum> {
        self.frames.keys().next().cloned()
    }

    fn pop_first(&mut self) -> Option<Frame> {
        let (seq_num, payload) = self.frames.pop_first()?;
        self.num_bytes -= payload.len();
        Some(Frame::new(seq_num, payload))
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.num_bytes = 0;
    }
}

/// A retransmitted frame, ordered by its sequence number only. The key is taken from the
///  decoded header when the frame is stored, so ordering never touches the payload.
struct RetransmittedFrame(Frame);

impl PartialEq for RetransmittedFrame {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq_num == other.0.seq_num
    }
}
impl Eq for RetransmittedFrame {}

impl PartialOrd for RetransmittedFrame {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for RetransmittedFrame {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.seq_num.cmp(&other.0.seq_num)
    }
}

struct FrameReceiverInner {
    config: Arc<ReceiverConfig>,
    send_pipeline: Arc<SendPipeline>,
    /// the sender's address, taken from the most recent data datagram. Signals that are not
    ///  replies to a specific datagram (RESUME, retransmission requests) go there.
    peer_addr: Option<SocketAddr>,

    /// the smallest sequence number that was not delivered yet - this only ever increases
    next_expected_seq: SeqNum,
    pending_buffer: PendingBuffer,
    /// min-heap on the sequence number; several entries for the same sequence number may
    ///  coexist, all but the first one are discarded once they fall below `next_expected_seq`
    retransmit_buffer: BinaryHeap<Reverse<RetransmittedFrame>>,
    delivery_queue: VecDeque<Frame>,

    /// false while a STOP signal is outstanding
    accepting_new: bool,
    /// start of the most recent retransmission request, and the time it was sent
    last_retransmit_request: Option<(SeqNum, Instant)>,
    is_stopped: bool,
}

impl FrameReceiverInner {
    async fn on_data_packet(&mut self, header: PacketHeader, payload: &[u8], from: SocketAddr) {
        if header.seq_num == SeqNum::MAX {
            debug!("received frame #{} from {:?}, which is outside the sequence space - dropping", header.seq_num, from);
            return;
        }

        self.peer_addr = Some(from);
        let frame = Frame::new(header.seq_num, Bytes::copy_from_slice(payload));

        let reply_signal = if header.is_retransmit {
            self.on_retransmitted_frame(frame)
        }
        else {
            self.on_fresh_frame(frame)
        };

        self.send_pipeline.send_control(from, PacketHeader::ack(header.seq_num, reply_signal)).await;
    }

    fn on_fresh_frame(&mut self, frame: Frame) -> Signal {
        if !self.accepting_new {
            debug!("intake is stopped - discarding fresh frame #{} and repeating STOP", frame.seq_num);
            return Signal::Stop;
        }

        if self.is_duplicate(frame.seq_num) {
            debug!("received duplicate of frame #{} - acknowledging it again", frame.seq_num);
            return Signal::None;
        }

        let seq_num = frame.seq_num;
        match self.pending_buffer.try_insert(frame) {
            Ok(()) => {
                trace!("buffered fresh frame #{}", seq_num);
                Signal::None
            }
            Err(e) => {
                debug!("discarding frame #{}: {} - sending STOP", seq_num, e);
                self.accepting_new = false;
                Signal::Stop
            }
        }
    }

    /// Retransmitted frames are not subject to flow control: they are what fills the gaps that
    ///  keep the pending buffer from draining.
    fn on_retransmitted_frame(&mut self, frame: Frame) -> Signal {
        if self.is_duplicate(frame.seq_num) {
            debug!("received retransmission of frame #{} which is already buffered or delivered", frame.seq_num);
        }
        else {
            trace!("buffered retransmitted frame #{}", frame.seq_num);
            self.retransmit_buffer.push(Reverse(RetransmittedFrame(frame)));
        }
        Signal::None
    }

    fn is_duplicate(&self, seq_num: SeqNum) -> bool {
        seq_num < self.next_expected_seq || self.pending_buffer.contains(seq_num)
    }

    /// Releases at most one frame into the delivery queue. Returns `true` if there was progress,
    ///  `false` if the next frame is missing (or nothing is buffered).
    async fn reorder_tick(&mut self) -> bool {
        if self.is_stopped {
            return false;
        }

        if !self.accepting_new && self.pending_buffer.free() > self.config.resume_threshold {
            debug!("pending buffer has room again - sending RESUME");
            self.accepting_new = true;
            self.send_signal(PacketHeader::ack(SeqNum::ZERO, Signal::Resume)).await;
        }

        self.discard_superseded_retransmissions();

        if self.pending_buffer.first_key() == Some(self.next_expected_seq) {
            if let Some(frame) = self.pending_buffer.pop_first() {
                self.deliver(frame);
                return true;
            }
        }

        if self.lowest_retransmitted() == Some(self.next_expected_seq) {
            if let Some(Reverse(RetransmittedFrame(frame))) = self.retransmit_buffer.pop() {
                self.deliver(frame);
                return true;
            }
        }

        let lowest_buffered = match (self.pending_buffer.first_key(), self.lowest_retransmitted()) {
            (Some(a), Some(b)) => Some(min(a, b)),
            (a, b) => a.or(b),
        };

        if let Some(lowest_buffered) = lowest_buffered {
            if lowest_buffered > self.next_expected_seq {
                if let Some(to) = lowest_buffered.prev() {
                    self.request_retransmit(self.next_expected_seq, to).await;
                }
            }
        }
        false
    }

    fn lowest_retransmitted(&self) -> Option<SeqNum> {
        self.retransmit_buffer.peek()
            .map(|Reverse(RetransmittedFrame(frame))| frame.seq_num)
    }

    fn discard_superseded_retransmissions(&mut self) {
        while let Some(seq_num) = self.lowest_retransmitted() {
            if seq_num >= self.next_expected_seq {
                break;
            }
            trace!("discarding superseded retransmission of frame #{}", seq_num);
            self.retransmit_buffer.pop();
        }
    }

    fn deliver(&mut self, frame: Frame) {
        trace!("frame #{} is in order", frame.seq_num);

        // the sender never issues the last sequence number, and it is rejected on arrival
        if let Some(next) = frame.seq_num.next() {
            self.next_expected_seq = next;
        }
        self.delivery_queue.push_back(frame);
    }

    /// Requests for the same gap are rate-limited to one per slow reorder period, giving the
    ///  sender time to respond. A gap starting at a different sequence number is requested
    ///  right away.
    async fn request_retransmit(&mut self, from: SeqNum, to: SeqNum) {
        let now = Instant::now();
        if let Some((prev_from, prev)) = self.last_retransmit_request {
            if prev_from == from && now.duration_since(prev) < self.config.reorder_interval_slow {
                trace!("gap {}..={} is already requested", from, to);
                return;
            }
        }

        debug!("requesting retransmission of frames {}..={}", from, to);
        self.last_retransmit_request = Some((from, now));
        self.send_signal(PacketHeader::retransmit_request(from, to)).await;
    }

    async fn send_signal(&self, header: PacketHeader) {
        match self.peer_addr {
            Some(peer_addr) => self.send_pipeline.send_control(peer_addr, header).await,
            None => debug!("no data received so far - cannot send {:?}", header),
        }
    }

    fn take_batch(&mut self) -> Vec<Frame> {
        if self.is_stopped {
            return Vec::new();
        }
        let batch_size = min(self.config.consume_batch_size, self.delivery_queue.len());
        self.delivery_queue.drain(..batch_size).collect()
    }

    fn clear(&mut self) {
        self.is_stopped = true;
        self.pending_buffer.clear();
        self.retransmit_buffer.clear();
        self.delivery_queue.clear();
        self.accepting_new = true;
        self.last_retransmit_request = None;
    }
}

/// The receiving side of a frame stream: reorders incoming frames, acknowledges them, requests
///  retransmission of missing frames, throttles the sender when its buffer is full, and hands
///  frames to a [FrameConsumer] strictly in sequence.
pub struct FrameReceiver {
    config: Arc<ReceiverConfig>,
    inner: Arc<RwLock<FrameReceiverInner>>,
    frame_consumer: Arc<dyn FrameConsumer>,
    active_handle: Option<JoinHandle<()>>,
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        if let Some(handle) = self.active_handle.take() {
            handle.abort();
        }
    }
}

impl FrameReceiver {
    pub fn new(config: Arc<ReceiverConfig>, send_pipeline: Arc<SendPipeline>, frame_consumer: Arc<dyn FrameConsumer>) -> FrameReceiver {
        let inner = FrameReceiverInner {
            config: config.clone(),
            send_pipeline,
            peer_addr: None,
            next_expected_seq: SeqNum::ZERO,
            pending_buffer: PendingBuffer::new(config.pending_capacity),
            retransmit_buffer: BinaryHeap::default(),
            delivery_queue: VecDeque::default(),
            accepting_new: true,
            last_retransmit_request: None,
            is_stopped: false,
        };

        FrameReceiver {
            config,
            inner: Arc::new(RwLock::new(inner)),
            frame_consumer,
            active_handle: None,
        }
    }

    /// Starts the periodic reorder and consume loop. This requires a tokio runtime.
    pub fn start(&mut self) {
        if self.active_handle.is_some() {
            warn!("receiver already started");
            return;
        }
        info!("starting receiver");
        self.active_handle = Some(tokio::spawn(Self::do_loop(self.config.clone(), self.inner.clone(), self.frame_consumer.clone())));
    }

    /// Cancels all periodic work and discards all buffered frames. Frames in the delivery
    ///  queue that were not consumed yet are discarded as well.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.active_handle.take() {
            handle.abort();
        }

        let mut inner = self.inner.write().await;
        info!("stopping receiver at frame #{}", inner.next_expected_seq);
        inner.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active_handle.is_some()
    }

    /// Handles a datagram received from the sender. Malformed datagrams are dropped, and
    ///  control-only datagrams are ignored.
    pub async fn on_packet(&self, mut buf: &[u8], from: SocketAddr) {
        let header = match PacketHeader::deser(&mut buf) {
            Ok(header) => header,
            Err(e) => {
                warn!("dropping datagram from {:?}: {}", from, e);
                return;
            }
        };

        if buf.is_empty() {
            trace!("received control packet {:?} from {:?} - ignoring", header, from);
            return;
        }

        trace!("received {:?} with {} payload bytes from {:?}", header, buf.len(), from);

        let mut inner = self.inner.write().await;
        if inner.is_stopped {
            debug!("receiver is stopped - dropping datagram from {:?}", from);
            return;
        }
        inner.on_data_packet(header, buf, from).await;
    }

    /// Moves at most one frame into the delivery queue, returning `true` if there was progress
    pub async fn reorder_tick(&self) -> bool {
        self.inner.write().await
            .reorder_tick().await
    }

    /// Hands up to one batch of in-order frames to the consumer, returning the number of frames
    pub async fn consume_tick(&self) -> usize {
        Self::do_consume(&self.inner, self.frame_consumer.as_ref()).await
    }

    async fn do_consume(inner: &RwLock<FrameReceiverInner>, frame_consumer: &dyn FrameConsumer) -> usize {
        // the lock is released before calling the consumer
        let batch = inner.write().await
            .take_batch();

        for frame in &batch {
            frame_consumer.on_frame(frame.seq_num, &frame.payload).await;
        }
        batch.len()
    }

    pub async fn next_expected_seq(&self) -> SeqNum {
        self.inner.read().await.next_expected_seq
    }

    pub async fn is_accepting_new(&self) -> bool {
        self.inner.read().await.accepting_new
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.read().await.pending_buffer.len()
    }

    pub async fn retransmit_buffer_len(&self) -> usize {
        self.inner.read().await.retransmit_buffer.len()
    }

    pub async fn delivery_queue_len(&self) -> usize {
        self.inner.read().await.delivery_queue.len()
    }

    pub async fn delivery_queue_seq_nums(&self) -> Vec<SeqNum> {
        self.inner.read().await
            .delivery_queue.iter()
            .map(|frame| frame.seq_num)
            .collect()
    }

    /// Active loop - this function never returns, it runs until it is aborted
    async fn do_loop(config: Arc<ReceiverConfig>, inner: Arc<RwLock<FrameReceiverInner>>, frame_consumer: Arc<dyn FrameConsumer>) {
        let mut consume_interval = interval(config.consume_interval);

        let reorder_sleep = sleep(config.reorder_interval_fast);
        tokio::pin!(reorder_sleep);

        loop {
            select! {
                _ = &mut reorder_sleep => {
                    let progress = inner.write().await
                        .reorder_tick().await;

                    let delay = if progress {
                        config.reorder_interval_fast
                    }
                    else {
                        config.reorder_interval_slow
                    };
                    reorder_sleep.as_mut().reset(Instant::now() + delay);
                }
                _ = consume_interval.tick() => {
                    Self::do_consume(&inner, frame_consumer.as_ref()).await;
                }
            }
        }
    }
}
