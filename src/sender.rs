use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::select;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};
use crate::config::SenderConfig;
use crate::error::RudpError;
use crate::frame::{Frame, FrameSource, SeqNum};
use crate::packet_header::{PacketHeader, Signal};
use crate::send_pipeline::SendPipeline;

struct FrameSenderInner {
    config: Arc<SenderConfig>,
    send_pipeline: Arc<SendPipeline>,
    frame_source: Box<dyn FrameSource>,

    /// sequence number for the next generated frame
    next_seq: SeqNum,
    /// generated frames that were not transmitted yet
    send_queue: VecDeque<Frame>,
    /// transmitted frames that were not acknowledged yet. Entries are removed only by an ack,
    ///  never by a retransmission, so this is the source for all retransmissions.
    unacked: BTreeMap<SeqNum, Frame>,
    /// controlled by the receiver's STOP / RESUME signals; gates only *new* frames
    sending_enabled: bool,
    is_stopped: bool,
}

impl FrameSenderInner {
    fn generate_frame(&mut self) -> Result<Option<SeqNum>, RudpError> {
        if self.is_stopped {
            return Ok(None);
        }

        if let Some(max_frames) = self.config.max_frames {
            if self.next_seq.to_raw() >= max_frames {
                return Ok(None);
            }
        }

        // the last sequence number is never issued so the receiver's 'next expected' marker
        //  always has a successor
        let Some(following) = self.next_seq.next() else {
            return Ok(None);
        };

        if self.send_queue.len() >= self.config.send_queue_capacity {
            return Err(RudpError::QueueFull("send queue"));
        }

        let seq_num = self.next_seq;
        let payload = self.frame_source.next_payload(seq_num, self.config.frame_size);
        self.send_queue.push_back(Frame::new(seq_num, payload));
        self.next_seq = following;
        Ok(Some(seq_num))
    }

    fn on_frame_tick(&mut self) {
        match self.generate_frame() {
            Ok(Some(seq_num)) => trace!("generated frame #{}", seq_num),
            Ok(None) => {}
            Err(e) => debug!("dropping newly generated frame: {}", e),
        }
    }

    async fn transmission_tick(&mut self) {
        if self.is_stopped {
            return;
        }

        let peer_addr = self.config.peer_addr;

        if !self.unacked.is_empty() {
            trace!("retransmitting {} unacknowledged frames to {:?}", self.unacked.len(), peer_addr);
            for frame in self.unacked.values() {
                self.send_pipeline.send_frame(peer_addr, frame, true).await;
            }
            return;
        }

        if !self.sending_enabled {
            if !self.send_queue.is_empty() {
                trace!("sending is paused by the receiver - holding back {} frames", self.send_queue.len());
            }
            return;
        }

        while let Some(frame) = self.send_queue.pop_front() {
            self.send_pipeline.send_frame(peer_addr, &frame, false).await;
            self.unacked.insert(frame.seq_num, frame);
        }
    }

    async fn on_control_packet(&mut self, header: PacketHeader) {
        match header.signal {
            Signal::None => self.on_ack(header.ack_num),
            Signal::Stop => {
                if self.sending_enabled {
                    debug!("received STOP from {:?} - pausing new frames", self.config.peer_addr);
                }
                self.sending_enabled = false;
            }
            Signal::Resume => {
                if !self.sending_enabled {
                    debug!("received RESUME from {:?} - sending new frames again", self.config.peer_addr);
                }
                self.sending_enabled = true;
            }
            Signal::RetransmitRequest => {
                if let Err(e) = self.resend_range(header.seq_num, header.ack_num).await {
                    debug!("retransmission request from {:?}: {}", self.config.peer_addr, e);
                }
            }
        }
    }

    fn on_ack(&mut self, seq_num: SeqNum) {
        if self.unacked.remove(&seq_num).is_some() {
            trace!("frame #{} acknowledged", seq_num);
        }
        else {
            trace!("ack for frame #{} which is not in the send buffer - ignoring", seq_num);
        }
    }

    /// Re-sends all frames in `from..=to` that are still unacknowledged. Frames in that range
    ///  that are no longer available are skipped and reported as an unrecoverable gap after
    ///  the available ones were sent.
    async fn resend_range(&mut self, from: SeqNum, to: SeqNum) -> Result<(), RudpError> {
        if from > to {
            debug!("ignoring retransmission request for empty range {}..={}", from, to);
            return Ok(());
        }

        trace!("resending frames {}..={} to {:?}", from, to, self.config.peer_addr);

        let mut lowest_missing = None;
        let mut highest_missing = None;

        let mut expected = Some(from);
        for (&seq_num, frame) in self.unacked.range(from..=to) {
            if let Some(expected) = expected {
                if expected < seq_num {
                    lowest_missing.get_or_insert(expected);
                    highest_missing = seq_num.prev();
                }
            }

            self.send_pipeline.send_frame(self.config.peer_addr, frame, true).await;
            expected = seq_num.next();
        }
        if let Some(expected) = expected {
            if expected <= to {
                lowest_missing.get_or_insert(expected);
                highest_missing = Some(to);
            }
        }

        match (lowest_missing, highest_missing) {
            (Some(from), Some(to)) => Err(RudpError::UnrecoverableGap { from, to }),
            _ => Ok(()),
        }
    }

    fn clear(&mut self) {
        self.is_stopped = true;
        self.send_queue.clear();
        self.unacked.clear();
    }
}

/// The sending side of a frame stream: generates frames periodically, transmits them to a
///  single receiver and retransmits them until they are acknowledged.
pub struct FrameSender {
    config: Arc<SenderConfig>,
    inner: Arc<RwLock<FrameSenderInner>>,
    active_handle: Option<JoinHandle<()>>,
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        if let Some(handle) = self.active_handle.take() {
            handle.abort();
        }
    }
}

impl FrameSender {
    pub fn new(config: Arc<SenderConfig>, send_pipeline: Arc<SendPipeline>, frame_source: Box<dyn FrameSource>) -> FrameSender {
        let inner = FrameSenderInner {
            config: config.clone(),
            send_pipeline,
            frame_source,
            next_seq: SeqNum::ZERO,
            send_queue: VecDeque::with_capacity(config.send_queue_capacity),
            unacked: BTreeMap::default(),
            sending_enabled: true,
            is_stopped: false,
        };

        FrameSender {
            config,
            inner: Arc::new(RwLock::new(inner)),
            active_handle: None,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.config.peer_addr
    }

    /// Starts periodic frame generation and transmission. This requires a tokio runtime.
    pub fn start(&mut self) {
        if self.active_handle.is_some() {
            warn!("sender already started");
            return;
        }
        info!("starting sender for {:?}", self.config.peer_addr);
        self.active_handle = Some(tokio::spawn(Self::do_loop(self.config.clone(), self.inner.clone())));
    }

    /// Cancels all periodic work and discards all buffered frames. A stopped sender ignores
    ///  incoming control packets, so nothing is sent after this returns.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.active_handle.take() {
            handle.abort();
        }

        let mut inner = self.inner.write().await;
        info!("stopping sender for {:?} with {} unacknowledged frames", self.config.peer_addr, inner.unacked.len());
        inner.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active_handle.is_some()
    }

    /// Appends a new frame to the send queue. Returns `None` if the stream has no more frames
    ///  to generate or the sender is stopped, and [RudpError::QueueFull] if the frame was dropped because the send queue
    ///  is full.
    pub async fn generate_frame(&self) -> Result<Option<SeqNum>, RudpError> {
        self.inner.write().await
            .generate_frame()
    }

    pub async fn transmission_tick(&self) {
        self.inner.write().await
            .transmission_tick().await
    }

    /// Handles a datagram received from the peer. Malformed datagrams are dropped.
    pub async fn on_packet(&self, mut buf: &[u8], from: SocketAddr) {
        let header = match PacketHeader::deser(&mut buf) {
            Ok(header) => header,
            Err(e) => {
                warn!("dropping datagram from {:?}: {}", from, e);
                return;
            }
        };

        trace!("received {:?} from {:?}", header, from);
        if !buf.is_empty() {
            debug!("control packet from {:?} has {} unexpected payload bytes - ignoring them", from, buf.len());
        }

        let mut inner = self.inner.write().await;
        if inner.is_stopped {
            debug!("sender is stopped - dropping control packet from {:?}", from);
            return;
        }
        inner.on_control_packet(header).await;
    }

    pub async fn next_seq(&self) -> SeqNum {
        self.inner.read().await.next_seq
    }

    pub async fn send_queue_len(&self) -> usize {
        self.inner.read().await.send_queue.len()
    }

    pub async fn num_unacked(&self) -> usize {
        self.inner.read().await.unacked.len()
    }

    pub async fn unacked_seq_nums(&self) -> Vec<SeqNum> {
        self.inner.read().await
            .unacked.keys()
            .cloned()
            .collect()
    }

    pub async fn is_sending_enabled(&self) -> bool {
        self.inner.read().await.sending_enabled
    }

    /// Active loop - this function never returns, it runs until it is aborted
    async fn do_loop(config: Arc<SenderConfig>, inner: Arc<RwLock<FrameSenderInner>>) {
        let mut frame_interval = interval(config.frame_interval);
        let mut transmit_interval = interval(config.transmit_interval);

        loop {
            select! {
                _ = frame_interval.tick() => {
                    inner.write().await
                        .on_frame_tick();
                }
                _ = transmit_interval.tick() => {
                    inner.write().await
                        .transmission_tick().await;
                }
            }
        }
    }
}
