use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use rudp_stream::config::{BufferCapacity, ReceiverConfig, SenderConfig};
use rudp_stream::frame::{PatternFrameSource, SeqNum};
use rudp_stream::packet_header::{PacketHeader, Signal};
use rudp_stream::receiver::FrameReceiver;
use rudp_stream::send_pipeline::{SendPipeline, SendSocket};
use rudp_stream::sender::FrameSender;
use rudp_stream::test_util::{ChannelSendSocket, CollectingFrameConsumer, InFlightDatagram, LossySendSocket};
use tokio::sync::mpsc;
use tracing::Level;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::TRACE)
        .try_init()
        .ok();
}

fn sender_addr() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], 7000))
}

fn receiver_addr() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 2], 7001))
}

const FRAME_SIZE: usize = 64;

/// A sender and a receiver connected by an in-memory network. Tests drive both engines by
///  calling their ticks explicitly.
struct Link {
    sender: FrameSender,
    receiver: FrameReceiver,
    consumer: Arc<CollectingFrameConsumer>,
    network: mpsc::UnboundedReceiver<InFlightDatagram>,
    /// all control datagrams that reached the sender
    control_headers: Vec<PacketHeader>,
}

impl Link {
    fn new(
        max_frames: u32,
        pending_capacity: BufferCapacity,
        resume_threshold: usize,
        drop_data: impl Fn(&PacketHeader, &[u8]) -> bool + Send + Sync + 'static,
        drop_control: impl Fn(&PacketHeader, &[u8]) -> bool + Send + Sync + 'static,
    ) -> Link {
        let (network_sender, network) = mpsc::unbounded_channel();

        let mut sender_config = SenderConfig::new(receiver_addr());
        sender_config.frame_size = FRAME_SIZE;
        sender_config.max_frames = Some(max_frames);
        let sender_socket: Arc<dyn SendSocket> = Arc::new(ChannelSendSocket::new(sender_addr(), network_sender.clone()));
        let sender = FrameSender::new(
            Arc::new(sender_config),
            Arc::new(SendPipeline::new(Arc::new(LossySendSocket::new(sender_socket, drop_data)))),
            Box::new(PatternFrameSource),
        );

        let mut receiver_config = ReceiverConfig::new(receiver_addr());
        receiver_config.pending_capacity = pending_capacity;
        receiver_config.resume_threshold = resume_threshold;
        let receiver_socket: Arc<dyn SendSocket> = Arc::new(ChannelSendSocket::new(receiver_addr(), network_sender));
        let consumer = Arc::new(CollectingFrameConsumer::new());
        let receiver = FrameReceiver::new(
            Arc::new(receiver_config),
            Arc::new(SendPipeline::new(Arc::new(LossySendSocket::new(receiver_socket, drop_control)))),
            consumer.clone(),
        );

        Link {
            sender,
            receiver,
            consumer,
            network,
            control_headers: Vec::new(),
        }
    }

    /// delivers datagrams until the network is quiet, including replies to delivered datagrams
    async fn deliver_in_flight(&mut self) {
        while let Ok(datagram) = self.network.try_recv() {
            if datagram.to == receiver_addr() {
                self.receiver.on_packet(&datagram.buf, datagram.from).await;
            }
            else {
                assert_eq!(datagram.to, sender_addr());
                if let Ok(header) = PacketHeader::deser(&mut datagram.buf.as_slice()) {
                    self.control_headers.push(header);
                }
                self.sender.on_packet(&datagram.buf, datagram.from).await;
            }
        }
    }

    async fn reorder_until_quiescent(&self) {
        while self.receiver.reorder_tick().await {}
    }

    fn retransmit_requests(&self) -> Vec<(SeqNum, SeqNum)> {
        self.control_headers.iter()
            .filter(|h| h.signal == Signal::RetransmitRequest)
            .map(|h| (h.seq_num, h.ack_num))
            .collect()
    }

    fn received_signals(&self, signal: Signal) -> usize {
        self.control_headers.iter()
            .filter(|h| h.signal == signal)
            .count()
    }

    /// one round of all periodic work, followed by a step of the (paused) clock
    async fn step(&mut self) {
        let _ = self.sender.generate_frame().await;
        self.sender.transmission_tick().await;
        self.deliver_in_flight().await;
        self.reorder_until_quiescent().await;
        self.receiver.reorder_tick().await;
        self.deliver_in_flight().await;
        self.receiver.consume_tick().await;
        tokio::time::advance(Duration::from_millis(10)).await;
    }

    async fn run_until_delivered(&mut self, num_frames: usize, max_steps: usize) {
        for _ in 0..max_steps {
            if self.consumer.received().await.len() >= num_frames {
                return;
            }
            self.step().await;
        }
        panic!("only {} of {} frames were delivered", self.consumer.received().await.len(), num_frames);
    }

    async fn assert_delivered_in_order(&self, num_frames: u32) {
        let received = self.consumer.received().await;
        assert_eq!(received.len(), num_frames as usize);
        for (i, (seq_num, payload)) in received.into_iter().enumerate() {
            assert_eq!(seq_num, SeqNum::from_raw(i as u32));
            assert_eq!(payload, PatternFrameSource::payload_for(seq_num, FRAME_SIZE).to_vec());
        }
    }
}

fn never(_: &PacketHeader, _: &[u8]) -> bool {
    false
}

fn seq_nums(raw: &[u32]) -> Vec<SeqNum> {
    raw.iter().map(|&n| SeqNum::from_raw(n)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_single_lost_frame_is_recovered() {
    // frame 2 is lost on its first transmission
    let dropped = AtomicBool::new(false);
    let mut link = Link::new(
        5,
        BufferCapacity::Bytes(9999),
        4096,
        move |header, _| header.seq_num == SeqNum::from_raw(2) && !header.is_retransmit && !dropped.swap(true, Ordering::Relaxed),
        never,
    );

    for _ in 0..5 {
        link.sender.generate_frame().await.unwrap();
    }
    link.sender.transmission_tick().await;
    link.deliver_in_flight().await;

    assert_eq!(link.sender.unacked_seq_nums().await, seq_nums(&[2]));
    assert_eq!(link.receiver.pending_len().await, 4);

    link.reorder_until_quiescent().await;
    assert_eq!(link.receiver.delivery_queue_seq_nums().await, seq_nums(&[0, 1]));

    // the tick without progress detected the gap
    link.deliver_in_flight().await;
    assert_eq!(link.retransmit_requests(), vec![(SeqNum::from_raw(2), SeqNum::from_raw(2))]);
    assert_eq!(link.sender.num_unacked().await, 0);

    link.reorder_until_quiescent().await;
    assert_eq!(link.receiver.consume_tick().await, 5);
    link.assert_delivered_in_order(5).await;
}

#[tokio::test(start_paused = true)]
async fn test_flow_control_pauses_and_resumes_sender() {
    let dropped = AtomicBool::new(false);
    let mut link = Link::new(
        12,
        BufferCapacity::Frames(2),
        0,
        move |header, _| header.seq_num == SeqNum::ZERO && !dropped.swap(true, Ordering::Relaxed),
        never,
    );

    for _ in 0..6 {
        link.sender.generate_frame().await.unwrap();
    }
    link.sender.transmission_tick().await;
    link.deliver_in_flight().await;

    assert!(!link.receiver.is_accepting_new().await);
    assert!(!link.sender.is_sending_enabled().await);
    assert_eq!(link.received_signals(Signal::Stop), 3);

    link.run_until_delivered(12, 1000).await;
    link.assert_delivered_in_order(12).await;
    assert!(link.received_signals(Signal::Resume) >= 1);
    assert!(link.sender.is_sending_enabled().await);
}

#[tokio::test(start_paused = true)]
async fn test_random_loss() {
    let mut link = Link::new(
        100,
        BufferCapacity::Frames(8),
        2,
        |_, _| rand::random::<f64>() < 0.2,
        // a lost RESUME would leave the sender paused for good
        |header, _| header.signal != Signal::Resume && rand::random::<f64>() < 0.2,
    );

    link.run_until_delivered(100, 20_000).await;
    link.assert_delivered_in_order(100).await;
}
