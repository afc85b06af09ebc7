use clap::Parser;
use clap_derive::Parser;
use rudp_stream::config::{ReceiverConfig, SenderConfig};
use rudp_stream::end_point::{ReceiverEndPoint, SenderEndPoint};
use rudp_stream::frame::{PatternFrameSource, SeqNum};
use rudp_stream::frame_consumer::FrameConsumer;
use rudp_stream::test_util::LossySendSocket;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};
use tracing::{info, warn, Level};

/// Streams frames between two sockets on localhost, with simulated packet loss on the data path
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 1000)]
    frames: u32,

    #[clap(long, default_value_t = 1024)]
    frame_size: usize,

    /// probability for each data datagram to be dropped
    #[clap(long, default_value_t = 0.001)]
    loss_rate: f64,

    /// give up after this many seconds
    #[clap(long, default_value_t = 60)]
    timeout_secs: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

/// Counts delivered frames, checking their order and content
struct VerifyingConsumer {
    frame_size: usize,
    num_frames: usize,
    num_received: AtomicUsize,
    num_corrupt: AtomicUsize,
    done: Notify,
}

#[async_trait]
impl FrameConsumer for VerifyingConsumer {
    async fn on_frame(&self, seq_num: SeqNum, payload: &[u8]) {
        let expected_seq = self.num_received.fetch_add(1, Ordering::AcqRel);
        if seq_num.to_raw() as usize != expected_seq || payload != PatternFrameSource::payload_for(seq_num, self.frame_size).as_ref() {
            warn!("unexpected frame #{} at position {}", seq_num, expected_seq);
            self.num_corrupt.fetch_add(1, Ordering::AcqRel);
        }
        if expected_seq + 1 == self.num_frames {
            self.done.notify_waiters();
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.frames == 0 {
        bail!("there must be at least one frame");
    }
    if !(0.0..1.0).contains(&args.loss_rate) {
        bail!("loss rate must be in [0, 1)");
    }

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let consumer = Arc::new(VerifyingConsumer {
        frame_size: args.frame_size,
        num_frames: args.frames as usize,
        num_received: AtomicUsize::new(0),
        num_corrupt: AtomicUsize::new(0),
        done: Notify::new(),
    });

    let receiver_config = Arc::new(ReceiverConfig::new(SocketAddr::from(([127, 0, 0, 1], 0))));
    let mut receiver_end_point = ReceiverEndPoint::bind(receiver_config, consumer.clone()).await?;

    let mut sender_config = SenderConfig::new(receiver_end_point.local_addr()?);
    sender_config.frame_size = args.frame_size;
    sender_config.max_frames = Some(args.frames);

    let loss_rate = args.loss_rate;
    let mut sender_end_point = SenderEndPoint::bind_with(
        Arc::new(sender_config),
        Box::new(PatternFrameSource),
        |socket| Arc::new(LossySendSocket::with_loss_rate(socket, loss_rate)),
    ).await?;

    let start = Instant::now();
    let completed = timeout(Duration::from_secs(args.timeout_secs), async {
        tokio::join!(
            receiver_end_point.run(consumer.done.notified()),
            sender_end_point.run(consumer.done.notified()),
        );
    }).await;

    let num_received = consumer.num_received.load(Ordering::Acquire);
    let num_corrupt = consumer.num_corrupt.load(Ordering::Acquire);
    info!("received {} of {} frames in {:?}, {} out of order or corrupt", num_received, args.frames, start.elapsed(), num_corrupt);

    if completed.is_err() {
        bail!("timed out after {} seconds", args.timeout_secs);
    }
    if num_corrupt > 0 {
        bail!("{} frames were out of order or corrupt", num_corrupt);
    }
    Ok(())
}
