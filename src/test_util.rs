//! Utilities for testing code that is based on the protocol engines: sockets that record or drop
//!  datagrams instead of sending them, and a consumer that collects delivered frames. They are
//!  used for the crate's own tests, but they are also exported for application testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;
use crate::frame::SeqNum;
use crate::frame_consumer::FrameConsumer;
use crate::packet_header::PacketHeader;
use crate::send_pipeline::SendSocket;

/// Records all sent datagrams rather than sending them
#[derive(Default)]
pub struct RecordingSendSocket {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl RecordingSendSocket {
    pub fn new() -> RecordingSendSocket {
        Default::default()
    }

    /// returns all datagrams recorded so far, clearing the recording
    pub async fn take_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock().await)
    }

    /// returns headers of the recorded datagrams that carry a payload, discarding all others
    pub async fn take_data_headers(&self) -> Vec<PacketHeader> {
        self.take_headers(|payload| !payload.is_empty()).await
    }

    /// returns headers of the recorded control-only datagrams, discarding all others
    pub async fn take_control_headers(&self) -> Vec<PacketHeader> {
        self.take_headers(|payload| payload.is_empty()).await
    }

    async fn take_headers(&self, filter: impl Fn(&[u8]) -> bool) -> Vec<PacketHeader> {
        self.take_sent().await
            .into_iter()
            .filter_map(|(_, datagram)| {
                let mut buf: &[u8] = &datagram;
                let header = PacketHeader::deser(&mut buf).ok()?;
                filter(buf).then_some(header)
            })
            .collect()
    }
}

#[async_trait]
impl SendSocket for RecordingSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        self.sent.lock().await
            .push((to, packet_buf.to_vec()));
    }
}

type DropFilter = Box<dyn Fn(&PacketHeader, &[u8]) -> bool + Send + Sync>;

/// Wraps another socket, silently dropping datagrams for which a filter returns `true` - this
///  simulates packet loss on the network
pub struct LossySendSocket {
    inner: Arc<dyn SendSocket>,
    drop_filter: DropFilter,
    num_dropped: AtomicUsize,
}

impl LossySendSocket {
    /// The filter is called with the datagram's header and payload
    pub fn new(inner: Arc<dyn SendSocket>, drop_filter: impl Fn(&PacketHeader, &[u8]) -> bool + Send + Sync + 'static) -> LossySendSocket {
        LossySendSocket {
            inner,
            drop_filter: Box::new(drop_filter),
            num_dropped: AtomicUsize::new(0),
        }
    }

    /// drops each datagram with a given probability
    pub fn with_loss_rate(inner: Arc<dyn SendSocket>, loss_rate: f64) -> LossySendSocket {
        Self::new(inner, move |_, _| rand::random::<f64>() < loss_rate)
    }

    pub fn num_dropped(&self) -> usize {
        self.num_dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SendSocket for LossySendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        let mut buf = packet_buf;
        if let Ok(header) = PacketHeader::deser(&mut buf) {
            if (self.drop_filter)(&header, buf) {
                trace!("simulated loss: dropping {:?} to {:?}", header, to);
                self.num_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.inner.do_send_packet(to, packet_buf).await;
    }
}

/// A datagram in flight on an in-memory network
#[derive(Debug, Clone)]
pub struct InFlightDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub buf: Vec<u8>,
}

/// Puts sent datagrams on a channel instead of the network, tagged with a fixed source
///  address. Tests deliver them to the addressed engine by draining the channel.
pub struct ChannelSendSocket {
    self_addr: SocketAddr,
    network: mpsc::UnboundedSender<InFlightDatagram>,
}

impl ChannelSendSocket {
    pub fn new(self_addr: SocketAddr, network: mpsc::UnboundedSender<InFlightDatagram>) -> ChannelSendSocket {
        ChannelSendSocket { self_addr, network }
    }
}

#[async_trait]
impl SendSocket for ChannelSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        // a closed channel is the in-memory equivalent of an unreachable network
        let _ = self.network.send(InFlightDatagram {
            from: self.self_addr,
            to,
            buf: packet_buf.to_vec(),
        });
    }
}

/// Collects all frames it is handed, in order
#[derive(Default)]
pub struct CollectingFrameConsumer {
    frames: Mutex<Vec<(SeqNum, Vec<u8>)>>,
}

impl CollectingFrameConsumer {
    pub fn new() -> CollectingFrameConsumer {
        Default::default()
    }

    pub async fn received(&self) -> Vec<(SeqNum, Vec<u8>)> {
        self.frames.lock().await.clone()
    }

    pub async fn received_seq_nums(&self) -> Vec<SeqNum> {
        self.frames.lock().await
            .iter()
            .map(|(seq_num, _)| *seq_num)
            .collect()
    }
}

#[async_trait]
impl FrameConsumer for CollectingFrameConsumer {
    async fn on_frame(&self, seq_num: SeqNum, payload: &[u8]) {
        self.frames.lock().await
            .push((seq_num, payload.to_vec()));
    }
}
