use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::select;
use tracing::{error, info};
use crate::config::{ReceiverConfig, SenderConfig};
use crate::frame::FrameSource;
use crate::frame_consumer::FrameConsumer;
use crate::receiver::FrameReceiver;
use crate::send_pipeline::{SendPipeline, SendSocket};
use crate::sender::FrameSender;

/// large enough for any UDP datagram
const RECEIVE_BUFFER_LEN: usize = 65536;

/// Binds a [FrameSender] to a UDP socket: the socket's receive side feeds control datagrams to
///  the sender, and the sender's datagrams go out through the same socket.
pub struct SenderEndPoint {
    socket: Arc<UdpSocket>,
    sender: FrameSender,
}

impl SenderEndPoint {
    pub async fn bind(config: Arc<SenderConfig>, frame_source: Box<dyn FrameSource>) -> anyhow::Result<SenderEndPoint> {
        Self::bind_with(config, frame_source, |socket| socket).await
    }

    /// `wrap_send_socket` allows decorating the socket's sending side, e.g. for simulating
    ///  packet loss
    pub async fn bind_with(
        config: Arc<SenderConfig>,
        frame_source: Box<dyn FrameSource>,
        wrap_send_socket: impl FnOnce(Arc<dyn SendSocket>) -> Arc<dyn SendSocket>,
    ) -> anyhow::Result<SenderEndPoint> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        info!("bound sender socket to {:?}, sending to {:?}", socket.local_addr()?, config.peer_addr);

        let send_socket = wrap_send_socket(Arc::new(socket.clone()));
        let sender = FrameSender::new(config, Arc::new(SendPipeline::new(send_socket)), frame_source);

        Ok(SenderEndPoint {
            socket,
            sender,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn sender(&self) -> &FrameSender {
        &self.sender
    }

    /// Runs the sender until `shutdown` completes, then stops it
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        self.sender.start();

        select! {
            _ = Self::recv_loop(&self.socket, &self.sender) => {}
            _ = shutdown => {
                info!("shutdown requested");
            }
        }

        self.sender.stop().await;
    }

    async fn recv_loop(socket: &UdpSocket, sender: &FrameSender) {
        let mut buf = vec![0u8; RECEIVE_BUFFER_LEN];
        loop {
            let (num_read, from) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };
            sender.on_packet(&buf[..num_read], from).await;
        }
    }
}

/// Binds a [FrameReceiver] to a UDP socket that data datagrams are received on and that
///  control datagrams are sent from.
pub struct ReceiverEndPoint {
    socket: Arc<UdpSocket>,
    receiver: FrameReceiver,
}

impl ReceiverEndPoint {
    pub async fn bind(config: Arc<ReceiverConfig>, frame_consumer: Arc<dyn FrameConsumer>) -> anyhow::Result<ReceiverEndPoint> {
        Self::bind_with(config, frame_consumer, |socket| socket).await
    }

    pub async fn bind_with(
        config: Arc<ReceiverConfig>,
        frame_consumer: Arc<dyn FrameConsumer>,
        wrap_send_socket: impl FnOnce(Arc<dyn SendSocket>) -> Arc<dyn SendSocket>,
    ) -> anyhow::Result<ReceiverEndPoint> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.listen_addr).await?);
        info!("bound receiver socket to {:?}", socket.local_addr()?);

        let send_socket = wrap_send_socket(Arc::new(socket.clone()));
        let receiver = FrameReceiver::new(config, Arc::new(SendPipeline::new(send_socket)), frame_consumer);

        Ok(ReceiverEndPoint {
            socket,
            receiver,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn receiver(&self) -> &FrameReceiver {
        &self.receiver
    }

    /// Runs the receiver until `shutdown` completes, then stops it. Frames that were received
    ///  but not handed to the consumer at that point are discarded.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        self.receiver.start();

        select! {
            _ = Self::recv_loop(&self.socket, &self.receiver) => {}
            _ = shutdown => {
                info!("shutdown requested");
            }
        }

        self.receiver.stop().await;
    }

    async fn recv_loop(socket: &UdpSocket, receiver: &FrameReceiver) {
        let mut buf = vec![0u8; RECEIVE_BUFFER_LEN];
        loop {
            let (num_read, from) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };
            receiver.on_packet(&buf[..num_read], from).await;
        }
    }
}
