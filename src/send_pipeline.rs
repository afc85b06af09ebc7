use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tracing::{error, trace};
use crate::frame::Frame;
use crate::packet_header::PacketHeader;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }
}

/// Serializes headers and frames into datagrams and hands them to a [SendSocket].
///
/// NB: Send errors are logged by the socket and not reported back: the protocol recovers from
///      them the same way it recovers from packets lost on the wire
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>) -> SendPipeline {
        SendPipeline { socket }
    }

    pub async fn send_control(&self, to: SocketAddr, header: PacketHeader) {
        let mut buf = BytesMut::with_capacity(PacketHeader::SERIALIZED_LEN);
        header.ser(&mut buf);

        trace!("sending {:?} to {:?}", header, to);
        self.socket.do_send_packet(to, &buf).await;
    }

    pub async fn send_frame(&self, to: SocketAddr, frame: &Frame, is_retransmit: bool) {
        let header = PacketHeader::data(frame.seq_num, is_retransmit);

        let mut buf = BytesMut::with_capacity(PacketHeader::SERIALIZED_LEN + frame.len());
        header.ser(&mut buf);
        buf.put_slice(&frame.payload);

        trace!("sending {:?} with {} payload bytes to {:?}", header, frame.len(), to);
        self.socket.do_send_packet(to, &buf).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SeqNum;
    use crate::packet_header::Signal;
    use bytes::Bytes;
    use mockall::predicate::eq;
    use rstest::rstest;

    #[rstest]
    #[case::ack(PacketHeader::ack(SeqNum::from_raw(3), Signal::None), vec![0,0,0,0, 0,0,0,3, 0, 0])]
    #[case::resume(PacketHeader::ack(SeqNum::ZERO, Signal::Resume), vec![0,0,0,0, 0,0,0,0, 2, 0])]
    #[tokio::test]
    async fn test_send_control(#[case] header: PacketHeader, #[case] expected: Vec<u8>) {
        let mut socket = MockSendSocket::new();
        socket.expect_do_send_packet()
            .once()
            .with(eq(SocketAddr::from(([1,2,3,4], 9))), eq(expected))
            .return_const(());

        SendPipeline::new(Arc::new(socket))
            .send_control(SocketAddr::from(([1,2,3,4], 9)), header)
            .await;
    }

    #[rstest]
    #[case::fresh(false, vec![0,0,0,5, 0,0,0,0, 0, 0, 7,8,9])]
    #[case::retransmit(true, vec![0,0,0,5, 0,0,0,0, 0, 1, 7,8,9])]
    #[tokio::test]
    async fn test_send_frame(#[case] is_retransmit: bool, #[case] expected: Vec<u8>) {
        let mut socket = MockSendSocket::new();
        socket.expect_do_send_packet()
            .once()
            .with(eq(SocketAddr::from(([1,2,3,4], 9))), eq(expected))
            .return_const(());

        let frame = Frame::new(SeqNum::from_raw(5), Bytes::from_static(&[7, 8, 9]));
        SendPipeline::new(Arc::new(socket))
            .send_frame(SocketAddr::from(([1,2,3,4], 9)), &frame, is_retransmit)
            .await;
    }
}
