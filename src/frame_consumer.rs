use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use crate::frame::SeqNum;

/// The downstream consumer of a receiver: it gets frames strictly in ascending, gap-free
///  sequence order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameConsumer: Send + Sync + 'static {
    async fn on_frame(&self, seq_num: SeqNum, payload: &[u8]);
}
