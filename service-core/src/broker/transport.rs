use async_trait::async_trait;
use futures::stream::BoxStream;

use super::{BrokerError, MessageEnvelope};

/// A raw message taken off the private reply queue (already acknowledged).
#[derive(Debug, Clone, PartialEq)]
pub struct InboundReply {
    /// Correlation id from the message properties, if the sender set one.
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

pub type ReplyStream = BoxStream<'static, Result<InboundReply, BrokerError>>;

/// The two halves of a broker the request/reply engine needs.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Address replies must be sent to.
    fn reply_queue(&self) -> &str;

    /// Publish `envelope` to `route`. Fails with `Undeliverable` when the
    /// broker refuses a mandatory message.
    async fn publish(&self, route: &str, envelope: &MessageEnvelope) -> Result<(), BrokerError>;

    /// Start consuming the reply queue.
    async fn replies(&self) -> Result<ReplyStream, BrokerError>;
}
