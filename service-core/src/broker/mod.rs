//! Request/reply bridge over an AMQP broker.
//!
//! A message broker is fire-and-forget by nature. This module makes it look
//! like a blocking remote procedure call to a request handler:
//! - `connection`: lazily opened, explicitly owned AMQP connection/channel
//! - `envelope`: request properties and reply body codec
//! - `rpc`: correlation-id waiting table with a single reply dispatcher
//! - `memory`: in-process broker used by tests and local development
//! - `retry`: backoff for the process-start connection warm-up

pub mod connection;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod retry;
pub mod rpc;
pub mod transport;

pub use connection::BrokerConnection;
pub use envelope::{
    AUTHORIZATION_HEADER, MessageEnvelope, ReplyEnvelope, decode_reply, encode_body, reply_body,
};
pub use error::BrokerError;
pub use memory::{InMemoryBroker, PublishedMessage};
pub use retry::{RetryConfig, is_retryable, retry_broker_op};
pub use rpc::{RpcClient, RpcConfig};
pub use transport::{BrokerTransport, InboundReply, ReplyStream};
