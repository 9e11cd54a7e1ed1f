//! AMQP connection manager.
//!
//! One connection and one channel per process, opened on first use and
//! shared by every caller. The handle is owned explicitly by the application
//! and closed at shutdown.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{BrokerError, BrokerTransport, InboundReply, MessageEnvelope, ReplyStream};
use crate::config::BrokerConfig;

struct Session {
    connection: Connection,
    channel: Channel,
}

pub struct BrokerConnection {
    config: BrokerConfig,
    /// Configured prefix plus a per-process suffix.
    reply_queue: String,
    session: OnceCell<Session>,
}

impl BrokerConnection {
    pub fn new(config: BrokerConfig) -> Self {
        let reply_queue = format!("{}.{}", config.reply_queue, Uuid::new_v4().simple());
        Self {
            config,
            reply_queue,
            session: OnceCell::new(),
        }
    }

    /// Return the shared channel, opening the connection on first call.
    ///
    /// Concurrent first callers wait on the same initialization; a failed
    /// attempt leaves the cell empty so a later request may try again.
    pub async fn acquire_channel(&self) -> Result<Channel, BrokerError> {
        let session = self.session.get_or_try_init(|| self.open()).await?;
        Ok(session.channel.clone())
    }

    async fn open(&self) -> Result<Session, BrokerError> {
        tracing::info!(
            uri = %self.config.redacted_uri(),
            channel_number = self.config.channel_number,
            reply_queue = %self.reply_queue,
            "Connecting to message broker"
        );

        let connection =
            Connection::connect_uri(self.config.amqp_uri(), ConnectionProperties::default())
                .await
                .map_err(|e| {
                    tracing::error!(
                        uri = %self.config.redacted_uri(),
                        error = %e,
                        "Failed to connect to message broker"
                    );
                    BrokerError::Unavailable(format!("failed to connect: {}", e))
                })?;

        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                &self.reply_queue,
                reply_queue_options(),
                FieldTable::default(),
            )
            .await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        tracing::info!(
            channel_id = channel.id(),
            reply_queue = %self.reply_queue,
            "Broker channel ready with publisher confirms"
        );

        Ok(Session {
            connection,
            channel,
        })
    }

    /// Close channel and connection. No-op if never opened.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if let Some(session) = self.session.get() {
            session.channel.close(200, "shutdown").await?;
            session.connection.close(200, "shutdown").await?;
            tracing::info!("Broker connection closed");
        }
        Ok(())
    }
}

/// Replies belong to this process alone: no other consumer may share the
/// queue and it disappears with the connection.
fn reply_queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        exclusive: true,
        auto_delete: true,
        ..QueueDeclareOptions::default()
    }
}

fn amqp_headers(envelope: &MessageEnvelope) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in &envelope.headers {
        table.insert(
            ShortString::from(name.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }
    table
}

#[async_trait]
impl BrokerTransport for BrokerConnection {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    async fn publish(&self, route: &str, envelope: &MessageEnvelope) -> Result<(), BrokerError> {
        let channel = self.acquire_channel().await?;

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_reply_to(ShortString::from(envelope.reply_to.clone()))
            .with_correlation_id(ShortString::from(envelope.correlation_id.clone()))
            .with_message_id(ShortString::from(envelope.correlation_id.clone()))
            .with_headers(amqp_headers(envelope));

        let confirmation = channel
            .basic_publish(
                "",
                route,
                BasicPublishOptions {
                    mandatory: true,
                    ..BasicPublishOptions::default()
                },
                &envelope.body,
                properties,
            )
            .await?
            .await?;

        match confirmation {
            Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
            Confirmation::Ack(Some(_)) => {
                tracing::warn!(route, "Broker returned unroutable message");
                Err(BrokerError::Undeliverable {
                    route: route.to_string(),
                })
            }
            Confirmation::Nack(_) => {
                tracing::warn!(route, "Broker nacked published message");
                Err(BrokerError::Undeliverable {
                    route: route.to_string(),
                })
            }
        }
    }

    async fn replies(&self) -> Result<ReplyStream, BrokerError> {
        let channel = self.acquire_channel().await?;
        let consumer_tag = format!("{}-rpc", self.reply_queue);

        let consumer = channel
            .basic_consume(
                &self.reply_queue,
                &consumer_tag,
                BasicConsumeOptions {
                    exclusive: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let stream = consumer.then(|delivery| async move {
            let delivery = delivery?;
            delivery.ack(BasicAckOptions::default()).await?;
            Ok::<_, BrokerError>(InboundReply {
                correlation_id: delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_owned()),
                body: delivery.data,
            })
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_queue_is_private_to_each_connection() {
        let first = BrokerConnection::new(BrokerConfig::default());
        let second = BrokerConnection::new(BrokerConfig::default());

        assert!(first.reply_queue().starts_with("bank_service."));
        assert_ne!(first.reply_queue(), second.reply_queue());
    }

    #[test]
    fn test_reply_queue_is_exclusive_and_auto_deleted() {
        let options = reply_queue_options();
        assert!(options.exclusive);
        assert!(options.auto_delete);
        assert!(!options.durable);
    }
}
