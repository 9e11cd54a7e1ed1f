//! In-process broker.
//!
//! Implements [`BrokerTransport`] without a network: published messages are
//! recorded, optional per-route responders produce replies, and tests may
//! inject replies by hand in any order.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{BrokerError, BrokerTransport, InboundReply, MessageEnvelope, ReplyStream};

/// A message as seen by the in-memory broker.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub route: String,
    pub envelope: MessageEnvelope,
}

impl PublishedMessage {
    pub fn correlation_id(&self) -> &str {
        &self.envelope.correlation_id
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.envelope.header(name)
    }

    /// Body parsed as JSON; `None` for empty or non-JSON bodies.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.envelope.body).ok()
    }
}

type Responder = Arc<dyn Fn(&PublishedMessage) -> Option<Value> + Send + Sync>;
type ReplySender = mpsc::UnboundedSender<Result<InboundReply, BrokerError>>;
type ReplyReceiver = mpsc::UnboundedReceiver<Result<InboundReply, BrokerError>>;

pub struct InMemoryBroker {
    reply_queue: String,
    published: Mutex<Vec<PublishedMessage>>,
    published_count: watch::Sender<usize>,
    responders: Mutex<HashMap<String, Responder>>,
    rejected_routes: Mutex<HashSet<String>>,
    reply_tx: Mutex<Option<ReplySender>>,
    reply_rx: Mutex<Option<ReplyReceiver>>,
}

impl InMemoryBroker {
    pub fn new(reply_queue: impl Into<String>) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (published_count, _) = watch::channel(0);
        Self {
            reply_queue: reply_queue.into(),
            published: Mutex::new(Vec::new()),
            published_count,
            responders: Mutex::new(HashMap::new()),
            rejected_routes: Mutex::new(HashSet::new()),
            reply_tx: Mutex::new(Some(reply_tx)),
            reply_rx: Mutex::new(Some(reply_rx)),
        }
    }

    /// Answer every message published to `route` with the reply body the
    /// closure returns. Returning `None` leaves the call unanswered.
    pub fn respond<F>(&self, route: &str, responder: F)
    where
        F: Fn(&PublishedMessage) -> Option<Value> + Send + Sync + 'static,
    {
        lock(&self.responders).insert(route.to_string(), Arc::new(responder));
    }

    /// Make publishes to `route` fail as if the broker returned them.
    pub fn reject_route(&self, route: &str) {
        lock(&self.rejected_routes).insert(route.to_string());
    }

    /// Push a raw reply onto the reply queue.
    pub fn inject(&self, body: Vec<u8>, correlation_id: Option<String>) {
        self.push(Ok(InboundReply {
            correlation_id,
            body,
        }));
    }

    /// Push a JSON reply onto the reply queue.
    pub fn inject_json(&self, body: &Value) {
        self.inject(body.to_string().into_bytes(), None);
    }

    /// Simulate a lost connection: the reply stream yields an error and ends.
    pub fn disconnect(&self) {
        self.push(Err(BrokerError::Unavailable(
            "in-memory broker disconnected".to_string(),
        )));
        lock(&self.reply_tx).take();
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn published_to(&self, route: &str) -> usize {
        lock(&self.published)
            .iter()
            .filter(|m| m.route == route)
            .count()
    }

    /// Wait until at least `count` messages have been published.
    pub async fn wait_for_published(&self, count: usize) {
        let mut rx = self.published_count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    fn push(&self, item: Result<InboundReply, BrokerError>) {
        if let Some(tx) = lock(&self.reply_tx).as_ref() {
            if tx.send(item).is_err() {
                tracing::debug!("Reply stream dropped; discarding in-memory reply");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    async fn publish(&self, route: &str, envelope: &MessageEnvelope) -> Result<(), BrokerError> {
        if lock(&self.rejected_routes).contains(route) {
            return Err(BrokerError::Undeliverable {
                route: route.to_string(),
            });
        }
        if lock(&self.reply_tx).is_none() {
            return Err(BrokerError::Unavailable(
                "in-memory broker disconnected".to_string(),
            ));
        }

        let message = PublishedMessage {
            route: route.to_string(),
            envelope: envelope.clone(),
        };

        let responder = lock(&self.responders).get(route).cloned();
        {
            let mut published = lock(&self.published);
            published.push(message.clone());
            self.published_count.send_replace(published.len());
        }

        if let Some(responder) = responder {
            if let Some(reply) = responder(&message) {
                self.inject(
                    reply.to_string().into_bytes(),
                    Some(message.correlation_id().to_string()),
                );
            }
        }

        Ok(())
    }

    async fn replies(&self) -> Result<ReplyStream, BrokerError> {
        let rx = lock(&self.reply_rx).take().ok_or_else(|| {
            BrokerError::Unavailable("reply queue already has a consumer".to_string())
        })?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
