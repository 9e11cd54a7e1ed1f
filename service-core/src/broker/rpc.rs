//! Correlated request/reply engine.
//!
//! Every call registers a waiter under a fresh correlation id, publishes its
//! request and suspends until the dispatcher hands it the matching reply or
//! the deadline passes. A single dispatcher task owns the consumption of the
//! shared reply queue, so replies may arrive in any order and from any
//! number of concurrent callers.
//!
//! Replies nobody is waiting for are parked in a bounded "unclaimed" table
//! (keyed by correlation id, expiring after a TTL) instead of being dropped.

use dashmap::DashMap;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::envelope::{decode_reply, encode_body};
use super::{BrokerError, BrokerTransport, InboundReply, MessageEnvelope, ReplyEnvelope};
use crate::config::BrokerConfig;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Upper bound on a single round trip.
    pub timeout: Duration,
    /// How long an unclaimed reply is kept for its owner.
    pub unclaimed_ttl: Duration,
    /// Maximum number of parked replies.
    pub unclaimed_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            unclaimed_ttl: Duration::from_secs(60),
            unclaimed_capacity: 1024,
        }
    }
}

impl From<&BrokerConfig> for RpcConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            timeout: config.rpc_timeout(),
            unclaimed_ttl: config.unclaimed_ttl(),
            unclaimed_capacity: config.unclaimed_capacity,
        }
    }
}

type ReplyResult = Result<ReplyEnvelope, BrokerError>;

struct Unclaimed {
    reply: ReplyResult,
    received_at: Instant,
}

struct Inner {
    transport: Arc<dyn BrokerTransport>,
    config: RpcConfig,
    pending: DashMap<String, oneshot::Sender<ReplyResult>>,
    unclaimed: DashMap<String, Unclaimed>,
    closed: AtomicBool,
}

/// Handle to the request/reply engine. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
    dispatcher: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

/// One outbound round trip. Deregisters its waiter when dropped, which covers
/// completion, timeout and cancellation of the calling task alike.
struct PendingCall<'a> {
    correlation_id: String,
    route: &'a str,
    created_at: Instant,
    pending: &'a DashMap<String, oneshot::Sender<ReplyResult>>,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.pending.remove(&self.correlation_id).is_some() {
            tracing::debug!(
                route = self.route,
                correlation_id = %self.correlation_id,
                waited_ms = self.created_at.elapsed().as_millis() as u64,
                "Abandoned pending call"
            );
        }
    }
}

impl RpcClient {
    /// Subscribe to the transport's reply queue and spawn the dispatcher.
    pub async fn start(
        transport: Arc<dyn BrokerTransport>,
        config: RpcConfig,
    ) -> Result<Self, BrokerError> {
        let replies = transport.replies().await?;

        let inner = Arc::new(Inner {
            transport,
            config,
            pending: DashMap::new(),
            unclaimed: DashMap::new(),
            closed: AtomicBool::new(false),
        });

        let handle = tokio::spawn(run_dispatcher(inner.clone(), replies));

        tracing::info!(
            reply_queue = inner.transport.reply_queue(),
            timeout_ms = inner.config.timeout.as_millis() as u64,
            "Request/reply dispatcher started"
        );

        Ok(Self {
            inner,
            dispatcher: Arc::new(std::sync::Mutex::new(Some(handle))),
        })
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of parked replies whose owner has not picked them up.
    pub fn unclaimed_replies(&self) -> usize {
        self.inner.unclaimed.len()
    }

    /// Take a parked reply for `correlation_id`, if one is held.
    #[cfg(test)]
    fn claim(&self, correlation_id: &str) -> Option<Result<ReplyEnvelope, BrokerError>> {
        self.inner
            .unclaimed
            .remove(correlation_id)
            .map(|(_, parked)| parked.reply)
    }

    /// Publish `body` to `route` and wait for the correlated reply.
    ///
    /// Returns the remote `answer` on success. A reply with `status = false`
    /// becomes [`BrokerError::RemoteCallFailed`] carrying that answer.
    pub async fn call(
        &self,
        route: &str,
        body: Vec<u8>,
        headers: BTreeMap<String, String>,
    ) -> Result<Value, BrokerError> {
        let started = Instant::now();
        let result = self.round_trip(route, body, headers).await.and_then(|reply| {
            if reply.success {
                Ok(reply.answer)
            } else {
                Err(BrokerError::RemoteCallFailed {
                    route: route.to_string(),
                    detail: reply.answer,
                })
            }
        });

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        counter!(
            "broker_rpc_calls_total",
            "route" => route.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("broker_rpc_duration_seconds", "route" => route.to_string())
            .record(started.elapsed().as_secs_f64());

        result
    }

    /// [`call`](Self::call) with a JSON-serialized body.
    pub async fn call_json<T: Serialize + ?Sized>(
        &self,
        route: &str,
        body: &T,
        headers: BTreeMap<String, String>,
    ) -> Result<Value, BrokerError> {
        let body = encode_body(body)?;
        self.call(route, body, headers).await
    }

    async fn round_trip(
        &self,
        route: &str,
        body: Vec<u8>,
        headers: BTreeMap<String, String>,
    ) -> Result<ReplyEnvelope, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Unavailable(
                "reply dispatcher has stopped".to_string(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            correlation_id: Uuid::new_v4().to_string(),
            route,
            created_at: Instant::now(),
            pending: &self.inner.pending,
        };

        // Register before publishing so a fast reply always finds its waiter.
        self.inner.pending.insert(call.correlation_id.clone(), tx);

        let envelope = MessageEnvelope::new(
            body,
            self.inner.transport.reply_queue(),
            call.correlation_id.clone(),
            headers,
        );

        // One deadline covers publishing, the broker's confirm and the reply.
        let exchange = async {
            tracing::debug!(
                route,
                correlation_id = %call.correlation_id,
                "Publishing request"
            );
            self.inner.transport.publish(route, &envelope).await?;
            rx.await.map_err(|_| {
                BrokerError::Unavailable("reply dispatcher has stopped".to_string())
            })?
        };

        match tokio::time::timeout(self.inner.config.timeout, exchange).await {
            Ok(Ok(reply)) => {
                tracing::debug!(
                    route,
                    correlation_id = %call.correlation_id,
                    elapsed_ms = call.created_at.elapsed().as_millis() as u64,
                    "Received correlated reply"
                );
                Ok(reply)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                tracing::warn!(
                    route,
                    correlation_id = %call.correlation_id,
                    timeout_ms = self.inner.config.timeout.as_millis() as u64,
                    "Timed out waiting for reply"
                );
                Err(BrokerError::Timeout {
                    route: route.to_string(),
                    after: self.inner.config.timeout,
                })
            }
        }
    }

    /// Whether the dispatcher has stopped for good. Every later call fails
    /// with `Unavailable`.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop the dispatcher. Pending calls fail with `Unavailable`.
    pub fn shutdown(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.inner.close("client shut down");
    }
}

async fn run_dispatcher(inner: Arc<Inner>, mut replies: super::ReplyStream) {
    use futures::StreamExt;

    while let Some(item) = replies.next().await {
        match item {
            Ok(inbound) => inner.dispatch(inbound),
            Err(err) => {
                tracing::error!(error = %err, "Reply stream failed");
                inner.close(&err.to_string());
                return;
            }
        }
    }

    tracing::warn!("Reply stream ended");
    inner.close("reply stream ended");
}

impl Inner {
    fn dispatch(&self, inbound: InboundReply) {
        let (correlation_id, reply) =
            match decode_reply(&inbound.body, inbound.correlation_id.as_deref()) {
                Ok(reply) => (reply.correlation_id.clone(), Ok(reply)),
                Err(err) => match inbound.correlation_id {
                    Some(id) => (id, Err(err)),
                    None => {
                        tracing::warn!(error = %err, "Dropping reply without correlation id");
                        counter!("broker_dropped_replies_total").increment(1);
                        return;
                    }
                },
            };

        match self.pending.remove(&correlation_id) {
            Some((_, waiter)) => {
                if waiter.send(reply).is_err() {
                    tracing::debug!(%correlation_id, "Waiter went away before its reply");
                }
            }
            None => self.park(correlation_id, reply),
        }
    }

    fn park(&self, correlation_id: String, reply: ReplyResult) {
        self.evict_expired();

        if self.unclaimed.len() >= self.config.unclaimed_capacity {
            tracing::warn!(
                %correlation_id,
                capacity = self.config.unclaimed_capacity,
                "Unclaimed reply table full, dropping reply"
            );
            counter!("broker_dropped_replies_total").increment(1);
            return;
        }

        tracing::debug!(%correlation_id, "Parking reply with no waiting caller");
        counter!("broker_unclaimed_replies_total").increment(1);
        self.unclaimed.insert(
            correlation_id,
            Unclaimed {
                reply,
                received_at: Instant::now(),
            },
        );
    }

    fn evict_expired(&self) {
        let ttl = self.config.unclaimed_ttl;
        self.unclaimed
            .retain(|_, parked| parked.received_at.elapsed() < ttl);
    }

    fn close(&self, reason: &str) {
        self.closed.store(true, Ordering::Release);

        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                let _ = waiter.send(Err(BrokerError::Unavailable(reason.to_string())));
            }
        }
    }
}
