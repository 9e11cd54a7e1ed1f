use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failures of the broker bridge.
///
/// `Clone` so that a single transport failure can be fanned out to every
/// call waiting on the shared reply queue.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Message for route `{route}` could not be delivered")]
    Undeliverable { route: String },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Remote call to `{route}` failed: {detail}")]
    RemoteCallFailed { route: String, detail: Value },

    #[error("No reply from `{route}` within {}ms", .after.as_millis())]
    Timeout { route: String, after: Duration },

    #[error("Failed to encode request: {0}")]
    Encode(String),
}

impl BrokerError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Unavailable(_) => "unavailable",
            BrokerError::Undeliverable { .. } => "undeliverable",
            BrokerError::MalformedReply(_) => "malformed_reply",
            BrokerError::RemoteCallFailed { .. } => "remote_failed",
            BrokerError::Timeout { .. } => "timeout",
            BrokerError::Encode(_) => "encode",
        }
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Encode(err.to_string())
    }
}
