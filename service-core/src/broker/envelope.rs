//! Message envelope codec.
//!
//! Outgoing requests carry an opaque body plus AMQP properties (reply queue,
//! correlation id, forwarded headers). Replies are JSON documents of the form
//! `{"answer": <any>, "status": <bool>, "message_id": "<correlation id>"}`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::BrokerError;

/// Header carrying the caller's bearer credential to the remote service.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// An outbound request. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    pub body: Vec<u8>,
    pub reply_to: String,
    pub correlation_id: String,
    pub headers: BTreeMap<String, String>,
}

impl MessageEnvelope {
    pub fn new(
        body: Vec<u8>,
        reply_to: impl Into<String>,
        correlation_id: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            body,
            reply_to: reply_to.into(),
            correlation_id: correlation_id.into(),
            headers,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Serialize a request body as JSON bytes.
pub fn encode_body<T: Serialize + ?Sized>(body: &T) -> Result<Vec<u8>, BrokerError> {
    Ok(serde_json::to_vec(body)?)
}

/// A decoded reply, consumed at most once by the call that owns its
/// correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    pub answer: Value,
    pub success: bool,
    pub correlation_id: String,
}

/// Decode a reply body.
///
/// `fallback_correlation_id` is the AMQP `correlation_id` property, used when
/// the body does not echo `message_id` itself.
pub fn decode_reply(
    bytes: &[u8],
    fallback_correlation_id: Option<&str>,
) -> Result<ReplyEnvelope, BrokerError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| BrokerError::MalformedReply(format!("reply is not valid JSON: {}", e)))?;

    let Value::Object(mut fields) = value else {
        return Err(BrokerError::MalformedReply(
            "reply must be a JSON object".to_string(),
        ));
    };

    let answer = fields
        .remove("answer")
        .ok_or_else(|| BrokerError::MalformedReply("reply is missing `answer`".to_string()))?;

    let success = match fields.remove("status") {
        Some(Value::Bool(status)) => status,
        Some(other) => {
            return Err(BrokerError::MalformedReply(format!(
                "`status` must be a boolean, got {}",
                other
            )));
        }
        None => {
            return Err(BrokerError::MalformedReply(
                "reply is missing `status`".to_string(),
            ));
        }
    };

    let correlation_id = correlation_id_of(&mut fields, fallback_correlation_id)?;

    Ok(ReplyEnvelope {
        answer,
        success,
        correlation_id,
    })
}

fn correlation_id_of(
    fields: &mut Map<String, Value>,
    fallback: Option<&str>,
) -> Result<String, BrokerError> {
    match fields.remove("message_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        Some(Value::String(_)) | Some(Value::Null) | None => fallback
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                BrokerError::MalformedReply("reply carries no correlation id".to_string())
            }),
        Some(other) => Err(BrokerError::MalformedReply(format!(
            "`message_id` must be a string, got {}",
            other
        ))),
    }
}

/// Build a reply body the way remote services emit them.
pub fn reply_body(answer: Value, success: bool, correlation_id: &str) -> Value {
    serde_json::json!({
        "answer": answer,
        "status": success,
        "message_id": correlation_id,
    })
}
