//! Remote authorization protocol.
//!
//! Two calls go to the policy service for every guarded request: a
//! super-permission lookup and, unless the policy gate already refused, the
//! validation of the derived action.

use axum::http::Method;
use metrics::counter;
use serde::Serialize;
use serde_json::{json, Map, Value};
use service_core::auth::{ClaimsDecoder, Credential};
use service_core::broker::{BrokerError, RpcClient, AUTHORIZATION_HEADER};
use service_core::middleware::tracing::REQUEST_ID_HEADER;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::routes::{GET_USER, IS_SUPER_PERMISSION, VALIDATE_ACTION};
use super::{derive_action, Action, ActionRequest, AuthzError, ResourceKind};
use crate::ledger::LedgerStore;

/// Outcome of a successful authorization, handed to the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub acting_user_id: i64,
    pub is_super_permission: bool,
    /// Any further fields the policy service attached to its answer.
    pub remote_fields: Map<String, Value>,
}

/// Who is calling, as forwarded to the remote service.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub credential: Credential,
    pub request_id: Option<String>,
}

impl CallerContext {
    pub fn new(credential: Credential, request_id: Option<String>) -> Self {
        Self {
            credential,
            request_id,
        }
    }

    fn forwarded_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(
            AUTHORIZATION_HEADER.to_string(),
            self.credential.header_value().to_string(),
        );
        if let Some(request_id) = &self.request_id {
            headers.insert(REQUEST_ID_HEADER.to_string(), request_id.clone());
        }
        headers
    }
}

/// A user record returned by `GET_USER`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteUser {
    pub user_id: i64,
    pub fields: Map<String, Value>,
}

#[derive(Clone)]
pub struct Authorizer {
    rpc: RpcClient,
    ledger: Arc<dyn LedgerStore>,
    claims: ClaimsDecoder,
}

impl Authorizer {
    pub fn new(rpc: RpcClient, ledger: Arc<dyn LedgerStore>, claims: ClaimsDecoder) -> Self {
        Self { rpc, ledger, claims }
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Ask the policy service whether the caller holds super-permission.
    pub async fn fetch_super_permission(&self, caller: &CallerContext) -> Result<bool, AuthzError> {
        let answer = self
            .rpc
            .call(IS_SUPER_PERMISSION, Vec::new(), caller.forwarded_headers())
            .await?;

        answer.as_bool().ok_or_else(|| {
            AuthzError::Broker(BrokerError::MalformedReply(format!(
                "{} answer must be a boolean, got {}",
                IS_SUPER_PERMISSION, answer
            )))
        })
    }

    /// Validate `action` for the caller.
    ///
    /// The policy service answers either `{"allowed": bool, "user_id": int,
    /// ...}` or a bare boolean, in which case the acting user is the one
    /// named by the caller's token.
    pub async fn validate_action(
        &self,
        action: Action,
        caller: &CallerContext,
    ) -> Result<AuthorizationDecision, AuthzError> {
        let answer = self
            .rpc
            .call_json(
                VALIDATE_ACTION,
                &json!({ "action": action }),
                caller.forwarded_headers(),
            )
            .await?;

        let (allowed, user_id, remote_fields) = match answer {
            Value::Bool(allowed) => (allowed, None, Map::new()),
            Value::Object(mut fields) => {
                let allowed = fields
                    .remove("allowed")
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| malformed("answer is missing boolean `allowed`"))?;
                let user_id = fields.remove("user_id").and_then(|v| v.as_i64());
                (allowed, user_id, fields)
            }
            other => {
                return Err(malformed(&format!(
                    "answer must be an object or a boolean, got {}",
                    other
                )))
            }
        };

        let acting_user_id = user_id
            .or_else(|| self.caller_id(caller))
            .ok_or_else(|| malformed("answer does not identify the acting user"))?;

        Ok(AuthorizationDecision {
            allowed,
            acting_user_id,
            is_super_permission: false,
            remote_fields,
        })
    }

    /// Run the full protocol for one request.
    ///
    /// A super-permission caller may only read (`GET`) or update (`PUT`);
    /// anything else is refused before an action is ever validated.
    pub async fn authorize(
        &self,
        method: &Method,
        resource: ResourceKind,
        target: Option<&str>,
        caller: &CallerContext,
    ) -> Result<(Action, AuthorizationDecision), AuthzError> {
        let is_super = self.fetch_super_permission(caller).await?;

        if is_super && *method != Method::GET && *method != Method::PUT {
            tracing::warn!(
                method = %method,
                resource = resource.as_str(),
                "Refusing mutating request from super-permission caller"
            );
            counter!(
                "authz_decisions_total",
                "action" => "none",
                "outcome" => "super_restricted"
            )
            .increment(1);
            return Err(AuthzError::SuperPermissionRestricted {
                method: method.to_string(),
            });
        }

        let has_id = target.is_some();
        let owns = if *method == Method::GET && has_id && !is_super {
            self.owns(resource, target, caller).await?
        } else {
            false
        };

        let action = derive_action(&ActionRequest {
            method: method.clone(),
            resource,
            has_id,
            is_super,
            owns,
        })?;

        let mut decision = self.validate_action(action, caller).await?;
        decision.is_super_permission = is_super;

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        counter!(
            "authz_decisions_total",
            "action" => action.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        tracing::info!(
            action = %action,
            user_id = decision.acting_user_id,
            is_super,
            allowed = decision.allowed,
            "Authorization decision"
        );

        if !decision.allowed {
            return Err(AuthzError::PermissionDenied { action });
        }

        Ok((action, decision))
    }

    /// Look up or register a user with the identity service. `body` is
    /// forwarded as the request payload.
    pub async fn query_user<T: Serialize + ?Sized>(
        &self,
        caller: &CallerContext,
        body: &T,
    ) -> Result<RemoteUser, AuthzError> {
        let answer = self
            .rpc
            .call_json(GET_USER, body, caller.forwarded_headers())
            .await?;

        let Value::Object(fields) = answer else {
            return Err(malformed("GET_USER answer must be an object"));
        };
        let user_id = fields
            .get("user_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed("GET_USER answer is missing integer `user_id`"))?;

        Ok(RemoteUser { user_id, fields })
    }

    /// Caller id from the token's claims. `None` when the token cannot be
    /// verified locally.
    fn caller_id(&self, caller: &CallerContext) -> Option<i64> {
        match self.claims.decode(&caller.credential) {
            Ok(claims) => Some(claims.id),
            Err(e) => {
                tracing::debug!(error = %e, "Could not read caller id from token");
                None
            }
        }
    }

    async fn owns(
        &self,
        resource: ResourceKind,
        target: Option<&str>,
        caller: &CallerContext,
    ) -> Result<bool, AuthzError> {
        let Some(target) = target.and_then(|t| t.parse::<i64>().ok()) else {
            return Ok(false);
        };
        let Some(user_id) = self.caller_id(caller) else {
            return Ok(false);
        };

        let owns = match resource {
            ResourceKind::Account => self.ledger.owns_account(target, user_id).await?,
            ResourceKind::Transaction => self.ledger.participates_in(target, user_id).await?,
        };
        Ok(owns)
    }
}

fn malformed(reason: &str) -> AuthzError {
    AuthzError::Broker(BrokerError::MalformedReply(reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use secrecy::Secret;
    use service_core::auth::parse_authorization;
    use service_core::broker::{reply_body, InMemoryBroker, RpcConfig};
    use std::time::Duration;

    const SECRET: &str = "protocol-secret";

    struct Harness {
        broker: Arc<InMemoryBroker>,
        ledger: Arc<InMemoryLedger>,
        authorizer: Authorizer,
    }

    async fn harness() -> Harness {
        let broker = Arc::new(InMemoryBroker::new("bank_service"));
        let rpc = RpcClient::start(
            broker.clone(),
            RpcConfig {
                timeout: Duration::from_millis(200),
                ..RpcConfig::default()
            },
        )
        .await
        .unwrap();
        let ledger = Arc::new(InMemoryLedger::new());
        let claims = ClaimsDecoder::new(&Secret::new(SECRET.to_string()), Algorithm::HS256);
        let authorizer = Authorizer::new(rpc, ledger.clone(), claims);
        Harness {
            broker,
            ledger,
            authorizer,
        }
    }

    fn caller(user_id: i64) -> CallerContext {
        #[derive(Serialize)]
        struct Claims {
            id: i64,
            exp: i64,
        }
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Claims {
                id: user_id,
                exp: 4_102_444_800,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        let credential = parse_authorization(Some(&format!("Bearer {}", token))).unwrap();
        CallerContext::new(credential, Some("req-1".to_string()))
    }

    fn script(broker: &InMemoryBroker, is_super: bool, allowed: bool) {
        broker.respond(IS_SUPER_PERMISSION, move |msg| {
            Some(reply_body(json!(is_super), true, msg.correlation_id()))
        });
        broker.respond(VALIDATE_ACTION, move |msg| {
            Some(reply_body(
                json!({ "allowed": allowed, "user_id": 77, "role": "client" }),
                true,
                msg.correlation_id(),
            ))
        });
    }

    fn validated_action(broker: &InMemoryBroker) -> Option<String> {
        broker
            .published()
            .into_iter()
            .rev()
            .find(|m| m.route == VALIDATE_ACTION)
            .and_then(|m| m.json_body())
            .and_then(|body| body["action"].as_str().map(str::to_string))
    }

    #[tokio::test]
    async fn test_super_get_by_id_views_profile() {
        let h = harness().await;
        script(&h.broker, true, true);

        let (action, decision) = h
            .authorizer
            .authorize(&Method::GET, ResourceKind::Account, Some("5"), &caller(1))
            .await
            .unwrap();

        assert_eq!(action, Action::ViewProfile);
        assert!(decision.allowed);
        assert!(decision.is_super_permission);
        assert_eq!(decision.acting_user_id, 77);
        assert_eq!(decision.remote_fields.get("role"), Some(&json!("client")));
        assert_eq!(validated_action(&h.broker).as_deref(), Some("VIEW_PROFILE"));
    }

    #[tokio::test]
    async fn test_ownership_comes_from_ledger() {
        let h = harness().await;
        script(&h.broker, false, true);
        let account = h.ledger.create_account(42).await.unwrap();
        let target = account.id.to_string();

        h.authorizer
            .authorize(&Method::GET, ResourceKind::Account, Some(&target), &caller(42))
            .await
            .unwrap();
        assert_eq!(validated_action(&h.broker).as_deref(), Some("VIEW_PROFILE"));

        h.authorizer
            .authorize(&Method::GET, ResourceKind::Account, Some(&target), &caller(43))
            .await
            .unwrap();
        assert_eq!(
            validated_action(&h.broker).as_deref(),
            Some("VIEW_ALL_PROFILES")
        );
    }

    #[tokio::test]
    async fn test_super_post_is_refused_without_validation() {
        let h = harness().await;
        script(&h.broker, true, true);

        let err = h
            .authorizer
            .authorize(&Method::POST, ResourceKind::Transaction, None, &caller(1))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthzError::SuperPermissionRestricted { .. }));
        assert_eq!(h.broker.published_to(IS_SUPER_PERMISSION), 1);
        assert_eq!(h.broker.published_to(VALIDATE_ACTION), 0);
    }

    #[tokio::test]
    async fn test_denied_decision() {
        let h = harness().await;
        script(&h.broker, false, false);

        let err = h
            .authorizer
            .authorize(&Method::POST, ResourceKind::Transaction, None, &caller(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthzError::PermissionDenied {
                action: Action::CreateTransfer
            }
        ));
    }

    #[tokio::test]
    async fn test_bare_boolean_answer_uses_token_user() {
        let h = harness().await;
        h.broker.respond(IS_SUPER_PERMISSION, |msg| {
            Some(reply_body(json!(false), true, msg.correlation_id()))
        });
        h.broker.respond(VALIDATE_ACTION, |msg| {
            Some(reply_body(json!(true), true, msg.correlation_id()))
        });

        let (_, decision) = h
            .authorizer
            .authorize(&Method::GET, ResourceKind::Account, None, &caller(9))
            .await
            .unwrap();
        assert_eq!(decision.acting_user_id, 9);
    }

    #[tokio::test]
    async fn test_non_boolean_super_answer_is_malformed() {
        let h = harness().await;
        h.broker.respond(IS_SUPER_PERMISSION, |msg| {
            Some(reply_body(json!("yes"), true, msg.correlation_id()))
        });

        let err = h
            .authorizer
            .fetch_super_permission(&caller(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthzError::Broker(BrokerError::MalformedReply(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_failure_is_propagated() {
        let h = harness().await;
        h.broker.respond(IS_SUPER_PERMISSION, |msg| {
            Some(reply_body(json!("Token is invalid"), false, msg.correlation_id()))
        });

        let err = h
            .authorizer
            .authorize(&Method::GET, ResourceKind::Account, None, &caller(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthzError::Broker(BrokerError::RemoteCallFailed { ref detail, .. })
                if detail == &json!("Token is invalid")
        ));
    }

    #[tokio::test]
    async fn test_headers_are_forwarded() {
        let h = harness().await;
        script(&h.broker, false, true);
        let caller = caller(3);

        h.authorizer
            .authorize(&Method::GET, ResourceKind::Transaction, None, &caller)
            .await
            .unwrap();

        for message in h.broker.published() {
            assert_eq!(
                message.header(AUTHORIZATION_HEADER),
                Some(caller.credential.header_value())
            );
            assert_eq!(message.header(REQUEST_ID_HEADER), Some("req-1"));
        }
    }

    #[tokio::test]
    async fn test_query_user_requires_user_id() {
        let h = harness().await;
        h.broker.respond(GET_USER, |msg| {
            let phone = msg.json_body()?["phone"].clone();
            Some(reply_body(
                json!({ "user_id": 12, "phone": phone }),
                true,
                msg.correlation_id(),
            ))
        });

        let user = h
            .authorizer
            .query_user(&caller(1), &json!({ "phone": "555-0100" }))
            .await
            .unwrap();
        assert_eq!(user.user_id, 12);
        assert_eq!(user.fields.get("phone"), Some(&json!("555-0100")));

        h.broker.respond(GET_USER, |msg| {
            Some(reply_body(json!({ "name": "x" }), true, msg.correlation_id()))
        });
        assert!(h
            .authorizer
            .query_user(&caller(1), &json!({}))
            .await
            .is_err());
    }
}
