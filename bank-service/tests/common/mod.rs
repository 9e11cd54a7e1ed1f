#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use bank_service::authz::routes::{GET_USER, IS_SUPER_PERMISSION, VALIDATE_ACTION};
use bank_service::config::{BankConfig, Environment, JwtConfig};
use bank_service::ledger::InMemoryLedger;
use bank_service::{build_router, AppState};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::Secret;
use serde::Serialize;
use serde_json::{json, Value};
use service_core::broker::{reply_body, InMemoryBroker, RpcClient, RpcConfig};
use service_core::config::{BrokerConfig, Config};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const REPLY_QUEUE: &str = "bank_service_test";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = service_core::observability::init_tracing("bank-service-test", "warn", None);
    });
}

pub fn test_config() -> BankConfig {
    BankConfig {
        common: Config { port: 0 },
        environment: Environment::Dev,
        service_name: "bank-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        broker: BrokerConfig {
            reply_queue: REPLY_QUEUE.to_string(),
            ..BrokerConfig::default()
        },
        jwt: JwtConfig {
            secret: Secret::new(JWT_SECRET.to_string()),
            algorithm: "HS256".to_string(),
        },
    }
}

/// Mint a bearer header for `user_id`.
pub fn bearer(user_id: i64) -> String {
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
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to mint token");
    format!("Bearer {}", token)
}

#[derive(Debug, Clone, Default)]
struct PolicyUser {
    id: i64,
    is_super: bool,
    denied: HashSet<String>,
}

/// Scripted stand-in for the remote policy/identity service. Users are keyed
/// by the bearer header forwarded with each message.
#[derive(Clone, Default)]
pub struct PolicyService {
    users: Arc<Mutex<HashMap<String, PolicyUser>>>,
    next_user_id: Arc<AtomicI64>,
}

impl PolicyService {
    /// Register a user and return their bearer header.
    pub fn user(&self, id: i64) -> String {
        self.insert(PolicyUser {
            id,
            ..PolicyUser::default()
        })
    }

    pub fn super_user(&self, id: i64) -> String {
        self.insert(PolicyUser {
            id,
            is_super: true,
            ..PolicyUser::default()
        })
    }

    /// Register a user for whom `action` is refused.
    pub fn user_denied(&self, id: i64, action: &str) -> String {
        self.insert(PolicyUser {
            id,
            denied: HashSet::from([action.to_string()]),
            ..PolicyUser::default()
        })
    }

    fn insert(&self, user: PolicyUser) -> String {
        let header = bearer(user.id);
        self.users
            .lock()
            .unwrap()
            .insert(header.clone(), user);
        header
    }

    fn lookup(&self, header: Option<&str>) -> Option<PolicyUser> {
        let users = self.users.lock().unwrap();
        header.and_then(|h| users.get(h).cloned())
    }

    /// Wire the policy routes onto `broker`.
    pub fn install(&self, broker: &InMemoryBroker) {
        self.next_user_id.store(1000, Ordering::SeqCst);

        let policy = self.clone();
        broker.respond(IS_SUPER_PERMISSION, move |msg| {
            let reply = match policy.lookup(msg.header("Authorization")) {
                Some(user) => reply_body(json!(user.is_super), true, msg.correlation_id()),
                None => reply_body(json!("Token is invalid"), false, msg.correlation_id()),
            };
            Some(reply)
        });

        let policy = self.clone();
        broker.respond(VALIDATE_ACTION, move |msg| {
            let user = policy.lookup(msg.header("Authorization"))?;
            let action = msg.json_body()?["action"].as_str()?.to_string();
            Some(reply_body(
                json!({ "allowed": !user.denied.contains(&action), "user_id": user.id }),
                true,
                msg.correlation_id(),
            ))
        });

        let policy = self.clone();
        broker.respond(GET_USER, move |msg| {
            let mut body = msg.json_body()?;
            let fields = body.as_object_mut()?;
            fields.remove("password");
            let user_id = policy.next_user_id.fetch_add(1, Ordering::SeqCst);
            fields.insert("user_id".to_string(), json!(user_id));
            Some(reply_body(body, true, msg.correlation_id()))
        });
    }
}

pub struct TestApp {
    pub router: Router,
    pub broker: Arc<InMemoryBroker>,
    pub ledger: Arc<InMemoryLedger>,
    pub rpc: RpcClient,
    pub policy: PolicyService,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(RpcConfig {
            timeout: Duration::from_secs(2),
            ..RpcConfig::default()
        })
        .await
    }

    pub async fn spawn_with(rpc_config: RpcConfig) -> Self {
        init_tracing();

        let broker = Arc::new(InMemoryBroker::new(REPLY_QUEUE));
        let policy = PolicyService::default();
        policy.install(&broker);

        let rpc = RpcClient::start(broker.clone(), rpc_config)
            .await
            .expect("Failed to start request/reply engine");
        let ledger = Arc::new(InMemoryLedger::new());

        let state = AppState::new(test_config(), rpc.clone(), ledger.clone())
            .expect("Failed to build application state");

        TestApp {
            router: build_router(state),
            broker,
            ledger,
            rpc,
            policy,
        }
    }

    /// Send a request through the full router and decode the JSON response.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        authorization: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(authorization) = authorization {
            builder = builder.header("authorization", authorization);
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Action carried by the most recent `VALIDATE_ACTION` message.
    pub fn last_validated_action(&self) -> Option<String> {
        self.broker
            .published()
            .into_iter()
            .rev()
            .find(|m| m.route == VALIDATE_ACTION)
            .and_then(|m| m.json_body())
            .and_then(|body| body["action"].as_str().map(str::to_string))
    }
}
