use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Connection and request/reply settings for the message broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_guest")]
    pub user: String,
    #[serde(default = "default_guest_secret")]
    pub password: Secret<String>,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Requested channel number. Logged for operators; the AMQP client
    /// allocates channel ids itself.
    #[serde(default = "default_channel_number")]
    pub channel_number: u16,
    /// Process-private queue every reply is delivered to.
    #[serde(default = "default_reply_queue")]
    pub reply_queue: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_unclaimed_ttl_ms")]
    pub unclaimed_ttl_ms: u64,
    #[serde(default = "default_unclaimed_capacity")]
    pub unclaimed_capacity: usize,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_guest_secret() -> Secret<String> {
    Secret::new(default_guest())
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_channel_number() -> u16 {
    1
}

fn default_reply_queue() -> String {
    "bank_service".to_string()
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_unclaimed_ttl_ms() -> u64 {
    60_000
}

fn default_unclaimed_capacity() -> usize {
    1024
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            user: default_guest(),
            password: default_guest_secret(),
            vhost: default_vhost(),
            channel_number: default_channel_number(),
            reply_queue: default_reply_queue(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            unclaimed_ttl_ms: default_unclaimed_ttl_ms(),
            unclaimed_capacity: default_unclaimed_capacity(),
        }
    }
}

impl BrokerConfig {
    /// Structured AMQP URI including credentials. Never log this value.
    ///
    /// Built field by field so credentials and vhost need no escaping.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.expose_secret().clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }

    /// Endpoint with the password masked, for logs.
    pub fn redacted_uri(&self) -> String {
        format!(
            "amqp://{}:***@{}:{} (vhost {})",
            self.user, self.host, self.port, self.vhost
        )
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn unclaimed_ttl(&self) -> Duration {
        Duration::from_millis(self.unclaimed_ttl_ms)
    }
}
