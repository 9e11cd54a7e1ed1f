use jsonwebtoken::Algorithm;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, BrokerConfig};
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct BankConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub broker: BrokerConfig,
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Settings used to read caller ids out of bearer tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub algorithm: String,
}

impl JwtConfig {
    /// Tokens are verified with the shared secret, so only HMAC algorithms
    /// are usable.
    pub fn algorithm(&self) -> Result<Algorithm, AppError> {
        let algorithm = Algorithm::from_str(&self.algorithm).map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!(
                "JWT_ALGORITHM '{}' is not a known algorithm",
                self.algorithm
            ))
        })?;

        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ALGORITHM {:?} needs a key pair; only HS256, HS384 and HS512 are supported",
                other
            ))),
        }
    }
}

impl BankConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = BrokerConfig::default();

        let config = BankConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("bank-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT", is_prod)?,
            broker: BrokerConfig {
                host: get_env("AMQP_HOST", Some(&defaults.host), is_prod)?,
                port: parse_env("AMQP_PORT", defaults.port, is_prod)?,
                user: get_env("AMQP_USER", Some(&defaults.user), is_prod)?,
                password: Secret::new(get_env("AMQP_PASSWORD", Some("guest"), is_prod)?),
                vhost: get_env("AMQP_VHOST", Some(&defaults.vhost), is_prod)?,
                channel_number: parse_env("AMQP_CHANNEL_NUMBER", defaults.channel_number, is_prod)?,
                reply_queue: get_env("AMQP_REPLY_QUEUE", Some(&defaults.reply_queue), is_prod)?,
                rpc_timeout_ms: parse_env("RPC_TIMEOUT_MS", defaults.rpc_timeout_ms, is_prod)?,
                unclaimed_ttl_ms: parse_env(
                    "RPC_UNCLAIMED_TTL_MS",
                    defaults.unclaimed_ttl_ms,
                    is_prod,
                )?,
                unclaimed_capacity: defaults.unclaimed_capacity,
            },
            jwt: JwtConfig {
                secret: Secret::new(get_env("JWT_SECRET_KEY", Some("dev-secret"), is_prod)?),
                algorithm: get_env("JWT_ALGORITHM", Some("HS256"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.broker.rpc_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RPC_TIMEOUT_MS must be greater than 0"
            )));
        }

        if self.broker.reply_queue.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AMQP_REPLY_QUEUE must not be empty"
            )));
        }

        if self.broker.unclaimed_capacity == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Unclaimed reply capacity must be greater than 0"
            )));
        }

        self.jwt.algorithm()?;

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str, is_prod: bool) -> Result<Option<String>, AppError> {
    match env::var(key) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        _ if is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} is required in production but not set",
            key
        ))),
        _ => Ok(None),
    }
}

fn parse_env<T>(key: &str, default: T, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr + ToString,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(&default.to_string()), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!(
                "Invalid environment: {}. Must be 'dev' or 'prod'",
                s
            )),
        }
    }
}
