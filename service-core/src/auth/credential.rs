use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("Token not provided")]
    Missing,

    #[error("Malformed authorization header: {0}")]
    Malformed(&'static str),
}

/// A bearer credential exactly as the caller sent it.
///
/// The full header value is kept so it can be forwarded verbatim to remote
/// services.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    header_value: String,
}

impl Credential {
    /// Original `Authorization` header value, e.g. `Bearer eyJ...`.
    pub fn header_value(&self) -> &str {
        &self.header_value
    }

    /// The token without its scheme.
    pub fn token(&self) -> &str {
        self.header_value
            .split_once(' ')
            .map(|(_, token)| token.trim())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("header_value", &"Bearer ***")
            .finish()
    }
}

/// Parse a raw `Authorization` header value.
pub fn parse_authorization(raw: Option<&str>) -> Result<Credential, CredentialError> {
    let raw = raw.map(str::trim).filter(|v| !v.is_empty());
    let raw = raw.ok_or(CredentialError::Missing)?;

    let (scheme, token) = raw
        .split_once(' ')
        .ok_or(CredentialError::Malformed("expected `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(CredentialError::Malformed("only Bearer credentials are accepted"));
    }
    if token.trim().is_empty() {
        return Err(CredentialError::Malformed("empty bearer token"));
    }

    Ok(Credential {
        header_value: raw.to_string(),
    })
}

/// Extract the bearer credential from request headers.
pub fn credential_from_headers(headers: &HeaderMap) -> Result<Credential, CredentialError> {
    let raw = match headers.get(header::AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| CredentialError::Malformed("invalid header encoding"))?,
        ),
        None => None,
    };
    parse_authorization(raw)
}

/// Claims the bank services read from a caller's token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CredentialClaims {
    /// Identifier of the user the token was issued to.
    pub id: i64,
    pub exp: i64,
}

/// Verifies tokens against the shared secret. Holds no per-request state.
#[derive(Clone)]
pub struct ClaimsDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl ClaimsDecoder {
    pub fn new(secret: &Secret<String>, algorithm: Algorithm) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation: Validation::new(algorithm),
        }
    }

    pub fn decode(
        &self,
        credential: &Credential,
    ) -> Result<CredentialClaims, jsonwebtoken::errors::Error> {
        decode::<CredentialClaims>(credential.token(), &self.key, &self.validation)
            .map(|data| data.claims)
    }
}
