//! Bearer credential handling shared by services.

pub mod credential;

pub use credential::{
    ClaimsDecoder, Credential, CredentialClaims, CredentialError, credential_from_headers,
    parse_authorization,
};
