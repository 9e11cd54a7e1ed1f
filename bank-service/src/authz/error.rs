use service_core::auth::CredentialError;
use service_core::broker::BrokerError;
use service_core::error::AppError;
use thiserror::Error;

use super::Action;
use crate::ledger::LedgerError;

/// Failures of the authorization protocol. Kept apart from [`LedgerError`]
/// so protocol failures are never mistaken for business-rule rejections.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Token not provided")]
    CredentialMissing,

    #[error("Malformed credential: {0}")]
    CredentialMalformed(&'static str),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("No action is defined for {method} on {resource}")]
    UnsupportedOperation {
        method: String,
        resource: &'static str,
    },

    #[error("Permission denied for action {action}")]
    PermissionDenied { action: Action },

    #[error("Super-permission callers may not {method} through this endpoint")]
    SuperPermissionRestricted { method: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl AuthzError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthzError::CredentialMissing | AuthzError::CredentialMalformed(_) => "unauthenticated",
            AuthzError::Broker(err) => err.kind(),
            AuthzError::UnsupportedOperation { .. } => "unsupported",
            AuthzError::PermissionDenied { .. } => "denied",
            AuthzError::SuperPermissionRestricted { .. } => "super_restricted",
            AuthzError::Ledger(_) => "ledger",
        }
    }
}

impl From<CredentialError> for AuthzError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Missing => AuthzError::CredentialMissing,
            CredentialError::Malformed(reason) => AuthzError::CredentialMalformed(reason),
        }
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::CredentialMissing | AuthzError::CredentialMalformed(_) => {
                AppError::Unauthorized(anyhow::anyhow!(err))
            }
            AuthzError::Broker(e) => AppError::from(e),
            AuthzError::UnsupportedOperation { .. } => AppError::NotFound(anyhow::anyhow!(err)),
            AuthzError::PermissionDenied { .. } | AuthzError::SuperPermissionRestricted { .. } => {
                AppError::Forbidden(anyhow::anyhow!(err))
            }
            AuthzError::Ledger(e) => AppError::from(e),
        }
    }
}
