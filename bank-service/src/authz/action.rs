use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::AuthzError;

/// Authorization intent validated by the policy service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ViewProfile,
    ViewAllProfiles,
    CreateAccount,
    CreateTransfer,
    AssignAdministrator,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ViewProfile => "VIEW_PROFILE",
            Action::ViewAllProfiles => "VIEW_ALL_PROFILES",
            Action::CreateAccount => "CREATE_ACCOUNT",
            Action::CreateTransfer => "CREATE_TRANSFER",
            Action::AssignAdministrator => "ASSIGN_ADMINISTRATOR",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Account,
    Transaction,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Account => "account",
            ResourceKind::Transaction => "transaction",
        }
    }
}

/// Facts an action is derived from.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub method: Method,
    pub resource: ResourceKind,
    /// The request targets a single resource by id.
    pub has_id: bool,
    pub is_super: bool,
    /// The caller owns the targeted resource. Only consulted for a
    /// non-super `GET` by id.
    pub owns: bool,
}

/// Map a request to its action. Combinations without a defined action fail
/// with [`AuthzError::UnsupportedOperation`].
pub fn derive_action(request: &ActionRequest) -> Result<Action, AuthzError> {
    use ResourceKind::*;

    let action = match (&request.method, request.resource) {
        (&Method::GET, Account | Transaction) => match (request.has_id, request.is_super) {
            (true, true) => Action::ViewProfile,
            (true, false) if request.owns => Action::ViewProfile,
            (true, false) => Action::ViewAllProfiles,
            (false, true) => Action::ViewAllProfiles,
            (false, false) => Action::ViewProfile,
        },
        (&Method::POST, Account) => Action::CreateAccount,
        (&Method::PUT, Account) => Action::AssignAdministrator,
        (&Method::POST, Transaction) => Action::CreateTransfer,
        (method, resource) => {
            return Err(AuthzError::UnsupportedOperation {
                method: method.to_string(),
                resource: resource.as_str(),
            })
        }
    };

    Ok(action)
}
