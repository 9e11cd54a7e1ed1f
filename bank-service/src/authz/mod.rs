//! Authorization of banking requests by the remote policy service.
//!
//! Each request is turned into an [`Action`], round-tripped through the
//! broker for a decision, and the decision is handed to the handler through
//! request extensions.

pub mod action;
pub mod error;
pub mod middleware;
pub mod protocol;

pub use action::{derive_action, Action, ActionRequest, ResourceKind};
pub use error::AuthzError;
pub use middleware::{authorize_request, Authorized, AuthorizedRequest, AuthzLayer};
pub use protocol::{AuthorizationDecision, Authorizer, CallerContext, RemoteUser};

/// Routing keys of the policy/identity service.
pub mod routes {
    /// Look up or register a user.
    pub const GET_USER: &str = "GET_USER";

    /// Validate a derived action for the caller.
    pub const VALIDATE_ACTION: &str = "VALIDATE_ACTION";

    /// Whether the caller holds super-permission.
    pub const IS_SUPER_PERMISSION: &str = "IS_SUPER_PERMISSION";
}
