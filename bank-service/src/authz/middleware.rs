use axum::{
    extract::{FromRequestParts, Path, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use service_core::auth::credential_from_headers;
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;

use super::{Action, AuthorizationDecision, Authorizer, AuthzError, CallerContext, ResourceKind};

/// State for one guarded group of routes.
#[derive(Clone)]
pub struct AuthzLayer {
    pub authorizer: Authorizer,
    pub resource: ResourceKind,
}

impl AuthzLayer {
    pub fn new(authorizer: Authorizer, resource: ResourceKind) -> Self {
        Self {
            authorizer,
            resource,
        }
    }
}

/// Everything the handler needs to know about an authorized request.
#[derive(Debug, Clone)]
pub struct AuthorizedRequest {
    pub action: Action,
    pub decision: AuthorizationDecision,
    pub caller: CallerContext,
}

/// Authorize the request against the policy service before the handler
/// runs. Must be installed with `route_layer` so the path id is available.
pub async fn authorize_request(
    State(layer): State<AuthzLayer>,
    target: Option<Path<String>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credential = credential_from_headers(req.headers()).map_err(AuthzError::from)?;
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|RequestId(id)| id.clone());
    let caller = CallerContext::new(credential, request_id);
    let method = req.method().clone();

    let (action, decision) = layer
        .authorizer
        .authorize(
            &method,
            layer.resource,
            target.as_ref().map(|Path(id)| id.as_str()),
            &caller,
        )
        .await?;

    req.extensions_mut().insert(AuthorizedRequest {
        action,
        decision,
        caller,
    });

    Ok(next.run(req).await)
}

/// Extractor for the authorization outcome of the current request.
pub struct Authorized(pub AuthorizedRequest);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authorized
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authorized = parts.extensions.get::<AuthorizedRequest>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Authorization context missing from request extensions"
            ))
        })?;

        Ok(Authorized(authorized.clone()))
    }
}
