//! Account handlers. Every route here sits behind the authorization layer;
//! the decision arrives through the [`Authorized`] extractor.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    authz::{Action, Authorized},
    models::{Account, CreateAccountRequest, CreatedAccountResponse, UpdateAccountRequest},
    AppState,
};

/// `VIEW_ALL_PROFILES` lists every account; otherwise only the caller's.
pub async fn list_accounts(
    State(state): State<AppState>,
    Authorized(auth): Authorized,
) -> Result<Json<Vec<Account>>, AppError> {
    let owner = match auth.action {
        Action::ViewAllProfiles => None,
        _ => Some(auth.decision.acting_user_id),
    };

    let accounts = state.ledger.list_accounts(owner).await?;
    Ok(Json(accounts))
}

pub async fn get_account(
    State(state): State<AppState>,
    Authorized(auth): Authorized,
    Path(account_id): Path<i64>,
) -> Result<Json<Account>, AppError> {
    tracing::info!(
        account_id,
        user_id = auth.decision.acting_user_id,
        action = %auth.action,
        "Fetching account"
    );

    let account = state.ledger.get_account(account_id).await?;
    Ok(Json(account))
}

/// Register the user with the identity service, then open their account.
pub async fn create_account(
    State(state): State<AppState>,
    Authorized(auth): Authorized,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreatedAccountResponse>), AppError> {
    payload.validate()?;

    let user = state
        .authorizer
        .query_user(&auth.caller, &payload)
        .await?;

    let account = state.ledger.create_account(user.user_id).await?;

    tracing::info!(
        account_id = account.id,
        user_id = user.user_id,
        created_by = auth.decision.acting_user_id,
        permission = ?payload.permission,
        "Account opened"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatedAccountResponse {
            account,
            profile: user.fields,
        }),
    ))
}

/// Administrative balance correction.
pub async fn update_account(
    State(state): State<AppState>,
    Authorized(auth): Authorized,
    Path(account_id): Path<i64>,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    payload.validate()?;

    tracing::warn!(
        account_id,
        balance = payload.balance,
        admin_id = auth.decision.acting_user_id,
        "Administrative balance correction"
    );

    let account = state
        .ledger
        .set_balance(account_id, payload.balance)
        .await?;
    Ok(Json(account))
}
