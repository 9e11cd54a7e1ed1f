use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    authz::{Action, Authorized},
    ledger::LedgerError,
    models::{CreateTransferRequest, Transaction},
    AppState,
};

/// `VIEW_ALL_PROFILES` lists every transaction; otherwise those touching one
/// of the caller's accounts.
pub async fn list_transactions(
    State(state): State<AppState>,
    Authorized(auth): Authorized,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let participant = match auth.action {
        Action::ViewAllProfiles => None,
        _ => Some(auth.decision.acting_user_id),
    };

    let transactions = state.ledger.list_transactions(participant).await?;
    Ok(Json(transactions))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Authorized(auth): Authorized,
    Path(transaction_id): Path<i64>,
) -> Result<Json<Transaction>, AppError> {
    tracing::info!(
        transaction_id,
        user_id = auth.decision.acting_user_id,
        action = %auth.action,
        "Fetching transaction"
    );

    let transaction = state.ledger.get_transaction(transaction_id).await?;
    Ok(Json(transaction))
}

/// Transfer funds out of one of the acting user's accounts.
pub async fn create_transaction(
    State(state): State<AppState>,
    Authorized(auth): Authorized,
    Json(payload): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let sender = state.ledger.get_account(payload.sender_id).await?;
    if sender.user_id != auth.decision.acting_user_id {
        tracing::warn!(
            sender_id = payload.sender_id,
            user_id = auth.decision.acting_user_id,
            "Transfer from an account the caller does not own"
        );
        return Err(LedgerError::NotAccountOwner {
            account_id: payload.sender_id,
        }
        .into());
    }

    let transaction = state
        .ledger
        .transfer(payload.sender_id, payload.recipient_id, payload.amount)
        .await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}
