use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Account {0} not found")]
    AccountNotFound(i64),

    #[error("Transaction {0} not found")]
    TransactionNotFound(i64),

    #[error("User {0} already has an account")]
    AccountExists(i64),

    #[error("Incorrect amount: {0}")]
    IncorrectAmount(i64),

    #[error("Sender and recipient must be different accounts")]
    SameSenderRecipient,

    #[error("Insufficient funds on account {account_id}")]
    InsufficientFunds { account_id: i64 },

    #[error("Account {account_id} does not belong to the acting user")]
    NotAccountOwner { account_id: i64 },
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(_) | LedgerError::TransactionNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err))
            }
            LedgerError::AccountExists(_) => AppError::Conflict(anyhow::anyhow!(err)),
            LedgerError::IncorrectAmount(_)
            | LedgerError::SameSenderRecipient
            | LedgerError::InsufficientFunds { .. } => AppError::BadRequest(anyhow::anyhow!(err)),
            LedgerError::NotAccountOwner { .. } => AppError::Forbidden(anyhow::anyhow!(err)),
        }
    }
}
