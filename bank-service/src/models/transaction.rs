use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A completed transfer between two accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

/// Amount rules are enforced by the ledger so they surface as ledger errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransferRequest {
    pub sender_id: i64,
    pub recipient_id: i64,
    pub amount: i64,
}
