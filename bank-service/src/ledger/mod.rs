//! Account and transfer storage.

pub mod error;
pub mod memory;

pub use error::LedgerError;
pub use memory::InMemoryLedger;

use async_trait::async_trait;

use crate::models::{Account, Transaction};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an account with a zero balance for `user_id`.
    async fn create_account(&self, user_id: i64) -> Result<Account, LedgerError>;

    async fn get_account(&self, id: i64) -> Result<Account, LedgerError>;

    /// All accounts, or only those held by `owner`.
    async fn list_accounts(&self, owner: Option<i64>) -> Result<Vec<Account>, LedgerError>;

    async fn set_balance(&self, id: i64, balance: i64) -> Result<Account, LedgerError>;

    async fn get_transaction(&self, id: i64) -> Result<Transaction, LedgerError>;

    /// All transactions, or only those where `participant` owns the sender
    /// or the recipient account.
    async fn list_transactions(
        &self,
        participant: Option<i64>,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Debit `sender_id`, credit `recipient_id` and record the transaction as
    /// one atomic step.
    async fn transfer(
        &self,
        sender_id: i64,
        recipient_id: i64,
        amount: i64,
    ) -> Result<Transaction, LedgerError>;

    /// `false` when the account does not exist.
    async fn owns_account(&self, account_id: i64, user_id: i64) -> Result<bool, LedgerError>;

    /// `false` when the transaction does not exist.
    async fn participates_in(
        &self,
        transaction_id: i64,
        user_id: i64,
    ) -> Result<bool, LedgerError>;
}
