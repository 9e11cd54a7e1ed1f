use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{LedgerError, LedgerStore};
use crate::models::{Account, Transaction};

#[derive(Default)]
struct LedgerState {
    accounts: BTreeMap<i64, Account>,
    transactions: BTreeMap<i64, Transaction>,
    next_account_id: i64,
    next_transaction_id: i64,
}

impl LedgerState {
    fn account(&self, id: i64) -> Result<&Account, LedgerError> {
        self.accounts.get(&id).ok_or(LedgerError::AccountNotFound(id))
    }

    fn owns(&self, account_id: i64, user_id: i64) -> bool {
        self.accounts
            .get(&account_id)
            .map(|a| a.user_id == user_id)
            .unwrap_or(false)
    }
}

/// Ledger held in process memory. Every mutation happens under one write
/// lock, so a transfer is never observed half-applied.
#[derive(Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create_account(&self, user_id: i64) -> Result<Account, LedgerError> {
        let mut state = self.state.write().await;
        if state.accounts.values().any(|a| a.user_id == user_id) {
            return Err(LedgerError::AccountExists(user_id));
        }

        state.next_account_id += 1;
        let account = Account {
            id: state.next_account_id,
            user_id,
            balance: 0,
        };
        state.accounts.insert(account.id, account.clone());

        tracing::info!(account_id = account.id, user_id, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Account, LedgerError> {
        self.state.read().await.account(id).cloned()
    }

    async fn list_accounts(&self, owner: Option<i64>) -> Result<Vec<Account>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .filter(|a| owner.map_or(true, |user_id| a.user_id == user_id))
            .cloned()
            .collect())
    }

    async fn set_balance(&self, id: i64, balance: i64) -> Result<Account, LedgerError> {
        if balance < 0 {
            return Err(LedgerError::IncorrectAmount(balance));
        }

        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        account.balance = balance;

        tracing::info!(account_id = id, balance, "Account balance set");
        Ok(account.clone())
    }

    async fn get_transaction(&self, id: i64) -> Result<Transaction, LedgerError> {
        self.state
            .read()
            .await
            .transactions
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    async fn list_transactions(
        &self,
        participant: Option<i64>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| {
                participant.map_or(true, |user_id| {
                    state.owns(t.sender_id, user_id) || state.owns(t.recipient_id, user_id)
                })
            })
            .cloned()
            .collect())
    }

    async fn transfer(
        &self,
        sender_id: i64,
        recipient_id: i64,
        amount: i64,
    ) -> Result<Transaction, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::IncorrectAmount(amount));
        }
        if sender_id == recipient_id {
            return Err(LedgerError::SameSenderRecipient);
        }

        let mut state = self.state.write().await;

        let sender_balance = state.account(sender_id)?.balance;
        let recipient_balance = state.account(recipient_id)?.balance;

        if sender_balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account_id: sender_id,
            });
        }
        let credited = recipient_balance
            .checked_add(amount)
            .ok_or(LedgerError::IncorrectAmount(amount))?;

        // All checks passed; apply both sides and the record together.
        if let Some(sender) = state.accounts.get_mut(&sender_id) {
            sender.balance = sender_balance - amount;
        }
        if let Some(recipient) = state.accounts.get_mut(&recipient_id) {
            recipient.balance = credited;
        }

        state.next_transaction_id += 1;
        let transaction = Transaction {
            id: state.next_transaction_id,
            sender_id,
            recipient_id,
            amount,
            timestamp: Utc::now(),
        };
        state
            .transactions
            .insert(transaction.id, transaction.clone());

        tracing::info!(
            transaction_id = transaction.id,
            sender_id,
            recipient_id,
            amount,
            "Transfer completed"
        );
        Ok(transaction)
    }

    async fn owns_account(&self, account_id: i64, user_id: i64) -> Result<bool, LedgerError> {
        Ok(self.state.read().await.owns(account_id, user_id))
    }

    async fn participates_in(
        &self,
        transaction_id: i64,
        user_id: i64,
    ) -> Result<bool, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(&transaction_id)
            .map(|t| state.owns(t.sender_id, user_id) || state.owns(t.recipient_id, user_id))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn funded_pair(ledger: &InMemoryLedger) -> (Account, Account) {
        let alice = ledger.create_account(10).await.unwrap();
        let bob = ledger.create_account(20).await.unwrap();
        ledger.set_balance(alice.id, 100).await.unwrap();
        (alice, bob)
    }

    #[tokio::test]
    async fn test_one_account_per_user() {
        let ledger = InMemoryLedger::new();
        let first = ledger.create_account(7).await.unwrap();
        assert_eq!(first.balance, 0);
        assert_eq!(
            ledger.create_account(7).await,
            Err(LedgerError::AccountExists(7))
        );
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_and_records_transaction() {
        let ledger = InMemoryLedger::new();
        let (alice, bob) = funded_pair(&ledger).await;

        let tx = ledger.transfer(alice.id, bob.id, 40).await.unwrap();
        assert_eq!(tx.amount, 40);
        assert_eq!(ledger.get_account(alice.id).await.unwrap().balance, 60);
        assert_eq!(ledger.get_account(bob.id).await.unwrap().balance, 40);
        assert_eq!(ledger.get_transaction(tx.id).await.unwrap(), tx);
    }

    #[tokio::test]
    async fn test_transfer_rules() {
        let ledger = InMemoryLedger::new();
        let (alice, bob) = funded_pair(&ledger).await;

        assert_eq!(
            ledger.transfer(alice.id, bob.id, 0).await,
            Err(LedgerError::IncorrectAmount(0))
        );
        assert_eq!(
            ledger.transfer(alice.id, alice.id, 5).await,
            Err(LedgerError::SameSenderRecipient)
        );
        assert_eq!(
            ledger.transfer(alice.id, 99, 5).await,
            Err(LedgerError::AccountNotFound(99))
        );
        assert_eq!(
            ledger.transfer(alice.id, bob.id, 101).await,
            Err(LedgerError::InsufficientFunds {
                account_id: alice.id
            })
        );

        // Nothing moved.
        assert_eq!(ledger.get_account(alice.id).await.unwrap().balance, 100);
        assert!(ledger.list_transactions(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_transfers_never_overdraw() {
        let ledger = Arc::new(InMemoryLedger::new());
        let (alice, bob) = funded_pair(&ledger).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.transfer(alice.id, bob.id, 10).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(ledger.get_account(alice.id).await.unwrap().balance, 0);
        assert_eq!(ledger.get_account(bob.id).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_ownership_queries() {
        let ledger = InMemoryLedger::new();
        let (alice, bob) = funded_pair(&ledger).await;
        let carol = ledger.create_account(30).await.unwrap();
        let tx = ledger.transfer(alice.id, bob.id, 1).await.unwrap();

        assert!(ledger.owns_account(alice.id, 10).await.unwrap());
        assert!(!ledger.owns_account(alice.id, 20).await.unwrap());
        assert!(!ledger.owns_account(404, 10).await.unwrap());

        assert!(ledger.participates_in(tx.id, 10).await.unwrap());
        assert!(ledger.participates_in(tx.id, 20).await.unwrap());
        assert!(!ledger.participates_in(tx.id, 30).await.unwrap());
        assert!(!ledger.participates_in(404, 10).await.unwrap());

        assert_eq!(ledger.list_accounts(Some(30)).await.unwrap(), vec![carol]);
        assert_eq!(ledger.list_transactions(Some(30)).await.unwrap().len(), 0);
        assert_eq!(ledger.list_transactions(Some(20)).await.unwrap().len(), 1);
    }
}
