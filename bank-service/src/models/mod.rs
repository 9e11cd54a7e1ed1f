pub mod account;
pub mod transaction;

pub use account::{Account, CreateAccountRequest, CreatedAccountResponse, Permission, UpdateAccountRequest};
pub use transaction::{CreateTransferRequest, Transaction};
