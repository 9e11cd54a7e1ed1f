pub mod accounts;
pub mod health;
pub mod transactions;

pub use health::{health_check, metrics};
