//! Bank Service - accounts and transfers authorized by a remote policy
//! service over an AMQP request/reply bridge.

pub mod authz;
pub mod config;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{build_router, AppState, Application};
