//! HTTP handlers
//!
//! - [`health`]: service health
//! - [`account`]: open, fetch and list accounts
//! - [`transfer`]: move money between accounts

pub mod account;
pub mod health;
pub mod transfer;

pub use account::{create_account, get_account, list_accounts};
pub use health::{HealthResponse, health_check};
pub use transfer::create_transfer;
