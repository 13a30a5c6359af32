//! Simple Bank - Ledger Backend
//!
//! Accounts, balance-changing entries and transfers, with one composite
//! operation: an atomic money transfer between two accounts.
//!
//! # Modules
//!
//! - [`store`] - Querier seam, transaction executor, transfer engine, backends
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`gateway`] - HTTP API (axum)
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod store;

// Convenient re-exports at crate root
pub use store::{
    Account, Entry, Store, StoreError, Transfer, TransferTxParams, TransferTxResult,
};
