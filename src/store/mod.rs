//! Ledger Store
//!
//! Accounts, entries and transfers behind the [`Querier`] seam, plus the
//! transfer engine that moves money between two accounts atomically.
//!
//! # Layout
//!
//! - [`querier`]: `Querier` / `TxQuerier` / `Backend` traits
//! - [`executor`]: commit-or-rollback wrapper around a unit of work
//! - [`transfer`]: `Store::transfer_tx`
//! - [`postgres`]: PostgreSQL backend (sqlx)
//! - [`memory`]: in-memory transactional backend

pub mod error;
pub mod executor;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod querier;
pub mod transfer;

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::PgPool;

pub use error::StoreError;
pub use executor::exec_tx;
pub use memory::{MemoryStore, Op};
pub use models::*;
pub use postgres::PgBackend;
pub use querier::{Backend, Querier, TxQuerier};

/// Handle to the ledger: plain queries plus transactional operations
///
/// Cheap to clone; every clone shares the same backend.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Store backed by a PostgreSQL pool
    pub fn postgres(pool: PgPool) -> Self {
        Self::new(Arc::new(PgBackend::new(pool)))
    }

    /// Store backed by the in-memory backend
    pub fn memory(memory: MemoryStore) -> Self {
        Self::new(Arc::new(memory))
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Auto-commit querier for single statements
    pub async fn queries(&self) -> Result<Box<dyn Querier>, StoreError> {
        self.backend.acquire().await
    }

    /// Run `work` in one transaction, see [`exec_tx`]
    pub async fn exec_tx<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: for<'q> FnOnce(&'q mut dyn Querier) -> BoxFuture<'q, Result<T, StoreError>> + Send,
        T: Send,
    {
        exec_tx(self.backend.as_ref(), work).await
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.backend.health_check().await
    }
}
