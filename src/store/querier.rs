//! Storage seams
//!
//! [`Querier`] is the row-level CRUD surface the rest of the crate talks to.
//! A [`Backend`] hands out queriers either in auto-commit mode ([`Backend::acquire`])
//! or bound to a fresh transaction ([`Backend::begin`]).

use async_trait::async_trait;

use super::error::StoreError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListAccountsParams, ListEntriesParams, ListTransfersParams,
    Transfer, UpdateAccountParams, UpdateEntryParams, UpdateTransferParams,
};

/// Row-level CRUD for accounts, entries and transfers
///
/// `get_*`, `update_*`, `delete_*` and `add_account_balance` return
/// [`StoreError::NotFound`] when the row does not exist. `list_*` results are
/// ordered by id.
#[async_trait]
pub trait Querier: Send {
    // === Accounts ===
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, StoreError>;

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError>;

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account, StoreError>;

    /// Add `arg.amount` to the stored balance in one statement and return the
    /// updated row. Takes the row lock until the surrounding transaction ends.
    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError>;

    async fn delete_account(&mut self, id: i64) -> Result<(), StoreError>;

    async fn list_accounts(&mut self, arg: ListAccountsParams) -> Result<Vec<Account>, StoreError>;

    // === Entries ===
    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError>;

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError>;

    async fn update_entry(&mut self, arg: UpdateEntryParams) -> Result<Entry, StoreError>;

    async fn delete_entry(&mut self, id: i64) -> Result<(), StoreError>;

    async fn list_entries(&mut self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError>;

    // === Transfers ===
    async fn create_transfer(&mut self, arg: CreateTransferParams)
    -> Result<Transfer, StoreError>;

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError>;

    async fn update_transfer(&mut self, arg: UpdateTransferParams)
    -> Result<Transfer, StoreError>;

    async fn delete_transfer(&mut self, id: i64) -> Result<(), StoreError>;

    async fn list_transfers(
        &mut self,
        arg: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError>;
}

/// A querier bound to one open transaction
///
/// Exactly one of `commit` / `rollback` ends it. Dropping it without either
/// rolls the transaction back.
#[async_trait]
pub trait TxQuerier: Querier {
    /// The same transaction, seen as a plain querier
    fn querier(&mut self) -> &mut dyn Querier;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Storage backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Querier whose statements commit individually
    async fn acquire(&self) -> Result<Box<dyn Querier>, StoreError>;

    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn TxQuerier>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
