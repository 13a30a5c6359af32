//! In-memory Ledger Backend
//!
//! A transactional [`Backend`] that behaves like the PostgreSQL one where the
//! transfer engine can tell the difference:
//!
//! - writes are staged per transaction and only become visible on commit
//! - updating or deleting a row takes a row lock held until the transaction
//!   ends; waiting longer than the lock timeout fails with
//!   [`StoreError::LockTimeout`] (Postgres `lock_timeout`)
//! - entries and transfers must reference existing accounts; the referencing
//!   transaction holds a key-share lock on the account until it ends, so a
//!   concurrent account delete waits for it (Postgres `FOR KEY SHARE`)
//! - id sequences are not rolled back
//!
//! Faults can be injected per operation for failure-path tests.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{
    Mutex as RowMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use tracing::debug;

use super::error::StoreError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListAccountsParams, ListEntriesParams, ListTransfersParams,
    Transfer, UpdateAccountParams, UpdateEntryParams, UpdateTransferParams,
};
use super::querier::{Backend, Querier, TxQuerier};

/// Default row lock wait before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Operations that can be made to fail with [`MemoryStore::fail_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    HealthCheck,
    Begin,
    Commit,
    Rollback,
    CreateAccount,
    UpdateAccount,
    AddAccountBalance,
    DeleteAccount,
    CreateEntry,
    UpdateEntry,
    DeleteEntry,
    CreateTransfer,
    UpdateTransfer,
    DeleteTransfer,
}

/// Transaction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Table {
    Accounts,
    Entries,
    Transfers,
}

impl Table {
    fn resource(self) -> &'static str {
        match self {
            Table::Accounts => "account",
            Table::Entries => "entry",
            Table::Transfers => "transfer",
        }
    }
}

type RowKey = (Table, i64);

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    account_seq: i64,
    entry_seq: i64,
    transfer_seq: i64,
}

/// Uncommitted writes of one transaction; `None` marks a deleted row.
#[derive(Default)]
struct Staged {
    accounts: BTreeMap<i64, Option<Account>>,
    entries: BTreeMap<i64, Option<Entry>>,
    transfers: BTreeMap<i64, Option<Transfer>>,
}

/// Table access shared by the three row types
trait Row: Clone + Send + 'static {
    const TABLE: Table;
    fn committed(tables: &Tables) -> &BTreeMap<i64, Self>;
    fn committed_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Self>;
    fn staged(staged: &Staged) -> &BTreeMap<i64, Option<Self>>;
    fn staged_mut(staged: &mut Staged) -> &mut BTreeMap<i64, Option<Self>>;
}

impl Row for Account {
    const TABLE: Table = Table::Accounts;
    fn committed(tables: &Tables) -> &BTreeMap<i64, Self> {
        &tables.accounts
    }
    fn committed_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Self> {
        &mut tables.accounts
    }
    fn staged(staged: &Staged) -> &BTreeMap<i64, Option<Self>> {
        &staged.accounts
    }
    fn staged_mut(staged: &mut Staged) -> &mut BTreeMap<i64, Option<Self>> {
        &mut staged.accounts
    }
}

impl Row for Entry {
    const TABLE: Table = Table::Entries;
    fn committed(tables: &Tables) -> &BTreeMap<i64, Self> {
        &tables.entries
    }
    fn committed_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Self> {
        &mut tables.entries
    }
    fn staged(staged: &Staged) -> &BTreeMap<i64, Option<Self>> {
        &staged.entries
    }
    fn staged_mut(staged: &mut Staged) -> &mut BTreeMap<i64, Option<Self>> {
        &mut staged.entries
    }
}

impl Row for Transfer {
    const TABLE: Table = Table::Transfers;
    fn committed(tables: &Tables) -> &BTreeMap<i64, Self> {
        &tables.transfers
    }
    fn committed_mut(tables: &mut Tables) -> &mut BTreeMap<i64, Self> {
        &mut tables.transfers
    }
    fn staged(staged: &Staged) -> &BTreeMap<i64, Option<Self>> {
        &staged.transfers
    }
    fn staged_mut(staged: &mut Staged) -> &mut BTreeMap<i64, Option<Self>> {
        &mut staged.transfers
    }
}

fn apply_rows<R: Row>(tables: &mut Tables, rows: BTreeMap<i64, Option<R>>) {
    let committed = R::committed_mut(tables);
    for (id, row) in rows {
        match row {
            Some(row) => {
                committed.insert(id, row);
            }
            None => {
                committed.remove(&id);
            }
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Database("memory store lock poisoned".to_string())
}

fn page(limit: i64, offset: i64) -> Result<(usize, usize), StoreError> {
    let limit = usize::try_from(limit)
        .map_err(|_| StoreError::Database("LIMIT must not be negative".to_string()))?;
    let offset = usize::try_from(offset)
        .map_err(|_| StoreError::Database("OFFSET must not be negative".to_string()))?;
    Ok((limit, offset))
}

async fn wait_for_lock<G>(
    timeout: Duration,
    table: Table,
    id: i64,
    acquire: impl Future<Output = G>,
) -> Result<G, StoreError> {
    tokio::time::timeout(timeout, acquire).await.map_err(|_| {
        debug!(resource = table.resource(), id, "Row lock wait timed out");
        StoreError::LockTimeout {
            resource: table.resource(),
            id,
        }
    })
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    key_locks: Mutex<HashMap<i64, Arc<RwLock<()>>>>,
    faults: Mutex<HashMap<Op, usize>>,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl Shared {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| poisoned())
    }

    fn next_id(&self, table: Table) -> Result<i64, StoreError> {
        let mut tables = self.tables()?;
        let seq = match table {
            Table::Accounts => &mut tables.account_seq,
            Table::Entries => &mut tables.entry_seq,
            Table::Transfers => &mut tables.transfer_seq,
        };
        *seq += 1;
        Ok(*seq)
    }

    fn row_lock(&self, key: RowKey) -> Result<Arc<RowMutex<()>>, StoreError> {
        let mut locks = self.row_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(key).or_default().clone())
    }

    /// Key lock of an account: shared by referencing writers, exclusive for delete
    fn key_lock(&self, account_id: i64) -> Result<Arc<RwLock<()>>, StoreError> {
        let mut locks = self.key_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(account_id).or_default().clone())
    }

    /// Drop lock slots nobody holds or waits on
    fn prune_row_locks(&self) {
        if let Ok(mut locks) = self.row_locks.lock() {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        if let Ok(mut locks) = self.key_locks.lock() {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }

    fn check_fault(&self, op: Op) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().map_err(|_| poisoned())?;
        if let Some(remaining) = faults.get_mut(&op) {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(&op);
                return Err(StoreError::Database(format!("injected failure: {:?}", op)));
            }
        }
        Ok(())
    }
}

/// In-memory transactional backend
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                key_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(HashMap::new()),
                begun: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                rolled_back: AtomicU64::new(0),
            }),
            lock_timeout,
        }
    }

    /// Make the next call of `op` fail with a database error
    pub fn fail_next(&self, op: Op) {
        self.fail_nth(op, 1);
    }

    /// Make the `n`-th next call of `op` fail (1 = the next one)
    pub fn fail_nth(&self, op: Op, n: usize) {
        if n == 0 {
            return;
        }
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.insert(op, n);
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            begun: self.shared.begun.load(Ordering::SeqCst),
            committed: self.shared.committed.load(Ordering::SeqCst),
            rolled_back: self.shared.rolled_back.load(Ordering::SeqCst),
        }
    }

    fn session(&self, autocommit: bool) -> MemoryTx {
        MemoryTx {
            shared: self.shared.clone(),
            lock_timeout: self.lock_timeout,
            autocommit,
            held: HashMap::new(),
            key_shares: HashMap::new(),
            key_owned: HashMap::new(),
            staged: Staged::default(),
        }
    }
}

#[async_trait]
impl Backend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn acquire(&self) -> Result<Box<dyn Querier>, StoreError> {
        Ok(Box::new(self.session(true)))
    }

    async fn begin(&self) -> Result<Box<dyn TxQuerier>, StoreError> {
        self.shared.check_fault(Op::Begin)?;
        self.shared.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.session(false)))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.shared.check_fault(Op::HealthCheck)?;
        self.shared.tables().map(|_| ())
    }
}

/// Session on the in-memory backend
///
/// In auto-commit mode every write statement commits on its own and releases
/// its row locks right away.
pub struct MemoryTx {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    autocommit: bool,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    key_shares: HashMap<i64, OwnedRwLockReadGuard<()>>,
    key_owned: HashMap<i64, OwnedRwLockWriteGuard<()>>,
    staged: Staged,
}

impl MemoryTx {
    /// Row as this session sees it: own staged write first, then committed data
    fn view<R: Row>(&self, id: i64) -> Result<Option<R>, StoreError> {
        if let Some(staged) = R::staged(&self.staged).get(&id) {
            return Ok(staged.clone());
        }
        let tables = self.shared.tables()?;
        Ok(R::committed(&tables).get(&id).cloned())
    }

    fn rows<R: Row>(&self) -> Result<BTreeMap<i64, R>, StoreError> {
        let tables = self.shared.tables()?;
        let mut rows = R::committed(&tables).clone();
        drop(tables);
        for (id, row) in R::staged(&self.staged) {
            match row {
                Some(row) => {
                    rows.insert(*id, row.clone());
                }
                None => {
                    rows.remove(id);
                }
            }
        }
        Ok(rows)
    }

    fn get<R: Row>(&self, id: i64) -> Result<R, StoreError> {
        self.view(id)?
            .ok_or_else(|| StoreError::not_found(R::TABLE.resource(), id))
    }

    async fn lock_row(&mut self, table: Table, id: i64) -> Result<(), StoreError> {
        let key = (table, id);
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let lock = self.shared.row_lock(key)?;
        let guard = wait_for_lock(self.lock_timeout, table, id, lock.lock_owned()).await?;
        self.held.insert(key, guard);
        Ok(())
    }

    async fn share_account_key(&mut self, account_id: i64) -> Result<(), StoreError> {
        if self.key_shares.contains_key(&account_id) || self.key_owned.contains_key(&account_id) {
            return Ok(());
        }
        let lock = self.shared.key_lock(account_id)?;
        let guard =
            wait_for_lock(self.lock_timeout, Table::Accounts, account_id, lock.read_owned()).await?;
        self.key_shares.insert(account_id, guard);
        Ok(())
    }

    async fn own_account_key(&mut self, account_id: i64) -> Result<(), StoreError> {
        if self.key_owned.contains_key(&account_id) {
            return Ok(());
        }
        // Give up our own share first or we would wait on ourselves
        self.key_shares.remove(&account_id);
        let lock = self.shared.key_lock(account_id)?;
        let guard =
            wait_for_lock(self.lock_timeout, Table::Accounts, account_id, lock.write_owned())
                .await?;
        self.key_owned.insert(account_id, guard);
        Ok(())
    }

    async fn ensure_account(&mut self, account_id: i64, column: &str) -> Result<(), StoreError> {
        self.share_account_key(account_id).await?;
        if self.view::<Account>(account_id)?.is_none() {
            return Err(StoreError::ForeignKeyViolation(format!(
                "{} {} references a missing account",
                column, account_id
            )));
        }
        Ok(())
    }

    fn insert<R: Row>(&mut self, op: Op, build: impl FnOnce(i64) -> R) -> Result<R, StoreError> {
        self.shared.check_fault(op)?;
        let id = self.shared.next_id(R::TABLE)?;
        let row = build(id);
        R::staged_mut(&mut self.staged).insert(id, Some(row.clone()));
        Ok(row)
    }

    /// Lock the row, apply `change` to the visible version and stage the result
    async fn modify<R, F>(&mut self, op: Op, id: i64, change: F) -> Result<R, StoreError>
    where
        R: Row,
        F: FnOnce(&mut R) -> Result<(), StoreError> + Send,
    {
        self.shared.check_fault(op)?;
        self.lock_row(R::TABLE, id).await?;
        let mut row: R = self.get(id)?;
        change(&mut row)?;
        R::staged_mut(&mut self.staged).insert(id, Some(row.clone()));
        Ok(row)
    }

    async fn remove<R: Row>(&mut self, op: Op, id: i64) -> Result<(), StoreError> {
        self.shared.check_fault(op)?;
        self.lock_row(R::TABLE, id).await?;
        self.get::<R>(id)?;
        R::staged_mut(&mut self.staged).insert(id, None);
        Ok(())
    }

    fn apply(&mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.shared.tables()?;
        apply_rows(&mut tables, staged.accounts);
        apply_rows(&mut tables, staged.entries);
        apply_rows(&mut tables, staged.transfers);
        Ok(())
    }

    fn release(&mut self) {
        self.held.clear();
        self.key_shares.clear();
        self.key_owned.clear();
        self.shared.prune_row_locks();
    }

    fn discard(&mut self) {
        self.staged = Staged::default();
        self.release();
    }

    /// Auto-commit bookkeeping after a write statement
    fn end_statement<T>(&mut self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if !self.autocommit {
            return result;
        }
        match result {
            Ok(value) => {
                let applied = self.apply();
                self.release();
                applied.map(|_| value)
            }
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Querier for MemoryTx {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, StoreError> {
        let result = self.insert(Op::CreateAccount, |id| Account {
            id,
            owner: arg.owner,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        });
        self.end_statement(result)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        self.get(id)
    }

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account, StoreError> {
        let result = self
            .modify(Op::UpdateAccount, arg.id, |account: &mut Account| {
                account.balance = arg.balance;
                Ok(())
            })
            .await;
        self.end_statement(result)
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        let result = self
            .modify(Op::AddAccountBalance, arg.id, |account: &mut Account| {
                account.balance = account
                    .balance
                    .checked_add(arg.amount)
                    .ok_or_else(|| StoreError::Database("bigint out of range".to_string()))?;
                Ok(())
            })
            .await;
        self.end_statement(result)
    }

    async fn delete_account(&mut self, id: i64) -> Result<(), StoreError> {
        let result = async {
            // Waits out transactions that still reference the account
            self.own_account_key(id).await?;
            let referenced = self.rows::<Entry>()?.values().any(|e| e.account_id == id)
                || self
                    .rows::<Transfer>()?
                    .values()
                    .any(|t| t.from_account_id == id || t.to_account_id == id);
            if referenced {
                return Err(StoreError::ForeignKeyViolation(format!(
                    "account {} is still referenced",
                    id
                )));
            }
            self.remove::<Account>(Op::DeleteAccount, id).await
        }
        .await;
        self.end_statement(result)
    }

    async fn list_accounts(&mut self, arg: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        let (limit, offset) = page(arg.limit, arg.offset)?;
        Ok(self
            .rows::<Account>()?
            .into_values()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        let result = async {
            self.ensure_account(arg.account_id, "entries.account_id")
                .await?;
            self.insert(Op::CreateEntry, |id| Entry {
                id,
                account_id: arg.account_id,
                amount: arg.amount,
                created_at: Utc::now(),
            })
        }
        .await;
        self.end_statement(result)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        self.get(id)
    }

    async fn update_entry(&mut self, arg: UpdateEntryParams) -> Result<Entry, StoreError> {
        let result = self
            .modify(Op::UpdateEntry, arg.id, |entry: &mut Entry| {
                entry.amount = arg.amount;
                Ok(())
            })
            .await;
        self.end_statement(result)
    }

    async fn delete_entry(&mut self, id: i64) -> Result<(), StoreError> {
        let result = self.remove::<Entry>(Op::DeleteEntry, id).await;
        self.end_statement(result)
    }

    async fn list_entries(&mut self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let (limit, offset) = page(arg.limit, arg.offset)?;
        Ok(self
            .rows::<Entry>()?
            .into_values()
            .filter(|e| arg.account_id.is_none_or(|id| e.account_id == id))
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let result = async {
            self.ensure_account(arg.from_account_id, "transfers.from_account_id")
                .await?;
            self.ensure_account(arg.to_account_id, "transfers.to_account_id")
                .await?;
            self.insert(Op::CreateTransfer, |id| Transfer {
                id,
                from_account_id: arg.from_account_id,
                to_account_id: arg.to_account_id,
                amount: arg.amount,
                created_at: Utc::now(),
            })
        }
        .await;
        self.end_statement(result)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        self.get(id)
    }

    async fn update_transfer(
        &mut self,
        arg: UpdateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let result = self
            .modify(Op::UpdateTransfer, arg.id, |transfer: &mut Transfer| {
                transfer.amount = arg.amount;
                Ok(())
            })
            .await;
        self.end_statement(result)
    }

    async fn delete_transfer(&mut self, id: i64) -> Result<(), StoreError> {
        let result = self.remove::<Transfer>(Op::DeleteTransfer, id).await;
        self.end_statement(result)
    }

    async fn list_transfers(
        &mut self,
        arg: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let (limit, offset) = page(arg.limit, arg.offset)?;
        Ok(self
            .rows::<Transfer>()?
            .into_values()
            .filter(|t| {
                arg.account_id
                    .is_none_or(|id| t.from_account_id == id || t.to_account_id == id)
            })
            .skip(offset)
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl TxQuerier for MemoryTx {
    fn querier(&mut self) -> &mut dyn Querier {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        let result = tx.shared.check_fault(Op::Commit).and_then(|_| tx.apply());
        match result {
            Ok(()) => {
                tx.release();
                tx.shared.committed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                tx.discard();
                Err(e)
            }
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        let result = tx.shared.check_fault(Op::Rollback);
        // Staged writes are gone either way, like a server-side abort.
        tx.discard();
        result?;
        tx.shared.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tokio::sync::Barrier;

    fn account_params(owner: &str, balance: i64) -> CreateAccountParams {
        CreateAccountParams {
            owner: owner.to_string(),
            balance,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_autocommit_crud() {
        let store = MemoryStore::new();
        let mut q = store.acquire().await.unwrap();

        let account = q.create_account(account_params("alice", 100)).await.unwrap();
        assert_eq!(account.id, 1);
        assert_eq!(q.get_account(1).await.unwrap(), account);

        let updated = q
            .update_account(UpdateAccountParams { id: 1, balance: 250 })
            .await
            .unwrap();
        assert_eq!(updated.balance, 250);

        // Visible from another session right away
        let mut other = store.acquire().await.unwrap();
        assert_eq!(other.get_account(1).await.unwrap().balance, 250);

        q.delete_account(1).await.unwrap();
        assert_eq!(
            other.get_account(1).await.unwrap_err(),
            StoreError::not_found("account", 1)
        );
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut q = store.acquire().await.unwrap();
        let account = q.create_account(account_params("alice", 100)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let inside = tx
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 50,
            })
            .await
            .unwrap();
        assert_eq!(inside.balance, 150);
        assert_eq!(tx.get_account(account.id).await.unwrap().balance, 150);

        // Plain reads are not blocked by the row lock and see committed data
        assert_eq!(q.get_account(account.id).await.unwrap().balance, 100);

        tx.commit().await.unwrap();
        assert_eq!(q.get_account(account.id).await.unwrap().balance, 150);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_until_commit() {
        let store = MemoryStore::new();
        let mut q = store.acquire().await.unwrap();
        let account = q.create_account(account_params("alice", 100)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 10,
            })
            .await
            .unwrap();

        let second_store = store.clone();
        let id = account.id;
        let second = tokio::spawn(async move {
            let mut tx = second_store.begin().await.unwrap();
            let updated = tx
                .add_account_balance(AddAccountBalanceParams { id, amount: 5 })
                .await
                .unwrap();
            tx.commit().await.unwrap();
            updated.balance
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished(), "second writer must wait for the row lock");

        first.commit().await.unwrap();
        // The waiting writer builds on the committed balance: no lost update.
        assert_eq!(second.await.unwrap(), 115);
        assert_eq!(q.get_account(account.id).await.unwrap().balance, 115);
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(30));
        let mut q = store.acquire().await.unwrap();
        let account = q.create_account(account_params("alice", 100)).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder
            .update_account(UpdateAccountParams {
                id: account.id,
                balance: 1,
            })
            .await
            .unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::LockTimeout {
                resource: "account",
                id: account.id
            }
        );

        holder.rollback().await.unwrap();
        waiter.rollback().await.unwrap();
        assert_eq!(q.get_account(account.id).await.unwrap().balance, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_opposite_lock_order_deadlocks() {
        // Two transactions touching the same pair in opposite order end in a
        // lock wait cycle; the lock timeout is what breaks it.
        let memory = MemoryStore::with_lock_timeout(Duration::from_millis(200));
        let store = Store::new(Arc::new(memory.clone()));

        let mut q = memory.acquire().await.unwrap();
        let a = q.create_account(account_params("a", 1000)).await.unwrap().id;
        let b = q.create_account(account_params("b", 1000)).await.unwrap().id;

        let barrier = Arc::new(Barrier::new(2));
        let spawn_pair = |first: i64, second: i64| {
            let store = store.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                store
                    .exec_tx(move |q| {
                        Box::pin(async move {
                            q.add_account_balance(AddAccountBalanceParams {
                                id: first,
                                amount: -10,
                            })
                            .await?;
                            barrier.wait().await;
                            q.add_account_balance(AddAccountBalanceParams {
                                id: second,
                                amount: 10,
                            })
                            .await?;
                            Ok(())
                        })
                    })
                    .await
            })
        };

        let forward = spawn_pair(a, b);
        let backward = spawn_pair(b, a);
        let results = [forward.await.unwrap(), backward.await.unwrap()];

        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(StoreError::LockTimeout { .. }))),
            "expected at least one lock timeout, got {results:?}"
        );

        // Whatever committed, money is conserved.
        let total = q.get_account(a).await.unwrap().balance + q.get_account(b).await.unwrap().balance;
        assert_eq!(total, 2000);
    }

    #[tokio::test]
    async fn test_foreign_keys() {
        let store = MemoryStore::new();
        let mut q = store.acquire().await.unwrap();

        let err = q
            .create_entry(CreateEntryParams {
                account_id: 42,
                amount: 10,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FOREIGN_KEY_VIOLATION");

        let a = q.create_account(account_params("a", 0)).await.unwrap();
        let err = q
            .create_transfer(CreateTransferParams {
                from_account_id: a.id,
                to_account_id: 42,
                amount: 10,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FOREIGN_KEY_VIOLATION");

        q.create_entry(CreateEntryParams {
            account_id: a.id,
            amount: 10,
        })
        .await
        .unwrap();
        let err = q.delete_account(a.id).await.unwrap_err();
        assert_eq!(err.code(), "FOREIGN_KEY_VIOLATION");
        assert!(q.get_account(a.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_waits_for_uncommitted_reference() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(30));
        let mut q = store.acquire().await.unwrap();
        let a = q.create_account(account_params("a", 0)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.create_entry(CreateEntryParams {
            account_id: a.id,
            amount: 10,
        })
        .await
        .unwrap();

        // The open transaction's entry keeps the account alive
        let err = q.delete_account(a.id).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::LockTimeout {
                resource: "account",
                id: a.id
            }
        );

        tx.commit().await.unwrap();
        assert!(q.get_account(a.id).await.is_ok());
        let err = q.delete_account(a.id).await.unwrap_err();
        assert_eq!(err.code(), "FOREIGN_KEY_VIOLATION");
    }

    #[tokio::test]
    async fn test_delete_proceeds_after_reference_rolls_back() {
        let store = MemoryStore::new();
        let mut q = store.acquire().await.unwrap();
        let a = q.create_account(account_params("a", 0)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.create_transfer(CreateTransferParams {
            from_account_id: a.id,
            to_account_id: a.id,
            amount: 1,
        })
        .await
        .unwrap();

        let delete_store = store.clone();
        let id = a.id;
        let delete = tokio::spawn(async move {
            let mut q = delete_store.acquire().await.unwrap();
            q.delete_account(id).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!delete.is_finished(), "delete must wait for the referencing transaction");

        tx.rollback().await.unwrap();
        delete.await.unwrap().unwrap();
        assert!(q.get_account(a.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_referencing_writers_share_the_account() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(30));
        let mut q = store.acquire().await.unwrap();
        let a = q.create_account(account_params("a", 0)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        for tx in [&mut first, &mut second] {
            tx.create_entry(CreateEntryParams {
                account_id: a.id,
                amount: 1,
            })
            .await
            .unwrap();
        }
        first.commit().await.unwrap();
        second.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let store = MemoryStore::new();
        let mut q = store.acquire().await.unwrap();
        let a = q.create_account(account_params("a", 0)).await.unwrap().id;
        let b = q.create_account(account_params("b", 0)).await.unwrap().id;

        for i in 0..6 {
            let account_id = if i % 2 == 0 { a } else { b };
            q.create_entry(CreateEntryParams {
                account_id,
                amount: i,
            })
            .await
            .unwrap();
        }
        q.create_transfer(CreateTransferParams {
            from_account_id: a,
            to_account_id: b,
            amount: 1,
        })
        .await
        .unwrap();

        let page = q
            .list_entries(ListEntriesParams {
                account_id: None,
                limit: 2,
                offset: 2,
            })
            .await
            .unwrap();
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 4]);

        let only_b = q
            .list_entries(ListEntriesParams {
                account_id: Some(b),
                limit: 10,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(only_b.len(), 3);
        assert!(only_b.iter().all(|e| e.account_id == b));

        for account_id in [a, b] {
            let transfers = q
                .list_transfers(ListTransfersParams {
                    account_id: Some(account_id),
                    limit: 10,
                    offset: 0,
                })
                .await
                .unwrap();
            assert_eq!(transfers.len(), 1);
        }

        let err = q
            .list_accounts(ListAccountsParams {
                limit: -1,
                offset: 0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_sequences_survive_rollback() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let discarded = tx.create_account(account_params("a", 0)).await.unwrap();
        tx.rollback().await.unwrap();

        let mut q = store.acquire().await.unwrap();
        let kept = q.create_account(account_params("b", 0)).await.unwrap();
        assert!(kept.id > discarded.id);
        assert!(q.get_account(discarded.id).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_nth() {
        let store = MemoryStore::new();
        store.fail_nth(Op::CreateAccount, 2);
        let mut q = store.acquire().await.unwrap();

        assert!(q.create_account(account_params("a", 0)).await.is_ok());
        assert!(q.create_account(account_params("b", 0)).await.is_err());
        assert!(q.create_account(account_params("c", 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_balance_overflow() {
        let store = MemoryStore::new();
        let mut q = store.acquire().await.unwrap();
        let a = q.create_account(account_params("a", i64::MAX)).await.unwrap();

        let err = q
            .add_account_balance(AddAccountBalanceParams { id: a.id, amount: 1 })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert_eq!(q.get_account(a.id).await.unwrap().balance, i64::MAX);
    }
}
