//! PostgreSQL backend

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::error::StoreError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListAccountsParams, ListEntriesParams, ListTransfersParams,
    Transfer, UpdateAccountParams, UpdateEntryParams, UpdateTransferParams,
};
use super::querier::{Backend, Querier, TxQuerier};

/// Backend over a sqlx PostgreSQL pool
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Backend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn acquire(&self) -> Result<Box<dyn Querier>, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgQuerier {
            conn: PgConn::Pool(conn),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn TxQuerier>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgQuerier {
            conn: PgConn::Tx(tx),
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

enum PgConn {
    Pool(PoolConnection<Postgres>),
    Tx(Transaction<'static, Postgres>),
}

/// Querier over one pooled connection, optionally inside a transaction
///
/// Dropping a transaction-bound querier rolls the transaction back.
pub struct PgQuerier {
    conn: PgConn,
}

impl PgQuerier {
    fn conn(&mut self) -> &mut PgConnection {
        match &mut self.conn {
            PgConn::Pool(conn) => &mut **conn,
            PgConn::Tx(tx) => &mut **tx,
        }
    }

    async fn delete(&mut self, sql: &str, resource: &'static str, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(sql).bind(id).execute(self.conn()).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(resource, id));
        }
        Ok(())
    }
}

#[async_trait]
impl Querier for PgQuerier {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account, StoreError> {
        let account: Account = sqlx::query_as(
            r#"INSERT INTO accounts (owner, balance, currency)
               VALUES ($1, $2, $3)
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(arg.owner)
        .bind(arg.balance)
        .bind(arg.currency)
        .fetch_one(self.conn())
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        let row: Option<Account> = sqlx::query_as(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;

        row.ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account, StoreError> {
        let row: Option<Account> = sqlx::query_as(
            r#"UPDATE accounts SET balance = $2 WHERE id = $1
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(arg.id)
        .bind(arg.balance)
        .fetch_optional(self.conn())
        .await?;

        row.ok_or_else(|| StoreError::not_found("account", arg.id))
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        let row: Option<Account> = sqlx::query_as(
            r#"UPDATE accounts SET balance = balance + $1 WHERE id = $2
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(arg.amount)
        .bind(arg.id)
        .fetch_optional(self.conn())
        .await?;

        row.ok_or_else(|| StoreError::not_found("account", arg.id))
    }

    async fn delete_account(&mut self, id: i64) -> Result<(), StoreError> {
        self.delete("DELETE FROM accounts WHERE id = $1", "account", id)
            .await
    }

    async fn list_accounts(&mut self, arg: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<Account> = sqlx::query_as(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts ORDER BY id LIMIT $1 OFFSET $2"#,
        )
        .bind(arg.limit)
        .bind(arg.offset)
        .fetch_all(self.conn())
        .await?;

        Ok(rows)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        let entry: Entry = sqlx::query_as(
            r#"INSERT INTO entries (account_id, amount)
               VALUES ($1, $2)
               RETURNING id, account_id, amount, created_at"#,
        )
        .bind(arg.account_id)
        .bind(arg.amount)
        .fetch_one(self.conn())
        .await?;

        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        let row: Option<Entry> = sqlx::query_as(
            r#"SELECT id, account_id, amount, created_at FROM entries WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;

        row.ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn update_entry(&mut self, arg: UpdateEntryParams) -> Result<Entry, StoreError> {
        let row: Option<Entry> = sqlx::query_as(
            r#"UPDATE entries SET amount = $2 WHERE id = $1
               RETURNING id, account_id, amount, created_at"#,
        )
        .bind(arg.id)
        .bind(arg.amount)
        .fetch_optional(self.conn())
        .await?;

        row.ok_or_else(|| StoreError::not_found("entry", arg.id))
    }

    async fn delete_entry(&mut self, id: i64) -> Result<(), StoreError> {
        self.delete("DELETE FROM entries WHERE id = $1", "entry", id)
            .await
    }

    async fn list_entries(&mut self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let rows: Vec<Entry> = sqlx::query_as(
            r#"SELECT id, account_id, amount, created_at
               FROM entries
               WHERE ($1::bigint IS NULL OR account_id = $1)
               ORDER BY id LIMIT $2 OFFSET $3"#,
        )
        .bind(arg.account_id)
        .bind(arg.limit)
        .bind(arg.offset)
        .fetch_all(self.conn())
        .await?;

        Ok(rows)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let transfer: Transfer = sqlx::query_as(
            r#"INSERT INTO transfers (from_account_id, to_account_id, amount)
               VALUES ($1, $2, $3)
               RETURNING id, from_account_id, to_account_id, amount, created_at"#,
        )
        .bind(arg.from_account_id)
        .bind(arg.to_account_id)
        .bind(arg.amount)
        .fetch_one(self.conn())
        .await?;

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        let row: Option<Transfer> = sqlx::query_as(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;

        row.ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn update_transfer(
        &mut self,
        arg: UpdateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let row: Option<Transfer> = sqlx::query_as(
            r#"UPDATE transfers SET amount = $2 WHERE id = $1
               RETURNING id, from_account_id, to_account_id, amount, created_at"#,
        )
        .bind(arg.id)
        .bind(arg.amount)
        .fetch_optional(self.conn())
        .await?;

        row.ok_or_else(|| StoreError::not_found("transfer", arg.id))
    }

    async fn delete_transfer(&mut self, id: i64) -> Result<(), StoreError> {
        self.delete("DELETE FROM transfers WHERE id = $1", "transfer", id)
            .await
    }

    async fn list_transfers(
        &mut self,
        arg: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows: Vec<Transfer> = sqlx::query_as(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers
               WHERE ($1::bigint IS NULL OR from_account_id = $1 OR to_account_id = $1)
               ORDER BY id LIMIT $2 OFFSET $3"#,
        )
        .bind(arg.account_id)
        .bind(arg.limit)
        .bind(arg.offset)
        .fetch_all(self.conn())
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl TxQuerier for PgQuerier {
    fn querier(&mut self) -> &mut dyn Querier {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        match self.conn {
            PgConn::Tx(tx) => tx.commit().await?,
            PgConn::Pool(_) => {}
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        match self.conn {
            PgConn::Tx(tx) => tx.rollback().await?,
            PgConn::Pool(_) => {}
        }
        Ok(())
    }
}
