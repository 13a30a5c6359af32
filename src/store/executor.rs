//! Transaction Executor
//!
//! Runs a unit of work against a querier bound to a fresh transaction and ends
//! that transaction exactly once: commit on success, rollback on failure.

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::error::StoreError;
use super::querier::{Backend, Querier};

/// Begin a transaction on `backend`, run `work` inside it, then commit or roll back.
///
/// - `work` only sees the transaction-bound querier.
/// - If `work` fails the transaction is rolled back and the original error is
///   returned. If the rollback fails too, both errors come back as
///   [`StoreError::Rollback`].
/// - A failed commit is returned as the operation's error.
///
/// If the returned future is dropped mid-flight the transaction handle is
/// dropped with it, which rolls the transaction back.
pub async fn exec_tx<T, F>(backend: &dyn Backend, work: F) -> Result<T, StoreError>
where
    F: for<'q> FnOnce(&'q mut dyn Querier) -> BoxFuture<'q, Result<T, StoreError>> + Send,
    T: Send,
{
    let mut tx = backend.begin().await?;
    debug!(backend = backend.name(), "Transaction started");

    let outcome = work(tx.querier()).await;

    match outcome {
        Ok(value) => {
            tx.commit().await.inspect_err(|e| {
                warn!(backend = backend.name(), error = %e, "Transaction commit failed");
            })?;
            debug!(backend = backend.name(), "Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rb_err) = tx.rollback().await {
                error!(
                    backend = backend.name(),
                    error = %err,
                    rollback_error = %rb_err,
                    "Transaction rollback failed"
                );
                return Err(StoreError::Rollback {
                    error: Box::new(err),
                    rollback_error: Box::new(rb_err),
                });
            }
            debug!(backend = backend.name(), error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryStore, Op};
    use crate::store::models::{CreateAccountParams, ListAccountsParams};

    fn account_params(owner: &str) -> CreateAccountParams {
        CreateAccountParams {
            owner: owner.to_string(),
            balance: 100,
            currency: "USD".to_string(),
        }
    }

    async fn account_count(store: &MemoryStore) -> usize {
        let mut q = store.acquire().await.unwrap();
        q.list_accounts(ListAccountsParams {
            limit: 100,
            offset: 0,
        })
        .await
        .unwrap()
        .len()
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let store = MemoryStore::new();

        let account = exec_tx(&store, |q| {
            Box::pin(async move { q.create_account(account_params("alice")).await })
        })
        .await
        .unwrap();

        assert_eq!(account.owner, "alice");
        assert_eq!(account_count(&store).await, 1);

        let stats = store.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.rolled_back, 0);
    }

    #[tokio::test]
    async fn test_rollback_returns_original_error() {
        let store = MemoryStore::new();

        let err = exec_tx(&store, |q| {
            Box::pin(async move {
                q.create_account(account_params("alice")).await?;
                q.get_account(9999).await
            })
        })
        .await
        .unwrap_err();

        assert_eq!(err, StoreError::not_found("account", 9999));
        // The account created before the failure is discarded.
        assert_eq!(account_count(&store).await, 0);

        let stats = store.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.rolled_back, 1);
    }

    #[tokio::test]
    async fn test_rollback_failure_reports_both_errors() {
        let store = MemoryStore::new();
        store.fail_next(Op::Rollback);

        let err = exec_tx(&store, |q| {
            Box::pin(async move {
                q.create_account(account_params("alice")).await?;
                q.get_account(9999).await
            })
        })
        .await
        .unwrap_err();

        match err {
            StoreError::Rollback {
                error,
                rollback_error,
            } => {
                assert_eq!(*error, StoreError::not_found("account", 9999));
                assert_eq!(rollback_error.code(), "DATABASE_ERROR");
            }
            other => panic!("expected Rollback, got {other:?}"),
        }

        // Nothing leaks even though the rollback call itself failed.
        assert_eq!(account_count(&store).await, 0);
        assert_eq!(store.stats().committed, 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_surfaced() {
        let store = MemoryStore::new();
        store.fail_next(Op::Commit);

        let err = exec_tx(&store, |q| {
            Box::pin(async move { q.create_account(account_params("alice")).await })
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), "DATABASE_ERROR");
        assert_eq!(account_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_begin_failure_runs_no_work() {
        let store = MemoryStore::new();
        store.fail_next(Op::Begin);

        let err = exec_tx(&store, |_q| {
            Box::pin(async move { Err::<(), _>(StoreError::InvalidInput("unreachable".into())) })
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), "DATABASE_ERROR");
        let stats = store.stats();
        assert_eq!(stats.begun, 0);
        assert_eq!(stats.rolled_back, 0);
    }

    #[tokio::test]
    async fn test_dropped_future_rolls_back() {
        let store = MemoryStore::new();

        let fut = exec_tx(&store, |q| {
            Box::pin(async move {
                q.create_account(account_params("alice")).await?;
                futures::future::pending::<Result<(), StoreError>>().await
            })
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), fut).await;
        assert!(timed_out.is_err());

        assert_eq!(account_count(&store).await, 0);
        assert_eq!(store.stats().committed, 0);
    }

    #[tokio::test]
    async fn test_dropped_future_releases_row_locks() {
        use crate::store::models::AddAccountBalanceParams;

        let store = MemoryStore::with_lock_timeout(std::time::Duration::from_millis(50));
        let mut q = store.acquire().await.unwrap();
        let id = q.create_account(account_params("alice")).await.unwrap().id;

        let fut = exec_tx(&store, move |q| {
            Box::pin(async move {
                q.add_account_balance(AddAccountBalanceParams { id, amount: 10 })
                    .await?;
                futures::future::pending::<Result<(), StoreError>>().await
            })
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), fut).await;
        assert!(timed_out.is_err());

        // A second writer gets the row well within its lock timeout
        let added = exec_tx(&store, move |q| {
            Box::pin(async move {
                q.add_account_balance(AddAccountBalanceParams { id, amount: 1 })
                    .await
            })
        })
        .await
        .unwrap();
        assert_eq!(added.balance, 101);
        assert_eq!(store.stats().committed, 1);
    }
}
