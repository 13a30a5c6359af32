//! Transfer Engine
//!
//! `transfer_tx` records a transfer, its two entries and both balance changes
//! in one transaction.
//!
//! # Lock Order
//!
//! Balance updates take row locks. Two transfers moving money in opposite
//! directions between the same accounts would lock the rows in opposite order
//! and deadlock, so balances are always updated lower account id first,
//! whichever side is the sender.

use tracing::info;

use super::Store;
use super::error::StoreError;
use super::models::{
    Account, AddAccountBalanceParams, CreateEntryParams, CreateTransferParams, TransferTxParams,
    TransferTxResult,
};
use super::querier::Querier;

impl Store {
    /// Move `amount` from one account to another
    ///
    /// Creates the transfer row, a debit entry on the sender and a credit
    /// entry on the receiver, then applies both balance changes. Either all of
    /// it commits or none of it does.
    ///
    /// # Errors
    /// - [`StoreError::InvalidInput`] for a self-transfer or a non-positive
    ///   amount, before any transaction is opened
    /// - Any storage error from a step, after the transaction was rolled back
    pub async fn transfer_tx(&self, arg: TransferTxParams) -> Result<TransferTxResult, StoreError> {
        arg.validate()?;

        let result = self
            .exec_tx(move |q| {
                Box::pin(async move {
                    let transfer = q
                        .create_transfer(CreateTransferParams {
                            from_account_id: arg.from_account_id,
                            to_account_id: arg.to_account_id,
                            amount: arg.amount,
                        })
                        .await?;

                    let from_entry = q
                        .create_entry(CreateEntryParams {
                            account_id: arg.from_account_id,
                            amount: -arg.amount,
                        })
                        .await?;

                    let to_entry = q
                        .create_entry(CreateEntryParams {
                            account_id: arg.to_account_id,
                            amount: arg.amount,
                        })
                        .await?;

                    let (from_account, to_account) = if arg.from_account_id < arg.to_account_id {
                        add_money(
                            q,
                            arg.from_account_id,
                            -arg.amount,
                            arg.to_account_id,
                            arg.amount,
                        )
                        .await?
                    } else {
                        let (to_account, from_account) = add_money(
                            q,
                            arg.to_account_id,
                            arg.amount,
                            arg.from_account_id,
                            -arg.amount,
                        )
                        .await?;
                        (from_account, to_account)
                    };

                    Ok(TransferTxResult {
                        transfer,
                        from_account,
                        to_account,
                        from_entry,
                        to_entry,
                    })
                })
            })
            .await?;

        info!(
            transfer_id = result.transfer.id,
            from = arg.from_account_id,
            to = arg.to_account_id,
            amount = arg.amount,
            "Transfer committed"
        );

        Ok(result)
    }
}

/// Apply two balance deltas in the given order and return both updated rows
async fn add_money(
    q: &mut dyn Querier,
    account_id1: i64,
    amount1: i64,
    account_id2: i64,
    amount2: i64,
) -> Result<(Account, Account), StoreError> {
    let account1 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id1,
            amount: amount1,
        })
        .await?;

    let account2 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id2,
            amount: amount2,
        })
        .await?;

    Ok((account1, account2))
}
