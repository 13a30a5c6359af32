//! Transfer handler

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, CreateTransferRequest, error_codes, ok};
use crate::store::{Account, StoreError, TransferTxParams, TransferTxResult};

/// Move money between two accounts
///
/// POST /api/v1/transfers
///
/// Both accounts must exist and be held in the requested currency.
#[utoipa::path(
    post,
    path = "/api/v1/transfers",
    request_body = CreateTransferRequest,
    responses(
        (status = 200, description = "Transfer committed", body = TransferTxResult, content_type = "application/json"),
        (status = 400, description = "Invalid parameters or currency mismatch"),
        (status = 404, description = "Account not found"),
        (status = 500, description = "Storage failure")
    ),
    tag = "Transfer"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTransferRequest>,
) -> ApiResult<TransferTxResult> {
    req.validate()?;

    valid_account(&state, req.from_account_id, &req.currency).await?;
    valid_account(&state, req.to_account_id, &req.currency).await?;

    let result = state
        .store
        .transfer_tx(TransferTxParams::new(
            req.from_account_id,
            req.to_account_id,
            req.amount,
        ))
        .await?;
    ok(result)
}

/// Account exists and is held in `currency`
async fn valid_account(state: &AppState, id: i64, currency: &str) -> Result<Account, ApiError> {
    let mut q = state.store.queries().await?;
    let account = q.get_account(id).await.map_err(|e| match e {
        StoreError::NotFound { .. } => ApiError::not_found(format!("account {} not found", id)),
        other => other.into(),
    })?;

    if account.currency != currency {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            error_codes::CURRENCY_MISMATCH,
            format!(
                "account {} currency mismatch: {} vs {}",
                id, account.currency, currency
            ),
        ));
    }
    Ok(account)
}
