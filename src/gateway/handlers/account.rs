//! Account handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CreateAccountRequest, ListAccountsQuery, ok,
};
use crate::store::{Account, CreateAccountParams, ListAccountsParams};

/// Open an account with a zero balance
///
/// POST /api/v1/accounts
#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 200, description = "Account created", body = Account, content_type = "application/json"),
        (status = 400, description = "Empty owner or unsupported currency"),
        (status = 500, description = "Storage failure")
    ),
    tag = "Account"
)]
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> ApiResult<Account> {
    req.validate()?;

    let mut q = state.store.queries().await?;
    let account = q
        .create_account(CreateAccountParams {
            owner: req.owner,
            balance: 0,
            currency: req.currency,
        })
        .await?;

    tracing::info!(account_id = account.id, currency = %account.currency, "Account created");
    ok(account)
}

/// Fetch one account
///
/// GET /api/v1/accounts/{id}
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{id}",
    params(
        ("id" = i64, Path, description = "Account ID (>= 1)")
    ),
    responses(
        (status = 200, description = "Account", body = Account, content_type = "application/json"),
        (status = 400, description = "Invalid account ID"),
        (status = 404, description = "Account not found"),
        (status = 500, description = "Storage failure")
    ),
    tag = "Account"
)]
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Account> {
    if id < 1 {
        return ApiError::bad_request("id must be at least 1").into_err();
    }

    let mut q = state.store.queries().await?;
    let account = q.get_account(id).await?;
    ok(account)
}

/// List accounts by page
///
/// GET /api/v1/accounts?page_id=1&page_size=5
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    params(ListAccountsQuery),
    responses(
        (status = 200, description = "Page of accounts ordered by id", body = Vec<Account>, content_type = "application/json"),
        (status = 400, description = "Invalid paging parameters"),
        (status = 500, description = "Storage failure")
    ),
    tag = "Account"
)]
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAccountsQuery>,
) -> ApiResult<Vec<Account>> {
    query.validate()?;

    let mut q = state.store.queries().await?;
    let accounts = q
        .list_accounts(ListAccountsParams {
            limit: query.limit(),
            offset: query.offset(),
        })
        .await?;
    ok(accounts)
}
