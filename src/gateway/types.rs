//! Gateway types
//!
//! - `ApiResponse<T>`: unified response wrapper
//! - `ApiError` / `ApiResult`: handler error path
//! - `error_codes`: standard error code constants
//! - request DTOs and their validation

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::store::StoreError;

/// Currencies an account can be opened in
pub const SUPPORTED_CURRENCIES: &[&str] = &["USD", "EUR", "CAD"];

pub fn is_supported_currency(currency: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(&currency)
}

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const CURRENCY_MISMATCH: i32 = 1002;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

// ============================================================================
// Handler Errors
// ============================================================================

/// Error returned by handlers; renders as `ApiResponse<()>` with an HTTP status
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// 200 OK with `data`
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            msg,
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(self.code, self.msg);
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::NotFound { .. } => ApiError::not_found(e.to_string()),
            StoreError::InvalidInput(msg) => ApiError::bad_request(msg.clone()),
            _ => {
                // Storage details stay in the log.
                tracing::error!(error = %e, code = e.code(), "Storage failure");
                ApiError::internal("internal error")
            }
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// POST /api/v1/accounts
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    #[schema(example = "alice")]
    pub owner: String,
    #[schema(example = "USD")]
    pub currency: String,
}

impl CreateAccountRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.owner.trim().is_empty() {
            return Err(ApiError::bad_request("owner must not be empty"));
        }
        if !is_supported_currency(&self.currency) {
            return Err(ApiError::bad_request(format!(
                "unsupported currency: {}",
                self.currency
            )));
        }
        Ok(())
    }
}

/// GET /api/v1/accounts
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListAccountsQuery {
    /// Page number, starting at 1
    pub page_id: i32,
    /// Rows per page (5..=10)
    pub page_size: i32,
}

impl ListAccountsQuery {
    pub const MIN_PAGE_SIZE: i32 = 5;
    pub const MAX_PAGE_SIZE: i32 = 10;

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.page_id < 1 {
            return Err(ApiError::bad_request("page_id must be at least 1"));
        }
        if !(Self::MIN_PAGE_SIZE..=Self::MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ApiError::bad_request(format!(
                "page_size must be between {} and {}",
                Self::MIN_PAGE_SIZE,
                Self::MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page_id - 1) * i64::from(self.page_size)
    }
}

/// POST /api/v1/transfers
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateTransferRequest {
    #[schema(example = 1)]
    pub from_account_id: i64,
    #[schema(example = 2)]
    pub to_account_id: i64,
    /// Minor units
    #[schema(example = 100)]
    pub amount: i64,
    #[schema(example = "USD")]
    pub currency: String,
}

impl CreateTransferRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.from_account_id < 1 || self.to_account_id < 1 {
            return Err(ApiError::bad_request("account ids must be at least 1"));
        }
        if self.from_account_id == self.to_account_id {
            return Err(ApiError::bad_request("cannot transfer to the same account"));
        }
        if self.amount <= 0 {
            return Err(ApiError::bad_request("amount must be greater than zero"));
        }
        if !is_supported_currency(&self.currency) {
            return Err(ApiError::bad_request(format!(
                "unsupported currency: {}",
                self.currency
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err: ApiError = StoreError::not_found("account", 7).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, error_codes::NOT_FOUND);

        let err: ApiError = StoreError::InvalidInput("bad".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.msg, "bad");

        let err: ApiError = StoreError::Database("connection reset".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.msg.contains("connection reset"));
    }

    #[test]
    fn test_create_account_validation() {
        let req = |owner: &str, currency: &str| CreateAccountRequest {
            owner: owner.to_string(),
            currency: currency.to_string(),
        };
        assert!(req("alice", "USD").validate().is_ok());
        assert!(req("alice", "CAD").validate().is_ok());
        assert!(req("  ", "USD").validate().is_err());
        assert!(req("alice", "BTC").validate().is_err());
        assert!(req("alice", "usd").validate().is_err());
    }

    #[test]
    fn test_list_accounts_paging() {
        let q = ListAccountsQuery {
            page_id: 3,
            page_size: 5,
        };
        assert!(q.validate().is_ok());
        assert_eq!(q.limit(), 5);
        assert_eq!(q.offset(), 10);

        for (page_id, page_size) in [(0, 5), (1, 4), (1, 11)] {
            let q = ListAccountsQuery { page_id, page_size };
            assert!(q.validate().is_err(), "{page_id}/{page_size}");
        }
    }

    #[test]
    fn test_transfer_request_validation() {
        let req = |from, to, amount| CreateTransferRequest {
            from_account_id: from,
            to_account_id: to,
            amount,
            currency: "USD".to_string(),
        };
        assert!(req(1, 2, 10).validate().is_ok());
        assert!(req(1, 1, 10).validate().is_err());
        assert!(req(1, 2, 0).validate().is_err());
        assert!(req(0, 2, 10).validate().is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert_eq!(json["code"], 1001);
        assert_eq!(json["msg"], "bad");
        assert!(json.get("data").is_none());
    }
}
