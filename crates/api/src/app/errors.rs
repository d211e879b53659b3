use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use stockroom_infra::{AggregatorError, CatalogError, ErrorCategory, LedgerStoreError, RecordError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Stock(#[from] AggregatorError),

    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("background task failed: {0}")]
    Background(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Record(e) => match e.category() {
                ErrorCategory::ValidationError => (StatusCode::BAD_REQUEST, "validation_error"),
                ErrorCategory::ReferenceError => (StatusCode::NOT_FOUND, "unknown_reference"),
                ErrorCategory::AuthorizationError => (StatusCode::UNAUTHORIZED, "unauthenticated"),
                ErrorCategory::ConflictError => (StatusCode::CONFLICT, "conflict"),
                ErrorCategory::PersistenceFailure => (StatusCode::SERVICE_UNAVAILABLE, "persistence_failure"),
            },
            ApiError::Catalog(e) => match e {
                CatalogError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                CatalogError::DuplicateBarcode(_) => (StatusCode::CONFLICT, "duplicate_barcode"),
                CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                CatalogError::InUse(_) => (StatusCode::CONFLICT, "in_use"),
                CatalogError::Ledger(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            },
            ApiError::Stock(_) => (StatusCode::SERVICE_UNAVAILABLE, "stock_view_unavailable"),
            ApiError::Ledger(e) => match e {
                LedgerStoreError::Concurrency(_) | LedgerStoreError::DuplicateIdempotencyKey(_) => {
                    (StatusCode::CONFLICT, "conflict")
                }
                LedgerStoreError::InvalidAppend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_append"),
                LedgerStoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Background(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, code, "request failed");
        }
        json_error(status, code, self.to_string())
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
