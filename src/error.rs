//! Error types for ScrapeVault
//!
//! Storage-layer failures that have no safe local fallback surface as
//! `StorageError`. Soft failures (recompression, single thumbnail fetches)
//! have their own local types and never reach callers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// SQLite primary result codes we classify explicitly.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_FULL: i32 = 13;

/// Engine-wide error type
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be opened (bad path, permissions, corrupt file).
    ///
    /// The handle stays unopened; the next `init()` retries from scratch.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The engine was closed or no connection could be obtained
    #[error("Storage engine unavailable: {0}")]
    Unavailable(String),

    /// A read, write or batch failed mid-flight
    #[error("Transaction failed: {0}")]
    Transaction(sqlx::Error),

    /// Another writer holds the lock
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// The disk or database size limit was reached
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Caller supplied invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found (HTTP surface only)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored or supplied JSON could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StorageError {
    /// Short machine-readable label, used for metrics and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Initialization(_) => "initialization",
            StorageError::Unavailable(_) => "unavailable",
            StorageError::Transaction(_) => "transaction",
            StorageError::WriteConflict(_) => "write_conflict",
            StorageError::QuotaExceeded(_) => "quota_exceeded",
            StorageError::Migration(_) => "migration",
            StorageError::Validation(_) => "validation",
            StorageError::NotFound(_) => "not_found",
            StorageError::Serialization(_) => "serialization",
            StorageError::Config(_) => "config",
            StorageError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let primary_code = match &err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                return StorageError::Unavailable(err.to_string());
            }
            sqlx::Error::Database(db_err) => db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                // Extended result codes carry the primary code in the low byte
                .map(|code| code & 0xff),
            _ => None,
        };

        match primary_code {
            Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => StorageError::WriteConflict(err.to_string()),
            Some(SQLITE_FULL) => StorageError::QuotaExceeded(err.to_string()),
            _ => StorageError::Transaction(err),
        }
    }
}

impl From<config::ConfigError> for StorageError {
    fn from(err: config::ConfigError) -> Self {
        StorageError::Config(err.to_string())
    }
}

impl IntoResponse for StorageError {
    /// Convert error to HTTP response
    ///
    /// Maps each variant to a status code and a JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = match &self {
            StorageError::Validation(_) | StorageError::Serialization(_) => StatusCode::BAD_REQUEST,
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::WriteConflict(_) => StatusCode::CONFLICT,
            StorageError::QuotaExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
            StorageError::Initialization(_) | StorageError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            StorageError::Transaction(_)
            | StorageError::Migration(_)
            | StorageError::Config(_)
            | StorageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            // Don't leak SQL details to the dashboard
            StorageError::Transaction(_) => "Transaction failed".to_string(),
            StorageError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": message,
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_closed_is_unavailable() {
        let error = StorageError::from(sqlx::Error::PoolClosed);
        assert!(matches!(error, StorageError::Unavailable(_)));
    }

    #[test]
    fn row_not_found_is_transaction_error() {
        let error = StorageError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, StorageError::Transaction(_)));
        assert_eq!(error.kind(), "transaction");
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let response = StorageError::Validation("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn quota_maps_to_insufficient_storage() {
        let response = StorageError::QuotaExceeded("disk full".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
    }
}
