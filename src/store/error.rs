//! Store Error Types

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by primitive operations and by `transfer_tx`
///
/// The core never retries. [`StoreError::is_retryable`] tells the caller
/// which failures are worth another attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    // === Precondition Errors ===
    #[error("Source and destination wallet cannot be the same")]
    SameWallet,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    // === Storage Errors ===
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Serialization conflict: {0}")]
    Conflict(String),

    #[error("Transaction deadline of {0:?} elapsed")]
    Timeout(Duration),

    #[error("transaction error: {cause}, rollback error: {rollback}")]
    RollbackFailed {
        #[source]
        cause: Box<StoreError>,
        rollback: String,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        StoreError::NotFound { entity, id }
    }

    /// Combine a unit-of-work failure with the failure of its rollback
    pub fn rollback_failed(cause: StoreError, rollback: impl fmt::Display) -> Self {
        StoreError::RollbackFailed {
            cause: Box::new(cause),
            rollback: rollback.to_string(),
        }
    }

    /// Stable code for logs and API responses
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::SameWallet => "SAME_WALLET",
            StoreError::InvalidAmount => "INVALID_AMOUNT",
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            StoreError::Conflict(_) => "CONFLICT",
            StoreError::Timeout(_) => "TIMEOUT",
            StoreError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            StoreError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    /// Stamp a server-reported timeout with the deadline that caused it
    pub(crate) fn at_deadline(self, limit: Duration) -> Self {
        match self {
            StoreError::Timeout(_) => StoreError::Timeout(limit),
            other => other,
        }
    }

    /// Transient engine-side failure; the same request may succeed if retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

// SQLSTATE classes that Postgres reports for lock/serialization trouble
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const NUMERIC_OUT_OF_RANGE: &str = "22003";
// Raised by `lock_timeout` and `statement_timeout`
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            let code = db.code();
            match code.as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    return StoreError::Conflict(db.message().to_string());
                }
                Some(NUMERIC_OUT_OF_RANGE) => {
                    return StoreError::ConstraintViolation(db.message().to_string());
                }
                // duration is filled in by the executor that set the deadline
                Some(LOCK_NOT_AVAILABLE) | Some(QUERY_CANCELED) => {
                    return StoreError::Timeout(Duration::ZERO);
                }
                _ => {}
            }
            if db.is_foreign_key_violation() || db.is_unique_violation() || db.is_check_violation()
            {
                return StoreError::ConstraintViolation(db.message().to_string());
            }
        }
        StoreError::DatabaseError(e.to_string())
    }
}
