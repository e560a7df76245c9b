use thiserror::Error;

/// Errors surfaced by the money-movement engine.
///
/// Business errors (insufficient funds, currency mismatch, replay conflicts)
/// are deterministic and never retried; `Database`/`Redis` faults may be
/// transient and are retried with bounded backoff at the ledger boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds on account {account_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        account_id: String,
        requested: i64,
        available: i64,
    },

    #[error("credit limit exceeded on account {account_id}: balance would reach {projected}, limit -{credit_limit}")]
    CreditLimitExceeded {
        account_id: String,
        projected: i64,
        credit_limit: i64,
    },

    #[error("currency mismatch: {source_currency} vs {destination}")]
    MismatchedCurrency {
        source_currency: String,
        destination: String,
    },

    #[error("account {0} is closed")]
    AccountClosed(String),

    #[error("duplicate operation in flight for reference '{0}'")]
    DuplicateOperation(String),

    #[error("conflicting replay for reference '{0}': payload differs from the accepted operation")]
    ConflictingReplay(String),

    #[error("saga {saga_id} compensated: {cause}")]
    SagaCompensated { saga_id: String, cause: String },

    #[error("saga {saga_id} failed: {cause}")]
    SagaFailed { saga_id: String, cause: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for faults worth retrying with backoff. Business outcomes are
    /// deterministic and must never be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(e) => !matches!(
                e,
                sqlx::Error::RowNotFound | sqlx::Error::Database(_) | sqlx::Error::ColumnDecode { .. }
            ),
            AppError::Redis(_) => true,
            _ => false,
        }
    }

    /// True when the error is a deterministic business rejection that the
    /// caller caused (as opposed to an infrastructure fault).
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::InsufficientFunds { .. }
                | AppError::CreditLimitExceeded { .. }
                | AppError::MismatchedCurrency { .. }
                | AppError::AccountClosed(_)
                | AppError::DuplicateOperation(_)
                | AppError::ConflictingReplay(_)
        )
    }

    /// Short machine-readable code used in API responses and saga audit rows.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::CreditLimitExceeded { .. } => "CREDIT_LIMIT_EXCEEDED",
            AppError::MismatchedCurrency { .. } => "MISMATCHED_CURRENCY",
            AppError::AccountClosed(_) => "ACCOUNT_CLOSED",
            AppError::DuplicateOperation(_) => "DUPLICATE_OPERATION",
            AppError::ConflictingReplay(_) => "CONFLICTING_REPLAY",
            AppError::SagaCompensated { .. } => "SAGA_COMPENSATED",
            AppError::SagaFailed { .. } => "SAGA_FAILED",
            AppError::Database(_) => "STORAGE_ERROR",
            AppError::Redis(_) => "HEARTBEAT_STORE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_errors_are_not_transient() {
        let err = AppError::InsufficientFunds {
            account_id: "acc-1".to_string(),
            requested: 100,
            available: 50,
        };
        assert!(!err.is_transient());
        assert!(err.is_business());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
        assert!(!err.is_business());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::ConflictingReplay("ext-1".to_string()).code(),
            "CONFLICTING_REPLAY"
        );
        assert_eq!(
            AppError::Validation("bad".to_string()).code(),
            "VALIDATION_ERROR"
        );
    }
}
