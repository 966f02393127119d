//! Error taxonomy of the payment core.
//!
//! Every component returns an [`Error`] variant from this single taxonomy;
//! decorators pass them through untouched. The job queue retries only
//! errors reported as retryable, everything else short-circuits the task.

use checkout_svm::{LedgerError, SwapError};

/// Categorized failure of a payment core operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request body or missing field. Not retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Malformed parameter value. Not retried.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Illegal state transition or uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Missing or invalid credentials.
    #[error("unauthenticated")]
    Unauthenticated,
    /// Authenticated but not allowed.
    #[error("forbidden")]
    Forbidden,
    /// Transient ledger failure; safe to retry.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    /// The swap quote capability failed; not retried automatically.
    #[error("swap unavailable: {0}")]
    SwapUnavailable(String),
    /// An observed on-chain transaction does not match the expected
    /// transfer. Internal; the reconciler keeps polling.
    #[error("validation mismatch: {0}")]
    ValidationMismatch(String),
    /// Storage failure.
    #[error("storage: {0}")]
    Storage(String),
    /// Generic I/O failure (outbound delivery, sockets). Retryable.
    #[error("io: {0}")]
    Io(String),
    /// Programming error: broken configuration or unreachable state.
    /// Aborts the task, never retried.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether a background task failing with this error should be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerUnavailable(_) | Self::Storage(_) | Self::Io(_)
        )
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidParameter(msg) => Self::InvalidParameter(msg),
            LedgerError::Mismatch(msg) => Self::ValidationMismatch(msg),
            LedgerError::Unavailable(_)
            | LedgerError::NoTransactionsFound
            | LedgerError::NotConfirmed => Self::LedgerUnavailable(err.to_string()),
            LedgerError::OnChainFailure(msg) => Self::ValidationMismatch(msg),
            LedgerError::Encoding(msg) | LedgerError::Composer(msg) => Self::Fatal(msg),
        }
    }
}

impl From<SwapError> for Error {
    fn from(err: SwapError) -> Self {
        match err {
            SwapError::InvalidParameter(msg) => Self::InvalidParameter(msg),
            SwapError::Unavailable(_) | SwapError::Decoding(_) => {
                Self::SwapUnavailable(err.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row"),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.to_string())
            }
            _ => Self::Storage(err.to_string()),
        }
    }
}
