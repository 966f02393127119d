//! Error types for the Solana ledger layer.
//!
//! This module centralizes the failure categories surfaced by the ledger
//! client, the instruction library, and the transaction composer. Transient
//! RPC failures are kept distinct from caller mistakes so the upper layers
//! can decide what is retryable.

/// Errors produced by ledger operations and transaction assembly.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Transient RPC failure; the operation may be retried.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// Malformed caller input (bad address, zero amount, etc). Not retried.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// No confirmed transaction exists for the queried address.
    #[error("no confirmed transactions found for address")]
    NoTransactionsFound,
    /// A transaction exists but has not reached finalized commitment yet.
    #[error("transaction is not confirmed yet")]
    NotConfirmed,
    /// The ledger recorded the transaction as failed.
    #[error("transaction failed on chain: {0}")]
    OnChainFailure(String),
    /// A serialized transaction could not be decoded or re-encoded.
    #[error("transaction encoding: {0}")]
    Encoding(String),
    /// An observed transaction does not match the expected transfer.
    #[error("transfer mismatch: {0}")]
    Mismatch(String),
    /// The composer was driven with an incomplete or inconsistent state.
    #[error("transaction composer: {0}")]
    Composer(String),
}

impl LedgerError {
    /// Whether retrying the operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::NoTransactionsFound | Self::NotConfirmed
        )
    }
}

/// Errors produced by the swap quote capability.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// The quote provider could not be reached or answered with an error.
    #[error("swap provider unavailable: {0}")]
    Unavailable(String),
    /// The provider answered but the response could not be interpreted.
    #[error("swap response decoding: {0}")]
    Decoding(String),
    /// Malformed swap request parameters.
    #[error("invalid swap parameter: {0}")]
    InvalidParameter(String),
}
