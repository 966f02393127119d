//! Shared value types for the Solana ledger layer.

use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

/// Balance of a wallet or token account, in minimal units plus UI helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Balance in minimal units, e.g. `1_000_000_000` for 1 SOL.
    pub amount: u64,
    /// Number of decimals of the currency, e.g. 9 for SOL, 6 for USDC.
    pub decimals: u8,
    /// Balance in UI units, e.g. `1.5`.
    pub ui_amount: f64,
    /// Balance in UI units as a string, e.g. `"1.5"`.
    pub ui_amount_string: String,
}

impl Balance {
    /// Builds a balance from a minimal-unit amount and decimals.
    #[must_use]
    pub fn new(amount: u64, decimals: u8) -> Self {
        let ui_amount = amount_to_ui(amount, decimals);
        Self {
            amount,
            decimals,
            ui_amount,
            ui_amount_string: format_ui_amount(amount, decimals),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn amount_to_ui(amount: u64, decimals: u8) -> f64 {
    amount as f64 / 10f64.powi(i32::from(decimals))
}

fn format_ui_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let divisor = 10u64.pow(u32::from(decimals));
    let whole = amount / divisor;
    let frac = amount % divisor;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0width$}", width = decimals as usize);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Status of a submitted transaction as seen by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Nothing recorded for the signature (yet).
    Unknown,
    /// Seen by the cluster but not finalized.
    InProgress,
    /// Finalized without error.
    Success,
    /// Recorded with an error.
    Failure,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Mint account facts needed to build token instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintInfo {
    /// Number of decimals of the mint.
    pub decimals: u8,
    /// Owning token program (SPL Token or Token-2022).
    pub token_program: Pubkey,
}

/// On-chain metadata of a fungible token, best effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Base58 mint address.
    pub mint: String,
    /// Token name, empty if unknown.
    pub name: String,
    /// Token symbol, empty if unknown.
    pub symbol: String,
    /// Number of decimals.
    pub decimals: u8,
    /// Off-chain metadata URI, empty if unset.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub uri: String,
}

/// Per-account token balance row extracted from transaction meta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    /// Base58 mint address.
    pub mint: String,
    /// Base58 address of the account owner.
    pub owner: String,
    /// Balance in minimal units.
    pub amount: u64,
}

/// Balance deltas recorded by the ledger for a confirmed transaction.
///
/// This is the subset of the raw RPC transaction meta the rest of the
/// system needs; keeping it local makes the validators trivially testable.
#[derive(Debug, Clone, Default)]
pub struct TransferMeta {
    /// Lamport balances per static account index, before execution.
    pub pre_balances: Vec<u64>,
    /// Lamport balances per static account index, after execution.
    pub post_balances: Vec<u64>,
    /// Token balances before execution.
    pub pre_token_balances: Vec<TokenBalance>,
    /// Token balances after execution.
    pub post_token_balances: Vec<TokenBalance>,
}

/// A confirmed transaction fetched by reference, with its balance meta.
#[derive(Debug, Clone)]
pub struct ConfirmedTransaction {
    /// Transaction signature.
    pub signature: Signature,
    /// The decoded transaction.
    pub transaction: VersionedTransaction,
    /// Balance deltas recorded by the ledger.
    pub meta: TransferMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_ui_amounts() {
        let b = Balance::new(1_500_000_000, 9);
        assert_eq!(b.ui_amount_string, "1.5");
        assert!((b.ui_amount - 1.5).abs() < f64::EPSILON);

        let b = Balance::new(1_000_001, 6);
        assert_eq!(b.ui_amount_string, "1.000001");

        let b = Balance::new(42, 0);
        assert_eq!(b.ui_amount_string, "42");
    }
}
