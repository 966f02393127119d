//! Deterministic in-memory doubles for the ledger and swap capabilities.
//!
//! Everything the real clients learn from the network is seeded up front,
//! which keeps instruction, composer, builder and reconciler tests free of
//! any RPC dependency.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use solana_hash::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;

use crate::client::LedgerClient;
use crate::error::{LedgerError, SwapError};
use crate::swap::{BestSwapParams, ExchangeRateParams, Rate, SwapClient, SwapMode};
use crate::types::{Balance, ConfirmedTransaction, MintInfo, TokenMetadata, TxStatus};

#[derive(Default)]
struct LedgerState {
    blockhash: Hash,
    rent_per_byte: u64,
    token_accounts: HashSet<Pubkey>,
    native_balances: HashMap<Pubkey, u64>,
    token_balances: HashMap<(Pubkey, Pubkey), Balance>,
    mints: HashMap<Pubkey, MintInfo>,
    confirmed: HashMap<Pubkey, ConfirmedTransaction>,
    statuses: HashMap<Signature, TxStatus>,
    submitted: Vec<String>,
    balance_token_fails: bool,
    unavailable: bool,
}

/// In-memory [`LedgerClient`].
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Creates an empty ledger with 1 lamport/byte rent.
    #[must_use]
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.state.lock().expect("poisoned").rent_per_byte = 1;
        ledger
    }

    /// Marks a token account as existing.
    pub fn add_token_account(&self, address: Pubkey) {
        self.state.lock().expect("poisoned").token_accounts.insert(address);
    }

    /// Seeds a native balance.
    pub fn set_native_balance(&self, address: Pubkey, lamports: u64) {
        self.state
            .lock()
            .expect("poisoned")
            .native_balances
            .insert(address, lamports);
    }

    /// Seeds a token balance for `(owner, mint)`.
    pub fn set_token_balance(&self, owner: Pubkey, mint: Pubkey, amount: u64, decimals: u8) {
        self.state
            .lock()
            .expect("poisoned")
            .token_balances
            .insert((owner, mint), Balance::new(amount, decimals));
    }

    /// Registers a mint with its decimals and owning token program.
    pub fn add_mint(&self, mint: Pubkey, decimals: u8, token_program: Pubkey) {
        self.state.lock().expect("poisoned").mints.insert(
            mint,
            MintInfo {
                decimals,
                token_program,
            },
        );
    }

    /// Seeds the confirmed transaction returned for a reference key.
    pub fn confirm_for_reference(&self, reference: Pubkey, confirmed: ConfirmedTransaction) {
        self.state
            .lock()
            .expect("poisoned")
            .confirmed
            .insert(reference, confirmed);
    }

    /// Seeds the status reported for a signature.
    pub fn set_status(&self, signature: Signature, status: TxStatus) {
        self.state
            .lock()
            .expect("poisoned")
            .statuses
            .insert(signature, status);
    }

    /// Makes token balance lookups fail, to exercise the best-effort
    /// discount path.
    pub fn fail_token_balances(&self) {
        self.state.lock().expect("poisoned").balance_token_fails = true;
    }

    /// Makes every operation fail as transiently unavailable.
    pub fn go_offline(&self) {
        self.state.lock().expect("poisoned").unavailable = true;
    }

    /// Transactions submitted through [`LedgerClient::submit`].
    #[must_use]
    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().expect("poisoned").submitted.clone()
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.state.lock().expect("poisoned").unavailable {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.check_online()?;
        Ok(self.state.lock().expect("poisoned").blockhash)
    }

    async fn rent_exempt_min(&self, account_size: usize) -> Result<u64, LedgerError> {
        self.check_online()?;
        let per_byte = self.state.lock().expect("poisoned").rent_per_byte;
        Ok(per_byte * account_size as u64)
    }

    async fn token_account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError> {
        self.check_online()?;
        Ok(self
            .state
            .lock()
            .expect("poisoned")
            .token_accounts
            .contains(address))
    }

    async fn balance_native(&self, address: &Pubkey) -> Result<Balance, LedgerError> {
        self.check_online()?;
        let lamports = self
            .state
            .lock()
            .expect("poisoned")
            .native_balances
            .get(address)
            .copied()
            .unwrap_or(0);
        Ok(Balance::new(lamports, 9))
    }

    async fn balance_token(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Balance, LedgerError> {
        self.check_online()?;
        let state = self.state.lock().expect("poisoned");
        if state.balance_token_fails {
            return Err(LedgerError::Unavailable("token balance unavailable".into()));
        }
        Ok(state
            .token_balances
            .get(&(*owner, *mint))
            .cloned()
            .unwrap_or_else(|| Balance::new(0, 0)))
    }

    async fn mint_info(&self, mint: &Pubkey) -> Result<MintInfo, LedgerError> {
        self.check_online()?;
        self.state
            .lock()
            .expect("poisoned")
            .mints
            .get(mint)
            .copied()
            .ok_or_else(|| LedgerError::InvalidParameter(format!("mint {mint} not found")))
    }

    async fn token_metadata(&self, mint: &Pubkey) -> Result<TokenMetadata, LedgerError> {
        let info = self.mint_info(mint).await?;
        Ok(TokenMetadata {
            mint: mint.to_string(),
            decimals: info.decimals,
            ..TokenMetadata::default()
        })
    }

    async fn submit(&self, serialized_tx: &str) -> Result<Signature, LedgerError> {
        self.check_online()?;
        let tx = crate::transaction::decode_transaction(serialized_tx)?;
        self.state
            .lock()
            .expect("poisoned")
            .submitted
            .push(serialized_tx.to_owned());
        Ok(tx.signatures.first().copied().unwrap_or_default())
    }

    async fn status(&self, signature: &Signature) -> Result<TxStatus, LedgerError> {
        self.check_online()?;
        Ok(self
            .state
            .lock()
            .expect("poisoned")
            .statuses
            .get(signature)
            .copied()
            .unwrap_or(TxStatus::Unknown))
    }

    async fn wait_for(
        &self,
        signature: &Signature,
        _deadline: Duration,
    ) -> Result<TxStatus, LedgerError> {
        self.status(signature).await
    }

    async fn oldest_tx_for(
        &self,
        reference: &Pubkey,
        _offset: Option<Signature>,
    ) -> Result<ConfirmedTransaction, LedgerError> {
        self.check_online()?;
        self.state
            .lock()
            .expect("poisoned")
            .confirmed
            .get(reference)
            .cloned()
            .ok_or(LedgerError::NoTransactionsFound)
    }
}

/// In-memory [`SwapClient`] answering with a canned transaction.
#[derive(Default)]
pub struct MemorySwap {
    transaction: Mutex<Option<String>>,
    requests: Mutex<Vec<BestSwapParams>>,
}

impl MemorySwap {
    /// Creates a swap double with no canned transaction (calls fail).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base64 transaction returned by `best_swap`.
    pub fn set_transaction(&self, base64_tx: impl Into<String>) {
        *self.transaction.lock().expect("poisoned") = Some(base64_tx.into());
    }

    /// Swap requests observed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<BestSwapParams> {
        self.requests.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl SwapClient for MemorySwap {
    async fn best_swap(&self, params: BestSwapParams) -> Result<String, SwapError> {
        self.requests.lock().expect("poisoned").push(params);
        self.transaction
            .lock()
            .expect("poisoned")
            .clone()
            .ok_or_else(|| SwapError::Unavailable("no canned swap transaction".into()))
    }

    async fn exchange_rate(&self, params: ExchangeRateParams) -> Result<Rate, SwapError> {
        Ok(Rate {
            amount_in: params.amount,
            amount_out: params.amount,
            input_mint: params.input_mint,
            output_mint: params.output_mint,
            swap_mode: params.mode,
        })
    }
}
