//! Ledger capability: everything the rest of the system knows about the
//! chain enters through [`LedgerClient`], so tests can substitute a
//! deterministic in-memory ledger and no raw RPC type leaks upward.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_hash::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    TransactionConfirmationStatus, UiTransactionEncoding, UiTransactionStatusMeta,
};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_token::solana_program::program_pack::Pack;
use spl_token_2022::extension::{BaseStateWithExtensions, StateWithExtensions};
use spl_token_metadata_interface::state::TokenMetadata as Token2022Metadata;

use crate::error::LedgerError;
use crate::transaction::{
    decode_transaction, validate_native_transfer, validate_token_transfer,
};
use crate::types::{
    Balance, ConfirmedTransaction, MintInfo, TokenBalance, TokenMetadata, TransferMeta, TxStatus,
};

/// Page size for the backwards signature scan in [`LedgerClient::oldest_tx_for`].
const SIGNATURE_PAGE_LIMIT: usize = 1000;

/// Poll interval used by [`LedgerClient::wait_for`].
const WAIT_TICK: Duration = Duration::from_secs(5);

/// Ledger operations consumed by the payment core.
///
/// All methods return categorized [`LedgerError`]s; transient RPC failures
/// surface as [`LedgerError::Unavailable`] so callers can keep polling.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest blockhash, for transaction recency.
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Minimum lamports for an account of `account_size` bytes to be
    /// rent exempt.
    async fn rent_exempt_min(&self, account_size: usize) -> Result<u64, LedgerError>;

    /// Whether a token account exists at `address`.
    async fn token_account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError>;

    /// Native balance of `address`, in lamports.
    async fn balance_native(&self, address: &Pubkey) -> Result<Balance, LedgerError>;

    /// Token balance of `owner`'s sub-account for `mint`.
    async fn balance_token(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Balance, LedgerError>;

    /// Decimals and owning token program of a mint.
    async fn mint_info(&self, mint: &Pubkey) -> Result<MintInfo, LedgerError>;

    /// Best-effort token metadata for a mint.
    async fn token_metadata(&self, mint: &Pubkey) -> Result<TokenMetadata, LedgerError>;

    /// Submits a base64-serialized transaction. A duplicate submit is
    /// reported as success with the transaction's own signature.
    async fn submit(&self, serialized_tx: &str) -> Result<Signature, LedgerError>;

    /// Status of a submitted transaction.
    async fn status(&self, signature: &Signature) -> Result<TxStatus, LedgerError>;

    /// Polls [`LedgerClient::status`] until the transaction reaches a
    /// terminal status or the deadline passes (then [`TxStatus::Unknown`]).
    async fn wait_for(
        &self,
        signature: &Signature,
        deadline: Duration,
    ) -> Result<TxStatus, LedgerError> {
        let deadline = if deadline.is_zero() {
            Duration::from_secs(300)
        } else {
            deadline
        };
        let poll = async {
            let mut tick = tokio::time::interval(WAIT_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                match self.status(signature).await? {
                    TxStatus::Success => return Ok(TxStatus::Success),
                    TxStatus::Failure => return Ok(TxStatus::Failure),
                    TxStatus::Unknown | TxStatus::InProgress => {}
                }
            }
        };
        match tokio::time::timeout(deadline, poll).await {
            Ok(result) => result,
            Err(_) => Ok(TxStatus::Unknown),
        }
    }

    /// Oldest confirmed transaction that references `reference`, scanning
    /// the signature history backwards from `offset`.
    async fn oldest_tx_for(
        &self,
        reference: &Pubkey,
        offset: Option<Signature>,
    ) -> Result<ConfirmedTransaction, LedgerError>;

    /// Fetches the oldest transaction for `reference` and validates that it
    /// credited `destination` with exactly `amount` of `mint` (`None` for
    /// the native coin). Returns the matching signature.
    async fn validate_transfer_by_reference(
        &self,
        reference: &Pubkey,
        destination: &Pubkey,
        amount: u64,
        mint: Option<&Pubkey>,
    ) -> Result<Signature, LedgerError> {
        let confirmed = self.oldest_tx_for(reference, None).await?;
        match mint {
            None => validate_native_transfer(
                &confirmed.meta,
                &confirmed.transaction,
                destination,
                amount,
            )?,
            Some(mint) => {
                validate_token_transfer(&confirmed.meta, mint, destination, amount)?;
            }
        }
        Ok(confirmed.signature)
    }
}

/// [`LedgerClient`] over a Solana JSON-RPC endpoint.
pub struct SolanaRpcClient {
    rpc: RpcClient,
}

impl std::fmt::Debug for SolanaRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaRpcClient").finish_non_exhaustive()
    }
}

impl SolanaRpcClient {
    /// Creates a client for the given RPC endpoint URL.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            rpc: RpcClient::new(endpoint.into()),
        }
    }

    /// Wraps an already configured RPC client.
    #[must_use]
    pub const fn from_rpc(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let response = self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(unavailable)?;
        Ok(response.value.map(|account| account.data))
    }
}

fn unavailable(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Unavailable(err.to_string())
}

fn convert_meta(meta: &UiTransactionStatusMeta) -> TransferMeta {
    let token_balances = |rows: &OptionSerializer<
        Vec<solana_transaction_status::UiTransactionTokenBalance>,
    >| {
        Option::<Vec<solana_transaction_status::UiTransactionTokenBalance>>::from(rows.clone())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| {
                let owner: Option<String> = Option::from(row.owner);
                Some(TokenBalance {
                    mint: row.mint,
                    owner: owner?,
                    amount: row.ui_token_amount.amount.parse().ok()?,
                })
            })
            .collect()
    };
    TransferMeta {
        pre_balances: meta.pre_balances.clone(),
        post_balances: meta.post_balances.clone(),
        pre_token_balances: token_balances(&meta.pre_token_balances),
        post_token_balances: token_balances(&meta.post_token_balances),
    }
}

#[async_trait]
impl LedgerClient for SolanaRpcClient {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.rpc.get_latest_blockhash().await.map_err(unavailable)
    }

    async fn rent_exempt_min(&self, account_size: usize) -> Result<u64, LedgerError> {
        self.rpc
            .get_minimum_balance_for_rent_exemption(account_size)
            .await
            .map_err(unavailable)
    }

    async fn token_account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError> {
        Ok(self.account_data(address).await?.is_some())
    }

    async fn balance_native(&self, address: &Pubkey) -> Result<Balance, LedgerError> {
        let lamports = self.rpc.get_balance(address).await.map_err(unavailable)?;
        Ok(Balance::new(lamports, 9))
    }

    async fn balance_token(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Balance, LedgerError> {
        let info = self.mint_info(mint).await?;
        let ata = get_associated_token_address_with_program_id(owner, mint, &info.token_program);
        let amount = self
            .rpc
            .get_token_account_balance(&ata)
            .await
            .map_err(unavailable)?;
        let lamports = amount
            .amount
            .parse::<u64>()
            .map_err(|e| LedgerError::Encoding(e.to_string()))?;
        Ok(Balance::new(lamports, amount.decimals))
    }

    async fn mint_info(&self, mint: &Pubkey) -> Result<MintInfo, LedgerError> {
        let account = self
            .rpc
            .get_account_with_commitment(mint, CommitmentConfig::confirmed())
            .await
            .map_err(unavailable)?
            .value
            .ok_or_else(|| LedgerError::InvalidParameter(format!("mint {mint} not found")))?;
        if account.owner == spl_token::id() {
            let state = spl_token::state::Mint::unpack_from_slice(&account.data)
                .map_err(|e| LedgerError::Encoding(e.to_string()))?;
            Ok(MintInfo {
                decimals: state.decimals,
                token_program: spl_token::id(),
            })
        } else if account.owner == spl_token_2022::id() {
            let state = StateWithExtensions::<spl_token_2022::state::Mint>::unpack(&account.data)
                .map_err(|e| LedgerError::Encoding(e.to_string()))?;
            Ok(MintInfo {
                decimals: state.base.decimals,
                token_program: spl_token_2022::id(),
            })
        } else {
            Err(LedgerError::InvalidParameter(format!(
                "{mint} is not owned by a token program"
            )))
        }
    }

    async fn token_metadata(&self, mint: &Pubkey) -> Result<TokenMetadata, LedgerError> {
        let data = self
            .account_data(mint)
            .await?
            .ok_or_else(|| LedgerError::InvalidParameter(format!("mint {mint} not found")))?;
        let mut result = TokenMetadata {
            mint: mint.to_string(),
            ..TokenMetadata::default()
        };
        if let Ok(state) = StateWithExtensions::<spl_token_2022::state::Mint>::unpack(&data) {
            result.decimals = state.base.decimals;
            if let Ok(meta) = state.get_variable_len_extension::<Token2022Metadata>() {
                result.name = meta.name;
                result.symbol = meta.symbol;
                result.uri = meta.uri;
            }
        } else if let Ok(state) = spl_token::state::Mint::unpack_from_slice(&data) {
            result.decimals = state.decimals;
        }
        Ok(result)
    }

    async fn submit(&self, serialized_tx: &str) -> Result<Signature, LedgerError> {
        let tx = decode_transaction(serialized_tx)?;
        match self.rpc.send_transaction(&tx).await {
            Ok(signature) => Ok(signature),
            Err(err) => {
                // A replayed submit of an already landed transaction counts
                // as success.
                if matches!(
                    err.get_transaction_error(),
                    Some(solana_transaction_error::TransactionError::AlreadyProcessed)
                ) {
                    tx.signatures
                        .first()
                        .copied()
                        .ok_or_else(|| LedgerError::Encoding("unsigned transaction".into()))
                } else {
                    Err(unavailable(err))
                }
            }
        }
    }

    async fn status(&self, signature: &Signature) -> Result<TxStatus, LedgerError> {
        let response = self
            .rpc
            .get_signature_statuses(&[*signature])
            .await
            .map_err(unavailable)?;
        let Some(Some(status)) = response.value.into_iter().next() else {
            return Ok(TxStatus::Unknown);
        };
        if status.err.is_some() {
            return Ok(TxStatus::Failure);
        }
        Ok(match status.confirmation_status {
            Some(TransactionConfirmationStatus::Finalized) => TxStatus::Success,
            Some(
                TransactionConfirmationStatus::Confirmed
                | TransactionConfirmationStatus::Processed,
            ) => TxStatus::InProgress,
            None => {
                if status.confirmations.unwrap_or(0) > 0 {
                    TxStatus::InProgress
                } else {
                    TxStatus::Unknown
                }
            }
        })
    }

    async fn oldest_tx_for(
        &self,
        reference: &Pubkey,
        offset: Option<Signature>,
    ) -> Result<ConfirmedTransaction, LedgerError> {
        let mut before = offset;
        loop {
            let page = self
                .rpc
                .get_signatures_for_address_with_config(
                    reference,
                    GetConfirmedSignaturesForAddress2Config {
                        before,
                        until: None,
                        limit: Some(SIGNATURE_PAGE_LIMIT),
                        commitment: Some(CommitmentConfig::finalized()),
                    },
                )
                .await
                .map_err(unavailable)?;
            if page.is_empty() {
                return Err(LedgerError::NoTransactionsFound);
            }
            let tail = &page[page.len() - 1];
            if page.len() == SIGNATURE_PAGE_LIMIT {
                // Full page: older history may exist, keep scanning from
                // the tail. Re-visiting the tail later is harmless.
                before = Some(
                    tail.signature
                        .parse()
                        .map_err(|e| LedgerError::Encoding(format!("{e:?}")))?,
                );
                continue;
            }
            if let Some(err) = &tail.err {
                return Err(LedgerError::OnChainFailure(format!("{err:?}")));
            }
            let now = chrono::Utc::now().timestamp();
            if !tail.block_time.is_some_and(|t| t > 0 && t <= now) {
                return Err(LedgerError::NotConfirmed);
            }
            let signature: Signature = tail
                .signature
                .parse()
                .map_err(|e| LedgerError::Encoding(format!("{e:?}")))?;
            let fetched = self
                .rpc
                .get_transaction_with_config(
                    &signature,
                    RpcTransactionConfig {
                        encoding: Some(UiTransactionEncoding::Base64),
                        commitment: Some(CommitmentConfig::finalized()),
                        max_supported_transaction_version: Some(0),
                    },
                )
                .await
                .map_err(unavailable)?;
            let meta = fetched
                .transaction
                .meta
                .as_ref()
                .ok_or(LedgerError::NotConfirmed)?;
            if meta.err.is_some() {
                return Err(LedgerError::OnChainFailure(format!("{:?}", meta.err)));
            }
            let transaction = fetched
                .transaction
                .transaction
                .decode()
                .ok_or_else(|| LedgerError::Encoding("undecodable transaction".into()))?;
            return Ok(ConfirmedTransaction {
                signature,
                transaction,
                meta: convert_meta(meta),
            });
        }
    }
}
