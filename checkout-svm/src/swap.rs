//! Swap quote capability: obtains ready-made swap transactions and exchange
//! rates from a Jupiter-style aggregator over HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SwapError;

/// Which side of the swap the amount fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapMode {
    /// `amount` is the exact input; output floats.
    ExactIn,
    /// `amount` is the exact output; input floats.
    ExactOut,
}

impl std::fmt::Display for SwapMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExactIn => f.write_str("ExactIn"),
            Self::ExactOut => f.write_str("ExactOut"),
        }
    }
}

/// Parameters for requesting a ready-made swap transaction.
#[derive(Debug, Clone)]
pub struct BestSwapParams {
    /// Base58 wallet of the user signing and funding the swap.
    pub user_wallet: String,
    /// Base58 mint being sold.
    pub input_mint: String,
    /// Base58 mint being bought.
    pub output_mint: String,
    /// Desired output amount in minimal units (the swap must fund the
    /// follow-up transfer exactly).
    pub amount: u64,
}

/// Parameters for an exchange rate lookup.
#[derive(Debug, Clone)]
pub struct ExchangeRateParams {
    /// Base58 mint being sold.
    pub input_mint: String,
    /// Base58 mint being bought.
    pub output_mint: String,
    /// Amount in minimal units of the side fixed by `mode`.
    pub amount: u64,
    /// Which side `amount` fixes.
    pub mode: SwapMode,
}

/// A quoted exchange rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rate {
    /// Base58 mint being sold.
    pub input_mint: String,
    /// Base58 mint being bought.
    pub output_mint: String,
    /// Input amount in minimal units.
    pub amount_in: u64,
    /// Output amount in minimal units.
    pub amount_out: u64,
    /// Which side the request fixed.
    pub swap_mode: SwapMode,
}

/// External swap quote provider.
#[async_trait]
pub trait SwapClient: Send + Sync {
    /// Returns the best available swap as a base64-serialized transaction
    /// ready to be decompiled into a larger payment transaction.
    async fn best_swap(&self, params: BestSwapParams) -> Result<String, SwapError>;

    /// Returns the current exchange rate for a pair.
    async fn exchange_rate(&self, params: ExchangeRateParams) -> Result<Rate, SwapError>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    in_amount: String,
    out_amount: String,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    quote_response: &'a QuoteResponse,
    user_public_key: &'a str,
    wrap_and_unwrap_sol: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

/// Jupiter-style aggregator client.
#[derive(Debug, Clone)]
pub struct JupiterClient {
    base_url: Url,
    client: reqwest::Client,
}

impl JupiterClient {
    /// Default public endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://quote-api.jup.ag/v6/";

    /// Creates a client for the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError::InvalidParameter`] if the URL is malformed
    /// (never for the built-in default).
    pub fn new() -> Result<Self, SwapError> {
        Self::with_base_url(Self::DEFAULT_BASE_URL)
    }

    /// Creates a client for a custom endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError::InvalidParameter`] if the URL is malformed.
    pub fn with_base_url(base_url: &str) -> Result<Self, SwapError> {
        let mut base_url = base_url.to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base_url = base_url
            .parse()
            .map_err(|e| SwapError::InvalidParameter(format!("base url: {e}")))?;
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SwapError> {
        self.base_url
            .join(path)
            .map_err(|e| SwapError::InvalidParameter(format!("endpoint {path}: {e}")))
    }

    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        mode: SwapMode,
    ) -> Result<QuoteResponse, SwapError> {
        if input_mint.is_empty() || output_mint.is_empty() {
            return Err(SwapError::InvalidParameter("mint is required".into()));
        }
        if amount == 0 {
            return Err(SwapError::InvalidParameter(
                "amount must be greater than zero".into(),
            ));
        }
        let amount = amount.to_string();
        let mode = mode.to_string();
        let response = self
            .client
            .get(self.endpoint("quote")?)
            .query(&[
                ("inputMint", input_mint),
                ("outputMint", output_mint),
                ("amount", amount.as_str()),
                ("swapMode", mode.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SwapError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SwapError::Unavailable(format!(
                "quote returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| SwapError::Decoding(e.to_string()))
    }
}

#[async_trait]
impl SwapClient for JupiterClient {
    async fn best_swap(&self, params: BestSwapParams) -> Result<String, SwapError> {
        if params.user_wallet.is_empty() {
            return Err(SwapError::InvalidParameter("user wallet is required".into()));
        }
        // ExactOut so the swap yields precisely the amount the follow-up
        // transfer moves.
        let quote = self
            .quote(
                &params.input_mint,
                &params.output_mint,
                params.amount,
                SwapMode::ExactOut,
            )
            .await?;
        let response = self
            .client
            .post(self.endpoint("swap")?)
            .json(&SwapRequest {
                quote_response: &quote,
                user_public_key: &params.user_wallet,
                wrap_and_unwrap_sol: true,
            })
            .send()
            .await
            .map_err(|e| SwapError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SwapError::Unavailable(format!(
                "swap returned {}",
                response.status()
            )));
        }
        let swap: SwapResponse = response
            .json()
            .await
            .map_err(|e| SwapError::Decoding(e.to_string()))?;
        Ok(swap.swap_transaction)
    }

    async fn exchange_rate(&self, params: ExchangeRateParams) -> Result<Rate, SwapError> {
        let quote = self
            .quote(
                &params.input_mint,
                &params.output_mint,
                params.amount,
                params.mode,
            )
            .await?;
        let parse = |value: &str, side: &str| {
            value
                .parse::<u64>()
                .map_err(|_| SwapError::Decoding(format!("{side} amount is not a number")))
        };
        Ok(Rate {
            amount_in: parse(&quote.in_amount, "input")?,
            amount_out: parse(&quote.out_amount, "output")?,
            input_mint: params.input_mint,
            output_mint: params.output_mint,
            swap_mode: params.mode,
        })
    }
}
