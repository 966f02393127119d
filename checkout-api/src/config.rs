//! Environment configuration of the service binary.
//!
//! Durations are given in seconds. Required variables without a default
//! abort startup with a descriptive error.

use std::time::Duration;

/// A configuration variable is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    /// A variable is set but does not parse.
    #[error("environment variable {0} is invalid: {1}")]
    Invalid(&'static str, String),
}

fn env_str(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn must_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(key, e.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(key, default_secs)?))
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Product name shown to buyer wallets.
    pub product_name: String,
    /// Product icon URI shown to buyer wallets.
    pub product_icon: String,

    /// HTTP bind port.
    pub http_port: u16,
    /// Per-request timeout.
    pub http_request_timeout: Duration,
    /// Grace window for in-flight work at shutdown.
    pub http_shutdown_timeout: Duration,

    /// Postgres connection string.
    pub database_url: String,
    /// Connection pool bound.
    pub database_max_conns: u32,

    /// HMAC key binding issued oauth tokens.
    pub oauth_signing_key: String,
    /// Access token lifetime.
    pub access_token_ttl: Duration,
    /// Refresh token lifetime.
    pub refresh_token_ttl: Duration,
    /// The single configured oauth client.
    pub client_id: String,
    /// Its secret.
    pub client_secret: String,

    /// Queue worker pool size.
    pub worker_concurrency: usize,
    /// Queue name.
    pub queue_name: String,

    /// Secret signing outbound webhook bodies.
    pub webhook_signature_secret: Vec<u8>,
    /// Merchant URL receiving webhooks.
    pub webhook_uri: String,

    /// Ledger JSON-RPC endpoint.
    pub solana_rpc_endpoint: String,
    /// Ledger websocket endpoint (account-change push channel).
    pub solana_wss_endpoint: String,
    /// Base URL embedded in buyer deep links.
    pub solana_pay_base_uri: String,

    /// Merchant wallet receiving payments.
    pub merchant_wallet_address: String,
    /// Default currency of new payments.
    pub merchant_default_mint: String,
    /// Whether buyers may apply bonus.
    pub merchant_apply_bonus: bool,
    /// Discount cap in basis points of the payment amount.
    pub merchant_max_bonus_percentage: u16,
    /// Absolute discount cap in minimal units.
    pub max_apply_bonus_amount: u64,
    /// Bonus token mint address.
    pub bonus_mint_address: String,
    /// Base58 secret key of the bonus mint authority.
    pub bonus_mint_authority: String,
    /// Accrual rate in basis points of the paid total.
    pub bonus_rate: u64,
    /// Default payment lifetime.
    pub payment_ttl: Duration,
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            product_name: env_str("PRODUCT_NAME", "Checkout"),
            product_icon: env_str("PRODUCT_ICON", ""),

            http_port: env_parse("HTTP_PORT", 8080)?,
            http_request_timeout: env_secs("HTTP_REQUEST_TIMEOUT", 10)?,
            http_shutdown_timeout: env_secs("HTTP_SERVER_SHUTDOWN_TIMEOUT", 5)?,

            database_url: must_env("DATABASE_URL")?,
            database_max_conns: env_parse("DATABASE_MAX_OPEN_CONNS", 20)?,

            oauth_signing_key: must_env("OAUTH_SIGNING_KEY")?,
            access_token_ttl: env_secs("ACCESS_TOKEN_TTL", 300)?,
            refresh_token_ttl: env_secs("REFRESH_TOKEN_TTL", 3600)?,
            client_id: must_env("CLIENT_ID")?,
            client_secret: must_env("CLIENT_SECRET")?,

            worker_concurrency: env_parse("WORKER_CONCURRENCY", 10)?,
            queue_name: env_str("QUEUE_NAME", "default"),

            webhook_signature_secret: must_env("WEBHOOK_SIGNATURE_SECRET")?.into_bytes(),
            webhook_uri: must_env("WEBHOOK_URI")?,

            solana_rpc_endpoint: env_str(
                "SOLANA_RPC_ENDPOINT",
                "https://api.devnet.solana.com",
            ),
            solana_wss_endpoint: env_str(
                "SOLANA_WSS_ENDPOINT",
                "wss://api.devnet.solana.com",
            ),
            solana_pay_base_uri: env_str(
                "SOLANA_PAY_BASE_URI",
                "https://checkout.example.com/checkout",
            ),

            merchant_wallet_address: must_env("MERCHANT_WALLET_ADDRESS")?,
            merchant_default_mint: env_str("MERCHANT_DEFAULT_MINT", "SOL"),
            merchant_apply_bonus: env_parse("MERCHANT_APPLY_BONUS", true)?,
            merchant_max_bonus_percentage: env_parse("MERCHANT_MAX_BONUS_PERCENTAGE", 5000)?,
            max_apply_bonus_amount: env_parse("MAX_APPLY_BONUS_AMOUNT", 10_000_000_000)?,
            bonus_mint_address: env_str("BONUS_MINT_ADDRESS", ""),
            bonus_mint_authority: env_str("BONUS_MINT_AUTHORITY", ""),
            bonus_rate: env_parse("BONUS_RATE", 100)?,
            payment_ttl: env_secs("PAYMENT_TTL", 900)?,
        })
    }
}
