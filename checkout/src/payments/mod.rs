//! Payment lifecycle engine: entities, the service state machine, the
//! attempt transaction builder, bus listeners, and the background workers
//! that reconcile attempts against the ledger.

use std::sync::Arc;

use async_trait::async_trait;
use solana_keypair::Keypair;
use uuid::Uuid;

use crate::error::Error;

pub mod builder;
pub mod entity;
pub mod listeners;
pub mod mints;
pub mod service;
pub mod service_events;
pub mod service_trace;
pub mod worker;

pub use builder::PaymentBuilder;
pub use entity::{
    Attempt, AttemptDraft, AttemptStatus, BuiltAttempt, NewPayment, Payment, PaymentStatus,
};
pub use service::Service;
pub use service_events::ServiceEvents;
pub use service_trace::ServiceTrace;

/// Static merchant policy and defaults applied to every payment.
#[derive(Clone)]
pub struct PaymentConfig {
    /// Whether buyers may burn bonus for a discount at all.
    pub apply_bonus: bool,
    /// Base58 mint of the loyalty bonus token.
    pub bonus_mint: String,
    /// Mint authority of the bonus token; signs accrual mints.
    pub bonus_authority: Option<Arc<Keypair>>,
    /// Absolute cap on the discount, in minimal units. Zero disables it.
    pub max_apply_bonus_amount: u64,
    /// Relative cap on the discount, in basis points of the payment
    /// amount. Zero disables it.
    pub max_apply_bonus_percent: u16,
    /// Whether buyers accrue bonus on successful payments.
    pub accrue_bonus: bool,
    /// Accrual rate in basis points of the paid total.
    pub accrue_bonus_rate: u64,
    /// Default destination wallet for new payments.
    pub destination_wallet: String,
    /// Default destination currency for new payments.
    pub destination_mint: String,
    /// Default payment lifetime.
    pub payment_ttl: std::time::Duration,
    /// Base URL the buyer deep link points at.
    pub pay_base_url: String,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("apply_bonus", &self.apply_bonus)
            .field("bonus_mint", &self.bonus_mint)
            .field("has_bonus_authority", &self.bonus_authority.is_some())
            .field("max_apply_bonus_amount", &self.max_apply_bonus_amount)
            .field("max_apply_bonus_percent", &self.max_apply_bonus_percent)
            .field("accrue_bonus", &self.accrue_bonus)
            .field("accrue_bonus_rate", &self.accrue_bonus_rate)
            .field("destination_wallet", &self.destination_wallet)
            .field("destination_mint", &self.destination_mint)
            .field("payment_ttl", &self.payment_ttl)
            .field("pay_base_url", &self.pay_base_url)
            .finish()
    }
}

impl PaymentConfig {
    /// Checks the policy for configurations that are programming errors.
    /// Run once at service construction, never at build time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] when bonus rules are enabled without the
    /// matching mint or authority.
    pub fn validate(&self) -> Result<(), Error> {
        if self.apply_bonus && self.bonus_mint.is_empty() {
            return Err(Error::Fatal(
                "apply-bonus is enabled but no bonus mint is configured".into(),
            ));
        }
        if self.accrue_bonus && self.bonus_mint.is_empty() {
            return Err(Error::Fatal(
                "accrue-bonus is enabled but no bonus mint is configured".into(),
            ));
        }
        if self.accrue_bonus && self.bonus_authority.is_none() {
            return Err(Error::Fatal(
                "accrue-bonus is enabled but no bonus mint authority is configured".into(),
            ));
        }
        Ok(())
    }
}

/// The domain API of the payment core.
///
/// Implemented by the core [`Service`] and wrapped by the decorators
/// ([`ServiceEvents`], [`ServiceTrace`]); every layer honors the same
/// contract so observers can be tested by mocking the inner core.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Creates a payment, filling destination and expiry defaults.
    /// Emits `payment.created`.
    async fn create_payment(&self, draft: NewPayment) -> Result<Payment, Error>;

    /// Fetches a payment by id.
    async fn get_payment(&self, id: Uuid) -> Result<Payment, Error>;

    /// Fetches a payment by its merchant-scoped external id.
    async fn get_payment_by_external_id(&self, external_id: &str) -> Result<Payment, Error>;

    /// Builds the buyer deep link for a payment in `new` or `pending`.
    /// Emits `payment.link.generated`.
    async fn generate_link(
        &self,
        id: Uuid,
        mint: Option<String>,
        apply_bonus: bool,
    ) -> Result<String, Error>;

    /// Applies a status transition; illegal transitions are a conflict.
    /// Emits the matching payment event on an actual change.
    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), Error>;

    /// Cancels a payment. Idempotent when already canceled.
    /// Emits `payment.cancelled`.
    async fn cancel_payment(&self, id: Uuid) -> Result<(), Error>;

    /// Cancels a payment addressed by external id.
    async fn cancel_payment_by_external_id(&self, external_id: &str) -> Result<(), Error>;

    /// Expires overdue `new`/`pending` payments in bulk.
    async fn mark_payments_expired(&self) -> Result<(), Error>;

    /// Builds, persists and returns a payment attempt with its serialized
    /// transaction. Emits `attempt.created`.
    async fn build_attempt(&self, draft: AttemptDraft) -> Result<BuiltAttempt, Error>;

    /// Fetches an attempt by its reference key.
    async fn get_attempt_by_reference(&self, reference: &str) -> Result<Attempt, Error>;

    /// Updates an attempt's status and signature.
    /// Emits `attempt.updated` with the fresh snapshot.
    async fn update_attempt(
        &self,
        reference: &str,
        status: AttemptStatus,
        signature: Option<String>,
    ) -> Result<(), Error>;

    /// All attempts still pending.
    async fn pending_attempts(&self) -> Result<Vec<Attempt>, Error>;

    /// Expires pending attempts of overdue payments in bulk.
    async fn mark_attempts_expired(&self) -> Result<(), Error>;
}
