//! Core payment service: persistence plus the state machine rules.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use checkout_svm::{LedgerClient, SwapClient};
use uuid::Uuid;

use super::builder::PaymentBuilder;
use super::entity::{
    Attempt, AttemptDraft, AttemptStatus, BuiltAttempt, NewPayment, Payment, PaymentStatus,
};
use super::{mints, PaymentConfig, PaymentService};
use crate::error::Error;
use crate::repository::PaymentRepository;

/// The core [`PaymentService`] implementation.
pub struct Service {
    repo: Arc<dyn PaymentRepository>,
    ledger: Arc<dyn LedgerClient>,
    swap: Arc<dyn SwapClient>,
    config: PaymentConfig,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Creates the service after validating the merchant policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] for broken policy configuration; this is a
    /// startup error, not a request error.
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        ledger: Arc<dyn LedgerClient>,
        swap: Arc<dyn SwapClient>,
        config: PaymentConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            repo,
            ledger,
            swap,
            config,
        })
    }

    fn require_open(payment: &Payment) -> Result<(), Error> {
        if matches!(payment.status, PaymentStatus::New | PaymentStatus::Pending) {
            Ok(())
        } else {
            Err(Error::Conflict(format!("payment already {}", payment.status)))
        }
    }
}

#[async_trait]
impl PaymentService for Service {
    async fn create_payment(&self, draft: NewPayment) -> Result<Payment, Error> {
        if draft.amount == 0 {
            return Err(Error::InvalidRequest(
                "payment amount must be greater than zero".into(),
            ));
        }
        let expires_at = draft.expires_at.map_or_else(
            || {
                let ttl = chrono::Duration::from_std(self.config.payment_ttl)
                    .unwrap_or_else(|_| chrono::Duration::minutes(15));
                Some(Utc::now() + ttl)
            },
            Some,
        );
        let payment = Payment {
            id: Uuid::new_v4(),
            external_id: draft.external_id.filter(|id| !id.is_empty()),
            destination_wallet: draft
                .destination_wallet
                .filter(|w| !w.is_empty())
                .unwrap_or_else(|| self.config.destination_wallet.clone()),
            destination_mint: mints::mint_address(
                draft.destination_mint.as_deref().unwrap_or(""),
                &self.config.destination_mint,
            ),
            amount: draft.amount,
            status: PaymentStatus::New,
            message: draft.message.filter(|m| !m.is_empty()),
            expires_at,
        };
        self.repo.create_payment(&payment).await
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, Error> {
        self.repo.get_payment(id).await
    }

    async fn get_payment_by_external_id(&self, external_id: &str) -> Result<Payment, Error> {
        self.repo.get_payment_by_external_id(external_id).await
    }

    async fn generate_link(
        &self,
        id: Uuid,
        mint: Option<String>,
        apply_bonus: bool,
    ) -> Result<String, Error> {
        let payment = self.repo.get_payment(id).await?;
        Self::require_open(&payment)?;
        let mint = mints::mint_address(
            mint.as_deref().unwrap_or(""),
            &payment.destination_mint,
        );
        Ok(format!(
            "solana:{}/{}/{}/{}",
            self.config.pay_base_url.trim_end_matches('/'),
            id,
            mint,
            apply_bonus
        ))
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), Error> {
        self.repo.update_payment_status(id, status).await
    }

    async fn cancel_payment(&self, id: Uuid) -> Result<(), Error> {
        let payment = self.repo.get_payment(id).await?;
        if payment.status == PaymentStatus::Canceled {
            return Ok(());
        }
        self.repo
            .update_payment_status(id, PaymentStatus::Canceled)
            .await
    }

    async fn cancel_payment_by_external_id(&self, external_id: &str) -> Result<(), Error> {
        let payment = self.repo.get_payment_by_external_id(external_id).await?;
        self.cancel_payment(payment.id).await
    }

    async fn mark_payments_expired(&self) -> Result<(), Error> {
        self.repo.mark_payments_expired().await.map(drop)
    }

    async fn build_attempt(&self, draft: AttemptDraft) -> Result<BuiltAttempt, Error> {
        if draft.source_wallet.is_empty() {
            return Err(Error::InvalidRequest("sender wallet address is required".into()));
        }
        let payment = self.repo.get_payment(draft.payment_id).await?;
        Self::require_open(&payment)?;

        let builder = PaymentBuilder::new(
            self.ledger.as_ref(),
            self.swap.as_ref(),
            &self.config,
        );
        let (transaction, attempt) = builder.build(&payment, &draft).await?;
        let attempt = self.repo.create_attempt(&attempt).await?;
        Ok(BuiltAttempt {
            attempt,
            transaction,
        })
    }

    async fn get_attempt_by_reference(&self, reference: &str) -> Result<Attempt, Error> {
        self.repo.get_attempt_by_reference(reference).await
    }

    async fn update_attempt(
        &self,
        reference: &str,
        status: AttemptStatus,
        signature: Option<String>,
    ) -> Result<(), Error> {
        self.repo
            .update_attempt(reference, status, signature.as_deref())
            .await
    }

    async fn pending_attempts(&self) -> Result<Vec<Attempt>, Error> {
        self.repo.pending_attempts().await
    }

    async fn mark_attempts_expired(&self) -> Result<(), Error> {
        self.repo.mark_attempts_expired().await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::mem::MemRepository;
    use checkout_svm::testing::{MemoryLedger, MemorySwap};

    fn config() -> PaymentConfig {
        PaymentConfig {
            apply_bonus: false,
            bonus_mint: String::new(),
            bonus_authority: None,
            max_apply_bonus_amount: 0,
            max_apply_bonus_percent: 0,
            accrue_bonus: false,
            accrue_bonus_rate: 0,
            destination_wallet: "8Kv5Nc2x1zUYGSHrmnPbhBPvsQbVRcH1zdAB6qZrK1cV".into(),
            destination_mint: "SOL".into(),
            payment_ttl: std::time::Duration::from_secs(900),
            pay_base_url: "https://pay.example.com/checkout/".into(),
        }
    }

    fn service() -> Service {
        Service::new(
            Arc::new(MemRepository::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemorySwap::new()),
            config(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_fills_defaults() {
        let svc = service();
        let payment = svc
            .create_payment(NewPayment {
                amount: 2_500_000,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::New);
        assert_eq!(payment.destination_wallet, config().destination_wallet);
        assert_eq!(payment.destination_mint, mints::SOL);
        assert!(payment.expires_at.is_some());
    }

    #[tokio::test]
    async fn create_rejects_zero_amount() {
        let svc = service();
        let err = svc.create_payment(NewPayment::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn duplicate_external_id_conflicts_and_first_is_unchanged() {
        let svc = service();
        let first = svc
            .create_payment(NewPayment {
                external_id: Some("order-1".into()),
                amount: 100,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        let err = svc
            .create_payment(NewPayment {
                external_id: Some("order-1".into()),
                amount: 200,
                ..NewPayment::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let kept = svc.get_payment_by_external_id("order-1").await.unwrap();
        assert_eq!(kept.id, first.id);
        assert_eq!(kept.amount, 100);
    }

    #[tokio::test]
    async fn link_is_deterministic_and_gated() {
        let svc = service();
        let payment = svc
            .create_payment(NewPayment {
                amount: 100,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        let first = svc
            .generate_link(payment.id, Some("USDC".into()), true)
            .await
            .unwrap();
        let second = svc
            .generate_link(payment.id, Some("USDC".into()), true)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            format!(
                "solana:https://pay.example.com/checkout/{}/{}/true",
                payment.id,
                mints::USDC
            )
        );

        svc.cancel_payment(payment.id).await.unwrap();
        let err = svc
            .generate_link(payment.id, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_but_terminal_states_conflict() {
        let svc = service();
        let payment = svc
            .create_payment(NewPayment {
                amount: 100,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        svc.cancel_payment(payment.id).await.unwrap();
        // second cancel is a no-op
        svc.cancel_payment(payment.id).await.unwrap();
        assert_eq!(
            svc.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Canceled
        );
        // canceled is terminal for every other transition
        let err = svc
            .update_payment_status(payment.id, PaymentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn expired_payment_rejects_cancel() {
        let svc = service();
        let payment = svc
            .create_payment(NewPayment {
                amount: 100,
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                ..NewPayment::default()
            })
            .await
            .unwrap();
        svc.mark_payments_expired().await.unwrap();
        assert_eq!(
            svc.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Expired
        );
        let err = svc.cancel_payment(payment.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn build_attempt_requires_open_payment_and_source_wallet() {
        let svc = service();
        let payment = svc
            .create_payment(NewPayment {
                amount: 100,
                ..NewPayment::default()
            })
            .await
            .unwrap();

        let err = svc
            .build_attempt(AttemptDraft {
                payment_id: payment.id,
                source_wallet: String::new(),
                source_mint: None,
                apply_bonus: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        svc.cancel_payment(payment.id).await.unwrap();
        let err = svc
            .build_attempt(AttemptDraft {
                payment_id: payment.id,
                source_wallet: "7fUAJdStEuGbc3sM84cKRL6yYaaSstyLSU4ve5oovLS7".into(),
                source_mint: None,
                apply_bonus: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
