//! Event-emitting decorator: wraps a [`PaymentService`] and fires bus
//! events after successful operations. Status events fire only on an
//! actual state change.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::entity::{
    Attempt, AttemptDraft, AttemptStatus, BuiltAttempt, NewPayment, Payment, PaymentStatus,
};
use super::PaymentService;
use crate::error::Error;
use crate::events::{Emitter, EventName, EventPayload};

/// Observer layer of the service decorator pipeline.
pub struct ServiceEvents {
    inner: Arc<dyn PaymentService>,
    emitter: Arc<Emitter>,
}

impl std::fmt::Debug for ServiceEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEvents").finish_non_exhaustive()
    }
}

impl ServiceEvents {
    /// Wraps `inner`, emitting on `emitter`.
    #[must_use]
    pub fn new(inner: Arc<dyn PaymentService>, emitter: Arc<Emitter>) -> Self {
        Self { inner, emitter }
    }

    fn emit_status(&self, payment_id: Uuid, status: PaymentStatus) {
        self.emitter.emit(
            EventName::for_payment_status(status),
            &EventPayload::PaymentStatus { payment_id, status },
        );
    }
}

#[async_trait]
impl PaymentService for ServiceEvents {
    async fn create_payment(&self, draft: NewPayment) -> Result<Payment, Error> {
        let payment = self.inner.create_payment(draft).await?;
        self.emitter.emit(
            EventName::PaymentCreated,
            &EventPayload::PaymentCreated {
                payment_id: payment.id,
            },
        );
        Ok(payment)
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, Error> {
        self.inner.get_payment(id).await
    }

    async fn get_payment_by_external_id(&self, external_id: &str) -> Result<Payment, Error> {
        self.inner.get_payment_by_external_id(external_id).await
    }

    async fn generate_link(
        &self,
        id: Uuid,
        mint: Option<String>,
        apply_bonus: bool,
    ) -> Result<String, Error> {
        let link = self.inner.generate_link(id, mint, apply_bonus).await?;
        self.emitter.emit(
            EventName::PaymentLinkGenerated,
            &EventPayload::LinkGenerated {
                payment_id: id,
                link: link.clone(),
            },
        );
        Ok(link)
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), Error> {
        let previous = self.inner.get_payment(id).await?;
        self.inner.update_payment_status(id, status).await?;
        if previous.status != status {
            self.emit_status(id, status);
        }
        Ok(())
    }

    async fn cancel_payment(&self, id: Uuid) -> Result<(), Error> {
        let previous = self.inner.get_payment(id).await?;
        self.inner.cancel_payment(id).await?;
        if previous.status != PaymentStatus::Canceled {
            self.emit_status(id, PaymentStatus::Canceled);
        }
        Ok(())
    }

    async fn cancel_payment_by_external_id(&self, external_id: &str) -> Result<(), Error> {
        let previous = self.inner.get_payment_by_external_id(external_id).await?;
        self.inner.cancel_payment_by_external_id(external_id).await?;
        if previous.status != PaymentStatus::Canceled {
            self.emit_status(previous.id, PaymentStatus::Canceled);
        }
        Ok(())
    }

    async fn mark_payments_expired(&self) -> Result<(), Error> {
        self.inner.mark_payments_expired().await
    }

    async fn build_attempt(&self, draft: AttemptDraft) -> Result<BuiltAttempt, Error> {
        let built = self.inner.build_attempt(draft).await?;
        self.emitter.emit(
            EventName::AttemptCreated,
            &EventPayload::AttemptCreated {
                payment_id: built.attempt.payment_id,
                attempt_id: built.attempt.id,
                reference: built.attempt.reference.clone(),
            },
        );
        // The first attempt moves the payment out of `new`; concurrent
        // updates losing this race are fine.
        if let Ok(payment) = self.inner.get_payment(built.attempt.payment_id).await {
            if payment.status == PaymentStatus::New {
                if let Err(err) = self
                    .update_payment_status(payment.id, PaymentStatus::Pending)
                    .await
                {
                    tracing::debug!(payment_id = %payment.id, error = %err,
                        "payment did not move to pending");
                }
            }
        }
        Ok(built)
    }

    async fn get_attempt_by_reference(&self, reference: &str) -> Result<Attempt, Error> {
        self.inner.get_attempt_by_reference(reference).await
    }

    async fn update_attempt(
        &self,
        reference: &str,
        status: AttemptStatus,
        signature: Option<String>,
    ) -> Result<(), Error> {
        self.inner
            .update_attempt(reference, status, signature)
            .await?;
        let attempt = self.inner.get_attempt_by_reference(reference).await?;
        self.emitter.emit(
            EventName::AttemptUpdated,
            &EventPayload::AttemptUpdated {
                payment_id: attempt.payment_id,
                reference: attempt.reference.clone(),
                status: attempt.status,
                signature: attempt.tx_signature.clone(),
                attempt,
            },
        );
        Ok(())
    }

    async fn pending_attempts(&self) -> Result<Vec<Attempt>, Error> {
        self.inner.pending_attempts().await
    }

    async fn mark_attempts_expired(&self) -> Result<(), Error> {
        self.inner.mark_attempts_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Listener;
    use crate::payments::{PaymentConfig, Service};
    use crate::repository::mem::MemRepository;
    use checkout_svm::testing::{MemoryLedger, MemorySwap};
    use solana_keypair::Keypair;
    use solana_signer::Signer;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorded {
        events: Arc<Mutex<HashMap<&'static str, usize>>>,
        service: Arc<ServiceEvents>,
    }

    fn recorded() -> Recorded {
        let emitter = Arc::new(Emitter::new());
        let events: Arc<Mutex<HashMap<&'static str, usize>>> = Arc::default();
        let sink = Arc::clone(&events);
        let listener: Listener = Arc::new(move |name, _| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                *sink.lock().expect("poisoned").entry(name.as_str()).or_insert(0) += 1;
                Ok(())
            })
        });
        emitter.listen_events(&listener, EventName::ALL);

        let core = Service::new(
            Arc::new(MemRepository::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemorySwap::new()),
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
                payment_ttl: Duration::from_secs(900),
                pay_base_url: "https://pay.example.com".into(),
            },
        )
        .unwrap();
        Recorded {
            events,
            service: Arc::new(ServiceEvents::new(Arc::new(core), emitter)),
        }
    }

    impl Recorded {
        async fn count(&self, name: &str) -> usize {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.events
                .lock()
                .expect("poisoned")
                .get(name)
                .copied()
                .unwrap_or(0)
        }
    }

    #[tokio::test]
    async fn create_emits_payment_created() {
        let r = recorded();
        r.service
            .create_payment(NewPayment {
                amount: 10,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        assert_eq!(r.count("payment.created").await, 1);
    }

    #[tokio::test]
    async fn cancel_emits_once_and_only_on_change() {
        let r = recorded();
        let payment = r
            .service
            .create_payment(NewPayment {
                amount: 10,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        r.service.cancel_payment(payment.id).await.unwrap();
        r.service.cancel_payment(payment.id).await.unwrap();
        assert_eq!(r.count("payment.cancelled").await, 1);
    }

    #[tokio::test]
    async fn rejected_transition_emits_nothing() {
        let r = recorded();
        let payment = r
            .service
            .create_payment(NewPayment {
                amount: 10,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        r.service.cancel_payment(payment.id).await.unwrap();
        let err = r
            .service
            .update_payment_status(payment.id, PaymentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(r.count("payment.succeeded").await, 0);
    }

    #[tokio::test]
    async fn build_attempt_emits_created_and_moves_payment_to_pending() {
        let r = recorded();
        let buyer = Keypair::new();
        let payment = r
            .service
            .create_payment(NewPayment {
                amount: 10,
                ..NewPayment::default()
            })
            .await
            .unwrap();
        r.service
            .build_attempt(AttemptDraft {
                payment_id: payment.id,
                source_wallet: buyer.pubkey().to_string(),
                source_mint: None,
                apply_bonus: false,
            })
            .await
            .unwrap();
        assert_eq!(r.count("attempt.created").await, 1);
        assert_eq!(r.count("payment.processing").await, 1);
        assert_eq!(
            r.service.get_payment(payment.id).await.unwrap().status,
            PaymentStatus::Pending
        );
    }
}
