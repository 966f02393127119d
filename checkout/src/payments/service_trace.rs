//! Tracing decorator: logs the outcome of every service operation without
//! swallowing errors.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::entity::{
    Attempt, AttemptDraft, AttemptStatus, BuiltAttempt, NewPayment, Payment, PaymentStatus,
};
use super::PaymentService;
use crate::error::Error;

/// Outermost layer of the service decorator pipeline.
pub struct ServiceTrace {
    inner: Arc<dyn PaymentService>,
}

impl std::fmt::Debug for ServiceTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTrace").finish_non_exhaustive()
    }
}

impl ServiceTrace {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn PaymentService>) -> Self {
        Self { inner }
    }
}

fn trace_err(op: &'static str, err: &Error) {
    tracing::error!(operation = op, error = %err, "payment service operation failed");
}

#[async_trait]
impl PaymentService for ServiceTrace {
    async fn create_payment(&self, draft: NewPayment) -> Result<Payment, Error> {
        let result = self.inner.create_payment(draft).await;
        match &result {
            Ok(payment) => tracing::info!(payment_id = %payment.id, amount = payment.amount,
                "payment created"),
            Err(err) => trace_err("create_payment", err),
        }
        result
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, Error> {
        tracing::debug!(payment_id = %id, "getting payment");
        self.inner.get_payment(id).await
    }

    async fn get_payment_by_external_id(&self, external_id: &str) -> Result<Payment, Error> {
        tracing::debug!(external_id, "getting payment by external id");
        self.inner.get_payment_by_external_id(external_id).await
    }

    async fn generate_link(
        &self,
        id: Uuid,
        mint: Option<String>,
        apply_bonus: bool,
    ) -> Result<String, Error> {
        let result = self.inner.generate_link(id, mint, apply_bonus).await;
        match &result {
            Ok(link) => tracing::info!(payment_id = %id, link, "payment link generated"),
            Err(err) => trace_err("generate_link", err),
        }
        result
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), Error> {
        let result = self.inner.update_payment_status(id, status).await;
        match &result {
            Ok(()) => tracing::info!(payment_id = %id, %status, "payment status updated"),
            Err(err) => trace_err("update_payment_status", err),
        }
        result
    }

    async fn cancel_payment(&self, id: Uuid) -> Result<(), Error> {
        let result = self.inner.cancel_payment(id).await;
        match &result {
            Ok(()) => tracing::info!(payment_id = %id, "payment canceled"),
            Err(err) => trace_err("cancel_payment", err),
        }
        result
    }

    async fn cancel_payment_by_external_id(&self, external_id: &str) -> Result<(), Error> {
        let result = self.inner.cancel_payment_by_external_id(external_id).await;
        if let Err(err) = &result {
            trace_err("cancel_payment_by_external_id", err);
        }
        result
    }

    async fn mark_payments_expired(&self) -> Result<(), Error> {
        let result = self.inner.mark_payments_expired().await;
        if let Err(err) = &result {
            trace_err("mark_payments_expired", err);
        }
        result
    }

    async fn build_attempt(&self, draft: AttemptDraft) -> Result<BuiltAttempt, Error> {
        let payment_id = draft.payment_id;
        let result = self.inner.build_attempt(draft).await;
        match &result {
            Ok(built) => tracing::info!(
                %payment_id,
                attempt_id = %built.attempt.id,
                reference = %built.attempt.reference,
                total_amount = built.attempt.total_amount,
                discount_amount = built.attempt.discount_amount,
                "attempt built"
            ),
            Err(err) => trace_err("build_attempt", err),
        }
        result
    }

    async fn get_attempt_by_reference(&self, reference: &str) -> Result<Attempt, Error> {
        tracing::debug!(reference, "getting attempt by reference");
        self.inner.get_attempt_by_reference(reference).await
    }

    async fn update_attempt(
        &self,
        reference: &str,
        status: AttemptStatus,
        signature: Option<String>,
    ) -> Result<(), Error> {
        let result = self
            .inner
            .update_attempt(reference, status, signature)
            .await;
        match &result {
            Ok(()) => tracing::info!(reference, %status, "attempt updated"),
            Err(err) => trace_err("update_attempt", err),
        }
        result
    }

    async fn pending_attempts(&self) -> Result<Vec<Attempt>, Error> {
        self.inner.pending_attempts().await
    }

    async fn mark_attempts_expired(&self) -> Result<(), Error> {
        let result = self.inner.mark_attempts_expired().await;
        if let Err(err) = &result {
            trace_err("mark_attempts_expired", err);
        }
        result
    }
}
