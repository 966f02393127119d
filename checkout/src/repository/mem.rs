//! In-memory repository mirroring the Postgres semantics, including the
//! conditional status updates and uniqueness guarantees.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::PaymentRepository;
use crate::error::Error;
use crate::payments::{Attempt, AttemptStatus, Payment, PaymentStatus};

/// In-memory [`PaymentRepository`] for tests.
#[derive(Debug, Default)]
pub struct MemRepository {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    payments: HashMap<Uuid, Payment>,
    attempts: HashMap<String, Attempt>,
}

impl MemRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for MemRepository {
    async fn create_payment(&self, payment: &Payment) -> Result<Payment, Error> {
        let mut state = self.state.lock().expect("poisoned");
        if let Some(external_id) = &payment.external_id {
            let duplicate = state
                .payments
                .values()
                .any(|p| p.external_id.as_ref() == Some(external_id));
            if duplicate {
                return Err(Error::Conflict(
                    "payment with this external id already exists".into(),
                ));
            }
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, Error> {
        self.state
            .lock()
            .expect("poisoned")
            .payments
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound("payment"))
    }

    async fn get_payment_by_external_id(&self, external_id: &str) -> Result<Payment, Error> {
        self.state
            .lock()
            .expect("poisoned")
            .payments
            .values()
            .find(|p| p.external_id.as_deref() == Some(external_id))
            .cloned()
            .ok_or(Error::NotFound("payment"))
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), Error> {
        let mut state = self.state.lock().expect("poisoned");
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or(Error::NotFound("payment"))?;
        if !payment.status.can_transition_to(status) {
            return Err(Error::Conflict(format!("payment already {}", payment.status)));
        }
        payment.status = status;
        Ok(())
    }

    async fn mark_payments_expired(&self) -> Result<u64, Error> {
        let now = Utc::now();
        let mut touched = 0;
        let mut state = self.state.lock().expect("poisoned");
        for payment in state.payments.values_mut() {
            let expired = matches!(
                payment.status,
                PaymentStatus::New | PaymentStatus::Pending
            ) && payment.expires_at.is_some_and(|at| at < now);
            if expired {
                payment.status = PaymentStatus::Expired;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn create_attempt(&self, attempt: &Attempt) -> Result<Attempt, Error> {
        let mut state = self.state.lock().expect("poisoned");
        if state.attempts.contains_key(&attempt.reference) {
            return Err(Error::Conflict("reference already used".into()));
        }
        state
            .attempts
            .insert(attempt.reference.clone(), attempt.clone());
        Ok(attempt.clone())
    }

    async fn get_attempt_by_reference(&self, reference: &str) -> Result<Attempt, Error> {
        self.state
            .lock()
            .expect("poisoned")
            .attempts
            .get(reference)
            .cloned()
            .ok_or(Error::NotFound("attempt"))
    }

    async fn update_attempt(
        &self,
        reference: &str,
        status: AttemptStatus,
        signature: Option<&str>,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().expect("poisoned");
        if status == AttemptStatus::Completed {
            let payment_id = state
                .attempts
                .get(reference)
                .ok_or(Error::NotFound("attempt"))?
                .payment_id;
            let other_completed = state.attempts.values().any(|a| {
                a.payment_id == payment_id
                    && a.reference != reference
                    && a.status == AttemptStatus::Completed
            });
            if other_completed {
                return Err(Error::Conflict(
                    "payment already has a completed attempt".into(),
                ));
            }
        }
        let attempt = state
            .attempts
            .get_mut(reference)
            .ok_or(Error::NotFound("attempt"))?;
        if !attempt.status.can_transition_to(status) {
            return Err(Error::Conflict(format!("attempt already {}", attempt.status)));
        }
        attempt.status = status;
        if let Some(signature) = signature {
            attempt.tx_signature = Some(signature.to_owned());
        }
        Ok(())
    }

    async fn pending_attempts(&self) -> Result<Vec<Attempt>, Error> {
        Ok(self
            .state
            .lock()
            .expect("poisoned")
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::Pending)
            .cloned()
            .collect())
    }

    async fn mark_attempts_expired(&self) -> Result<u64, Error> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("poisoned");
        let expired_payments: Vec<Uuid> = state
            .payments
            .values()
            .filter(|p| p.expires_at.is_some_and(|at| at < now))
            .map(|p| p.id)
            .collect();
        let mut touched = 0;
        for attempt in state.attempts.values_mut() {
            if attempt.status == AttemptStatus::Pending
                && expired_payments.contains(&attempt.payment_id)
            {
                attempt.status = AttemptStatus::Expired;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(reference: &str) -> Attempt {
        Attempt {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            reference: reference.into(),
            source_wallet: "wallet".into(),
            source_mint: "mint".into(),
            destination_wallet: "merchant".into(),
            destination_mint: "mint".into(),
            amount: 10,
            discount_amount: 0,
            total_amount: 10,
            accrued_bonus_amount: 0,
            message: None,
            memo: None,
            apply_bonus: false,
            tx_signature: None,
            status: AttemptStatus::Pending,
        }
    }

    #[tokio::test]
    async fn settled_attempts_reject_further_transitions() {
        let repo = MemRepository::new();
        repo.create_attempt(&attempt("ref-1")).await.unwrap();
        repo.update_attempt("ref-1", AttemptStatus::Completed, Some("sig"))
            .await
            .unwrap();

        // same-status update is a tolerated no-op
        repo.update_attempt("ref-1", AttemptStatus::Completed, None)
            .await
            .unwrap();
        let stored = repo.get_attempt_by_reference("ref-1").await.unwrap();
        assert_eq!(stored.tx_signature.as_deref(), Some("sig"));

        for next in [
            AttemptStatus::Pending,
            AttemptStatus::Failed,
            AttemptStatus::Expired,
        ] {
            let err = repo.update_attempt("ref-1", next, None).await.unwrap_err();
            assert!(matches!(err, Error::Conflict(_)), "completed -> {next}");
        }
    }

    #[tokio::test]
    async fn expired_attempt_cannot_complete() {
        let repo = MemRepository::new();
        repo.create_attempt(&attempt("ref-2")).await.unwrap();
        repo.update_attempt("ref-2", AttemptStatus::Expired, None)
            .await
            .unwrap();
        let err = repo
            .update_attempt("ref-2", AttemptStatus::Completed, Some("sig"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let stored = repo.get_attempt_by_reference("ref-2").await.unwrap();
        assert_eq!(stored.status, AttemptStatus::Expired);
        assert_eq!(stored.tx_signature, None);
    }
}
