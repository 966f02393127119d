//! Persistence for payments and attempts.
//!
//! The service talks to a [`PaymentRepository`] trait so the state machine
//! logic tests against the in-memory implementation, while production runs
//! on Postgres. Payment and attempt transition legality is enforced at the
//! SQL predicate level (conditional updates on the current status, per the
//! `allowed_from` tables), with the service layer adding its own gates on
//! top.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Error;
use crate::payments::{Attempt, AttemptStatus, Payment, PaymentStatus};

#[cfg(any(test, feature = "test-util"))]
pub mod mem;
pub mod pg;

pub use pg::PgRepository;

/// Storage operations of the payment core.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Persists a new payment. A duplicate external id is a conflict.
    async fn create_payment(&self, payment: &Payment) -> Result<Payment, Error>;

    /// Fetches a payment by id.
    async fn get_payment(&self, id: Uuid) -> Result<Payment, Error>;

    /// Fetches a payment by its merchant-scoped external id.
    async fn get_payment_by_external_id(&self, external_id: &str) -> Result<Payment, Error>;

    /// Moves a payment to `status` iff the stored status permits the
    /// transition. A same-status update is a no-op. Illegal transitions
    /// are a conflict.
    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), Error>;

    /// Expires every `new`/`pending` payment whose deadline passed.
    /// Returns the number of rows touched.
    async fn mark_payments_expired(&self) -> Result<u64, Error>;

    /// Persists a new attempt. A duplicate reference is a conflict.
    async fn create_attempt(&self, attempt: &Attempt) -> Result<Attempt, Error>;

    /// Fetches an attempt by its reference key.
    async fn get_attempt_by_reference(&self, reference: &str) -> Result<Attempt, Error>;

    /// Moves an attempt to `status` iff the stored status permits the
    /// transition, updating the signature alongside. A same-status update
    /// is a no-op. Illegal transitions are a conflict.
    async fn update_attempt(
        &self,
        reference: &str,
        status: AttemptStatus,
        signature: Option<&str>,
    ) -> Result<(), Error>;

    /// All attempts still `pending`.
    async fn pending_attempts(&self) -> Result<Vec<Attempt>, Error>;

    /// Expires every pending attempt whose parent payment's deadline
    /// passed. Returns the number of rows touched.
    async fn mark_attempts_expired(&self) -> Result<u64, Error>;
}
