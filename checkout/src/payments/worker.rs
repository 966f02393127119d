//! Background task handlers: reconciliation of attempts against the
//! ledger, plus the periodic sweeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use checkout_svm::LedgerClient;
use chrono::Utc;
use solana_pubkey::Pubkey;

use super::{mints, AttemptStatus, PaymentService};
use crate::error::Error;
use crate::jobs::{
    Enqueuer, Job, JobHandler, ReferenceTask, TASK_RECONCILE_BY_REFERENCE, TASK_SWEEP_ATTEMPTS,
    TASK_SWEEP_PAYMENTS, TASK_SWEEP_PENDING,
};

/// Upper bound a single reconcile run spends polling.
const RECONCILE_DEADLINE: Duration = Duration::from_secs(120);
/// Poll cadence within a reconcile run.
const RECONCILE_TICK: Duration = Duration::from_secs(3);

/// Handles [`TASK_RECONCILE_BY_REFERENCE`]: polls the ledger for a
/// transaction carrying the reference until the attempt resolves or the
/// deadline passes.
///
/// The handler always returns success on deadline — the pending sweep
/// re-enqueues and the attempt sweep eventually expires the attempt;
/// retrying here would only block the queue.
pub struct ReconcileHandler {
    service: Arc<dyn PaymentService>,
    ledger: Arc<dyn LedgerClient>,
    deadline: Duration,
    tick: Duration,
}

impl std::fmt::Debug for ReconcileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileHandler").finish_non_exhaustive()
    }
}

impl ReconcileHandler {
    /// Creates the handler with the default 2 minute deadline and
    /// 3 second tick.
    #[must_use]
    pub fn new(service: Arc<dyn PaymentService>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            service,
            ledger,
            deadline: RECONCILE_DEADLINE,
            tick: RECONCILE_TICK,
        }
    }

    /// Overrides the poll timing (tests).
    #[must_use]
    pub const fn with_timing(mut self, deadline: Duration, tick: Duration) -> Self {
        self.deadline = deadline;
        self.tick = tick;
        self
    }

    /// One poll round: re-read the attempt, scan the ledger, settle on a
    /// validated match. `Ok(true)` means the task is done.
    async fn poll_once(&self, reference: &str) -> Result<bool, Error> {
        let Ok(attempt) = self.service.get_attempt_by_reference(reference).await else {
            return Ok(false);
        };
        if attempt.status != AttemptStatus::Pending {
            return Ok(true);
        }

        let reference_key: Pubkey = reference
            .parse()
            .map_err(|_| Error::Fatal(format!("stored reference {reference} is not an address")))?;
        let destination: Pubkey = attempt.destination_wallet.parse().map_err(|_| {
            Error::Fatal(format!(
                "stored destination {} is not an address",
                attempt.destination_wallet
            ))
        })?;
        let mint = if mints::is_sol(&attempt.destination_mint) {
            None
        } else {
            Some(attempt.destination_mint.parse::<Pubkey>().map_err(|_| {
                Error::Fatal(format!(
                    "stored mint {} is not an address",
                    attempt.destination_mint
                ))
            })?)
        };

        match self
            .ledger
            .validate_transfer_by_reference(
                &reference_key,
                &destination,
                attempt.total_amount,
                mint.as_ref(),
            )
            .await
        {
            Ok(signature) => {
                match self
                    .service
                    .update_attempt(
                        reference,
                        AttemptStatus::Completed,
                        Some(signature.to_string()),
                    )
                    .await
                {
                    // a concurrent reconcile settled the attempt first
                    Ok(()) | Err(Error::Conflict(_)) => Ok(true),
                    Err(err) => Err(err),
                }
            }
            // Nothing confirmed yet, or a non-matching transaction: the
            // buyer may still submit a matching one, keep polling.
            Err(err) => {
                tracing::debug!(reference, error = %err, "reconcile poll without a match");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl JobHandler for ReconcileHandler {
    fn kind(&self) -> &'static str {
        TASK_RECONCILE_BY_REFERENCE
    }

    async fn handle(&self, job: Job) -> Result<(), Error> {
        let task: ReferenceTask = job.parse()?;
        let job_remaining = (job.deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let budget = self.deadline.min(job_remaining.max(self.tick));

        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        let poll = async {
            loop {
                tick.tick().await;
                match self.poll_once(&task.reference).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    Err(err) => return Err(err),
                }
            }
        };
        match tokio::time::timeout(budget, poll).await {
            Ok(result) => result,
            // Deadline: the sweeps own the attempt from here.
            Err(_) => Ok(()),
        }
    }
}

/// Handles [`TASK_SWEEP_PAYMENTS`].
pub struct SweepPaymentsHandler {
    service: Arc<dyn PaymentService>,
}

impl SweepPaymentsHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(service: Arc<dyn PaymentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for SweepPaymentsHandler {
    fn kind(&self) -> &'static str {
        TASK_SWEEP_PAYMENTS
    }

    async fn handle(&self, _job: Job) -> Result<(), Error> {
        self.service.mark_payments_expired().await
    }
}

/// Handles [`TASK_SWEEP_ATTEMPTS`].
pub struct SweepAttemptsHandler {
    service: Arc<dyn PaymentService>,
}

impl SweepAttemptsHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(service: Arc<dyn PaymentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for SweepAttemptsHandler {
    fn kind(&self) -> &'static str {
        TASK_SWEEP_ATTEMPTS
    }

    async fn handle(&self, _job: Job) -> Result<(), Error> {
        self.service.mark_attempts_expired().await
    }
}

/// Handles [`TASK_SWEEP_PENDING`]: re-enqueues a reconcile per pending
/// attempt. Dedup drops the ones already being reconciled.
pub struct SweepPendingHandler {
    service: Arc<dyn PaymentService>,
    enqueuer: Arc<Enqueuer>,
}

impl SweepPendingHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(service: Arc<dyn PaymentService>, enqueuer: Arc<Enqueuer>) -> Self {
        Self { service, enqueuer }
    }
}

#[async_trait]
impl JobHandler for SweepPendingHandler {
    fn kind(&self) -> &'static str {
        TASK_SWEEP_PENDING
    }

    async fn handle(&self, _job: Job) -> Result<(), Error> {
        for attempt in self.service.pending_attempts().await? {
            self.enqueuer
                .reconcile_by_reference(&attempt.reference)
                .await?;
        }
        Ok(())
    }
}
