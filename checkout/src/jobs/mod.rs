//! Durable background jobs: a Postgres-backed queue with typed handlers,
//! retry with backoff, per-task deadlines, dedup keys, and a periodic
//! scheduler for the sweep tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::events::EventPayload;

#[cfg(any(test, feature = "test-util"))]
pub mod mem;
pub mod pg;
pub mod scheduler;

pub use pg::{JobServer, PgJobQueue};
pub use scheduler::Scheduler;

/// Reconcile one attempt by its reference key.
pub const TASK_RECONCILE_BY_REFERENCE: &str = "payments:reconcile_by_reference";
/// Expire overdue payments in bulk.
pub const TASK_SWEEP_PAYMENTS: &str = "payments:sweep_payments";
/// Expire overdue attempts in bulk.
pub const TASK_SWEEP_ATTEMPTS: &str = "payments:sweep_attempts";
/// Re-enqueue a reconcile for every pending attempt.
pub const TASK_SWEEP_PENDING: &str = "payments:sweep_pending";
/// Deliver one event to the merchant webhook.
pub const TASK_FIRE_WEBHOOK: &str = "webhook:fire_event";

/// Payload of a [`TASK_RECONCILE_BY_REFERENCE`] task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceTask {
    /// The attempt's reference key.
    pub reference: String,
}

/// Payload of a [`TASK_FIRE_WEBHOOK`] task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireWebhookTask {
    /// Wire name of the event.
    pub event: String,
    /// Unique id of this event occurrence.
    pub event_id: Uuid,
    /// The event payload as delivered to the merchant.
    pub payload: serde_json::Value,
}

/// A task to enqueue.
#[derive(Debug, Clone)]
pub struct Task {
    /// Handler routing key.
    pub kind: String,
    /// JSON payload handed to the handler.
    pub payload: serde_json::Value,
}

/// Queue placement options for a task.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Queue the task lands in.
    pub queue: String,
    /// How long the task stays valid once enqueued.
    pub deadline: Duration,
    /// Retry budget for retryable failures.
    pub max_retry: i32,
    /// Collapses duplicate enqueues while a task with the same key is
    /// still live.
    pub dedup_key: Option<String>,
}

/// A claimed job as handed to its handler.
#[derive(Debug, Clone)]
pub struct Job {
    /// Storage identity.
    pub id: Uuid,
    /// Handler routing key.
    pub kind: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// How many times this job has been claimed, this run included.
    pub attempts: i32,
    /// Retry budget.
    pub max_retry: i32,
    /// Completion deadline.
    pub deadline: DateTime<Utc>,
}

impl Job {
    /// Deserializes the payload into a typed task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] when the stored payload does not match the
    /// expected shape; such a job is never retried.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::Fatal(format!("malformed {} payload: {e}", self.kind)))
    }
}

/// Producer side of the queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a task. A live duplicate (same dedup key) is dropped
    /// silently.
    async fn enqueue(&self, task: Task, options: EnqueueOptions) -> Result<(), Error>;
}

/// Typed consumer of one task kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The task kind this handler owns.
    fn kind(&self) -> &'static str;

    /// Processes one claimed job.
    async fn handle(&self, job: Job) -> Result<(), Error>;
}

/// Convenience producer carrying the queue defaults.
///
/// Defaults mirror the service configuration: queue `default`, task
/// deadline one minute, three retries.
pub struct Enqueuer {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    task_deadline: Duration,
    max_retry: i32,
}

impl std::fmt::Debug for Enqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enqueuer")
            .field("queue_name", &self.queue_name)
            .field("task_deadline", &self.task_deadline)
            .field("max_retry", &self.max_retry)
            .finish_non_exhaustive()
    }
}

impl Enqueuer {
    /// Creates an enqueuer with the default placement options.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            queue_name: "default".into(),
            task_deadline: Duration::from_secs(60),
            max_retry: 3,
        }
    }

    /// Overrides the queue name.
    #[must_use]
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Overrides the task deadline.
    #[must_use]
    pub const fn with_task_deadline(mut self, deadline: Duration) -> Self {
        self.task_deadline = deadline;
        self
    }

    /// Overrides the retry budget.
    #[must_use]
    pub const fn with_max_retry(mut self, max_retry: i32) -> Self {
        self.max_retry = max_retry;
        self
    }

    fn options(&self, dedup_key: Option<String>) -> EnqueueOptions {
        EnqueueOptions {
            queue: self.queue_name.clone(),
            deadline: self.task_deadline,
            max_retry: self.max_retry,
            dedup_key,
        }
    }

    /// Enqueues a reconcile for a reference key. Duplicate reconciles for
    /// the same reference collapse while one is live.
    ///
    /// # Errors
    ///
    /// Propagates queue storage failures.
    pub async fn reconcile_by_reference(&self, reference: &str) -> Result<(), Error> {
        let payload = serde_json::to_value(ReferenceTask {
            reference: reference.to_owned(),
        })
        .map_err(|e| Error::Fatal(e.to_string()))?;
        self.queue
            .enqueue(
                Task {
                    kind: TASK_RECONCILE_BY_REFERENCE.into(),
                    payload,
                },
                self.options(Some(format!("{TASK_RECONCILE_BY_REFERENCE}:{reference}"))),
            )
            .await
    }

    /// Enqueues a webhook delivery for an event occurrence.
    ///
    /// # Errors
    ///
    /// Propagates queue storage failures.
    pub async fn fire_webhook(&self, event: &str, payload: &EventPayload) -> Result<(), Error> {
        let payload = serde_json::to_value(FireWebhookTask {
            event: event.to_owned(),
            event_id: Uuid::new_v4(),
            payload: serde_json::to_value(payload).map_err(|e| Error::Fatal(e.to_string()))?,
        })
        .map_err(|e| Error::Fatal(e.to_string()))?;
        self.queue
            .enqueue(
                Task {
                    kind: TASK_FIRE_WEBHOOK.into(),
                    payload,
                },
                self.options(None),
            )
            .await
    }

    /// Enqueues a named parameterless sweep, deduplicated on its kind.
    ///
    /// # Errors
    ///
    /// Propagates queue storage failures.
    pub async fn sweep(&self, kind: &str) -> Result<(), Error> {
        self.queue
            .enqueue(
                Task {
                    kind: kind.to_owned(),
                    payload: serde_json::Value::Null,
                },
                self.options(Some(kind.to_owned())),
            )
            .await
    }
}
