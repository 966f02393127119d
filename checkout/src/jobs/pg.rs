//! Postgres-backed queue: `FOR UPDATE SKIP LOCKED` claims, exponential
//! backoff on retryable failures, dead-lettering for everything else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{EnqueueOptions, Job, JobHandler, JobQueue, Task};
use crate::error::Error;

/// Producer over the `jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    /// Wraps a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, task: Task, options: EnqueueOptions) -> Result<(), Error> {
        let deadline = Utc::now()
            + chrono::Duration::from_std(options.deadline)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        // A live duplicate trips the partial unique index on dedup_key and
        // is dropped.
        sqlx::query(
            "INSERT INTO jobs (id, kind, payload, queue, dedup_key, run_at, deadline, attempts, max_retry, status) \
             VALUES ($1, $2, $3, $4, $5, now(), $6, 0, $7, 'queued') \
             ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&task.kind)
        .bind(&task.payload)
        .bind(&options.queue)
        .bind(&options.dedup_key)
        .bind(deadline)
        .bind(options.max_retry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    payload: serde_json::Value,
    attempts: i32,
    max_retry: i32,
    deadline: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            payload: row.payload,
            attempts: row.attempts,
            max_retry: row.max_retry,
            deadline: row.deadline,
        }
    }
}

/// Consumer pool: claims jobs and routes them to registered handlers.
pub struct JobServer {
    pool: PgPool,
    queue_name: String,
    concurrency: usize,
    poll_interval: Duration,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for JobServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobServer")
            .field("queue_name", &self.queue_name)
            .field("concurrency", &self.concurrency)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl JobServer {
    /// Creates a server for one queue with the default worker pool of 10.
    #[must_use]
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
            concurrency: 10,
            poll_interval: Duration::from_millis(500),
            handlers: HashMap::new(),
        }
    }

    /// Overrides the worker pool size.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Registers a handler for its task kind.
    #[must_use]
    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Runs the worker pool until `cancel` fires; in-flight jobs finish.
    pub async fn run(self, cancel: CancellationToken) {
        let handlers = Arc::new(self.handlers);
        let mut workers = tokio::task::JoinSet::new();
        for worker in 0..self.concurrency {
            let pool = self.pool.clone();
            let queue_name = self.queue_name.clone();
            let handlers = Arc::clone(&handlers);
            let cancel = cancel.clone();
            let poll_interval = self.poll_interval;
            workers.spawn(async move {
                worker_loop(worker, pool, queue_name, handlers, poll_interval, cancel).await;
            });
        }
        while workers.join_next().await.is_some() {}
        tracing::info!(queue = %self.queue_name, "job server stopped");
    }
}

async fn worker_loop(
    worker: usize,
    pool: PgPool,
    queue_name: String,
    handlers: Arc<HashMap<&'static str, Arc<dyn JobHandler>>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match claim(&pool, &queue_name).await {
            Ok(Some(job)) => {
                process(&pool, &handlers, job).await;
            }
            Ok(None) => {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(err) => {
                tracing::error!(worker, error = %err, "job claim failed");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}

async fn claim(pool: &PgPool, queue_name: &str) -> Result<Option<Job>, Error> {
    let row: Option<JobRow> = sqlx::query_as(
        "UPDATE jobs SET status = 'running', attempts = attempts + 1, started_at = now() \
         WHERE id = (\
             SELECT id FROM jobs \
             WHERE queue = $1 AND status = 'queued' AND run_at <= now() \
             ORDER BY run_at \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED) \
         RETURNING id, kind, payload, attempts, max_retry, deadline",
    )
    .bind(queue_name)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

async fn process(
    pool: &PgPool,
    handlers: &HashMap<&'static str, Arc<dyn JobHandler>>,
    job: Job,
) {
    let Some(handler) = handlers.get(job.kind.as_str()) else {
        tracing::error!(kind = %job.kind, "no handler registered");
        if let Err(err) = bury(pool, job.id, "no handler registered").await {
            tracing::error!(id = %job.id, error = %err, "failed to bury job");
        }
        return;
    };

    let remaining = (job.deadline - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        if let Err(err) = bury(pool, job.id, "deadline exceeded before start").await {
            tracing::error!(id = %job.id, error = %err, "failed to bury job");
        }
        return;
    }

    let id = job.id;
    let attempts = job.attempts;
    let max_retry = job.max_retry;
    let kind = job.kind.clone();
    // Grace on top of the task deadline: handlers are expected to honor
    // the deadline themselves.
    let budget = remaining + Duration::from_secs(5);
    let outcome = tokio::time::timeout(budget, handler.handle(job)).await;
    let result = match outcome {
        Ok(Ok(())) => {
            if let Err(err) = complete(pool, id).await {
                tracing::error!(%id, error = %err, "failed to complete job");
            }
            return;
        }
        Ok(Err(err)) => err,
        Err(_) => Error::Fatal("handler exceeded the task deadline".into()),
    };

    if result.is_retryable() && attempts <= max_retry {
        let backoff = Duration::from_secs(1u64 << u32::try_from(attempts.clamp(0, 6)).unwrap_or(0));
        tracing::warn!(%id, %kind, attempts, error = %result, "job failed, retrying");
        if let Err(err) = retry_later(pool, id, backoff, &result.to_string()).await {
            tracing::error!(%id, error = %err, "failed to requeue job");
        }
    } else {
        tracing::error!(%id, %kind, attempts, error = %result, "job failed terminally");
        if let Err(err) = bury(pool, id, &result.to_string()).await {
            tracing::error!(%id, error = %err, "failed to bury job");
        }
    }
}

async fn complete(pool: &PgPool, id: Uuid) -> Result<(), Error> {
    sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn retry_later(
    pool: &PgPool,
    id: Uuid,
    backoff: Duration,
    last_error: &str,
) -> Result<(), Error> {
    let run_at = Utc::now()
        + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::seconds(1));
    sqlx::query(
        "UPDATE jobs SET status = 'queued', run_at = $2, last_error = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(run_at)
    .bind(last_error)
    .execute(pool)
    .await?;
    Ok(())
}

async fn bury(pool: &PgPool, id: Uuid, last_error: &str) -> Result<(), Error> {
    sqlx::query("UPDATE jobs SET status = 'dead', last_error = $2 WHERE id = $1")
        .bind(id)
        .bind(last_error)
        .execute(pool)
        .await?;
    Ok(())
}
