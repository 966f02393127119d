//! Queue handler delivering webhook tasks.

use async_trait::async_trait;

use super::WebhookService;
use crate::error::Error;
use crate::jobs::{FireWebhookTask, Job, JobHandler, TASK_FIRE_WEBHOOK};

/// Handles [`TASK_FIRE_WEBHOOK`]: one delivery per event occurrence,
/// retried by the queue on transport failure.
pub struct FireWebhookHandler {
    service: WebhookService,
}

impl FireWebhookHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(service: WebhookService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for FireWebhookHandler {
    fn kind(&self) -> &'static str {
        TASK_FIRE_WEBHOOK
    }

    async fn handle(&self, job: Job) -> Result<(), Error> {
        let task: FireWebhookTask = job.parse()?;
        self.service
            .fire_event(&task.event, task.event_id, &task.payload)
            .await
    }
}
