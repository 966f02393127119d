//! In-memory queue double recording enqueues and honoring dedup keys.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{EnqueueOptions, JobQueue, Task};
use crate::error::Error;

/// In-memory [`JobQueue`] for tests.
#[derive(Debug, Default)]
pub struct MemJobQueue {
    tasks: Mutex<Vec<Task>>,
    live_dedup_keys: Mutex<HashSet<String>>,
}

impl MemJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything enqueued so far, dropped duplicates excluded.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().expect("poisoned").clone()
    }

    /// Tasks of one kind.
    #[must_use]
    pub fn tasks_of_kind(&self, kind: &str) -> Vec<Task> {
        self.tasks()
            .into_iter()
            .filter(|task| task.kind == kind)
            .collect()
    }

    /// Releases a dedup key, as completing the job would.
    pub fn release(&self, dedup_key: &str) {
        self.live_dedup_keys
            .lock()
            .expect("poisoned")
            .remove(dedup_key);
    }
}

#[async_trait]
impl JobQueue for MemJobQueue {
    async fn enqueue(&self, task: Task, options: EnqueueOptions) -> Result<(), Error> {
        if let Some(key) = options.dedup_key {
            let mut live = self.live_dedup_keys.lock().expect("poisoned");
            if !live.insert(key) {
                return Ok(());
            }
        }
        self.tasks.lock().expect("poisoned").push(task);
        Ok(())
    }
}
