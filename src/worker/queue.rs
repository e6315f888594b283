//! Local Task Queue
//!
//! In-process FIFO queue the reference workers pull from. A worker claims the
//! oldest pending task, which moves it to `InProgress` under that worker's id
//! until it is completed or failed.

use super::types::*;
use crate::initializer::QueueCleaner;
use crate::scheduler::types::WorkerId;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub struct LocalQueue {
    tasks: DashMap<TaskId, TaskEntry>,
    next_sequence: AtomicU64,
    /// Serializes claims so two lanes never take the same task.
    claim_lock: Mutex<()>,
}

impl LocalQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submit(&self, task: Task) -> TaskId {
        let task_id = TaskId::new();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);

        tracing::debug!("Queued task {} (handler: {})", task_id.0, task.handler);
        self.tasks.insert(
            task_id.clone(),
            TaskEntry {
                task,
                status: TaskStatus::Pending,
                assigned_to: None,
                sequence,
                created_at: now_ms(),
            },
        );

        task_id
    }

    /// Claims the oldest pending task for `worker`, if any.
    pub async fn peek(&self, worker: &WorkerId) -> Option<(TaskId, Task)> {
        let _guard = self.claim_lock.lock().await;

        let oldest = self
            .tasks
            .iter()
            .filter(|entry| entry.value().status == TaskStatus::Pending)
            .min_by_key(|entry| entry.value().sequence)
            .map(|entry| entry.key().clone())?;

        let mut entry = self.tasks.get_mut(&oldest)?;
        entry.status = TaskStatus::InProgress;
        entry.assigned_to = Some(worker.clone());

        Some((oldest, entry.task.clone()))
    }

    /// Records the result of an in-progress task.
    pub fn complete(&self, task_id: &TaskId, result: &Result<()>) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| anyhow!("Task not found: {}", task_id.0))?;

        if entry.status != TaskStatus::InProgress {
            return Err(anyhow!(
                "Task {} is not in progress ({:?})",
                task_id.0,
                entry.status
            ));
        }

        entry.status = match result {
            Ok(()) => TaskStatus::Completed,
            Err(e) => TaskStatus::Failed {
                error: e.to_string(),
            },
        };
        entry.assigned_to = None;
        Ok(())
    }

    /// Puts every in-progress task back to pending. Returns how many moved.
    pub fn reset_in_progress(&self) -> usize {
        let mut reset = 0;
        for mut entry in self.tasks.iter_mut() {
            if entry.status == TaskStatus::InProgress {
                entry.status = TaskStatus::Pending;
                entry.assigned_to = None;
                reset += 1;
            }
        }
        reset
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|entry| entry.status.clone())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<TaskEntry> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    pub fn pending_count(&self) -> usize {
        self.count(|status| *status == TaskStatus::Pending)
    }

    pub fn in_progress_count(&self) -> usize {
        self.count(|status| *status == TaskStatus::InProgress)
    }

    fn count(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.tasks
            .iter()
            .filter(|entry| predicate(&entry.value().status))
            .count()
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self {
            tasks: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            claim_lock: Mutex::new(()),
        }
    }
}

/// Recovers tasks left in progress by a previous run of the process.
pub struct LocalQueueCleaner {
    queue: Arc<LocalQueue>,
}

impl LocalQueueCleaner {
    pub fn new(queue: Arc<LocalQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl QueueCleaner for LocalQueueCleaner {
    async fn clean(&self) -> Result<()> {
        let reset = self.queue.reset_in_progress();
        if reset > 0 {
            tracing::info!("Reset {} in-progress task(s) to pending", reset);
        }
        Ok(())
    }
}
