//! Queue Worker
//!
//! The `WorkUnit` every lane runs: claim one task from the local queue, run
//! its handler, record the result.
//!
//! A failing task is a normal event. It is recorded as `Failed` and the worker
//! still reports `MoreWorkLikely`, so the lane moves on to the next task right
//! away. Only a handler error carrying a `FatalFault` escalates to the lane.

use super::queue::LocalQueue;
use super::registry::TaskHandlerRegistry;
use crate::scheduler::types::{
    FatalFault, WorkFailure, WorkOutcome, WorkResult, WorkUnit, WorkerId,
};

use async_trait::async_trait;
use std::sync::Arc;

pub struct QueueWorker {
    uuid: WorkerId,
    queue: Arc<LocalQueue>,
    handlers: Arc<TaskHandlerRegistry>,
}

impl QueueWorker {
    pub fn new(uuid: WorkerId, queue: Arc<LocalQueue>, handlers: Arc<TaskHandlerRegistry>) -> Self {
        Self {
            uuid,
            queue,
            handlers,
        }
    }
}

#[async_trait]
impl WorkUnit for QueueWorker {
    fn uuid(&self) -> &WorkerId {
        &self.uuid
    }

    async fn run(&self) -> WorkResult {
        let Some((task_id, task)) = self.queue.peek(&self.uuid).await else {
            return Ok(WorkOutcome::NoMoreWorkNow);
        };

        tracing::info!(
            "Worker {} executing task {} (handler: {})",
            self.uuid,
            task_id.0,
            task.handler
        );

        let result = self.handlers.execute(&task).await;
        let fatal = result
            .as_ref()
            .err()
            .and_then(|e| e.downcast_ref::<FatalFault>())
            .cloned();

        match &result {
            Ok(()) => tracing::info!("Worker {} executed task {}", self.uuid, task_id.0),
            Err(e) => tracing::warn!("Worker {} failed to execute task {}: {}", self.uuid, task_id.0, e),
        }

        if let Err(e) = self.queue.complete(&task_id, &result) {
            return Err(WorkFailure::Recoverable(e));
        }

        match fatal {
            Some(fault) => Err(WorkFailure::Fatal(fault)),
            None => Ok(WorkOutcome::MoreWorkLikely),
        }
    }
}
