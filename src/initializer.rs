//! Queue Initializer
//!
//! Cleans up the queue, then starts the lanes and publishes their identities.
//! Running the cleanup first keeps every lane from peeking at the queue before
//! it is ready.

use crate::registry::WorkerRegistry;
use crate::scheduler::lanes::LaneScheduler;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Startup housekeeping on the task queue (e.g. releasing tasks a crashed
/// process left in progress).
#[async_trait]
pub trait QueueCleaner: Send + Sync {
    async fn clean(&self) -> Result<()>;
}

pub struct QueueInitializer {
    cleaner: Arc<dyn QueueCleaner>,
    scheduler: Arc<LaneScheduler>,
    registry: Arc<dyn WorkerRegistry>,
    done: AtomicBool,
}

impl QueueInitializer {
    pub fn new(
        cleaner: Arc<dyn QueueCleaner>,
        scheduler: Arc<LaneScheduler>,
        registry: Arc<dyn WorkerRegistry>,
    ) -> Self {
        Self {
            cleaner,
            scheduler,
            registry,
            done: AtomicBool::new(false),
        }
    }

    /// Runs once per process; later calls return immediately.
    ///
    /// A cleanup failure is returned and leaves the lanes unscheduled.
    pub async fn on_server_start(&self) -> Result<()> {
        if self.done.swap(true, Ordering::AcqRel) {
            tracing::debug!("Queue already initialized");
            return Ok(());
        }

        if let Err(e) = self.cleaner.clean().await {
            tracing::error!("Queue cleanup failed, lanes not started: {}", e);
            return Err(e);
        }

        self.scheduler.start_scheduling();
        self.registry.broadcast_worker_uuids();
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}
