//! Lane Continuation
//!
//! Keeps a single lane alive. After every execution of the lane's work unit,
//! the continuation decides what happens next and resubmits the unit with
//! itself attached as the completion callback:
//!
//! | Result                       | Next step                    |
//! |------------------------------|------------------------------|
//! | `MoreWorkLikely`             | resubmit immediately         |
//! | `NoMoreWorkNow`              | resubmit after the poll delay |
//! | `Recoverable` failure        | resubmit immediately         |
//! | `Fatal` failure              | stop the lane                |
//!
//! Only one execution per lane is ever in flight, so the decision logic never
//! races with its own lane's work unit. The only concurrent party is `stop()`.
//!
//! No lock is held while submitting: an executor may complete the run inline,
//! re-entering the continuation before `submit` returns.

use super::executor::{ExecutionCallback, LaneExecutor, ScheduledExecution};
use super::types::{WorkFailure, WorkOutcome, WorkResult, WorkUnit, WorkerId};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct LaneContinuation {
    worker: Arc<dyn WorkUnit>,
    executor: Arc<dyn LaneExecutor>,
    delay: Duration,
    keep_running: AtomicBool,
    submissions: AtomicU64,
    /// The latest scheduled or executing run of this lane, tagged with its
    /// submission number.
    pending: Mutex<Option<(u64, ScheduledExecution)>>,
}

impl LaneContinuation {
    pub fn new(
        worker: Arc<dyn WorkUnit>,
        executor: Arc<dyn LaneExecutor>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker,
            executor,
            delay,
            keep_running: AtomicBool::new(true),
            submissions: AtomicU64::new(0),
            pending: Mutex::new(None),
        })
    }

    pub fn uuid(&self) -> &WorkerId {
        self.worker.uuid()
    }

    pub fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }

    /// Handle of the latest submission made for this lane.
    pub fn pending_execution(&self) -> Option<ScheduledExecution> {
        self.pending_slot()
            .as_ref()
            .map(|(_, execution)| execution.clone())
    }

    /// Schedules the first run of the lane after the poll delay.
    pub fn start(self: &Arc<Self>) {
        tracing::debug!("Starting lane {}", self.uuid());
        self.chain_with_delay();
    }

    /// Stops the lane: nothing is resubmitted from now on, and a run that has
    /// not started yet is cancelled. A run already executing finishes.
    pub fn stop(&self) {
        self.keep_running.store(false, Ordering::Release);
        if let Some((_, execution)) = self.pending_slot().as_ref()
            && execution.cancel()
        {
            tracing::debug!("Cancelled pending execution of lane {}", self.uuid());
        }
    }

    fn on_success(self: Arc<Self>, outcome: WorkOutcome) {
        match outcome {
            WorkOutcome::MoreWorkLikely => self.chain_without_delay(),
            WorkOutcome::NoMoreWorkNow => self.chain_with_delay(),
        }
    }

    fn on_failure(self: Arc<Self>, failure: WorkFailure) {
        match failure {
            WorkFailure::Fatal(fault) => {
                self.keep_running.store(false, Ordering::Release);
                tracing::error!(
                    "Worker {} execution failed: {}. Scheduled processing interrupted.",
                    self.uuid(),
                    fault
                );
            }
            WorkFailure::Recoverable(e) => {
                tracing::warn!("Worker {} execution failed: {}", self.uuid(), e);
                self.chain_without_delay();
            }
        }
    }

    fn chain_without_delay(self: &Arc<Self>) {
        self.chain(None);
    }

    fn chain_with_delay(self: &Arc<Self>) {
        self.chain(Some(self.delay));
    }

    fn chain(self: &Arc<Self>, delay: Option<Duration>) {
        if !self.is_running() {
            return;
        }

        let submission = self.submissions.fetch_add(1, Ordering::AcqRel) + 1;
        let callback: Arc<dyn ExecutionCallback> = self.clone();
        let execution = match delay {
            None => self.executor.submit(self.worker.clone(), callback),
            Some(delay) => self
                .executor
                .schedule(self.worker.clone(), delay, callback),
        };

        {
            // An inline completion may already have stored a later submission.
            let mut pending = self.pending_slot();
            if pending
                .as_ref()
                .is_none_or(|(latest, _)| *latest < submission)
            {
                *pending = Some((submission, execution.clone()));
            }
        }

        // A stop() that took the slot before the store above missed this handle.
        if !self.is_running() && execution.cancel() {
            tracing::debug!("Cancelled pending execution of lane {}", self.uuid());
        }
    }

    fn pending_slot(&self) -> MutexGuard<'_, Option<(u64, ScheduledExecution)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExecutionCallback for LaneContinuation {
    fn on_complete(self: Arc<Self>, result: WorkResult) {
        match result {
            Ok(outcome) => self.on_success(outcome),
            Err(failure) => self.on_failure(failure),
        }
    }
}
