//! Lane Execution Facility
//!
//! The shared pool on which every lane runs. It offers immediate and delayed
//! submission of a `WorkUnit`, and hands the result to a completion callback
//! once the unit finishes.
//!
//! Each submission is a fresh tokio task, so a callback that resubmits its own
//! lane never grows the stack, however long the lane lives.

use super::types::{FatalFault, WorkFailure, WorkResult, WorkUnit};

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Receives the result of a submitted work unit.
pub trait ExecutionCallback: Send + Sync + 'static {
    fn on_complete(self: Arc<Self>, result: WorkResult);
}

/// A pool that can run work units now or after a delay.
pub trait LaneExecutor: Send + Sync + 'static {
    fn submit(
        &self,
        unit: Arc<dyn WorkUnit>,
        callback: Arc<dyn ExecutionCallback>,
    ) -> ScheduledExecution;

    fn schedule(
        &self,
        unit: Arc<dyn WorkUnit>,
        delay: Duration,
        callback: Arc<dyn ExecutionCallback>,
    ) -> ScheduledExecution;
}

/// Handle to one submitted execution.
///
/// Moves `Pending -> Running -> Done`, or `Pending -> Cancelled`. Cancelling
/// never interrupts a unit that already started.
#[derive(Debug, Clone)]
pub struct ScheduledExecution {
    state: Arc<AtomicU8>,
    cancelled: Arc<Notify>,
}

impl ScheduledExecution {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
            cancelled: Arc::new(Notify::new()),
        }
    }

    /// Claims the execution for running. False if it was cancelled first.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.state.store(DONE, Ordering::Release);
    }

    /// Prevents a pending execution from starting.
    ///
    /// Returns true only when this call did the cancelling; cancelling a
    /// running, finished or already cancelled execution is a no-op.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.cancelled.notify_waiters();
        }
        cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Finished or cancelled.
    pub fn is_done(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), DONE | CANCELLED)
    }

    async fn wait_cancelled(&self) {
        let notified = self.cancelled.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ScheduledExecution {
    fn default() -> Self {
        Self::new()
    }
}

/// `LaneExecutor` backed by a tokio runtime.
#[derive(Clone)]
pub struct ProcessingExecutor {
    runtime: Handle,
}

impl ProcessingExecutor {
    /// Uses the runtime the caller is running on.
    ///
    /// Panics outside of a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self {
            runtime: Handle::current(),
        }
    }

    fn spawn(
        &self,
        unit: Arc<dyn WorkUnit>,
        delay: Option<Duration>,
        callback: Arc<dyn ExecutionCallback>,
    ) -> ScheduledExecution {
        let execution = ScheduledExecution::new();
        let handle = execution.clone();
        let runtime = self.runtime.clone();

        self.runtime.spawn(async move {
            if let Some(delay) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = handle.wait_cancelled() => {}
                }
            }

            if !handle.begin() {
                tracing::trace!("Execution of {} cancelled before start", unit.uuid());
                return;
            }

            // Run on its own task so a panic surfaces as a JoinError
            let worker = unit.clone();
            let result = match runtime.spawn(async move { worker.run().await }).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(WorkFailure::Fatal(FatalFault::Panicked(
                    panic_message(e.into_panic()),
                ))),
                Err(e) => Err(WorkFailure::Recoverable(anyhow::anyhow!(e))),
            };

            handle.finish();
            callback.on_complete(result);
        });

        execution
    }
}

impl LaneExecutor for ProcessingExecutor {
    fn submit(
        &self,
        unit: Arc<dyn WorkUnit>,
        callback: Arc<dyn ExecutionCallback>,
    ) -> ScheduledExecution {
        self.spawn(unit, None, callback)
    }

    fn schedule(
        &self,
        unit: Arc<dyn WorkUnit>,
        delay: Duration,
        callback: Arc<dyn ExecutionCallback>,
    ) -> ScheduledExecution {
        self.spawn(unit, Some(delay), callback)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
