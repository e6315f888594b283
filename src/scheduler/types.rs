use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque identity of one worker lane.
///
/// Minted once per lane from a random UUID v4 and never reused within the
/// lifetime of the process. These are the values published cluster-wide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a successful run of a work unit says about the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// A task was processed; the queue probably holds more.
    MoreWorkLikely,
    /// The queue was empty.
    NoMoreWorkNow,
}

/// Environment-level faults that stop the lane they happen on.
///
/// This is the complete set; anything else is a recoverable failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FatalFault {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("work unit panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum WorkFailure {
    /// Ordinary task failure. The lane keeps going without delay.
    #[error("recoverable failure: {0}")]
    Recoverable(#[source] anyhow::Error),

    /// The lane stops and is not resubmitted.
    #[error("fatal failure: {0}")]
    Fatal(#[source] FatalFault),
}

impl WorkFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkFailure::Fatal(_))
    }
}

pub type WorkResult = Result<WorkOutcome, WorkFailure>;

/// One execution of claim-and-run logic against the task queue.
///
/// Implementations are invoked repeatedly by their lane, never concurrently
/// with themselves.
#[async_trait]
pub trait WorkUnit: Send + Sync + 'static {
    /// Identity of the lane this unit runs on.
    fn uuid(&self) -> &WorkerId;

    async fn run(&self) -> WorkResult;
}
