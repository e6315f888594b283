use crate::scheduler::types::WorkerId;
use serde::{Deserialize, Serialize};

/// Unique identifier for a task in the local queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a queued task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskStatus {
    /// Waiting for a worker.
    Pending,
    /// Claimed by the worker in `TaskEntry::assigned_to`.
    InProgress,
    Completed,
    /// The handler returned an error.
    Failed { error: String },
}

/// The definition of a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// The name of the registered handler to invoke (e.g., "sleep").
    pub handler: String,
    /// Arbitrary JSON payload passed to the handler function.
    pub payload: serde_json::Value,
}

/// A task together with its queue bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub task: Task,
    pub status: TaskStatus,
    /// Worker currently processing this task (if InProgress).
    pub assigned_to: Option<WorkerId>,
    /// Submission order, used for FIFO claiming.
    pub sequence: u64,
    /// Timestamp (ms) when the task was submitted.
    pub created_at: u64,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
