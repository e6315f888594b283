//! Chained Lane Scheduling
//!
//! Keeps a fixed number of worker lanes pulling from the task queue forever.
//!
//! ## How a lane stays alive
//! A lane is a `LaneContinuation` wrapped around one `WorkUnit`. The unit is
//! submitted to the shared `LaneExecutor`; when it completes, the continuation
//! inspects the result and submits the unit again, naming itself as the
//! completion callback. Each hop is a new task on the pool, never a nested
//! call, so the stack stays flat no matter how long the lane runs.
//!
//! ## Submodules
//! - **`types`**: `WorkUnit`, its outcome and the fatal/recoverable failure split.
//! - **`executor`**: the pool abstraction and its tokio implementation.
//! - **`continuation`**: the per-lane state machine.
//! - **`lanes`**: the `LaneScheduler` that owns all lanes of the node.
//! - **`factory`**: mints worker identities and builds units for them.

pub mod continuation;
pub mod executor;
pub mod factory;
pub mod lanes;
pub mod types;

#[cfg(test)]
mod tests;
