//! Queue Worker Module
//!
//! The work lanes execute: a small in-process task queue, the registry of
//! task handlers, and the `QueueWorker` unit tying them together.
//!
//! ## Submodules
//! - **`types`**: task, status and queue entry definitions.
//! - **`queue`**: FIFO `LocalQueue` with claiming, plus its startup cleaner.
//! - **`registry`**: maps handler names to async closures.
//! - **`worker`**: the `WorkUnit` implementation run by each lane.

pub mod queue;
pub mod registry;
pub mod types;
pub mod worker;
