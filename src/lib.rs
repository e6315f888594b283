//! Worker Lane Engine Library
//!
//! Background task processing for a shared, possibly clustered, work queue.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`scheduler`**: The chained-rescheduling engine. A fixed number of lanes each
//!   resubmit their work unit after every run, backing off on an empty queue and
//!   stopping only on an explicit stop or a fatal fault.
//! - **`registry`**: Cluster-wide view of worker identities, published per node and
//!   filtered by live membership on read.
//! - **`membership`**: The cluster coordination layer. UDP gossip (SWIM-like) for node
//!   discovery and failure detection, plus small replicated maps.
//! - **`worker`**: The reference work unit: a local task queue and named handlers.
//! - **`initializer`**: Ordered startup (queue cleanup, lanes, identity broadcast).
//! - **`config`**: Startup settings and their validation.

pub mod config;
pub mod initializer;
pub mod membership;
pub mod registry;
pub mod scheduler;
pub mod worker;
