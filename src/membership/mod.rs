//! Membership & Discovery Module
//!
//! Implements a Gossip-based membership protocol (inspired by SWIM) to manage the cluster topology.
//! Nodes use this service to discover each other, detect failures, and replicate small
//! cluster-wide maps such as the worker registry.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: Nodes periodically exchange status updates via UDP to maintain a consistent view of the cluster.
//! - **Failure Detection**: Uses a "Suspect" -> "Dead" transition model with timeouts to handle node crashes gracefully.
//! - **Incarnation Numbers**: Solves conflict resolution when node state (Alive/Suspect) is disputed.
//! - **Replicated Maps**: Per-key single-writer maps, pushed on write and re-synced through acks.

pub mod replicated;
pub mod service;
pub mod types;

use async_trait::async_trait;
use replicated::ReplicatedMap;
use std::collections::HashSet;
use std::sync::Arc;
use types::NodeId;

/// What the rest of the node needs from cluster membership.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    fn local_node_id(&self) -> NodeId;

    /// Nodes currently considered reachable, the local node included.
    fn live_node_ids(&self) -> HashSet<NodeId>;

    /// The cluster-wide map registered under `name`, created on first use.
    fn replicated_map(&self, name: &str) -> Arc<ReplicatedMap>;

    async fn disconnect(&self);
}
