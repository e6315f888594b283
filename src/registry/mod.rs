//! Worker Registry Module
//!
//! Answers "which workers exist, anywhere in the cluster?".
//!
//! Every node publishes the identities of its own lanes under its node id in a
//! replicated map; readers take the union of the entries whose node is still
//! live. With clustering disabled, the standalone registry simply reports the
//! local identities.
//!
//! ## Submodules
//! - **`distributed`**: publishes into the cluster-wide `worker_uuids` map.
//! - **`standalone`**: single-node registry with the same contract.

pub mod distributed;
pub mod standalone;

use crate::config::ClusterConfig;
use crate::scheduler::factory::WorkerFactory;
use crate::scheduler::types::WorkerId;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

pub use distributed::DistributedWorkerRegistry;
pub use standalone::StandaloneWorkerRegistry;

/// Name of the replicated map holding `node id -> worker ids`.
pub const WORKER_UUIDS: &str = "worker_uuids";

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Worker identities of every live node.
    fn worker_uuids(&self) -> HashSet<WorkerId>;

    /// Publishes this node's identities, replacing whatever was published before.
    fn broadcast_worker_uuids(&self);

    /// Retracts this node's identities and releases the cluster connection.
    async fn stop(&self);
}

/// Picks the registry matching the cluster settings.
pub async fn start_registry(
    config: &ClusterConfig,
    factory: Arc<dyn WorkerFactory>,
) -> Result<Arc<dyn WorkerRegistry>> {
    if config.enabled {
        let registry = DistributedWorkerRegistry::connect(config, factory).await?;
        Ok(Arc::new(registry))
    } else {
        Ok(Arc::new(StandaloneWorkerRegistry::new(factory)))
    }
}
