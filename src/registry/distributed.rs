use super::{WORKER_UUIDS, WorkerRegistry};
use crate::config::ClusterConfig;
use crate::membership::ClusterClient;
use crate::membership::replicated::ReplicatedMap;
use crate::membership::service::MembershipService;
use crate::scheduler::factory::WorkerFactory;
use crate::scheduler::types::WorkerId;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Registry backed by the cluster-wide `worker_uuids` map.
///
/// A node only ever writes the entry keyed by its own node id. Entries left
/// behind by crashed nodes stay in the map and are filtered out on read.
pub struct DistributedWorkerRegistry {
    client: Arc<dyn ClusterClient>,
    factory: Arc<dyn WorkerFactory>,
    workers: Arc<ReplicatedMap>,
}

impl DistributedWorkerRegistry {
    /// Joins the cluster described by `config`. Fails fast when clustering
    /// is disabled or the name or local endpoint is missing.
    pub async fn connect(config: &ClusterConfig, factory: Arc<dyn WorkerFactory>) -> Result<Self> {
        config.validate()?;
        let client = MembershipService::connect(config).await?;
        tracing::info!(
            "Connected to cluster '{}' as node {}",
            config.name,
            client.local_node_id()
        );
        Ok(Self::new(client, factory))
    }

    pub fn new(client: Arc<dyn ClusterClient>, factory: Arc<dyn WorkerFactory>) -> Self {
        let workers = client.replicated_map(WORKER_UUIDS);
        Self {
            client,
            factory,
            workers,
        }
    }
}

#[async_trait]
impl WorkerRegistry for DistributedWorkerRegistry {
    fn worker_uuids(&self) -> HashSet<WorkerId> {
        let live = self.client.live_node_ids();

        self.workers
            .entries()
            .into_iter()
            .filter(|(node, _)| live.contains(node))
            .flat_map(|(_, uuids)| uuids.into_iter().map(WorkerId))
            .collect()
    }

    fn broadcast_worker_uuids(&self) {
        let local = self.client.local_node_id();
        let uuids: BTreeSet<String> = self
            .factory
            .worker_uuids()
            .into_iter()
            .map(|uuid| uuid.0)
            .collect();
        let count = uuids.len();

        let version = self.workers.put(local.clone(), uuids);
        tracing::info!("Published {} worker identities for node {} (version {})", count, local, version);
    }

    async fn stop(&self) {
        let local = self.client.local_node_id();
        if self.workers.remove(&local) {
            tracing::info!("Retracted worker identities of node {}", local);
        }
        self.client.disconnect().await;
    }
}
