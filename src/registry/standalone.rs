use super::WorkerRegistry;
use crate::scheduler::factory::WorkerFactory;
use crate::scheduler::types::WorkerId;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Registry for a node running without a cluster: the local lanes are all
/// the workers there are.
pub struct StandaloneWorkerRegistry {
    factory: Arc<dyn WorkerFactory>,
}

impl StandaloneWorkerRegistry {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl WorkerRegistry for StandaloneWorkerRegistry {
    fn worker_uuids(&self) -> HashSet<WorkerId> {
        self.factory.worker_uuids()
    }

    fn broadcast_worker_uuids(&self) {
        // Nothing to publish remotely
        let uuids = self.factory.worker_uuids();
        tracing::debug!("Standalone node, {} worker identities kept local", uuids.len());
    }

    async fn stop(&self) {}
}
