//! Worker Identity Factory
//!
//! Mints a fresh `WorkerId` for every lane and builds the work unit that runs
//! on it. All identities minted during the life of the process are retained;
//! they are what the worker registry publishes to the cluster.

use super::types::{WorkUnit, WorkerId};

use dashmap::DashSet;
use std::collections::HashSet;
use std::sync::Arc;

pub trait WorkerFactory: Send + Sync {
    /// Builds a work unit bound to a newly minted identity.
    fn create(&self) -> Arc<dyn WorkUnit>;

    /// Snapshot of every identity minted so far.
    fn worker_uuids(&self) -> HashSet<WorkerId>;
}

type BuildFn = dyn Fn(WorkerId) -> Arc<dyn WorkUnit> + Send + Sync;

pub struct WorkerIdentityFactory {
    uuids: DashSet<WorkerId>,
    build: Box<BuildFn>,
}

impl WorkerIdentityFactory {
    /// `build` receives the minted identity and returns the unit for it.
    pub fn new<F>(build: F) -> Arc<Self>
    where
        F: Fn(WorkerId) -> Arc<dyn WorkUnit> + Send + Sync + 'static,
    {
        Arc::new(Self {
            uuids: DashSet::new(),
            build: Box::new(build),
        })
    }

    pub fn minted_count(&self) -> usize {
        self.uuids.len()
    }
}

impl WorkerFactory for WorkerIdentityFactory {
    fn create(&self) -> Arc<dyn WorkUnit> {
        let uuid = WorkerId::new();
        self.uuids.insert(uuid.clone());
        tracing::debug!("Minted worker identity {}", uuid);
        (self.build)(uuid)
    }

    fn worker_uuids(&self) -> HashSet<WorkerId> {
        self.uuids.iter().map(|entry| entry.key().clone()).collect()
    }
}
