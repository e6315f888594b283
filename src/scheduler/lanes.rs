//! Lane Scheduler
//!
//! Owns the fixed set of lanes of this node. Startup is two-phase: `new`
//! builds every lane (and mints its identity) but runs nothing, then
//! `start_scheduling` kicks off the first execution of each lane once the
//! queue has been cleaned up.

use super::continuation::LaneContinuation;
use super::executor::LaneExecutor;
use super::factory::WorkerFactory;
use super::types::WorkerId;
use crate::config::{ConfigError, SchedulerConfig};

use std::sync::Arc;
use std::time::Duration;

pub struct LaneScheduler {
    lanes: Vec<Arc<LaneContinuation>>,
    delay: Duration,
}

impl LaneScheduler {
    /// Builds one lane per configured worker. Fails on an invalid lane count
    /// or poll delay.
    pub fn new(
        config: &SchedulerConfig,
        executor: Arc<dyn LaneExecutor>,
        factory: &dyn WorkerFactory,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let delay = config.poll_delay();
        let lanes = (0..config.worker_count)
            .map(|_| LaneContinuation::new(factory.create(), executor.clone(), delay))
            .collect();

        Ok(Self { lanes, delay })
    }

    /// Submits the first execution of every lane.
    ///
    /// Must be called exactly once; a second call double-submits.
    pub fn start_scheduling(&self) {
        tracing::info!(
            "Starting scheduled processing: {} lane(s), poll delay {:?}",
            self.lanes.len(),
            self.delay
        );

        for lane in &self.lanes {
            lane.start();
        }
    }

    /// Stops every lane without waiting for in-flight executions.
    pub fn stop(&self) {
        for lane in &self.lanes {
            lane.stop();
        }
        tracing::info!("Scheduled processing stopped ({} lane(s))", self.lanes.len());
    }

    pub fn lanes(&self) -> &[Arc<LaneContinuation>] {
        &self.lanes
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn worker_uuids(&self) -> Vec<WorkerId> {
        self.lanes.iter().map(|lane| lane.uuid().clone()).collect()
    }

    pub fn running_lanes(&self) -> usize {
        self.lanes.iter().filter(|lane| lane.is_running()).count()
    }
}
