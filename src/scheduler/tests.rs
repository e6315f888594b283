//! Scheduler Module Tests
//!
//! ## Test Scopes
//! - **Continuation decisions**: which resubmission follows each outcome, checked
//!   against a recording executor that never runs anything.
//! - **Stop races**: completions that arrive after `stop()` must not resubmit.
//! - **Lane scheduler**: construction, identities, start/stop of whole pools.
//! - **Tokio executor**: real chaining on a paused clock, including panics and
//!   long chains.

#[cfg(test)]
mod tests {
    use crate::config::{ConfigError, SchedulerConfig};
    use crate::scheduler::continuation::LaneContinuation;
    use crate::scheduler::executor::{
        ExecutionCallback, LaneExecutor, ProcessingExecutor, ScheduledExecution,
    };
    use crate::scheduler::factory::{WorkerFactory, WorkerIdentityFactory};
    use crate::scheduler::lanes::LaneScheduler;
    use crate::scheduler::types::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};
    use std::time::Duration;

    const DELAY: Duration = Duration::from_millis(1000);

    // ============================================================
    // TEST DOUBLES
    // ============================================================

    struct Submission {
        delay: Option<Duration>,
        execution: ScheduledExecution,
        callback: Arc<dyn ExecutionCallback>,
    }

    /// Records submissions; completions are fired by hand.
    #[derive(Default)]
    struct RecordingExecutor {
        submissions: Mutex<Vec<Submission>>,
    }

    impl RecordingExecutor {
        fn record(
            &self,
            delay: Option<Duration>,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            let execution = ScheduledExecution::new();
            self.submissions.lock().unwrap().push(Submission {
                delay,
                execution: execution.clone(),
                callback,
            });
            execution
        }

        fn count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }

        fn delay_of(&self, index: usize) -> Option<Duration> {
            self.submissions.lock().unwrap()[index].delay
        }

        fn execution_of(&self, index: usize) -> ScheduledExecution {
            self.submissions.lock().unwrap()[index].execution.clone()
        }

        /// Completes the last submission with `result`.
        fn complete_last(&self, result: WorkResult) {
            let (execution, callback) = {
                let submissions = self.submissions.lock().unwrap();
                let last = submissions.last().expect("nothing submitted");
                (last.execution.clone(), last.callback.clone())
            };
            assert!(execution.begin(), "completed execution was not pending");
            execution.finish();
            callback.on_complete(result);
        }
    }

    impl LaneExecutor for RecordingExecutor {
        fn submit(
            &self,
            _unit: Arc<dyn WorkUnit>,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            self.record(None, callback)
        }

        fn schedule(
            &self,
            _unit: Arc<dyn WorkUnit>,
            delay: Duration,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            self.record(Some(delay), callback)
        }
    }

    /// Reports `MoreWorkLikely` for the first `busy_runs` runs, then an empty queue.
    struct CountingUnit {
        uuid: WorkerId,
        runs: Arc<AtomicUsize>,
        busy_runs: usize,
    }

    #[async_trait]
    impl WorkUnit for CountingUnit {
        fn uuid(&self) -> &WorkerId {
            &self.uuid
        }

        async fn run(&self) -> WorkResult {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run <= self.busy_runs {
                Ok(WorkOutcome::MoreWorkLikely)
            } else {
                Ok(WorkOutcome::NoMoreWorkNow)
            }
        }
    }

    struct PanickingUnit {
        uuid: WorkerId,
    }

    #[async_trait]
    impl WorkUnit for PanickingUnit {
        fn uuid(&self) -> &WorkerId {
            &self.uuid
        }

        async fn run(&self) -> WorkResult {
            panic!("task blew up");
        }
    }

    /// Runs the first submission inline, on the caller's thread, and records
    /// the rest.
    #[derive(Default)]
    struct InlineOnceExecutor {
        ran_inline: AtomicBool,
        recorded: RecordingExecutor,
    }

    impl InlineOnceExecutor {
        fn dispatch(
            &self,
            delay: Option<Duration>,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            if self.ran_inline.swap(true, Ordering::SeqCst) {
                return self.recorded.record(delay, callback);
            }
            let execution = ScheduledExecution::new();
            assert!(execution.begin());
            execution.finish();
            callback.on_complete(Ok(WorkOutcome::MoreWorkLikely));
            execution
        }
    }

    impl LaneExecutor for InlineOnceExecutor {
        fn submit(
            &self,
            _unit: Arc<dyn WorkUnit>,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            self.dispatch(None, callback)
        }

        fn schedule(
            &self,
            _unit: Arc<dyn WorkUnit>,
            delay: Duration,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            self.dispatch(Some(delay), callback)
        }
    }

    /// Stops the lane while a submission is still on its way back to it.
    #[derive(Default)]
    struct StoppingExecutor {
        lane: OnceLock<Arc<LaneContinuation>>,
        recorded: RecordingExecutor,
    }

    impl LaneExecutor for StoppingExecutor {
        fn submit(
            &self,
            _unit: Arc<dyn WorkUnit>,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            let execution = self.recorded.record(None, callback);
            if let Some(lane) = self.lane.get() {
                lane.stop();
            }
            execution
        }

        fn schedule(
            &self,
            _unit: Arc<dyn WorkUnit>,
            delay: Duration,
            callback: Arc<dyn ExecutionCallback>,
        ) -> ScheduledExecution {
            let execution = self.recorded.record(Some(delay), callback);
            if let Some(lane) = self.lane.get() {
                lane.stop();
            }
            execution
        }
    }

    fn counting_unit(busy_runs: usize) -> (Arc<dyn WorkUnit>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let unit = Arc::new(CountingUnit {
            uuid: WorkerId::new(),
            runs: runs.clone(),
            busy_runs,
        });
        (unit, runs)
    }

    fn recorded_lane() -> (Arc<LaneContinuation>, Arc<RecordingExecutor>) {
        let executor = Arc::new(RecordingExecutor::default());
        let (unit, _) = counting_unit(0);
        let lane = LaneContinuation::new(unit, executor.clone(), DELAY);
        (lane, executor)
    }

    fn counting_factory(busy_runs: usize) -> (Arc<WorkerIdentityFactory>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let shared = runs.clone();
        let factory = WorkerIdentityFactory::new(move |uuid| {
            Arc::new(CountingUnit {
                uuid,
                runs: shared.clone(),
                busy_runs,
            }) as Arc<dyn WorkUnit>
        });
        (factory, runs)
    }

    fn scheduler_config(worker_count: usize) -> SchedulerConfig {
        SchedulerConfig {
            worker_count,
            poll_delay_ms: DELAY.as_millis() as u64,
        }
    }

    // ============================================================
    // CONTINUATION DECISIONS
    // ============================================================

    #[test]
    fn test_start_schedules_first_run_after_delay() {
        let (lane, executor) = recorded_lane();

        lane.start();

        assert_eq!(executor.count(), 1);
        assert_eq!(executor.delay_of(0), Some(DELAY));
        assert!(lane.is_running());
    }

    #[test]
    fn test_more_work_resubmits_without_delay() {
        let (lane, executor) = recorded_lane();
        lane.start();

        executor.complete_last(Ok(WorkOutcome::MoreWorkLikely));

        assert_eq!(executor.count(), 2);
        assert_eq!(executor.delay_of(1), None);
    }

    #[test]
    fn test_empty_queue_resubmits_after_configured_delay() {
        let (lane, executor) = recorded_lane();
        lane.start();

        executor.complete_last(Ok(WorkOutcome::NoMoreWorkNow));

        assert_eq!(executor.count(), 2);
        assert_eq!(executor.delay_of(1), Some(DELAY));
    }

    #[test]
    fn test_recoverable_failure_resubmits_without_delay() {
        let (lane, executor) = recorded_lane();
        lane.start();

        executor.complete_last(Err(WorkFailure::Recoverable(anyhow::anyhow!("bad task"))));

        assert_eq!(executor.count(), 2);
        assert_eq!(executor.delay_of(1), None);
        assert!(lane.is_running());
    }

    #[test]
    fn test_fatal_failure_stops_the_lane() {
        let (lane, executor) = recorded_lane();
        lane.start();

        executor.complete_last(Err(WorkFailure::Fatal(FatalFault::ResourceExhausted(
            "out of memory".to_string(),
        ))));

        assert_eq!(executor.count(), 1, "fatal failure must not resubmit");
        assert!(!lane.is_running());
    }

    #[test]
    fn test_decisions_hold_over_a_long_sequence() {
        let (lane, executor) = recorded_lane();
        lane.start();

        let results = [
            Ok(WorkOutcome::MoreWorkLikely),
            Ok(WorkOutcome::MoreWorkLikely),
            Err(WorkFailure::Recoverable(anyhow::anyhow!("flaky"))),
            Ok(WorkOutcome::NoMoreWorkNow),
            Ok(WorkOutcome::MoreWorkLikely),
            Ok(WorkOutcome::NoMoreWorkNow),
        ];
        let expected = [None, None, None, Some(DELAY), None, Some(DELAY)];

        for result in results {
            executor.complete_last(result);
        }

        for (i, delay) in expected.iter().enumerate() {
            assert_eq!(&executor.delay_of(i + 1), delay, "submission {}", i + 1);
        }
    }

    // ============================================================
    // STOP SEMANTICS
    // ============================================================

    #[test]
    fn test_stop_cancels_pending_execution() {
        let (lane, executor) = recorded_lane();
        lane.start();

        lane.stop();

        assert!(!lane.is_running());
        assert!(executor.execution_of(0).is_cancelled());
    }

    #[test]
    fn test_no_resubmission_after_stop_even_if_completion_races() {
        let (lane, executor) = recorded_lane();
        lane.start();

        // The run already started when stop() arrives
        let first = executor.execution_of(0);
        assert!(first.begin());
        lane.stop();
        assert!(!first.is_cancelled(), "a started run is not interrupted");
        first.finish();

        let callback: Arc<dyn ExecutionCallback> = lane.clone();
        callback.on_complete(Ok(WorkOutcome::MoreWorkLikely));

        assert_eq!(executor.count(), 1);
    }

    #[test]
    fn test_stop_twice_is_harmless() {
        let (lane, executor) = recorded_lane();
        lane.start();

        lane.stop();
        lane.stop();

        assert!(executor.execution_of(0).is_cancelled());
        assert_eq!(executor.count(), 1);
    }

    #[test]
    fn test_stop_after_fatal_failure() {
        let (lane, executor) = recorded_lane();
        lane.start();
        executor.complete_last(Err(WorkFailure::Fatal(FatalFault::Panicked(
            "boom".to_string(),
        ))));

        lane.stop();

        assert_eq!(executor.count(), 1);
        assert!(executor.execution_of(0).is_done());
    }

    #[test]
    fn test_inline_completion_does_not_deadlock() {
        let executor = Arc::new(InlineOnceExecutor::default());
        let (unit, _) = counting_unit(0);
        let lane = LaneContinuation::new(unit, executor.clone(), DELAY);

        // The first run completes inside schedule() and chains from there
        lane.start();

        assert_eq!(executor.recorded.count(), 1);
        assert_eq!(executor.recorded.delay_of(0), None);
        let pending = lane.pending_execution().unwrap();
        assert!(pending.is_pending(), "the newest submission is the one tracked");

        lane.stop();

        assert!(executor.recorded.execution_of(0).is_cancelled());
    }

    #[test]
    fn test_stop_during_submission_cancels_the_new_run() {
        let executor = Arc::new(StoppingExecutor::default());
        let (unit, _) = counting_unit(0);
        let lane = LaneContinuation::new(unit, executor.clone(), DELAY);
        assert!(executor.lane.set(lane.clone()).is_ok());

        lane.start();

        assert!(!lane.is_running());
        assert_eq!(executor.recorded.count(), 1);
        assert!(executor.recorded.execution_of(0).is_cancelled());
    }

    // ============================================================
    // LANE SCHEDULER
    // ============================================================

    #[test]
    fn test_scheduler_rejects_invalid_lane_count() {
        let executor = Arc::new(RecordingExecutor::default());
        let (factory, _) = counting_factory(0);

        let result = LaneScheduler::new(&scheduler_config(0), executor.clone(), factory.as_ref());

        assert!(matches!(result, Err(ConfigError::InvalidWorkerCount { got: 0, .. })));
        assert_eq!(factory.minted_count(), 0);
        assert_eq!(executor.count(), 0);
    }

    #[test]
    fn test_scheduler_builds_lanes_without_running_them() {
        let executor = Arc::new(RecordingExecutor::default());
        let (factory, _) = counting_factory(0);

        let scheduler =
            LaneScheduler::new(&scheduler_config(4), executor.clone(), factory.as_ref()).unwrap();

        assert_eq!(scheduler.lane_count(), 4);
        assert_eq!(executor.count(), 0, "nothing runs before start_scheduling");

        let lane_ids: HashSet<WorkerId> = scheduler.worker_uuids().into_iter().collect();
        assert_eq!(lane_ids.len(), 4, "every lane gets its own identity");
        assert_eq!(lane_ids, factory.worker_uuids());
    }

    #[test]
    fn test_start_scheduling_submits_one_run_per_lane() {
        let executor = Arc::new(RecordingExecutor::default());
        let (factory, _) = counting_factory(0);
        let scheduler =
            LaneScheduler::new(&scheduler_config(3), executor.clone(), factory.as_ref()).unwrap();

        scheduler.start_scheduling();

        assert_eq!(executor.count(), 3);
        for i in 0..3 {
            assert_eq!(executor.delay_of(i), Some(DELAY));
        }
        assert_eq!(scheduler.running_lanes(), 3);
    }

    #[test]
    fn test_scheduler_stop_stops_every_lane() {
        let executor = Arc::new(RecordingExecutor::default());
        let (factory, _) = counting_factory(0);
        let scheduler =
            LaneScheduler::new(&scheduler_config(3), executor.clone(), factory.as_ref()).unwrap();
        scheduler.start_scheduling();

        scheduler.stop();

        assert_eq!(scheduler.running_lanes(), 0);
        for i in 0..3 {
            assert!(executor.execution_of(i).is_cancelled());
        }
    }

    // ============================================================
    // TOKIO EXECUTOR
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_lane_chains_on_real_executor() {
        let (unit, runs) = counting_unit(5);
        let lane = LaneContinuation::new(unit, Arc::new(ProcessingExecutor::current()), DELAY);

        lane.start();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0, "first run waits for the delay");

        // At 1s: five busy runs back to back, then one that finds the queue empty
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 6);

        // At 2s: one more poll of the empty queue
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 7);

        lane.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 7, "no runs after stop");
        assert!(lane.pending_execution().unwrap().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_chain_does_not_grow_the_stack() {
        let (unit, runs) = counting_unit(20_000);
        let lane = LaneContinuation::new(unit, Arc::new(ProcessingExecutor::current()), DELAY);

        lane.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 20_001);
        assert!(lane.is_running());
        lane.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_fatal_for_its_lane_only() {
        let executor = Arc::new(ProcessingExecutor::current());
        let panicking = LaneContinuation::new(
            Arc::new(PanickingUnit {
                uuid: WorkerId::new(),
            }),
            executor.clone(),
            DELAY,
        );
        let (unit, runs) = counting_unit(0);
        let healthy = LaneContinuation::new(unit, executor, DELAY);

        panicking.start();
        healthy.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(!panicking.is_running());
        assert!(panicking.pending_execution().unwrap().is_done());
        assert!(healthy.is_running());
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        healthy.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_stop_leaves_nothing_running() {
        for worker_count in 1..=10 {
            let (factory, runs) = counting_factory(0);
            let scheduler = LaneScheduler::new(
                &scheduler_config(worker_count),
                Arc::new(ProcessingExecutor::current()),
                factory.as_ref(),
            )
            .unwrap();

            scheduler.start_scheduling();
            scheduler.stop();
            tokio::time::sleep(Duration::from_secs(5)).await;

            assert_eq!(runs.load(Ordering::SeqCst), 0);
            for lane in scheduler.lanes() {
                let execution = lane.pending_execution().expect("lane was started");
                assert!(execution.is_done());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lanes_run_independently() {
        let (factory, runs) = counting_factory(0);
        let scheduler = LaneScheduler::new(
            &scheduler_config(3),
            Arc::new(ProcessingExecutor::current()),
            factory.as_ref(),
        )
        .unwrap();

        scheduler.start_scheduling();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        // Each of the 3 lanes polled the empty queue at 1s and 2s
        assert_eq!(runs.load(Ordering::SeqCst), 6);

        scheduler.lanes()[0].stop();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 8);
        assert_eq!(scheduler.running_lanes(), 2);

        scheduler.stop();
    }
}
