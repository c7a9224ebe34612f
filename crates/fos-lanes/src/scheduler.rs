//! Lane Scheduler
//!
//! Owns the critical and background lanes. Producers enqueue work from any
//! thread, then optionally block on one specific task with [`Scheduler::wait`].
//! A wait on a task that is still queued promotes it to the head of its lane
//! so the caller is not stuck behind unrelated work.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use crate::config::{LaneAffinity, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::id::TaskId;
use crate::lane::{Lane, LaneWorker, Location};
use crate::stats::LaneStatsSnapshot;
use crate::work::WorkItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    ShutDown,
}

/// The two-lane scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    critical: Arc<LaneWorker>,
    background: Arc<LaneWorker>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("lifecycle", &*self.lifecycle.lock())
            .field("critical", &self.critical)
            .field("background", &self.background)
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler. No threads run until [`Scheduler::initialize`].
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            critical: Arc::new(LaneWorker::new(Lane::Critical, config.priority_control)),
            background: Arc::new(LaneWorker::new(Lane::Background, config.priority_control)),
            config,
            lifecycle: Mutex::new(Lifecycle::Created),
        }))
    }

    /// Get scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn worker(&self, lane: Lane) -> &Arc<LaneWorker> {
        match lane {
            Lane::Critical => &self.critical,
            Lane::Background => &self.background,
        }
    }

    fn workers(&self) -> [&Arc<LaneWorker>; 2] {
        [&self.critical, &self.background]
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start both lane threads
    ///
    /// Each thread gets `stack_size` bytes of stack and is pinned to the
    /// core named in `affinity`, if any. If the second thread cannot be
    /// spawned the first is stopped again and the scheduler stays
    /// uninitialized.
    pub fn initialize(&self, affinity: LaneAffinity, stack_size: usize) -> Result<()> {
        if stack_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "stack_size must be non-zero".to_string(),
            ));
        }

        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running => return Err(SchedulerError::AlreadyInitialized),
            Lifecycle::ShutDown => return Err(SchedulerError::ShutDown),
            Lifecycle::Created => {}
        }

        let plan = [
            (&self.critical, affinity.critical),
            (&self.background, affinity.background),
        ];
        let mut started: Vec<&Arc<LaneWorker>> = Vec::with_capacity(plan.len());

        for (worker, core) in plan {
            let lane = worker.lane();
            let name = format!("{}-{}", self.config.thread_name_prefix, lane);
            if let Err(source) = worker.start(name, stack_size, core) {
                tracing::warn!(%lane, error = %source, "failed to spawn lane thread");
                for worker in started {
                    worker.retire();
                    worker.wake();
                    worker.join();
                }
                return Err(SchedulerError::Spawn { lane, source });
            }
            started.push(worker);
        }

        *lifecycle = Lifecycle::Running;
        tracing::info!(
            critical_core = ?affinity.critical,
            background_core = ?affinity.background,
            stack_size,
            "scheduler initialized"
        );
        Ok(())
    }

    /// Start both lanes unpinned with the configured stack size
    pub fn initialize_default(&self) -> Result<()> {
        self.initialize(LaneAffinity::unpinned(), self.config.stack_size)
    }

    /// Whether the lane threads are running
    pub fn is_initialized(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    /// Stop both lanes
    ///
    /// Queued work is discarded; a task already executing is allowed to
    /// finish. Idempotent. Also runs on drop, which may happen on a lane
    /// thread when a payload holds the last handle; that lane is then
    /// detached rather than joined.
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let was_running = *lifecycle == Lifecycle::Running;
        if *lifecycle == Lifecycle::ShutDown {
            return;
        }
        *lifecycle = Lifecycle::ShutDown;

        for worker in self.workers() {
            worker.retire();
            worker.close();
        }
        self.cancel_all();

        if was_running {
            for worker in self.workers() {
                worker.join();
            }
            tracing::info!("scheduler shut down");
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Queue `work` on `lane` and return its id
    ///
    /// Never blocks. Work queued before [`Scheduler::initialize`] runs once
    /// the lanes start. After [`Scheduler::shutdown`] the work is dropped
    /// without running and the returned id reports as finished.
    pub fn enqueue(&self, lane: Lane, work: WorkItem) -> TaskId {
        self.worker(lane).enqueue(work)
    }

    /// Queue a closure on `lane`
    pub fn spawn<F>(&self, lane: Lane, f: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(lane, WorkItem::new(f))
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Block until task `id` on `lane` is no longer queued or executing
    ///
    /// Returns `true` if the task was pending or active and this call waited
    /// for it, `false` if it had already finished, was cancelled, never
    /// existed, or `id` is [`TaskId::NONE`]. A pending task is promoted to
    /// the head of its lane first. `context` only labels log events.
    ///
    /// The lane must be initialized for a pending task to ever finish, and a
    /// task must not wait on work queued behind it on its own lane.
    pub fn wait(&self, lane: Lane, id: TaskId, context: &str) -> bool {
        if id.is_none() {
            return false;
        }
        let worker = self.worker(lane);

        match worker.locate(id, self.config.deep_search_retries) {
            Location::Finished => false,
            Location::Active => {
                tracing::trace!(%lane, task = %id, context, "waiting on active task");
                let backoff = Backoff::new();
                while worker.current() == id {
                    backoff.snooze();
                }
                true
            }
            Location::Pending => {
                tracing::trace!(%lane, task = %id, context, "waiting on pending task");
                worker.wake();
                self.spin_until_settled(worker, id);
                true
            }
        }
    }

    /// Non-blocking [`Scheduler::wait`]: `true` if task `id` is pending or
    /// executing on `lane`
    ///
    /// A pending task is promoted exactly as `wait` would.
    pub fn test(&self, lane: Lane, id: TaskId, context: &str) -> bool {
        if id.is_none() {
            return false;
        }
        let found = self.worker(lane).locate(id, self.config.deep_search_retries);
        tracing::trace!(%lane, task = %id, context, ?found, "tested task");
        found != Location::Finished
    }

    fn spin_until_settled(&self, worker: &LaneWorker, id: TaskId) {
        let rewake_interval = self.config.rewake_interval;
        let backoff = Backoff::new();
        let mut spins: u32 = 0;

        while !worker.is_settled(id) {
            spins = spins.wrapping_add(1);
            if spins % rewake_interval == 0 {
                worker.wake();
            }
            backoff.snooze();
        }
    }

    // ========================================================================
    // Bulk control
    // ========================================================================

    /// Discard all queued work on both lanes
    ///
    /// Executing tasks are not interrupted. Waiters blocked on a discarded
    /// task return.
    pub fn cancel_all(&self) {
        let dropped: usize = self.workers().iter().map(|w| w.cancel()).sum();
        tracing::debug!(dropped, "cancel_all");
    }

    /// Poll until both lanes are drained or `timeout` elapses
    ///
    /// Returns `true` if work was still outstanding at the deadline, `false`
    /// once both lanes are idle with empty queues. A timeout too large to
    /// represent as a deadline (e.g. `Duration::MAX`) waits forever.
    pub fn wait_for_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if self.workers().iter().all(|w| w.is_drained()) {
                return false;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::debug!(?timeout, "wait_for_all timed out");
                    return true;
                }
            }
            thread::yield_now();
            thread::sleep(self.config.drain_poll_interval);
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of items queued on `lane`
    pub fn pending(&self, lane: Lane) -> usize {
        self.worker(lane).pending()
    }

    /// Id executing on `lane`, or [`TaskId::NONE`]
    pub fn current(&self, lane: Lane) -> TaskId {
        self.worker(lane).current()
    }

    /// Ids recently completed on `lane`, newest first
    pub fn recent(&self, lane: Lane) -> Vec<TaskId> {
        self.worker(lane).history().recent()
    }

    /// Counter snapshot for `lane`
    pub fn stats(&self, lane: Lane) -> LaneStatsSnapshot {
        self.worker(lane).stats().snapshot()
    }

    /// Whether `lane`'s thread is alive
    pub fn is_lane_running(&self, lane: Lane) -> bool {
        self.worker(lane).is_running()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;

    fn scheduler() -> Arc<Scheduler> {
        let config = SchedulerConfig::default().with_priority_control(false);
        let scheduler = Scheduler::new(config).unwrap();
        scheduler
            .initialize(LaneAffinity::unpinned(), 256 * 1024)
            .unwrap();
        scheduler
    }

    #[test]
    fn test_initialize_twice_fails() {
        let scheduler = scheduler();
        assert!(scheduler.is_initialized());
        assert!(matches!(
            scheduler.initialize_default(),
            Err(SchedulerError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_initialize_after_shutdown_fails() {
        let scheduler = scheduler();
        scheduler.shutdown();
        assert!(!scheduler.is_initialized());
        assert!(!scheduler.is_lane_running(Lane::Critical));
        assert!(!scheduler.is_lane_running(Lane::Background));
        assert!(matches!(
            scheduler.initialize_default(),
            Err(SchedulerError::ShutDown)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig::default().with_rewake_interval(0);
        assert!(Scheduler::new(config).is_err());
    }

    #[test]
    fn test_zero_stack_rejected() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        assert!(matches!(
            scheduler.initialize(LaneAffinity::unpinned(), 0),
            Err(SchedulerError::InvalidConfig(_))
        ));
        assert!(!scheduler.is_initialized());
    }

    #[test]
    fn test_failed_spawn_rolls_back_started_lane() {
        let config = SchedulerConfig::default().with_priority_control(false);
        let scheduler = Scheduler::new(config).unwrap();
        scheduler.background.refuse_spawn.store(true, Ordering::Relaxed);

        match scheduler.initialize(LaneAffinity::unpinned(), 256 * 1024) {
            Err(SchedulerError::Spawn { lane, .. }) => assert_eq!(lane, Lane::Background),
            other => panic!("expected spawn error, got {other:?}"),
        }
        assert!(!scheduler.is_initialized());
        assert!(!scheduler.is_lane_running(Lane::Critical));
        assert!(!scheduler.is_lane_running(Lane::Background));

        // Still in the created state, so a retry starts both lanes.
        scheduler.initialize(LaneAffinity::unpinned(), 256 * 1024).unwrap();
        let (tx, rx) = mpsc::channel();
        let id = scheduler.spawn(Lane::Critical, move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.wait(Lane::Critical, id, "after retry");
        assert!(scheduler.is_lane_running(Lane::Background));
    }

    #[test]
    fn test_enqueue_after_shutdown_is_dropped() {
        let scheduler = scheduler();
        scheduler.shutdown();

        let id = scheduler.spawn(Lane::Background, || panic!("must not run"));
        assert!(!id.is_none());
        assert_eq!(scheduler.pending(Lane::Background), 0);
        assert!(!scheduler.wait(Lane::Background, id, "after shutdown"));
        assert!(!scheduler.test(Lane::Background, id, "after shutdown"));
        assert!(!scheduler.wait_for_all(Duration::from_secs(1)));
    }

    #[test]
    fn test_wait_blocks_until_done() {
        let scheduler = scheduler();
        let (tx, rx) = mpsc::channel();
        let id = scheduler.spawn(Lane::Critical, move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(42).unwrap();
        });

        scheduler.wait(Lane::Critical, id, "test_wait_blocks_until_done");
        assert_eq!(rx.try_recv().unwrap(), 42);
        assert!(!scheduler.test(Lane::Critical, id, "after"));
    }

    #[test]
    fn test_queued_before_initialize_runs_after() {
        let scheduler = Scheduler::new(SchedulerConfig::default().with_priority_control(false)).unwrap();
        let (tx, rx) = mpsc::channel();
        let id = scheduler.spawn(Lane::Background, move || tx.send(()).unwrap());

        assert!(scheduler.test(Lane::Background, id, "queued"));
        scheduler.initialize_default().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!scheduler.wait_for_all(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_discards_queued_work() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.spawn(Lane::Critical, || panic!("must not run"));
        assert_eq!(scheduler.pending(Lane::Critical), 1);

        scheduler.shutdown();
        assert_eq!(scheduler.pending(Lane::Critical), 0);
        assert_eq!(scheduler.stats(Lane::Critical).cancelled, 1);
    }
}
