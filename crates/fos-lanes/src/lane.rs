//! Lanes
//!
//! A lane is one dedicated OS thread draining one queue. It publishes the
//! id it is executing in `current` and the ids it recently finished in a
//! history ring, which is what lets other threads wait on a single task.
//!
//! Moving an item out of the queue and publishing it as `current` happens
//! under the lane's claim lock. Deep searches and "is it still there?"
//! checks take the same lock, so an observer never sees an item that is
//! neither queued, current, nor finished.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_utils::sync::{Parker, Unparker};
use parking_lot::Mutex;

use crate::history::HistoryRing;
use crate::id::TaskId;
use crate::priority::{self, SchedulingClass};
use crate::queue::{self, LaneQueue, MutexDeque};
use crate::stats::LaneStats;
use crate::work::WorkItem;

/// Lane selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Latency-critical work
    Critical,
    /// Normal-priority background work
    Background,
}

impl Lane {
    /// Both lanes, critical first
    pub const ALL: [Lane; 2] = [Lane::Critical, Lane::Background];

    /// Get lane name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Background => "background",
        }
    }

    /// Class the lane runs at while it has work
    pub fn active_class(&self) -> SchedulingClass {
        match self {
            Self::Critical => SchedulingClass::Critical,
            Self::Background => SchedulingClass::Normal,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a task was found by [`LaneWorker::locate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    /// Executing right now
    Active,
    /// Queued; now at the head of the queue
    Pending,
    /// In history, or unknown
    Finished,
}

/// Thread, queue and bookkeeping of one lane
pub(crate) struct LaneWorker {
    lane: Lane,
    /// Cleared at teardown; the thread exits after its current drain
    alive: AtomicBool,
    /// Set before spawn, cleared by the thread as its last action
    running: AtomicBool,
    /// Set at shutdown; new work is rejected
    closed: AtomicBool,
    queue: Box<dyn LaneQueue>,
    claim: Mutex<()>,
    current: AtomicU64,
    history: HistoryRing,
    priority: AtomicU8,
    priority_control: AtomicBool,
    os_tid: AtomicI32,
    wake: Mutex<Option<Unparker>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    stats: LaneStats,
    #[cfg(test)]
    pub(crate) refuse_spawn: AtomicBool,
}

impl fmt::Debug for LaneWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneWorker")
            .field("lane", &self.lane)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("current", &self.current())
            .field("pending", &self.queue.len())
            .field("priority", &self.priority())
            .finish()
    }
}

impl LaneWorker {
    pub(crate) fn new(lane: Lane, priority_control: bool) -> Self {
        Self::with_queue(lane, priority_control, Box::new(MutexDeque::new()))
    }

    pub(crate) fn with_queue(lane: Lane, priority_control: bool, queue: Box<dyn LaneQueue>) -> Self {
        Self {
            lane,
            alive: AtomicBool::new(false),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            queue,
            claim: Mutex::new(()),
            current: AtomicU64::new(0),
            history: HistoryRing::new(),
            priority: AtomicU8::new(SchedulingClass::Normal as u8),
            priority_control: AtomicBool::new(priority_control),
            os_tid: AtomicI32::new(0),
            wake: Mutex::new(None),
            thread: Mutex::new(None),
            stats: LaneStats::default(),
            #[cfg(test)]
            refuse_spawn: AtomicBool::new(false),
        }
    }

    pub(crate) fn lane(&self) -> Lane {
        self.lane
    }

    pub(crate) fn stats(&self) -> &LaneStats {
        &self.stats
    }

    pub(crate) fn history(&self) -> &HistoryRing {
        &self.history
    }

    pub(crate) fn current(&self) -> TaskId {
        TaskId::from_raw(self.current.load(Ordering::Acquire))
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn priority(&self) -> SchedulingClass {
        SchedulingClass::from_u8(self.priority.load(Ordering::Relaxed))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Queue `item` and wake the lane
    ///
    /// After [`LaneWorker::close`] the item is dropped unrun and its id is
    /// reported as finished by every later lookup.
    pub(crate) fn enqueue(&self, item: WorkItem) -> TaskId {
        let id = item.id();
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(lane = %self.lane, task = %id, "lane is shut down, dropping task");
            drop(item);
            self.stats.record_cancelled(1);
            return id;
        }
        self.queue.push_back(item);
        self.stats.record_enqueued();
        tracing::trace!(lane = %self.lane, task = %id, "enqueued");
        // Lost a race with close(); nothing will ever drain the queue.
        if self.closed.load(Ordering::SeqCst) {
            self.cancel();
            return id;
        }
        self.wake();
        id
    }

    /// Elevate the lane thread and signal it
    pub(crate) fn wake(&self) {
        self.set_priority(self.lane.active_class());
        if let Some(unparker) = self.wake.lock().as_ref() {
            unparker.unpark();
        }
    }

    fn set_priority(&self, class: SchedulingClass) {
        if !self.priority_control.load(Ordering::Relaxed) || self.priority() == class {
            return;
        }
        let tid = self.os_tid.load(Ordering::Acquire);
        if tid == 0 {
            return;
        }
        if priority::set_scheduling_class(tid, class) {
            self.priority.store(class as u8, Ordering::Relaxed);
            tracing::trace!(lane = %self.lane, class = class.name(), "priority changed");
        } else if self.priority_control.swap(false, Ordering::Relaxed) {
            tracing::warn!(
                lane = %self.lane,
                class = class.name(),
                "failed to change lane priority, disabling priority control"
            );
        }
    }

    // ------------------------------------------------------------------
    // Observer side
    // ------------------------------------------------------------------

    /// Find `id`, promoting it to the head of the queue if it is pending
    pub(crate) fn locate(&self, id: TaskId, retries: u32) -> Location {
        if self.current() == id {
            return Location::Active;
        }
        if self.history.contains(id) {
            return Location::Finished;
        }

        let _claim = self.claim.lock();
        // The lane may have claimed it between the fast check and the lock.
        if self.current() == id {
            return Location::Active;
        }
        if queue::promote(self.queue.as_ref(), id, retries) {
            self.stats.record_promoted();
            tracing::debug!(lane = %self.lane, task = %id, "promoted to queue head");
            Location::Pending
        } else {
            Location::Finished
        }
    }

    /// Neither executing nor queued
    pub(crate) fn is_settled(&self, id: TaskId) -> bool {
        if self.current() == id {
            return false;
        }
        let _claim = self.claim.lock();
        self.current() != id && !self.queue.contains(id)
    }

    /// Queue empty and nothing executing
    pub(crate) fn is_drained(&self) -> bool {
        let _claim = self.claim.lock();
        self.current().is_none() && self.queue.is_empty()
    }

    /// Discard every queued item and wake the lane
    pub(crate) fn cancel(&self) -> usize {
        let dropped = {
            let _claim = self.claim.lock();
            self.queue.drain_all()
        };
        let count = dropped.len();
        // Payload destructors run outside the claim lock.
        drop(dropped);
        if count > 0 {
            self.stats.record_cancelled(count);
            tracing::debug!(lane = %self.lane, count, "cancelled queued tasks");
        }
        self.wake();
        count
    }

    // ------------------------------------------------------------------
    // Lane thread
    // ------------------------------------------------------------------

    /// Spawn the lane thread
    pub(crate) fn start(
        self: &Arc<Self>,
        name: String,
        stack_size: usize,
        core: Option<usize>,
    ) -> io::Result<()> {
        // Flags go up first so a fresh thread never sees a dead lane.
        self.alive.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let parker = Parker::new();
        *self.wake.lock() = Some(parker.unparker().clone());

        let worker = Arc::clone(self);
        let builder = thread::Builder::new().name(name).stack_size(stack_size);
        #[cfg(test)]
        let spawned = if self.refuse_spawn.swap(false, Ordering::Relaxed) {
            Err(io::Error::other("spawn refused"))
        } else {
            builder.spawn(move || worker.run(parker, core))
        };
        #[cfg(not(test))]
        let spawned = builder.spawn(move || worker.run(parker, core));

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.alive.store(false, Ordering::Release);
                self.running.store(false, Ordering::Release);
                *self.wake.lock() = None;
                Err(e)
            }
        }
    }

    /// Ask the thread to exit after its current drain
    pub(crate) fn retire(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Reject all further work
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Wait for a retired thread to exit, then close the wake signal
    ///
    /// Called from a payload running on this lane, the thread is only
    /// retired and detached; it exits once the payload returns.
    pub(crate) fn join(&self) {
        let handle = self.thread.lock().take();

        if let Some(handle) = &handle {
            if handle.thread().id() == thread::current().id() {
                self.retire();
                tracing::debug!(lane = %self.lane, "lane stopped from its own thread, detaching");
                return;
            }
        }

        while self.running.load(Ordering::Acquire) {
            self.wake();
            thread::yield_now();
        }
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(lane = %self.lane, "lane thread panicked");
            }
        }
        *self.wake.lock() = None;
    }

    fn run(&self, parker: Parker, core: Option<usize>) {
        self.os_tid.store(priority::current_os_tid(), Ordering::Release);
        let _exit = ExitGuard(self);

        if let Some(core) = core {
            pin_current_thread(self.lane, core);
        }

        if self.priority_control.load(Ordering::Relaxed) {
            if priority::probe(self.os_tid.load(Ordering::Acquire)) {
                self.priority.store(SchedulingClass::Normal as u8, Ordering::Relaxed);
            } else {
                self.priority_control.store(false, Ordering::Relaxed);
                tracing::debug!(lane = %self.lane, "priority control unavailable");
            }
        }

        tracing::info!(lane = %self.lane, "lane started");

        loop {
            while let Some(item) = self.claim_next() {
                self.execute(item);
            }
            if !self.alive.load(Ordering::Acquire) {
                break;
            }
            self.set_priority(SchedulingClass::Idle);
            parker.park();
            self.set_priority(self.lane.active_class());
        }

        tracing::info!(lane = %self.lane, "lane stopped");
    }

    fn claim_next(&self) -> Option<WorkItem> {
        let _claim = self.claim.lock();
        let item = self.queue.pop()?;
        self.current.store(item.id().get(), Ordering::Release);
        Some(item)
    }

    fn execute(&self, item: WorkItem) {
        let id = item.id();
        tracing::trace!(lane = %self.lane, task = %id, "executing");

        if panic::catch_unwind(AssertUnwindSafe(|| item.run())).is_err() {
            self.stats.record_panicked();
            tracing::error!(lane = %self.lane, task = %id, "task panicked");
        }

        self.history.push(id);
        self.stats.record_executed();
        self.current.store(0, Ordering::Release);
    }
}

/// Clears `running` when the lane thread leaves `run`, by return or unwind
struct ExitGuard<'a>(&'a LaneWorker);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.os_tid.store(0, Ordering::Release);
        self.0.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "affinity")]
fn pin_current_thread(lane: Lane, core: usize) {
    let cores = match core_affinity::get_core_ids() {
        Some(v) if !v.is_empty() => v,
        _ => {
            tracing::warn!(%lane, "failed to get core ids, skipping affinity");
            return;
        }
    };
    match cores.into_iter().find(|c| c.id == core) {
        Some(id) => {
            if !core_affinity::set_for_current(id) {
                tracing::warn!(%lane, core, "failed to pin lane thread");
            }
        }
        None => tracing::warn!(%lane, core, "no such core, skipping affinity"),
    }
}

#[cfg(not(feature = "affinity"))]
fn pin_current_thread(lane: Lane, core: usize) {
    tracing::warn!(%lane, core, "built without affinity support, ignoring pin request");
}
