//! Scheduling strategies and the pending-set/batch coalescing primitive.
//!
//! A [`Scheduler`] exposes exactly one operation — "run this closure later
//! on strategy X" — and nodes are configured with two of them: an
//! `update_scheduler` that defers recomputation, and a `notify_scheduler`
//! that defers subscriber notification. [`SchedulerContext`] layers the
//! insertion-ordered pending set and `batch()` coalescing on top of
//! whichever update scheduler is configured.

use crate::key::NodeKey;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Strategy for running a [`Job`] "later". Implementations must not run the
/// job synchronously on the caller's stack except [`SyncScheduler`], which
/// exists precisely to opt into that.
pub trait Scheduler: Send + Sync {
    /// Arranges for `job` to run according to this strategy.
    fn schedule(&self, job: Job);
}

/// Runs the job synchronously, on the caller's stack. Selecting this as the
/// notify scheduler is how callers opt into synchronous reentrancy:
/// subscriber callbacks then run on the setter's own stack.
#[derive(Debug, Default)]
pub struct SyncScheduler;

impl Scheduler for SyncScheduler {
    fn schedule(&self, job: Job) {
        job();
    }
}

/// Default scheduler: runs the job on the next tick of the ambient tokio
/// runtime, analogous to a JavaScript microtask. Requires an active tokio
/// context (panics via `tokio::spawn` otherwise, matching how a microtask
/// scheduler requires an event loop).
#[derive(Debug, Default)]
pub struct MicrotaskScheduler;

impl Scheduler for MicrotaskScheduler {
    fn schedule(&self, job: Job) {
        tokio::spawn(async move { job() });
    }
}

/// Runs the job after yielding once to the runtime — a coarser-grained
/// analogue of `setImmediate`/message-channel scheduling, letting other
/// already-queued tasks run first.
#[derive(Debug, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, job: Job) {
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            job();
        });
    }
}

/// Runs the job on a background task fed by an unbounded channel, modeling
/// a dedicated message-channel "port" distinct from the default microtask
/// queue (useful when callers want update and notify scheduling to occur
/// on visibly different task boundaries).
pub struct MessageChannelScheduler {
    sender: tokio::sync::mpsc::UnboundedSender<Job>,
}

impl MessageChannelScheduler {
    /// Spawns the background drain task and returns a handle to its port.
    pub fn new() -> Self {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job();
            }
        });
        Self { sender }
    }
}

impl Default for MessageChannelScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for MessageChannelScheduler {
    fn schedule(&self, job: Job) {
        // An unbounded sender only fails once the receiver task has been
        // dropped; there is nothing meaningful to do with the job at that
        // point beyond letting it drop.
        let _ = self.sender.send(job);
    }
}

/// Runs the job after a fixed delay.
pub struct TimeoutScheduler {
    delay: Duration,
}

impl TimeoutScheduler {
    /// Builds a scheduler that defers every job by `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Scheduler for TimeoutScheduler {
    fn schedule(&self, job: Job) {
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job();
        });
    }
}

/// Anything that can be parked in the pending set and later flushed.
/// Implemented by the reactive node core; kept as a trait so the scheduler
/// context has no dependency on node internals.
pub trait Scheduled: Send + Sync {
    /// This item's graph key, used only for diagnostics; identity for
    /// pending-set deduplication is the key passed to
    /// [`SchedulerContext::schedule_update`].
    fn key(&self) -> NodeKey;
    /// Runs the deferred work (a node's `compute()` or `visit()`).
    fn run(&self);
}

/// Owns the process-wide (but fully injectable) pending set, batch flag,
/// and update scheduler, implementing insertion-ordered flush with a
/// single tick per batch. Draining is iterative, so reentrant scheduling
/// during a flush is absorbed into the same flush rather than recursing.
pub struct SchedulerContext {
    pending: Mutex<IndexMap<NodeKey, Arc<dyn Scheduled>>>,
    batch_depth: AtomicUsize,
    flush_scheduled: std::sync::atomic::AtomicBool,
    update_scheduler: Arc<dyn Scheduler>,
}

impl SchedulerContext {
    /// Builds a context using `update_scheduler` as the tick strategy.
    pub fn new(update_scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(IndexMap::new()),
            batch_depth: AtomicUsize::new(0),
            flush_scheduled: std::sync::atomic::AtomicBool::new(false),
            update_scheduler,
        })
    }

    /// Schedules `node` for its deferred work.
    ///
    /// - If `disable_batching`, runs immediately, bypassing the pending set
    ///   entirely.
    /// - Else if a batch is open, adds to the pending set and returns.
    /// - Else adds to the pending set and, if no flush is already in
    ///   flight, requests a single tick from the update scheduler.
    pub fn schedule_update(self: &Arc<Self>, node: Arc<dyn Scheduled>, disable_batching: bool) {
        if disable_batching {
            node.run();
            return;
        }
        let key = node.key();
        self.pending.lock().insert(key, node);
        if self.batch_depth.load(Ordering::SeqCst) > 0 {
            return;
        }
        if self
            .flush_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let ctx = self.clone();
            self.update_scheduler.schedule(Box::new(move || {
                ctx.flush();
                ctx.flush_scheduled.store(false, Ordering::Release);
            }));
        }
    }

    /// Opens a batch window, runs `f`, then flushes synchronously. If `f`
    /// panics, the batch flag is still cleared and a flush still runs
    /// before the panic is resumed, so already-accumulated changes
    /// propagate.
    pub fn batch(self: &Arc<Self>, f: impl FnOnce()) {
        self.batch_depth.fetch_add(1, Ordering::SeqCst);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        self.batch_depth.fetch_sub(1, Ordering::SeqCst);
        if self.batch_depth.load(Ordering::SeqCst) == 0 {
            self.flush();
        }
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    /// Reports whether a batch window is currently open (possibly nested).
    pub fn in_batch(&self) -> bool {
        self.batch_depth.load(Ordering::SeqCst) > 0
    }

    /// Drains the pending set, running each entry's `run()`. Re-checks the
    /// pending set after each pass so that work scheduled by a node's own
    /// `run()` (dependents fanning out) is absorbed into the same flush
    /// rather than left for a later tick.
    pub fn flush(&self) {
        loop {
            let batch: Vec<Arc<dyn Scheduled>> = {
                let mut pending = self.pending.lock();
                if pending.is_empty() {
                    break;
                }
                pending.drain(..).map(|(_, v)| v).collect()
            };
            for node in batch {
                node.run();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        key: NodeKey,
        order: Arc<StdMutex<Vec<u8>>>,
        tag: u8,
    }

    impl Scheduled for Recorder {
        fn key(&self) -> NodeKey {
            self.key
        }
        fn run(&self) {
            self.order.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn sync_scheduler_runs_inline() {
        let ctx = SchedulerContext::new(Arc::new(SyncScheduler));
        let order = Arc::new(StdMutex::new(Vec::new()));
        let node = Arc::new(Recorder {
            key: NodeKey::new([1; 32]),
            order: order.clone(),
            tag: 1,
        });
        ctx.schedule_update(node, false);
        assert_eq!(*order.lock().unwrap(), vec![1]);
    }

    #[test]
    fn disable_batching_bypasses_pending_set() {
        let ctx = SchedulerContext::new(Arc::new(MicrotaskScheduler));
        let order = Arc::new(StdMutex::new(Vec::new()));
        let node = Arc::new(Recorder {
            key: NodeKey::new([2; 32]),
            order: order.clone(),
            tag: 9,
        });
        ctx.schedule_update(node, true);
        assert_eq!(*order.lock().unwrap(), vec![9]);
    }

    #[test]
    fn batch_flushes_synchronously_once() {
        let ctx = SchedulerContext::new(Arc::new(SyncScheduler));
        let order = Arc::new(StdMutex::new(Vec::new()));
        let a = Arc::new(Recorder {
            key: NodeKey::new([3; 32]),
            order: order.clone(),
            tag: 1,
        });
        let b = Arc::new(Recorder {
            key: NodeKey::new([4; 32]),
            order: order.clone(),
            tag: 2,
        });
        ctx.batch(|| {
            ctx.schedule_update(a, false);
            ctx.schedule_update(b, false);
            assert!(order.lock().unwrap().is_empty());
        });
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn batch_still_flushes_after_panic() {
        let ctx = SchedulerContext::new(Arc::new(SyncScheduler));
        let order = Arc::new(StdMutex::new(Vec::new()));
        let a = Arc::new(Recorder {
            key: NodeKey::new([5; 32]),
            order: order.clone(),
            tag: 7,
        });
        let ctx2 = ctx.clone();
        let a2 = a.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx2.batch(|| {
                ctx2.schedule_update(a2, false);
                panic!("boom");
            });
        }));
        assert!(result.is_err());
        assert_eq!(*order.lock().unwrap(), vec![7]);
    }
}
