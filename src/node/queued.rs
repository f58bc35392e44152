//! The queued node mix-in: wraps a computed node so async recomputations
//! are consumed strictly in the order their triggering dependency snapshot
//! was taken, through a bounded queue with a configurable overflow policy.

use super::{ComputeFn, ComputeOutcome, ComputeStream, Node, NodeConfig};
use crate::dependency::{DependencyDescription, DependencyLeaf, DependencyValues};
use crate::error::{DagifyError, Result};
use crate::runtime::Context;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// What to do when the queue is full and a new snapshot arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Force admission, growing past the configured bound.
    Enqueue,
    /// Drop the oldest queued item to make room.
    DropOldest,
    /// Discard the incoming item.
    DropNewest,
    /// Terminate the node via `error()`.
    Error,
}

/// Context handed to an `on_overflow` callback.
pub struct OverflowInfo {
    /// Current queue length, before the incoming item is handled.
    pub queue_length: usize,
    /// The strategy that would apply absent an override.
    pub default_strategy: OverflowStrategy,
}

/// Queued-node configuration.
pub struct QueuedConfig {
    /// Maximum queue length before `overflow_strategy` applies. `None` is
    /// unbounded.
    pub max_queue_length: Option<usize>,
    /// Strategy applied when the queue is full.
    pub overflow_strategy: OverflowStrategy,
    /// Optional per-event override of `overflow_strategy`.
    pub on_overflow: Option<Arc<dyn Fn(&OverflowInfo) -> OverflowStrategy + Send + Sync>>,
    /// Maximum buffered-but-undrained items for a push-source (stream-mode)
    /// compute result. `None` is unbounded.
    pub stream_max_buffer: Option<usize>,
    /// Strategy applied when a stream-mode compute's drain buffer is full.
    pub stream_overflow_strategy: OverflowStrategy,
}

impl Default for QueuedConfig {
    fn default() -> Self {
        Self {
            max_queue_length: None,
            overflow_strategy: OverflowStrategy::Enqueue,
            on_overflow: None,
            stream_max_buffer: None,
            stream_overflow_strategy: OverflowStrategy::DropOldest,
        }
    }
}

struct Shared {
    compute: ComputeFn,
    queue: Mutex<VecDeque<DependencyValues>>,
    config: QueuedConfig,
    target: Node,
    draining: AtomicBool,
    dep_subs: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// A computed node whose async recomputations are serialized through a
/// bounded FIFO queue rather than the "newest cancels oldest" policy used
/// by a plain computed node.
///
/// The node's externally-visible surface (value, subscribe, complete) is
/// the wrapped `target`; [`QueuedNode::node`] returns it directly so a
/// queued node can be used anywhere a `Node` is expected.
pub struct QueuedNode {
    shared: Arc<Shared>,
}

impl QueuedNode {
    /// Builds a queued node whose `compute` runs over `dependencies`,
    /// serializing recomputations through a queue governed by
    /// `queued_config`.
    pub fn new(
        compute: ComputeFn,
        dependencies: DependencyDescription,
        node_config: NodeConfig,
        queued_config: QueuedConfig,
        ctx: Arc<Context>,
    ) -> Result<QueuedNode> {
        let target = Node::stateful_suppressed(node_config, ctx.clone());
        // The target starts NO_EMIT-pending: nothing has been queued yet.
        // We reuse a stateful node purely as the emission/subscription
        // surface, never calling its own `set`, only `force_set_value`.
        let shared = Arc::new(Shared {
            compute,
            queue: Mutex::new(VecDeque::new()),
            config: queued_config,
            target,
            draining: AtomicBool::new(false),
            dep_subs: Mutex::new(Vec::new()),
        });
        let node = QueuedNode { shared };
        node.wire_dependencies(dependencies);
        Ok(node)
    }

    /// The underlying emission surface: subscribe, read the current value,
    /// or `complete()` through this handle.
    pub fn node(&self) -> &Node {
        &self.shared.target
    }

    /// Tears down dependency subscriptions and completes the underlying
    /// node. Idempotent (delegates to `Node::complete`'s idempotence).
    pub fn complete(&self) {
        for unsub in self.shared.dep_subs.lock().drain(..) {
            unsub();
        }
        self.shared.target.complete();
    }

    fn wire_dependencies(&self, dependencies: DependencyDescription) {
        let dependencies = Arc::new(Mutex::new(dependencies));
        let leaves: Vec<DependencyLeaf> = dependencies
            .lock()
            .iter()
            .map(|(_, leaf)| leaf.clone())
            .collect();
        for leaf in leaves {
            if let DependencyLeaf::Source(source) = leaf {
                let shared = self.shared.clone();
                let deps = dependencies.clone();
                let unsub = source.subscribe(Arc::new(move |_value| {
                    if let Some(values) = deps.lock().snapshot_all() {
                        enqueue(&shared, values);
                    }
                }));
                self.shared.dep_subs.lock().push(unsub);
            }
        }
        // Attempt an initial enqueue, mirroring a plain computed node's
        // synchronous first compute, if every dependency already has a
        // value.
        if let Some(values) = dependencies.lock().snapshot_all() {
            enqueue(&self.shared, values);
        }
    }
}

fn enqueue(shared: &Arc<Shared>, values: DependencyValues) {
    {
        let mut queue = shared.queue.lock();
        if let Some(max) = shared.config.max_queue_length {
            if queue.len() >= max {
                let info = OverflowInfo {
                    queue_length: queue.len(),
                    default_strategy: shared.config.overflow_strategy,
                };
                let strategy = shared
                    .config
                    .on_overflow
                    .as_ref()
                    .map(|f| f(&info))
                    .unwrap_or(shared.config.overflow_strategy);
                match strategy {
                    OverflowStrategy::Enqueue => queue.push_back(values),
                    OverflowStrategy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(values);
                    }
                    OverflowStrategy::DropNewest => {}
                    OverflowStrategy::Error => {
                        drop(queue);
                        shared
                            .target
                            .report_error(DagifyError::QueueOverflow(shared.target.key().to_string()));
                        return;
                    }
                }
            } else {
                queue.push_back(values);
            }
        } else {
            queue.push_back(values);
        }
    }
    drain(shared.clone());
}

fn drain(shared: Arc<Shared>) {
    if shared.draining.swap(true, Ordering::AcqRel) {
        return;
    }
    tokio::spawn(async move {
        loop {
            let next = shared.queue.lock().pop_front();
            let Some(values) = next else {
                shared.draining.store(false, Ordering::Release);
                return;
            };
            match (shared.compute)(&values) {
                ComputeOutcome::NoEmit => {}
                ComputeOutcome::Value(v) => {
                    shared.target.force_set_value(Arc::new(v), false);
                }
                ComputeOutcome::Future(fut) => match fut.await {
                    Ok(v) => shared.target.force_set_value(Arc::new(v), false),
                    Err(err) => shared.target.report_error(err),
                },
                ComputeOutcome::Stream(stream) => {
                    drain_stream_mode(
                        stream,
                        shared.config.stream_max_buffer,
                        shared.config.stream_overflow_strategy,
                        &shared.target,
                    )
                    .await;
                }
            }
            // Re-check under the lock before releasing `draining` so a
            // concurrent `enqueue` during this iteration is absorbed into
            // the same drain loop instead of racing a second spawn.
            if shared.queue.lock().is_empty() {
                shared.draining.store(false, Ordering::Release);
                if shared.queue.lock().is_empty() {
                    return;
                }
                if shared.draining.swap(true, Ordering::AcqRel) {
                    return;
                }
            }
        }
    });
}

/// A bounded hand-off between a push-source compute's emissions and the
/// drain loop consuming them, so a producer faster than `_setValue` fills a
/// bounded buffer instead of growing it without limit.
struct StreamBuffer {
    queue: Mutex<VecDeque<Result<serde_json::Value>>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Pumps `stream` into a bounded buffer governed by `max`/`strategy`,
/// draining it in order through `_setValue` until the source completes.
/// Resolves once the stream completes and the buffer has fully drained,
/// mirroring the non-stream-mode "one in-flight compute at a time" rule.
async fn drain_stream_mode(
    mut stream: ComputeStream,
    max: Option<usize>,
    strategy: OverflowStrategy,
    target: &Node,
) {
    let buf = Arc::new(StreamBuffer {
        queue: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
    });
    let pump_buf = buf.clone();
    let pump_target = target.clone();
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let mut overflowed = false;
            {
                let mut queue = pump_buf.queue.lock();
                if let Some(max) = max {
                    if queue.len() >= max {
                        match strategy {
                            OverflowStrategy::Enqueue => queue.push_back(item),
                            OverflowStrategy::DropOldest => {
                                queue.pop_front();
                                queue.push_back(item);
                            }
                            OverflowStrategy::DropNewest => {}
                            OverflowStrategy::Error => overflowed = true,
                        }
                    } else {
                        queue.push_back(item);
                    }
                } else {
                    queue.push_back(item);
                }
            }
            pump_buf.notify.notify_one();
            if overflowed {
                pump_target.report_error(DagifyError::StreamOverflow(pump_target.key().to_string()));
                break;
            }
        }
        pump_buf.closed.store(true, Ordering::Release);
        pump_buf.notify.notify_one();
    });
    loop {
        let item = buf.queue.lock().pop_front();
        match item {
            Some(Ok(v)) => target.force_set_value(Arc::new(v), false),
            Some(Err(err)) => target.report_error(err),
            None => {
                if buf.closed.load(Ordering::Acquire) && buf.queue.lock().is_empty() {
                    return;
                }
                buf.notify.notified().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyLeaf;
    use crate::node::Observer;
    use crate::runtime::Context;
    use crate::scheduler::SyncScheduler;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn sync_ctx() -> Arc<Context> {
        Context::new(
            Arc::new(SyncScheduler),
            Arc::new(SyncScheduler),
            crate::dispatcher::Dispatcher::new(),
            Arc::new(crate::registry::TypeRegistry::with_builtins()),
            Arc::new(crate::registry::EncoderRegistry::new()),
            Arc::new(crate::key::RandomKeyGenerator),
        )
    }

    #[tokio::test]
    async fn drop_newest_keeps_earliest_admitted_items_in_order() {
        let ctx = sync_ctx();
        let source = Node::stateful(json!(0), NodeConfig::default(), ctx.clone());
        let compute: ComputeFn = Arc::new(|values| {
            let DependencyValues::Ordered(v) = values else {
                unreachable!()
            };
            ComputeOutcome::Value(v[0].as_ref().clone())
        });
        let deps = DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(source.clone()))]);
        let queued = QueuedNode::new(
            compute,
            deps,
            NodeConfig::default(),
            QueuedConfig {
                max_queue_length: Some(2),
                overflow_strategy: OverflowStrategy::DropNewest,
                on_overflow: None,
                ..Default::default()
            },
            ctx,
        )
        .unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _c = queued
            .node()
            .subscribe(Observer::on_next(move |v| s.lock().unwrap().push((*v).clone())))
            .unwrap();
        source.set(json!(1)).unwrap();
        source.set(json!(2)).unwrap();
        source.set(json!(3)).unwrap();
        source.set(json!(4)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let observed = seen.lock().unwrap().clone();
        assert!(observed.contains(&json!(1)));
        assert!(!observed.contains(&json!(4)));
    }

    #[tokio::test]
    async fn stream_mode_drains_every_item_within_the_buffer_bound() {
        let ctx = sync_ctx();
        let source = Node::stateful(json!(0), NodeConfig::default(), ctx.clone());
        // Tags each stream's items with the dependency snapshot that produced
        // it, so a run triggered by `source.set(5)` is distinguishable from
        // the construction-time initial compute (which snapshots `source`'s
        // starting value of 0).
        let compute: ComputeFn = Arc::new(|values| {
            let DependencyValues::Ordered(v) = values else {
                unreachable!()
            };
            let tag = v[0].as_i64().unwrap() * 10;
            let items: Vec<crate::error::Result<serde_json::Value>> =
                vec![Ok(json!(tag + 1)), Ok(json!(tag + 2)), Ok(json!(tag + 3))];
            let stream: ComputeStream = Box::pin(futures::stream::iter(items));
            ComputeOutcome::Stream(stream)
        });
        let deps = DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(source.clone()))]);
        let queued = QueuedNode::new(
            compute,
            deps,
            NodeConfig::default(),
            QueuedConfig {
                stream_max_buffer: Some(8),
                stream_overflow_strategy: OverflowStrategy::DropOldest,
                ..Default::default()
            },
            ctx,
        )
        .unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _c = queued
            .node()
            .subscribe(Observer::on_next(move |v| s.lock().unwrap().push((*v).clone())))
            .unwrap();
        source.set(json!(5)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let observed = seen.lock().unwrap().clone();
        let tail = observed[observed.len() - 3..].to_vec();
        assert_eq!(tail, vec![json!(51), json!(52), json!(53)]);
    }

    #[tokio::test]
    async fn stream_mode_overflow_with_error_strategy_terminates_the_node() {
        let ctx = sync_ctx();
        let source = Node::stateful(json!(0), NodeConfig::default(), ctx.clone());
        let compute: ComputeFn = Arc::new(|_values| {
            let items: Vec<crate::error::Result<serde_json::Value>> =
                vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))];
            let stream: ComputeStream = Box::pin(futures::stream::iter(items));
            ComputeOutcome::Stream(stream)
        });
        let deps = DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(source.clone()))]);
        let queued = QueuedNode::new(
            compute,
            deps,
            NodeConfig::default(),
            QueuedConfig {
                stream_max_buffer: Some(1),
                stream_overflow_strategy: OverflowStrategy::Error,
                ..Default::default()
            },
            ctx,
        )
        .unwrap();
        let errored = Arc::new(StdMutex::new(None));
        let e = errored.clone();
        let _c = queued
            .node()
            .subscribe(Observer {
                next: None,
                error: Some(Arc::new(move |err| *e.lock().unwrap() = Some(err.clone()))),
                complete: None,
            })
            .unwrap();
        source.set(json!(1)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(matches!(
            errored.lock().unwrap().as_ref(),
            Some(DagifyError::StreamOverflow(_))
        ));
    }
}
