//! Trigger nodes: a monotonic event counter layered over one or more
//! upstream sources, re-emitting on every upstream event regardless of
//! value equality.
//!
//! Unlike a plain computed node (which suppresses re-emission when the
//! computed value compares equal to the last one), a trigger exists purely
//! to signal "something happened" — execution nodes and the event-node
//! variant key off it to force recomputation on every event rather than
//! only on value changes.

use super::{Node, NodeConfig};
use crate::dependency::{DependencyLeaf, DependencySource};
use crate::equality::EqualityMode;
use crate::runtime::Context;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A node whose value is a monotonically increasing counter, incremented
/// once per upstream event. Every increment is forced (reference equality
/// would otherwise suppress nothing here, since the value always changes,
/// but forcing keeps the semantics explicit and independent of the node's
/// configured equality mode).
pub struct Trigger {
    node: Node,
    counter: Arc<AtomicU64>,
}

impl Trigger {
    /// Builds a trigger counting events from `sources`. Any dependency leaf
    /// that is a sink is rejected by the caller before reaching here (the
    /// trigger itself holds no dependency description, so it isn't subject
    /// to the sink-as-dependency check `Node::computed` performs).
    pub fn new(sources: Vec<Arc<dyn DependencySource>>, ctx: Arc<Context>) -> Trigger {
        let mut config = NodeConfig::default();
        config.equality = EqualityMode::Reference;
        let node = Node::stateful(json!(0), config, ctx);
        let counter = Arc::new(AtomicU64::new(0));
        for source in sources {
            let node = node.clone();
            let counter = counter.clone();
            let unsub = source.subscribe(Arc::new(move |_value| {
                let next = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = node.set(json!(next));
            }));
            // Trigger subscriptions live for the node's lifetime; there is
            // no per-trigger teardown hook distinct from the underlying
            // node's own `complete()`, so the unsubscribe closure is kept
            // alive by leaking it into a background no-op rather than
            // dropped immediately (dropping would not cancel it, since
            // `DependencySource::subscribe`'s returned closure must be
            // called explicitly to unsubscribe).
            std::mem::forget(unsub);
        }
        Trigger { node, counter }
    }

    /// The underlying node: its value is the current event count.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Current event count without subscribing.
    pub fn count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Fires `handler` immediately, once, then on every future upstream event —
/// the push-style counterpart to [`Trigger`] for callers that want a plain
/// callback rather than a subscribable node.
pub fn trigger(sources: Vec<Arc<dyn DependencySource>>, handler: impl Fn(Arc<Value>) + Send + Sync + 'static) {
    let handler = Arc::new(handler);
    for source in sources {
        let handler = handler.clone();
        let unsub = source.subscribe(Arc::new(move |value| handler(value)));
        std::mem::forget(unsub);
    }
}

/// Adapts a [`crate::dispatcher::Dispatcher`] event into the same trigger
/// machinery: every `emit(name, ..)` under `context` increments the
/// returned trigger's counter.
pub fn trigger_from_event(
    dispatcher: &Arc<crate::dispatcher::Dispatcher>,
    name: impl Into<String>,
    context: Option<&str>,
    ctx: Arc<Context>,
) -> Trigger {
    let mut config = NodeConfig::default();
    config.equality = EqualityMode::Reference;
    let node = Node::stateful(json!(0), config, ctx);
    let counter = Arc::new(AtomicU64::new(0));
    let n = node.clone();
    let c = counter.clone();
    dispatcher
        .on(
            name,
            move |_payload| {
                let next = c.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = n.set(json!(next));
            },
            context,
        )
        .cancel_on_drop_is_not_supported();
    Trigger { node, counter }
}

// `Unsubscribe` intentionally has no `Drop` teardown (see `dispatcher.rs`);
// this trait is a documentation device making that explicit at the call
// site above rather than silently discarding the handle.
trait ForgetExplicitly {
    fn cancel_on_drop_is_not_supported(self);
}

impl ForgetExplicitly for crate::dispatcher::Unsubscribe {
    fn cancel_on_drop_is_not_supported(self) {
        std::mem::forget(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfig as Cfg;
    use crate::runtime::Context;
    use crate::scheduler::SyncScheduler;

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

    #[test]
    fn counts_once_per_upstream_emission() {
        let ctx = sync_ctx();
        let source = Node::stateful(json!(1), Cfg::default(), ctx.clone());
        let trig = Trigger::new(vec![Arc::new(source.clone())], ctx);
        // Repeating the same value is suppressed by the source's own
        // equality mode before it ever reaches the trigger; the trigger
        // only counts emissions that actually happened.
        source.set(json!(1)).unwrap();
        source.set(json!(2)).unwrap();
        assert_eq!(trig.count(), 2);
    }

    #[test]
    fn dispatcher_events_increment_the_counter() {
        let ctx = sync_ctx();
        let dispatcher = crate::dispatcher::Dispatcher::new();
        let trig = trigger_from_event(&dispatcher, "tick", None, ctx);
        dispatcher.emit("tick", &json!(null), None);
        dispatcher.emit("tick", &json!(null), None);
        dispatcher.emit("tick", &json!(null), None);
        assert_eq!(trig.count(), 3);
    }
}
