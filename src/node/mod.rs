//! The reactive node core: the stateful/computed vertex that holds a
//! value, owns its dependency subscriptions, runs its compute function,
//! coalesces updates through the scheduler, and broadcasts to subscribers.
//!
//! This module implements the shared core; [`queued`] layers a serialized,
//! bounded-queue worker on top of it for async recomputation, and
//! [`variants`]/[`trigger`] build the specialized node flavors out of it.

pub mod queued;
pub mod trigger;
pub mod variants;

use crate::dependency::{DependencyDescription, DependencyLeaf, DependencyListener, DependencySource, DependencyValues};
use crate::emission::Emission;
use crate::equality::{values_equal, EqualityMode};
use crate::error::{DagifyError, Result};
use crate::key::NodeKey;
use crate::runtime::Context;
use crate::scheduler::{Scheduled, Scheduler};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Callback invoked with a node's newly emitted value.
pub type NextFn = Arc<dyn Fn(Arc<Value>) + Send + Sync>;
/// Callback invoked when a node terminates with an error.
pub type ErrorFn = Arc<dyn Fn(&DagifyError) + Send + Sync>;
/// Callback invoked when a node completes.
pub type CompleteFn = Arc<dyn Fn() + Send + Sync>;

/// A subscriber's three callbacks. Any of them may be omitted.
#[derive(Clone, Default)]
pub struct Observer {
    /// Called on every emitted value (after equality-based suppression).
    pub next: Option<NextFn>,
    /// Called once, terminally, on error.
    pub error: Option<ErrorFn>,
    /// Called once, terminally, on completion.
    pub complete: Option<CompleteFn>,
}

impl Observer {
    /// Builds an observer with only a `next` callback, the common case.
    pub fn on_next(f: impl Fn(Arc<Value>) + Send + Sync + 'static) -> Self {
        Self {
            next: Some(Arc::new(f)),
            error: None,
            complete: None,
        }
    }
}

struct Subscriber {
    id: u64,
    observer: Observer,
    closed: AtomicBool,
    error_notified: AtomicBool,
    internal: bool,
}

/// A future-producing compute result (the "promise-like" branch of the
/// compute algorithm).
pub type ComputeFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
/// A stream-producing compute result (the "push-source" branch).
pub type ComputeStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// What a compute function can return.
pub enum ComputeOutcome {
    /// Suppress propagation entirely.
    NoEmit,
    /// A synchronous, ready value.
    Value(Value),
    /// An async value, resolved once.
    Future(ComputeFuture),
    /// An async sequence of values.
    Stream(ComputeStream),
}

/// A node's compute function: takes the resolved dependency snapshot,
/// returns a [`ComputeOutcome`].
pub type ComputeFn = Arc<dyn Fn(&DependencyValues) -> ComputeOutcome + Send + Sync>;

/// Configuration fixed at node construction.
#[derive(Clone)]
pub struct NodeConfig {
    /// Terminal node; rejects being subscribed to as a dependency.
    pub sink: bool,
    /// Comparator used before emission.
    pub equality: EqualityMode,
    /// Encoder registry descriptor for byte-buffer (de)serialization.
    pub value_encoding: Option<String>,
    /// Type registry tag validated on every incoming value.
    pub type_tag: Option<String>,
    /// Bypasses the pending set: `compute()`/`visit()` runs immediately.
    pub disable_batching: bool,
    /// Number of initial emissions to suppress on each new subscriber.
    pub skip: usize,
    /// Recompute only after this many `visit()` calls (activity threshold).
    /// `None` means `visit()` has no effect.
    pub activation_threshold: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sink: false,
            equality: EqualityMode::default(),
            value_encoding: None,
            type_tag: None,
            disable_batching: false,
            skip: 0,
            activation_threshold: None,
        }
    }
}

enum Kind {
    Stateful {
        /// Dependency subscription when constructed from an observable-like
        /// source; `set` replaces it.
        source_sub: Mutex<Option<DepSub>>,
    },
    Computed {
        compute: ComputeFn,
        dependencies: Mutex<DependencyDescription>,
    },
}

/// Per-node lifecycle state, mirroring the state machine: `Idle`,
/// `Pending`, `Running`, `Completed`, `Errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No recomputation scheduled.
    Idle,
    /// Scheduled, awaiting a flush.
    Pending,
    /// Compute function currently executing.
    Running,
    /// `complete()` has run; terminal.
    Completed,
    /// Last compute or set ended in an unrecovered error.
    Errored,
}

struct DepSub(Option<Box<dyn FnOnce() + Send>>);

impl DepSub {
    fn cancel(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for DepSub {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A bounded-time-window replay stream of dependency errors, visible to
/// downstream nodes without terminating the node that raised them.
struct ErrorStream {
    window: Duration,
    entries: Mutex<VecDeque<(Instant, DagifyError)>>,
}

impl ErrorStream {
    fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, err: DagifyError) {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.push_back((now, err));
        while let Some((t, _)) = entries.front() {
            if now.duration_since(*t) > self.window {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn recent(&self) -> Vec<DagifyError> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(t, _)| now.duration_since(*t) <= self.window)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

/// Handle returned by [`Node::subscribe`]. Dropping it leaves the
/// subscription active; call [`Canceller::cancel`] to remove it.
pub struct Canceller {
    node: Node,
    id: u64,
}

impl Canceller {
    /// Removes the subscriber. If it was the last one, dependency
    /// subscriptions are detached (computed nodes only).
    pub fn cancel(self) {
        self.node.remove_subscriber(self.id);
    }
}

struct NodeInner {
    key: NodeKey,
    kind: Kind,
    config: NodeConfig,
    ctx: Arc<Context>,
    value: RwLock<Emission>,
    last_emitted: RwLock<Option<Arc<Value>>>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    next_subscriber_id: AtomicU64,
    dependency_subs: Mutex<Vec<DepSub>>,
    dependencies_attached: AtomicBool,
    completed: AtomicBool,
    skip_remaining: AtomicUsize,
    error_stream: ErrorStream,
    inflight: Mutex<Option<tokio::task::JoinHandle<()>>>,
    state: Mutex<NodeState>,
    activity_level: AtomicU64,
}

/// A reactive graph vertex. Cheap to clone (an `Arc` underneath); clones
/// refer to the same node.
#[derive(Clone)]
pub struct Node(Arc<NodeInner>);

impl Node {
    /// Builds a stateful node holding `value`.
    pub fn stateful(value: Value, config: NodeConfig, ctx: Arc<Context>) -> Node {
        Self::stateful_with(Emission::Value(Arc::new(value)), config, ctx)
    }

    /// Builds a stateful node starting in the `NO_EMIT`-pending state: no
    /// value until the first `force_set_value`/`set`. Used by node variants
    /// (execution, queued) whose emission surface is a plain stateful node
    /// that hasn't produced anything yet, so an early subscriber sees the
    /// same "nothing to deliver" state a fresh computed node has, rather
    /// than an arbitrary placeholder value.
    pub(crate) fn stateful_suppressed(config: NodeConfig, ctx: Arc<Context>) -> Node {
        Self::stateful_with(Emission::NoEmit, config, ctx)
    }

    fn stateful_with(value: Emission, config: NodeConfig, ctx: Arc<Context>) -> Node {
        let key = ctx.keys().generate();
        let skip = config.skip;
        let inner = NodeInner {
            key,
            kind: Kind::Stateful {
                source_sub: Mutex::new(None),
            },
            config,
            ctx,
            value: RwLock::new(value),
            last_emitted: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
            dependency_subs: Mutex::new(Vec::new()),
            dependencies_attached: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            skip_remaining: AtomicUsize::new(skip),
            error_stream: ErrorStream::new(Duration::from_secs(5)),
            inflight: Mutex::new(None),
            state: Mutex::new(NodeState::Idle),
            activity_level: AtomicU64::new(0),
        };
        Node(Arc::new(inner))
    }

    /// Builds a computed node from `compute` over `dependencies`, attaching
    /// dependency subscriptions and attempting an initial synchronous
    /// compute, as required at construction.
    pub fn computed(
        compute: ComputeFn,
        dependencies: DependencyDescription,
        config: NodeConfig,
        ctx: Arc<Context>,
    ) -> Result<Node> {
        for (_, leaf) in dependencies.iter() {
            if let DependencyLeaf::Source(source) = leaf {
                if source.is_sink() {
                    return Err(DagifyError::InvalidDependency(format!(
                        "{} is a sink and cannot be used as a dependency",
                        source.key()
                    )));
                }
            }
        }
        let key = ctx.keys().generate();
        let skip = config.skip;
        let inner = NodeInner {
            key,
            kind: Kind::Computed {
                compute,
                dependencies: Mutex::new(dependencies),
            },
            config,
            ctx,
            value: RwLock::new(Emission::NoEmit),
            last_emitted: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
            dependency_subs: Mutex::new(Vec::new()),
            dependencies_attached: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            skip_remaining: AtomicUsize::new(skip),
            error_stream: ErrorStream::new(Duration::from_secs(5)),
            inflight: Mutex::new(None),
            state: Mutex::new(NodeState::Idle),
            activity_level: AtomicU64::new(0),
        };
        let node = Node(Arc::new(inner));
        node.attach_dependencies();
        node.compute();
        Ok(node)
    }

    /// This node's identity.
    pub fn key(&self) -> NodeKey {
        self.0.key
    }

    /// Whether this is a sink (terminal) node.
    pub fn is_sink(&self) -> bool {
        self.0.config.sink
    }

    /// Whether this node carries a compute function.
    pub fn is_computed(&self) -> bool {
        matches!(self.0.kind, Kind::Computed { .. })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.0.state.lock()
    }

    /// Current emission.
    pub fn current(&self) -> Emission {
        self.0.value.read().clone()
    }

    // ---- stateful mutation -------------------------------------------------

    /// Sets a stateful node's value. Fails with [`DagifyError::ComputedSet`]
    /// on a computed node.
    pub fn set(&self, value: Value) -> Result<()> {
        match &self.0.kind {
            Kind::Computed { .. } => Err(DagifyError::ComputedSet(self.0.key.to_string())),
            Kind::Stateful { .. } => {
                let value = self.decode_and_validate(value)?;
                self.schedule_set_value(value, false);
                Ok(())
            }
        }
    }

    /// Alias: `set` on stateful nodes, `compute()` on computed nodes. The
    /// value argument is ignored for computed nodes, whose value is driven
    /// entirely by their dependencies.
    pub fn next(&self, value: Value) -> Result<()> {
        match &self.0.kind {
            Kind::Computed { .. } => {
                self.schedule_compute();
                Ok(())
            }
            Kind::Stateful { .. } => self.set(value),
        }
    }

    /// For computed nodes, schedules `compute()`. For stateful nodes: a
    /// callable-like updater (`Some(f)`) maps the current value; `None`
    /// forces re-emission of the current value (bypassing equality).
    pub fn update(&self, updater: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>) -> Result<()> {
        match &self.0.kind {
            Kind::Computed { .. } => {
                self.schedule_compute();
                Ok(())
            }
            Kind::Stateful { .. } => match updater {
                Some(f) => {
                    let current = self
                        .0
                        .value
                        .read()
                        .value()
                        .cloned()
                        .unwrap_or_else(|| Arc::new(Value::Null));
                    let updated = f(&current);
                    self.set(updated)
                }
                None => {
                    if let Some(current) = self.0.value.read().value().cloned() {
                        self.schedule_set_value_arc(current, true);
                    }
                    Ok(())
                }
            },
        }
    }

    // ---- subscription -------------------------------------------------

    /// Registers an observer. Fails with [`DagifyError::SinkSubscribe`] on
    /// sink nodes. If already completed, immediately invokes `complete` and
    /// returns a no-op canceller.
    pub fn subscribe(&self, observer: Observer) -> Result<Canceller> {
        if self.0.config.sink {
            return Err(DagifyError::SinkSubscribe(self.0.key.to_string()));
        }
        if self.0.completed.load(Ordering::SeqCst) {
            if let Some(complete) = &observer.complete {
                complete();
            }
            return Ok(Canceller {
                node: self.clone(),
                id: 0,
            });
        }
        let id = self.add_subscriber(observer, false);
        if !self.0.dependencies_attached.load(Ordering::SeqCst) {
            self.attach_dependencies();
        }
        self.deliver_initial(id);
        Ok(Canceller {
            node: self.clone(),
            id,
        })
    }

    fn add_subscriber(&self, observer: Observer, internal: bool) -> u64 {
        let id = self.0.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.0.subscribers.lock().push(Arc::new(Subscriber {
            id,
            observer,
            closed: AtomicBool::new(false),
            error_notified: AtomicBool::new(false),
            internal,
        }));
        id
    }

    fn deliver_initial(&self, id: u64) {
        let skip = self.0.skip_remaining.load(Ordering::SeqCst);
        if skip > 0 {
            self.0.skip_remaining.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        let value = self.0.value.read().clone();
        if let Emission::Value(v) = value {
            let subscribers = self.0.subscribers.lock();
            if let Some(sub) = subscribers.iter().find(|s| s.id == id) {
                if let Some(next) = &sub.observer.next {
                    next(v);
                }
            }
        }
    }

    fn remove_subscriber(&self, id: u64) {
        let mut subscribers = self.0.subscribers.lock();
        subscribers.retain(|s| s.id != id);
        let empty = subscribers.is_empty();
        drop(subscribers);
        if empty && self.is_computed() {
            self.detach_dependencies();
        }
    }

    /// Registers `next` as an internal (dependency-facing) subscriber, not
    /// counted against the "last subscriber leaves" detach rule triggered
    /// by [`Node::subscribe`]'s own cancellers. Used when this node is
    /// consumed as a [`DependencySource`].
    fn add_internal_subscriber(&self, next: NextFn) -> u64 {
        self.add_subscriber(
            Observer {
                next: Some(next),
                error: None,
                complete: None,
            },
            true,
        )
    }

    // ---- error / completion -------------------------------------------------

    /// Terminates all subscribers with `error`.
    pub fn error(&self, err: DagifyError) {
        *self.0.state.lock() = NodeState::Errored;
        self.0.error_stream.push(err.clone());
        let subscribers = self.0.subscribers.lock().clone();
        for sub in subscribers.iter() {
            if sub.closed.swap(true, Ordering::SeqCst) {
                continue;
            }
            if sub.error_notified.swap(true, Ordering::SeqCst) {
                continue;
            }
            if let Some(handler) = &sub.observer.error {
                handler(&err);
            }
        }
        warn!(node = %self.0.key, error = %err, "node entered error state");
    }

    /// Terminates all subscriber streams, detaches dependency subscriptions,
    /// and cancels in-flight async work. Idempotent.
    pub fn complete(&self) {
        if self.0.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.0.state.lock() = NodeState::Completed;
        if let Some(handle) = self.0.inflight.lock().take() {
            handle.abort();
        }
        self.detach_dependencies();
        if let Kind::Stateful { source_sub } = &self.0.kind {
            source_sub.lock().take();
        }
        let subscribers = self.0.subscribers.lock().clone();
        for sub in subscribers.iter() {
            if sub.closed.swap(true, Ordering::SeqCst) {
                continue;
            }
            if let Some(complete) = &sub.observer.complete {
                complete();
            }
        }
        self.0.subscribers.lock().clear();
        debug!(node = %self.0.key, "node completed");
    }

    // ---- dependency management -------------------------------------------------

    /// Adds a dependency leaf (computed nodes only), re-subscribes, and
    /// triggers a recompute.
    pub fn add_dependency(&self, leaf: DependencyLeaf) -> Result<()> {
        self.reject_sink_leaf(&leaf)?;
        match &self.0.kind {
            Kind::Stateful { .. } => Err(DagifyError::InvalidDependency(format!(
                "{} is not a computed node",
                self.0.key
            ))),
            Kind::Computed { dependencies, .. } => {
                {
                    let mut deps = dependencies.lock();
                    match &mut *deps {
                        DependencyDescription::Ordered(v) => v.push(leaf),
                        DependencyDescription::Keyed(m) => {
                            let next_index = m.len();
                            m.insert(format!("_{next_index}"), leaf);
                        }
                    }
                }
                self.resubscribe_dependencies();
                self.schedule_compute();
                Ok(())
            }
        }
    }

    /// Removes a dependency leaf by source key, re-subscribes, and triggers
    /// a recompute.
    pub fn remove_dependency(&self, key: NodeKey) -> Result<()> {
        match &self.0.kind {
            Kind::Stateful { .. } => Err(DagifyError::InvalidDependency(format!(
                "{} is not a computed node",
                self.0.key
            ))),
            Kind::Computed { dependencies, .. } => {
                {
                    let mut deps = dependencies.lock();
                    match &mut *deps {
                        DependencyDescription::Ordered(v) => {
                            v.retain(|leaf| leaf.key() != Some(key));
                        }
                        DependencyDescription::Keyed(m) => {
                            m.retain(|_, leaf| leaf.key() != Some(key));
                        }
                    }
                }
                self.resubscribe_dependencies();
                self.schedule_compute();
                Ok(())
            }
        }
    }

    /// Replaces the entire dependency description atomically.
    pub fn set_dependencies(&self, dependencies: DependencyDescription) -> Result<()> {
        match &self.0.kind {
            Kind::Stateful { .. } => Err(DagifyError::InvalidDependency(format!(
                "{} is not a computed node",
                self.0.key
            ))),
            Kind::Computed {
                dependencies: slot, ..
            } => {
                for (_, leaf) in dependencies.iter() {
                    self.reject_sink_leaf(leaf)?;
                }
                *slot.lock() = dependencies;
                self.resubscribe_dependencies();
                self.schedule_compute();
                Ok(())
            }
        }
    }

    /// Mutates the dependency description in place via `f`, then
    /// re-subscribes and triggers a recompute.
    pub fn update_dependencies(&self, f: impl FnOnce(&mut DependencyDescription)) -> Result<()> {
        match &self.0.kind {
            Kind::Stateful { .. } => Err(DagifyError::InvalidDependency(format!(
                "{} is not a computed node",
                self.0.key
            ))),
            Kind::Computed { dependencies, .. } => {
                f(&mut dependencies.lock());
                self.resubscribe_dependencies();
                self.schedule_compute();
                Ok(())
            }
        }
    }

    fn reject_sink_leaf(&self, leaf: &DependencyLeaf) -> Result<()> {
        if let DependencyLeaf::Source(source) = leaf {
            if source.is_sink() {
                return Err(DagifyError::InvalidDependency(format!(
                    "{} is a sink and cannot be used as a dependency",
                    source.key()
                )));
            }
        }
        Ok(())
    }

    fn attach_dependencies(&self) {
        if self.0.dependencies_attached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.resubscribe_dependencies();
    }

    fn detach_dependencies(&self) {
        if !self.0.dependencies_attached.swap(false, Ordering::SeqCst) {
            return;
        }
        self.0.dependency_subs.lock().clear();
    }

    fn resubscribe_dependencies(&self) {
        if !self.0.dependencies_attached.load(Ordering::SeqCst) {
            return;
        }
        let Kind::Computed { dependencies, .. } = &self.0.kind else {
            return;
        };
        let leaves: Vec<DependencyLeaf> = dependencies
            .lock()
            .iter()
            .map(|(_, leaf)| leaf.clone())
            .collect();
        let mut subs = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            if let DependencyLeaf::Source(source) = leaf {
                let weak = self.clone();
                let unsub = source.subscribe(Arc::new(move |_value: Arc<Value>| {
                    weak.schedule_compute();
                }));
                subs.push(DepSub(Some(unsub)));
            }
        }
        *self.0.dependency_subs.lock() = subs;
    }

    // ---- encoding -------------------------------------------------

    /// Returns the encoded byte form of the current value. Fails with
    /// [`DagifyError::NoEncoding`] if no encoding is configured.
    pub fn encode_for_sink(&self) -> Result<Value> {
        let descriptor = self
            .0
            .config
            .value_encoding
            .as_ref()
            .ok_or_else(|| DagifyError::NoEncoding(self.0.key.to_string()))?;
        let encoder = self.0.ctx.encoders().resolve(descriptor)?;
        let value = self
            .0
            .value
            .read()
            .value()
            .cloned()
            .unwrap_or_else(|| Arc::new(Value::Null));
        (encoder.encode)(&value)
    }

    fn decode_and_validate(&self, value: Value) -> Result<Value> {
        let value = if let Some(descriptor) = &self.0.config.value_encoding {
            if is_buffer_like(&value) {
                let encoder = self.0.ctx.encoders().resolve(descriptor)?;
                (encoder.decode)(&value)?
            } else {
                value
            }
        } else {
            value
        };
        if let Some(tag) = &self.0.config.type_tag {
            let validator = self.0.ctx.types().resolve(tag)?;
            if !validator(&value) {
                let err = DagifyError::TypeMismatch {
                    node: self.0.key.to_string(),
                    expected: tag.clone(),
                };
                self.error(err.clone());
                return Err(err);
            }
        }
        Ok(value)
    }

    // ---- activity threshold -------------------------------------------------

    /// For activity-thresholded nodes: increments the activity counter;
    /// once it reaches the configured threshold, triggers `compute()` and
    /// resets. A no-op when no threshold is configured.
    pub fn visit(&self) {
        let Some(threshold) = self.0.config.activation_threshold else {
            return;
        };
        let level = self.0.activity_level.fetch_add(1, Ordering::SeqCst) + 1;
        if level >= threshold {
            self.0.activity_level.store(0, Ordering::SeqCst);
            self.schedule_compute();
        }
    }

    // ---- scheduling -------------------------------------------------

    fn schedule_compute(&self) {
        if self.0.completed.load(Ordering::SeqCst) {
            return;
        }
        *self.0.state.lock() = NodeState::Pending;
        let node = self.clone();
        self.0
            .ctx
            .update()
            .schedule_update(Arc::new(node), self.0.config.disable_batching);
    }

    fn schedule_set_value(&self, value: Value, force_emit: bool) {
        self.schedule_set_value_arc(Arc::new(value), force_emit);
    }

    fn schedule_set_value_arc(&self, value: Arc<Value>, force_emit: bool) {
        if self.0.completed.load(Ordering::SeqCst) {
            return;
        }
        *self.0.state.lock() = NodeState::Pending;
        let node = self.clone();
        let runner: Arc<dyn Scheduled> = Arc::new(SetValueJob {
            node,
            value,
            force_emit,
        });
        self.0
            .ctx
            .update()
            .schedule_update(runner, self.0.config.disable_batching);
    }

    /// The emission algorithm: validates, snapshots, compares per the
    /// node's equality mode, and notifies subscribers through the notify
    /// scheduler if different (or `force_emit`).
    fn set_value(&self, value: Arc<Value>, force_emit: bool) {
        *self.0.state.lock() = NodeState::Running;
        let previous = self.0.last_emitted.read().clone();
        let should_emit = force_emit || !values_equal(self.0.config.equality, previous.as_ref(), &value);
        *self.0.value.write() = Emission::Value(value.clone());
        if should_emit {
            *self.0.last_emitted.write() = Some(Arc::new(crate::equality::snapshot(&value)));
            self.notify_subscribers(value);
        }
        *self.0.state.lock() = NodeState::Idle;
    }

    fn notify_subscribers(&self, value: Arc<Value>) {
        let subscribers = self.0.subscribers.lock().clone();
        self.0.ctx.notify().schedule(Box::new(move || {
            for sub in subscribers.iter() {
                if sub.closed.load(Ordering::SeqCst) {
                    continue;
                }
                if let Some(next) = &sub.observer.next {
                    next(value.clone());
                }
            }
        }));
    }

    /// The compute algorithm, run on flush.
    fn compute(&self) {
        let Kind::Computed {
            compute,
            dependencies,
        } = &self.0.kind
        else {
            return;
        };
        *self.0.state.lock() = NodeState::Running;
        let snapshot = dependencies.lock().snapshot_all();
        let Some(values) = snapshot else {
            *self.0.state.lock() = NodeState::Idle;
            return;
        };
        if !self.0.error_stream.recent().is_empty() {
            debug!(node = %self.0.key, "computing with recent dependency errors visible downstream");
        }
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| compute(&values)));
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(panic);
                let err = DagifyError::UserCompute {
                    node: self.0.key.to_string(),
                    reason,
                };
                self.0.error_stream.push(err.clone());
                self.error(err.clone());
                if err.is_fatal() {
                    std::panic::resume_unwind(Box::new(err));
                }
                return;
            }
        };
        match outcome {
            ComputeOutcome::NoEmit => {
                *self.0.state.lock() = NodeState::Idle;
            }
            ComputeOutcome::Value(v) => {
                self.set_value(Arc::new(v), false);
            }
            ComputeOutcome::Future(fut) => {
                self.spawn_future(fut);
            }
            ComputeOutcome::Stream(stream) => {
                self.spawn_stream(stream);
            }
        }
    }

    fn spawn_future(&self, fut: ComputeFuture) {
        let node = self.clone();
        if let Some(prev) = self.0.inflight.lock().take() {
            prev.abort();
        }
        let handle = tokio::spawn(async move {
            match fut.await {
                Ok(value) => node.set_value(Arc::new(value), false),
                Err(err) => {
                    node.0.error_stream.push(err.clone());
                    node.error(err);
                }
            }
        });
        *self.0.inflight.lock() = Some(handle);
    }

    /// Applies the emission algorithm directly, bypassing the compute
    /// algorithm. Used by [`queued`] and [`variants`], whose worker loops
    /// compute off of the node's own machinery but still want equality
    /// suppression, snapshotting, and notification.
    pub(crate) fn force_set_value(&self, value: Arc<Value>, force_emit: bool) {
        self.set_value(value, force_emit);
    }

    /// Routes a panicked or returned error the same way a failed `compute()`
    /// would, including pushing it onto the dependency-error replay stream.
    pub(crate) fn report_error(&self, err: DagifyError) {
        self.0.error_stream.push(err.clone());
        self.error(err);
    }

    fn spawn_stream(&self, mut stream: ComputeStream) {
        use futures::StreamExt;
        let node = self.clone();
        if let Some(prev) = self.0.inflight.lock().take() {
            prev.abort();
        }
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(value) => node.set_value(Arc::new(value), false),
                    Err(err) => {
                        node.0.error_stream.push(err.clone());
                        node.error(err);
                    }
                }
            }
        });
        *self.0.inflight.lock() = Some(handle);
    }
}

/// The `IndexMap`-ordered `DependencyDescription::Keyed` path reuses string
/// positional keys (`"_0"`, `"_1"`, ...) when `add_dependency` is called on
/// a keyed-mode node without an explicit name; callers that need named
/// slots should use `set_dependencies`/`update_dependencies` directly.
impl Scheduled for Node {
    fn key(&self) -> NodeKey {
        self.0.key
    }

    fn run(&self) {
        self.compute();
    }
}

struct SetValueJob {
    node: Node,
    value: Arc<Value>,
    force_emit: bool,
}

impl Scheduled for SetValueJob {
    fn key(&self) -> NodeKey {
        self.node.0.key
    }

    fn run(&self) {
        self.node.set_value(self.value.clone(), self.force_emit);
    }
}

impl DependencySource for Node {
    fn key(&self) -> NodeKey {
        self.0.key
    }

    fn snapshot(&self) -> Emission {
        self.0.value.read().clone()
    }

    fn subscribe(&self, listener: DependencyListener) -> Box<dyn FnOnce() + Send> {
        let id = self.add_internal_subscriber(Arc::new(move |value| listener(value)));
        let node = self.clone();
        Box::new(move || node.remove_subscriber(id))
    }

    fn is_sink(&self) -> bool {
        self.0.config.sink
    }
}

fn is_buffer_like(value: &Value) -> bool {
    match value {
        Value::Array(items) => items
            .iter()
            .all(|v| matches!(v, Value::Number(n) if n.as_u64().is_some_and(|n| n <= 255))),
        Value::String(_) => true,
        _ => false,
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "compute function panicked".to_string()
    }
}
