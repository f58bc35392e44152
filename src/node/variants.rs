//! Specialized node flavors built on top of the shared node core: sink,
//! filter, shallow/reference, execution, command, bridge, composite, and
//! event nodes. Each wraps a plain [`Node`] (stateful or computed) and adds
//! the bit of extra wiring its name implies.

use super::{ComputeFn, ComputeOutcome, Node, NodeConfig, Observer};
use crate::dependency::{DependencyDescription, DependencyLeaf, DependencySource, DependencyValues};
use crate::equality::EqualityMode;
use crate::error::{DagifyError, Result};
use crate::runtime::Context;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

// ---- sink -------------------------------------------------

/// Builds a terminal node: holds a value like a stateful node, but rejects
/// both `subscribe` (as a plain observer) and being used as another node's
/// dependency. Useful as a pipeline's endpoint, read via `current()` or
/// `encode_for_sink()`.
pub fn create_sink_node(initial: Value, mut config: NodeConfig, ctx: Arc<Context>) -> Node {
    config.sink = true;
    Node::stateful(initial, config, ctx)
}

// ---- filter -------------------------------------------------

/// Builds a computed node that passes `subject` through unchanged when
/// `predicate` holds, and suppresses emission (`NO_EMIT`) otherwise.
pub fn create_filter_node(
    source: Arc<dyn DependencySource>,
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    config: NodeConfig,
    ctx: Arc<Context>,
) -> Result<Node> {
    let compute: ComputeFn = Arc::new(move |values| {
        let DependencyValues::Ordered(v) = values else {
            unreachable!("filter nodes are always built with a single ordered dependency")
        };
        let subject = &v[0];
        if predicate(subject) {
            ComputeOutcome::Value((**subject).clone())
        } else {
            ComputeOutcome::NoEmit
        }
    });
    Node::computed(
        compute,
        DependencyDescription::Ordered(vec![DependencyLeaf::Source(source)]),
        config,
        ctx,
    )
}

// ---- shallow / reference equality variants -------------------------------------------------

/// A computed node identical to [`Node::computed`] except its equality
/// mode is fixed to [`EqualityMode::Shallow`], overriding whatever the
/// caller passed in `config`.
pub fn create_shallow_node(
    compute: ComputeFn,
    dependencies: DependencyDescription,
    mut config: NodeConfig,
    ctx: Arc<Context>,
) -> Result<Node> {
    config.equality = EqualityMode::Shallow;
    Node::computed(compute, dependencies, config, ctx)
}

/// A computed node fixed to [`EqualityMode::Reference`]: every fresh
/// output `Arc` is treated as a change, even if structurally identical to
/// the last one.
pub fn create_reference_node(
    compute: ComputeFn,
    dependencies: DependencyDescription,
    mut config: NodeConfig,
    ctx: Arc<Context>,
) -> Result<Node> {
    config.equality = EqualityMode::Reference;
    Node::computed(compute, dependencies, config, ctx)
}

// ---- execution -------------------------------------------------

/// A node whose dependency changes update a cached snapshot without
/// propagating, recomputing and emitting only when `execution` fires.
///
/// This differs from a plain computed node, which recomputes (and may
/// emit) on every dependency emission; here dependency emissions are
/// absorbed silently and the compute function only actually runs when the
/// execution trigger ticks.
pub struct ExecutionNode {
    node: Node,
}

impl ExecutionNode {
    /// Builds an execution node running `compute` over `dependencies`,
    /// triggered by `execution` (typically a [`super::trigger::Trigger`]'s
    /// node, or any other source whose emissions mark "now").
    pub fn new(
        compute: ComputeFn,
        dependencies: DependencyDescription,
        execution: Arc<dyn DependencySource>,
        config: NodeConfig,
        ctx: Arc<Context>,
    ) -> Result<ExecutionNode> {
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
        let dependencies = Arc::new(parking_lot::Mutex::new(dependencies));
        // Starts NO_EMIT-pending, like a fresh computed node, until the
        // first execution tick actually produces a value.
        let node = Node::stateful_suppressed(config, ctx);
        // Dependency changes are read fresh at execution time via
        // `snapshot_all()`; unlike a plain computed node, nothing here
        // subscribes to dependency emissions, so they never themselves
        // schedule a compute.
        let compute_fn = compute.clone();
        let deps = dependencies.clone();
        let target = node.clone();
        let _ = execution.subscribe(Arc::new(move |_tick| {
            if let Some(values) = deps.lock().snapshot_all() {
                match compute_fn(&values) {
                    ComputeOutcome::NoEmit => {}
                    ComputeOutcome::Value(v) => target.force_set_value(Arc::new(v), false),
                    ComputeOutcome::Future(fut) => {
                        let target = target.clone();
                        tokio::spawn(async move {
                            match fut.await {
                                Ok(v) => target.force_set_value(Arc::new(v), false),
                                Err(err) => target.report_error(err),
                            }
                        });
                    }
                    ComputeOutcome::Stream(mut stream) => {
                        let target = target.clone();
                        tokio::spawn(async move {
                            use futures::StreamExt;
                            while let Some(item) = stream.next().await {
                                match item {
                                    Ok(v) => target.force_set_value(Arc::new(v), false),
                                    Err(err) => target.report_error(err),
                                }
                            }
                        });
                    }
                }
            }
        }));
        Ok(ExecutionNode { node })
    }

    /// The underlying emission surface.
    pub fn node(&self) -> &Node {
        &self.node
    }
}

// ---- command -------------------------------------------------

/// Optional stages of a command node's input pipeline.
pub struct CommandConfig {
    /// Transforms incoming data before validation/handling.
    pub map: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
    /// Drops incoming data for which this returns `false` (silently, no
    /// error).
    pub filter: Option<Arc<dyn Fn(&Value) -> bool + Send + Sync>>,
    /// Rejects invalid data by routing it to `error()` instead of
    /// `handler`.
    pub validator: Option<Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>>,
    /// Produces the value the command node emits. May return
    /// [`ComputeOutcome::NoEmit`] to suppress a particular input.
    pub handler: Arc<dyn Fn(&Value) -> ComputeOutcome + Send + Sync>,
}

/// A node externally pumped by `set(data)` (or by a dispatcher event on
/// `command_name`), running `data` through an optional
/// map/filter/validator pipeline before `handler` produces the emitted
/// value.
pub struct CommandNode {
    node: Node,
    config: CommandConfig,
}

impl CommandNode {
    /// Builds a command node. If `command_name` is given, the node also
    /// subscribes to `dispatcher` under that name so external `emit` calls
    /// drive it the same way `set` does.
    pub fn new(
        config: CommandConfig,
        node_config: NodeConfig,
        ctx: Arc<Context>,
        command_name: Option<(&Arc<crate::dispatcher::Dispatcher>, String)>,
    ) -> CommandNode {
        let node = Node::stateful(Value::Null, node_config, ctx);
        let command = CommandNode { node, config };
        if let Some((dispatcher, name)) = command_name {
            let node = command.node.clone();
            let map = command.config.map.clone();
            let filter = command.config.filter.clone();
            let validator = command.config.validator.clone();
            let handler = command.config.handler.clone();
            dispatcher.on(
                name,
                move |payload| {
                    run_pipeline(&node, &map, &filter, &validator, &handler, payload.clone());
                },
                None,
            );
        }
        command
    }

    /// The underlying emission surface.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Feeds `data` through the map/filter/validator/handler pipeline.
    pub fn set(&self, data: Value) {
        run_pipeline(
            &self.node,
            &self.config.map,
            &self.config.filter,
            &self.config.validator,
            &self.config.handler,
            data,
        );
    }
}

fn run_pipeline(
    node: &Node,
    map: &Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
    filter: &Option<Arc<dyn Fn(&Value) -> bool + Send + Sync>>,
    validator: &Option<Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>>,
    handler: &Arc<dyn Fn(&Value) -> ComputeOutcome + Send + Sync>,
    data: Value,
) {
    let data = match map {
        Some(f) => f(&data),
        None => data,
    };
    if let Some(f) = filter {
        if !f(&data) {
            return;
        }
    }
    if let Some(v) = validator {
        if let Err(reason) = v(&data) {
            node.report_error(DagifyError::ValidationFailure {
                node: node.key().to_string(),
                reason,
            });
            return;
        }
    }
    match handler(&data) {
        ComputeOutcome::NoEmit => {}
        ComputeOutcome::Value(v) => node.force_set_value(Arc::new(v), false),
        ComputeOutcome::Future(fut) => {
            let node = node.clone();
            tokio::spawn(async move {
                match fut.await {
                    Ok(v) => node.force_set_value(Arc::new(v), false),
                    Err(err) => node.report_error(err),
                }
            });
        }
        ComputeOutcome::Stream(mut stream) => {
            let node = node.clone();
            tokio::spawn(async move {
                use futures::StreamExt;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(v) => node.force_set_value(Arc::new(v), false),
                        Err(err) => node.report_error(err),
                    }
                }
            });
        }
    }
}

// ---- bridge -------------------------------------------------

/// A paired input/output node: `set(v)` forwards into `input` and schedules
/// `output.compute()`; the bridge mirrors `output`'s value unconditionally
/// (forced emission, bypassing equality), and silences `output`'s error
/// channel so a downstream error on the inner pipeline doesn't also
/// terminate the bridge.
pub struct BridgeNode {
    input: Node,
    output: Node,
    mirror: Node,
}

impl BridgeNode {
    /// Builds a bridge wrapping `input`/`output`, mirroring `output`'s
    /// value onto a freshly built stateful node.
    pub fn new(input: Node, output: Node, config: NodeConfig, ctx: Arc<Context>) -> BridgeNode {
        let mirror = Node::stateful(Value::Null, config, ctx);
        let target = mirror.clone();
        let _ = output.subscribe(Observer {
            next: Some(Arc::new(move |v| target.force_set_value(v, true))),
            // Output errors are deliberately not forwarded to the mirror:
            // the bridge stays alive even if the inner pipeline errors.
            error: None,
            complete: None,
        });
        BridgeNode {
            input,
            output,
            mirror,
        }
    }

    /// The mirrored emission surface.
    pub fn node(&self) -> &Node {
        &self.mirror
    }

    /// Forwards `v` into `input`, then schedules `output.compute()`, then
    /// unconditionally mirrors `output`'s current value.
    pub fn set(&self, v: Value) -> Result<()> {
        self.input.set(v)?;
        self.output.next(Value::Null)?;
        if let Some(current) = self.output.current().value().cloned() {
            self.mirror.force_set_value(current, true);
        }
        Ok(())
    }

    /// Tears down the output subscription and completes the mirror.
    pub fn complete(&self) {
        self.output.complete();
        self.mirror.complete();
    }
}

// ---- composite -------------------------------------------------

/// Aggregates a set of child sources into a single array- or
/// record-shaped emission, reusing the node core's own dependency
/// machinery: a composite is simply a computed node whose compute
/// function renders the dependency snapshot as-is. Suppressed (NO_EMIT)
/// while any child is NO_EMIT, for the same reason any computed node is —
/// `snapshot_all()` returns `None` and `compute()` leaves the node idle.
pub struct Composite {
    node: Node,
}

fn reflect_dependencies() -> ComputeFn {
    Arc::new(|values| ComputeOutcome::Value(values.to_json()))
}

impl Composite {
    /// Builds an array-shaped composite over `children`.
    pub fn from_array(children: Vec<Arc<dyn DependencySource>>, config: NodeConfig, ctx: Arc<Context>) -> Result<Composite> {
        let dependencies = DependencyDescription::Ordered(
            children.into_iter().map(DependencyLeaf::Source).collect(),
        );
        let node = Node::computed(reflect_dependencies(), dependencies, config, ctx)?;
        Ok(Composite { node })
    }

    /// Builds a record-shaped composite over `children`, keyed by name.
    pub fn from_record(
        children: IndexMap<String, Arc<dyn DependencySource>>,
        config: NodeConfig,
        ctx: Arc<Context>,
    ) -> Result<Composite> {
        let mut m = IndexMap::with_capacity(children.len());
        for (name, child) in children {
            m.insert(name, DependencyLeaf::Source(child));
        }
        let node = Node::computed(reflect_dependencies(), DependencyDescription::Keyed(m), config, ctx)?;
        Ok(Composite { node })
    }

    /// The aggregated emission surface.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Appends `child` as a new dependency (array-shaped composites) and
    /// recomputes.
    pub fn add_node(&self, child: Arc<dyn DependencySource>) -> Result<()> {
        self.node.add_dependency(DependencyLeaf::Source(child))
    }

    /// Adds `child` under `name` (record-shaped composites) and
    /// recomputes.
    pub fn add_named_node(&self, name: String, child: Arc<dyn DependencySource>) -> Result<()> {
        self.node.update_dependencies(|deps| {
            if let DependencyDescription::Keyed(m) = deps {
                m.insert(name, DependencyLeaf::Source(child));
            }
        })
    }

    /// Removes the child keyed by `key` and recomputes.
    pub fn remove_node(&self, key: crate::key::NodeKey) -> Result<()> {
        self.node.remove_dependency(key)
    }
}

// ---- event -------------------------------------------------

/// A stateful node driven entirely by dispatcher events: every `emit(name,
/// payload, context)` becomes a `set(payload)` on the returned node.
pub fn create_event_node(
    dispatcher: &Arc<crate::dispatcher::Dispatcher>,
    name: impl Into<String>,
    context: Option<&str>,
    config: NodeConfig,
    ctx: Arc<Context>,
) -> Node {
    let node = Node::stateful(Value::Null, config, ctx);
    let target = node.clone();
    dispatcher.on(
        name,
        move |payload| {
            let _ = target.set(payload.clone());
        },
        context,
    );
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyValues;
    use crate::node::NodeConfig as Cfg;
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

    #[test]
    fn filter_suppresses_values_failing_the_predicate() {
        let ctx = sync_ctx();
        let source = Node::stateful(json!(1), Cfg::default(), ctx.clone());
        let evens = create_filter_node(
            Arc::new(source.clone()),
            Arc::new(|v| v.as_i64().is_some_and(|n| n % 2 == 0)),
            Cfg::default(),
            ctx.clone(),
        )
        .unwrap();
        let doubled = Node::computed(
            Arc::new(|values| {
                let DependencyValues::Ordered(v) = values else {
                    unreachable!()
                };
                ComputeOutcome::Value(json!(v[0].as_i64().unwrap() * 2))
            }),
            DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(evens.clone()))]),
            Cfg::default(),
            ctx,
        )
        .unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _c = doubled
            .subscribe(Observer::on_next(move |v| s.lock().unwrap().push((*v).clone())))
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
        source.set(json!(6)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!(12)]);
    }

    #[test]
    fn execution_node_starts_no_emit_pending_until_the_first_tick() {
        let ctx = sync_ctx();
        let dep = Node::stateful(json!(1), Cfg::default(), ctx.clone());
        let execution = Node::stateful(json!(0), Cfg::default(), ctx.clone());
        let exec = ExecutionNode::new(
            Arc::new(|values| {
                let DependencyValues::Ordered(v) = values else {
                    unreachable!()
                };
                ComputeOutcome::Value(json!(v[0].as_i64().unwrap() * 100))
            }),
            DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(dep))]),
            Arc::new(execution.clone()),
            Cfg::default(),
            ctx,
        )
        .unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _c = exec
            .node()
            .subscribe(Observer::on_next(move |v| s.lock().unwrap().push((*v).clone())))
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
        execution.set(json!(1)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!(100)]);
    }

    #[test]
    fn sink_rejects_use_as_a_dependency() {
        let ctx = sync_ctx();
        let sink = create_sink_node(json!(1), Cfg::default(), ctx.clone());
        let result = Node::computed(
            Arc::new(|_| ComputeOutcome::Value(json!(0))),
            DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(sink))]),
            Cfg::default(),
            ctx,
        );
        assert!(matches!(result, Err(DagifyError::InvalidDependency(_))));
    }

    #[test]
    fn composite_array_waits_for_every_child() {
        let ctx = sync_ctx();
        let a = Node::computed(
            Arc::new(|_| ComputeOutcome::NoEmit),
            DependencyDescription::Ordered(vec![]),
            Cfg::default(),
            ctx.clone(),
        )
        .unwrap();
        let b = Node::stateful(json!(2), Cfg::default(), ctx.clone());
        let composite = Composite::from_array(vec![Arc::new(a.clone()), Arc::new(b.clone())], Cfg::default(), ctx).unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _c = composite
            .node()
            .subscribe(Observer::on_next(move |v| s.lock().unwrap().push((*v).clone())))
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn event_node_reflects_dispatcher_emissions() {
        let ctx = sync_ctx();
        let dispatcher = crate::dispatcher::Dispatcher::new();
        let node = create_event_node(&dispatcher, "clicked", None, Cfg::default(), ctx);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _c = node
            .subscribe(Observer::on_next(move |v| s.lock().unwrap().push((*v).clone())))
            .unwrap();
        dispatcher.emit("clicked", &json!({"x": 1}), None);
        assert_eq!(*seen.lock().unwrap(), vec![json!(null), json!({"x": 1})]);
    }
}
