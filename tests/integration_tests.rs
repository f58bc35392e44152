//! End-to-end scenarios exercising the reactive core, the graph container,
//! and the queued node mix-in together, the way an application actually
//! wires them.

use dagify::dependency::{DependencyDescription, DependencyLeaf, DependencyValues};
use dagify::node::queued::{OverflowStrategy, QueuedConfig, QueuedNode};
use dagify::node::variants::create_filter_node;
use dagify::node::{ComputeFn, ComputeOutcome, Node, NodeConfig, Observer};
use dagify::registry::{EncoderRegistry, TypeRegistry};
use dagify::scheduler::SyncScheduler;
use dagify::{DagifyError, ReactiveGraph};
use serde_json::json;
use std::sync::{Arc, Mutex as StdMutex};

fn sync_ctx() -> Arc<dagify::Context> {
    dagify::Context::new(
        Arc::new(SyncScheduler),
        Arc::new(SyncScheduler),
        dagify::dispatcher::Dispatcher::new(),
        Arc::new(TypeRegistry::with_builtins()),
        Arc::new(EncoderRegistry::new()),
        Arc::new(dagify::key::RandomKeyGenerator),
    )
}

fn sum_compute() -> ComputeFn {
    Arc::new(|values| {
        let DependencyValues::Ordered(v) = values else {
            unreachable!()
        };
        let x = v[0].as_i64().unwrap();
        let y = v[1].as_i64().unwrap();
        ComputeOutcome::Value(json!(x + y))
    })
}

#[test]
fn sum_recomputes_after_a_dependency_changes() {
    let ctx = sync_ctx();
    let a = Node::stateful(json!(2), NodeConfig::default(), ctx.clone());
    let b = Node::stateful(json!(3), NodeConfig::default(), ctx.clone());
    let s = Node::computed(
        sum_compute(),
        DependencyDescription::Ordered(vec![
            DependencyLeaf::Source(Arc::new(a.clone())),
            DependencyLeaf::Source(Arc::new(b.clone())),
        ]),
        NodeConfig::default(),
        ctx,
    )
    .unwrap();

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let recorded = seen.clone();
    let _c = s
        .subscribe(Observer::on_next(move |v| recorded.lock().unwrap().push((*v).clone())))
        .unwrap();

    a.set(json!(7)).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![json!(5), json!(10)]);
}

#[test]
fn batch_coalesces_three_sets_into_one_emission() {
    let ctx = sync_ctx();
    let n = Node::stateful(json!(0), NodeConfig::default(), ctx.clone());

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let recorded = seen.clone();
    let _c = n
        .subscribe(Observer::on_next(move |v| recorded.lock().unwrap().push((*v).clone())))
        .unwrap();

    ctx.batch(|| {
        n.set(json!(1)).unwrap();
        n.set(json!(2)).unwrap();
        n.set(json!(3)).unwrap();
    });

    assert_eq!(*seen.lock().unwrap(), vec![json!(0), json!(3)]);
}

fn passthrough() -> ComputeFn {
    Arc::new(|values| {
        let DependencyValues::Ordered(v) = values else {
            unreachable!()
        };
        match v.first() {
            Some(value) => ComputeOutcome::Value((**value).clone()),
            None => ComputeOutcome::NoEmit,
        }
    })
}

#[test]
fn third_edge_closing_a_triangle_is_rejected_as_a_cycle() {
    let ctx = sync_ctx();
    let graph = ReactiveGraph::new();
    let a = Node::stateful(json!(1), NodeConfig::default(), ctx.clone());
    let b = Node::computed(passthrough(), DependencyDescription::Ordered(vec![]), NodeConfig::default(), ctx.clone()).unwrap();
    let c = Node::computed(passthrough(), DependencyDescription::Ordered(vec![]), NodeConfig::default(), ctx).unwrap();

    graph.add_node(a.clone()).unwrap();
    graph.add_node(b.clone()).unwrap();
    graph.add_node(c.clone()).unwrap();

    graph.connect(&a, &b).unwrap();
    graph.connect(&b, &c).unwrap();
    let result = graph.connect(&c, &a);

    assert!(matches!(result, Err(DagifyError::CycleDetected { .. })));
}

#[tokio::test]
async fn queued_node_preserves_arrival_order_despite_staggered_handler_latency() {
    let ctx = sync_ctx();
    let source = Node::stateful(json!(0), NodeConfig::default(), ctx.clone());

    let compute: ComputeFn = Arc::new(|values| {
        let DependencyValues::Ordered(v) = values else {
            unreachable!()
        };
        let payload = (*v[0]).clone();
        let delay_ms = match payload.as_i64().unwrap() {
            40 => 50,
            30 => 10,
            _ => 0,
        };
        ComputeOutcome::Future(Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            Ok(payload)
        }))
    });

    let queued = QueuedNode::new(
        compute,
        DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(source.clone()))]),
        NodeConfig::default(),
        QueuedConfig {
            max_queue_length: None,
            overflow_strategy: OverflowStrategy::Enqueue,
            on_overflow: None,
            ..Default::default()
        },
        ctx,
    )
    .unwrap();

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let recorded = seen.clone();
    let _c = queued
        .node()
        .subscribe(Observer::on_next(move |v| recorded.lock().unwrap().push((*v).clone())))
        .unwrap();

    source.set(json!(40)).unwrap();
    source.set(json!(30)).unwrap();
    source.set(json!(10)).unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // A new subscriber sees the emission surface's constructor value
    // (`null`) first, then the dependency's value at construction time
    // (mirroring a plain computed node's synchronous first compute, queued
    // ahead of the three staggered sets), then the staggered sets in the
    // order they were enqueued, not the order their handlers resolved.
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!(null), json!(0), json!(40), json!(30), json!(10)]
    );
}

#[test]
fn filter_then_computed_propagates_only_past_even_values() {
    let ctx = sync_ctx();
    let source = Node::stateful(json!(3), NodeConfig::default(), ctx.clone());
    let evens = create_filter_node(
        Arc::new(source.clone()),
        Arc::new(|v| v.as_i64().map(|n| n % 2 == 0).unwrap_or(false)),
        NodeConfig::default(),
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
        NodeConfig::default(),
        ctx,
    )
    .unwrap();

    assert_eq!(doubled.current().value(), None);

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let recorded = seen.clone();
    let _c = doubled
        .subscribe(Observer::on_next(move |v| recorded.lock().unwrap().push((*v).clone())))
        .unwrap();

    source.set(json!(6)).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![json!(12)]);
}

#[test]
fn int_typed_node_rejects_a_fractional_value_and_keeps_its_last_value() {
    let ctx = sync_ctx();
    let mut config = NodeConfig::default();
    config.type_tag = Some("int".to_string());
    let n = Node::stateful(json!(1), config, ctx);

    let errored = Arc::new(StdMutex::new(false));
    let e = errored.clone();
    let _c = n
        .subscribe(Observer {
            next: None,
            error: Some(Arc::new(move |_| *e.lock().unwrap() = true)),
            complete: None,
        })
        .unwrap();

    let result = n.set(json!(3.14));

    assert!(result.is_err());
    assert!(*errored.lock().unwrap());
    assert_eq!(n.current().value().map(|v| (**v).clone()), Some(json!(1)));
}
