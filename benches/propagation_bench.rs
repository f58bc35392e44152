use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dagify::dependency::{DependencyDescription, DependencyLeaf, DependencyValues};
use dagify::node::{ComputeOutcome, Node, NodeConfig};
use dagify::runtime::Context;
use dagify::scheduler::SyncScheduler;
use serde_json::json;
use std::sync::Arc;

// Benchmarks run update/notify synchronously so a plain `b.iter` closure
// measures propagation cost directly, without an executor driving deferred
// jobs in the background.
fn bench_ctx() -> Arc<Context> {
    Context::new(
        Arc::new(SyncScheduler),
        Arc::new(SyncScheduler),
        dagify::dispatcher::Dispatcher::new(),
        Arc::new(dagify::registry::TypeRegistry::with_builtins()),
        Arc::new(dagify::registry::EncoderRegistry::new()),
        Arc::new(dagify::key::RandomKeyGenerator),
    )
}

fn single_set_benchmark(c: &mut Criterion) {
    let ctx = bench_ctx();
    let node = Node::stateful(json!(0), NodeConfig::default(), ctx);

    c.bench_function("stateful set", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            node.set(black_box(json!(n))).unwrap();
        });
    });
}

fn chained_compute_benchmark(c: &mut Criterion) {
    let ctx = bench_ctx();
    let root = Node::stateful(json!(0), NodeConfig::default(), ctx.clone());
    let mut current = root.clone();
    for _ in 0..20 {
        let upstream = current.clone();
        current = Node::computed(
            Arc::new(|values| {
                let DependencyValues::Ordered(v) = values else {
                    unreachable!()
                };
                ComputeOutcome::Value(json!(v[0].as_i64().unwrap() + 1))
            }),
            DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(upstream))]),
            NodeConfig::default(),
            ctx.clone(),
        )
        .unwrap();
    }

    c.bench_function("20-deep computed chain propagation", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            root.set(black_box(json!(n))).unwrap();
        });
    });
}

fn fan_out_benchmark(c: &mut Criterion) {
    let ctx = bench_ctx();
    let root = Node::stateful(json!(0), NodeConfig::default(), ctx.clone());
    let children: Vec<Node> = (0..50)
        .map(|_| {
            Node::computed(
                Arc::new(|values| {
                    let DependencyValues::Ordered(v) = values else {
                        unreachable!()
                    };
                    ComputeOutcome::Value(v[0].clone())
                }),
                DependencyDescription::Ordered(vec![DependencyLeaf::Source(Arc::new(root.clone()))]),
                NodeConfig::default(),
                ctx.clone(),
            )
            .unwrap()
        })
        .collect();
    black_box(&children);

    c.bench_function("fan-out to 50 dependents", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            root.set(black_box(json!(n))).unwrap();
        });
    });
}

criterion_group!(benches, single_set_benchmark, chained_compute_benchmark, fan_out_benchmark);
criterion_main!(benches);
