//! Dagify: a reactive DAG evaluation engine.
//!
//! A `dagify` graph is built from two kinds of vertices:
//!
//! - **Stateful nodes** ([`Node::stateful`]) hold a value set directly by
//!   the caller via `set`/`update`.
//! - **Computed nodes** ([`Node::computed`]) derive their value from a
//!   compute function run over a snapshot of their dependencies, re-run
//!   whenever any dependency emits.
//!
//! Both kinds share the same emission pipeline: an equality check against
//! the last emitted value ([`equality`]), a scheduler-mediated notification
//! pass ([`scheduler`]), and an explicit `NO_EMIT` sentinel
//! ([`emission::Emission`]) a compute function can return to suppress
//! propagation for a given tick.
//!
//! Specialized flavors — sink, filter, execution, command, bridge,
//! composite, event, and queued nodes — are built on top of this shared
//! core in [`node::variants`], [`node::trigger`], and [`node::queued`]
//! rather than as a separate implementation.
//!
//! An explicit container, [`graph::ReactiveGraph`], tracks nodes and edges
//! separately from each node's own dependency description, enforcing
//! acyclicity and exposing graph-level queries (topological order,
//! predecessors/successors, connected components) that a bag of loosely
//! wired nodes can't answer on its own.
//!
//! [`combinators`] layers the usual FRP vocabulary (`map`, `filter`,
//! `combine`, `merge`, `switch_latest`, `from`, and stream bridges) on top
//! of the public node surface, and [`network`] defines the handshake
//! payload two peers exchange to synchronize a node across a process
//! boundary (transport itself is out of scope).
//!
//! # Example
//!
//! ```
//! use dagify::node::{ComputeOutcome, Node, NodeConfig};
//! use dagify::dependency::{DependencyDescription, DependencyLeaf, DependencyValues};
//! use dagify::runtime::Context;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let ctx = Context::global();
//! let a = Node::stateful(json!(2), NodeConfig::default(), ctx.clone());
//! let b = Node::stateful(json!(3), NodeConfig::default(), ctx.clone());
//! let sum = Node::computed(
//!     Arc::new(|values| {
//!         let DependencyValues::Ordered(v) = values else { unreachable!() };
//!         ComputeOutcome::Value(json!(v[0].as_i64().unwrap() + v[1].as_i64().unwrap()))
//!     }),
//!     DependencyDescription::Ordered(vec![
//!         DependencyLeaf::Source(Arc::new(a.clone())),
//!         DependencyLeaf::Source(Arc::new(b.clone())),
//!     ]),
//!     NodeConfig::default(),
//!     ctx,
//! ).unwrap();
//! assert_eq!(sum.current().value().map(|v| (**v).clone()), Some(json!(5)));
//! ```

pub mod combinators;
pub mod dependency;
pub mod dispatcher;
pub mod emission;
pub mod equality;
pub mod error;
pub mod graph;
pub mod key;
pub mod network;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod scheduler;

pub use dependency::{DependencyDescription, DependencyLeaf, DependencySource, DependencyValues};
pub use emission::Emission;
pub use equality::EqualityMode;
pub use error::{DagifyError, Result};
pub use graph::ReactiveGraph;
pub use key::{KeyGenerator, NodeKey, RandomKeyGenerator};
pub use node::queued::{OverflowStrategy, QueuedConfig, QueuedNode};
pub use node::trigger::{trigger, trigger_from_event, Trigger};
pub use node::variants::{
    create_event_node, create_filter_node, create_reference_node, create_shallow_node, create_sink_node,
    BridgeNode, CommandConfig, CommandNode, Composite, ExecutionNode,
};
pub use node::{ComputeFn, ComputeOutcome, Node, NodeConfig, NodeState, Observer};
pub use runtime::Context;
