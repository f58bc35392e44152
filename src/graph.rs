//! The reactive graph container: a keyed node map plus an adjacency map,
//! enforcing the acyclic invariant and mirroring `connect`/`disconnect`
//! into a computed target's own dependency description.

use crate::dependency::DependencyLeaf;
use crate::error::{DagifyError, Result};
use crate::key::NodeKey;
use crate::node::Node;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};

/// Anything that identifies a node already in a [`ReactiveGraph`]: the node
/// itself, its raw key, or a string (hex-encoded key).
pub enum NodeRef<'a> {
    /// A node handle.
    Node(&'a Node),
    /// A raw 32-byte key.
    Key(NodeKey),
    /// A hex-encoded key string.
    Encoded(&'a str),
}

impl<'a> From<&'a Node> for NodeRef<'a> {
    fn from(node: &'a Node) -> Self {
        NodeRef::Node(node)
    }
}

impl From<NodeKey> for NodeRef<'_> {
    fn from(key: NodeKey) -> Self {
        NodeRef::Key(key)
    }
}

impl<'a> From<&'a str> for NodeRef<'a> {
    fn from(s: &'a str) -> Self {
        NodeRef::Encoded(s)
    }
}

/// A directed-acyclic-graph container over [`Node`]s, tracking edges
/// separately from each node's own dependency description so graph-level
/// queries (predecessors, topological order, connected components) don't
/// need to walk compute internals.
pub struct ReactiveGraph {
    nodes: RwLock<IndexMap<NodeKey, Node>>,
    /// `from -> {to, ...}`: edges as declared by `connect`.
    forward: RwLock<IndexMap<NodeKey, IndexSet<NodeKey>>>,
    /// `to -> {from, ...}`: the mirror of `forward`, kept in lockstep.
    backward: RwLock<IndexMap<NodeKey, IndexSet<NodeKey>>>,
}

impl Default for ReactiveGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveGraph {
    /// Builds an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(IndexMap::new()),
            forward: RwLock::new(IndexMap::new()),
            backward: RwLock::new(IndexMap::new()),
        }
    }

    // ---- membership -------------------------------------------------

    /// Inserts `node`. Fails with [`DagifyError::DuplicateNode`] if its key
    /// is already present.
    pub fn add_node(&self, node: Node) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.key()) {
            return Err(DagifyError::DuplicateNode(node.key().to_string()));
        }
        let key = node.key();
        nodes.insert(key, node);
        self.forward.write().entry(key).or_default();
        self.backward.write().entry(key).or_default();
        Ok(())
    }

    /// Inserts every node in `nodes`, stopping at the first duplicate.
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = Node>) -> Result<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Inserts `node`, replacing any existing node under the same key
    /// (its edges are dropped along with it).
    pub fn upsert_node(&self, node: Node) {
        let key = node.key();
        if self.nodes.read().contains_key(&key) {
            self.remove_node(key).ok();
        }
        self.add_node(node).expect("key was just cleared");
    }

    /// Removes `key` and every edge touching it, in either direction.
    pub fn remove_node(&self, key: NodeKey) -> Result<Node> {
        let node = self
            .nodes
            .write()
            .shift_remove(&key)
            .ok_or_else(|| DagifyError::InvalidReference(key.to_string()))?;
        let successors = self.forward.write().shift_remove(&key).unwrap_or_default();
        for to in &successors {
            if let Some(preds) = self.backward.write().get_mut(to) {
                preds.shift_remove(&key);
            }
        }
        let predecessors = self.backward.write().shift_remove(&key).unwrap_or_default();
        for from in &predecessors {
            if let Some(succs) = self.forward.write().get_mut(from) {
                succs.shift_remove(&key);
            }
        }
        Ok(node)
    }

    /// Resolves any [`NodeRef`] to a node's key.
    pub fn resolve_key(&self, node_ref: NodeRef) -> Result<NodeKey> {
        match node_ref {
            NodeRef::Node(node) => Ok(node.key()),
            NodeRef::Key(key) => {
                if self.nodes.read().contains_key(&key) {
                    Ok(key)
                } else {
                    Err(DagifyError::InvalidReference(key.to_string()))
                }
            }
            NodeRef::Encoded(s) => {
                let key = NodeKey::from_encoded(s)?;
                if self.nodes.read().contains_key(&key) {
                    Ok(key)
                } else {
                    Err(DagifyError::InvalidReference(s.to_string()))
                }
            }
        }
    }

    // ---- edges -------------------------------------------------

    /// Adds the edge `src -> tgt`, mirroring it into `tgt`'s own dependency
    /// description (so `tgt`'s compute actually reads `src`'s value).
    /// Rejects unknown references and any edge that would create a cycle.
    pub fn connect<'a>(&self, src: impl Into<NodeRef<'a>>, tgt: impl Into<NodeRef<'a>>) -> Result<()> {
        let src = self.resolve_key(src.into())?;
        let tgt = self.resolve_key(tgt.into())?;
        if self.creates_cycle(src, tgt) {
            return Err(DagifyError::CycleDetected {
                from: src.to_string(),
                to: tgt.to_string(),
            });
        }
        let nodes = self.nodes.read();
        let src_node = nodes.get(&src).expect("resolved key must be present");
        let tgt_node = nodes.get(&tgt).expect("resolved key must be present");
        if src_node.is_sink() {
            return Err(DagifyError::InvalidDependency(format!(
                "{src} is a sink and cannot be used as a dependency"
            )));
        }
        tgt_node.add_dependency(DependencyLeaf::Source(std::sync::Arc::new(src_node.clone())))?;
        drop(nodes);
        self.forward.write().entry(src).or_default().insert(tgt);
        self.backward.write().entry(tgt).or_default().insert(src);
        Ok(())
    }

    /// Removes the edge `src -> tgt`, including `tgt`'s corresponding
    /// dependency leaf.
    pub fn disconnect<'a>(&self, src: impl Into<NodeRef<'a>>, tgt: impl Into<NodeRef<'a>>) -> Result<()> {
        let src = self.resolve_key(src.into())?;
        let tgt = self.resolve_key(tgt.into())?;
        if let Some(tgt_node) = self.nodes.read().get(&tgt) {
            tgt_node.remove_dependency(src)?;
        }
        if let Some(succs) = self.forward.write().get_mut(&src) {
            succs.shift_remove(&tgt);
        }
        if let Some(preds) = self.backward.write().get_mut(&tgt) {
            preds.shift_remove(&src);
        }
        Ok(())
    }

    fn creates_cycle(&self, src: NodeKey, tgt: NodeKey) -> bool {
        if src == tgt {
            return true;
        }
        // A src -> tgt edge creates a cycle iff tgt can already reach src.
        let forward = self.forward.read();
        let mut stack = vec![tgt];
        let mut visited: HashSet<NodeKey> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == src {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(succs) = forward.get(&current) {
                stack.extend(succs.iter().copied());
            }
        }
        false
    }

    // ---- update -------------------------------------------------

    /// Synchronously recomputes every node in topological order.
    pub fn update(&self) -> Result<()> {
        for key in self.topological_sort()? {
            if let Some(node) = self.nodes.read().get(&key) {
                node.next(serde_json::Value::Null).ok();
            }
        }
        Ok(())
    }

    /// Recomputes every node in topological order, then yields once so any
    /// scheduler-deferred recomputation (microtask/async update scheduler)
    /// has a chance to run before returning.
    pub async fn update_async(&self) -> Result<()> {
        self.update()?;
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Kahn's algorithm. Fails with [`DagifyError::CycleDetected`] (using
    /// the first unresolved node as both endpoints) if the residual graph
    /// after removing all zero-in-degree nodes is non-empty — this should
    /// be unreachable given `connect`'s own cycle rejection, but guards
    /// against a graph built by direct dependency mutation bypassing it.
    pub fn topological_sort(&self) -> Result<Vec<NodeKey>> {
        let nodes = self.nodes.read();
        let backward = self.backward.read();
        let forward = self.forward.read();
        let mut in_degree: IndexMap<NodeKey, usize> = nodes
            .keys()
            .map(|k| (*k, backward.get(k).map(|s| s.len()).unwrap_or(0)))
            .collect();
        let mut queue: VecDeque<NodeKey> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(key) = queue.pop_front() {
            order.push(key);
            if let Some(succs) = forward.get(&key) {
                for succ in succs {
                    if let Some(d) = in_degree.get_mut(succ) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(*succ);
                        }
                    }
                }
            }
        }
        if order.len() != nodes.len() {
            let residual = nodes
                .keys()
                .find(|k| !order.contains(k))
                .copied()
                .unwrap_or_else(|| *nodes.keys().next().expect("non-empty graph"));
            return Err(DagifyError::CycleDetected {
                from: residual.to_string(),
                to: residual.to_string(),
            });
        }
        Ok(order)
    }

    // ---- queries -------------------------------------------------

    /// Looks up a node by key.
    pub fn get_node(&self, key: NodeKey) -> Option<Node> {
        self.nodes.read().get(&key).cloned()
    }

    /// Every node, in insertion order.
    pub fn get_nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    /// Every edge as `(from, to)` pairs, in insertion order.
    pub fn get_edges(&self) -> Vec<(NodeKey, NodeKey)> {
        self.forward
            .read()
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (*from, *to)))
            .collect()
    }

    /// First node for which `predicate` holds.
    pub fn find_node(&self, predicate: impl Fn(&Node) -> bool) -> Option<Node> {
        self.nodes.read().values().find(|n| predicate(n)).cloned()
    }

    /// Immediate predecessors of `key`.
    pub fn get_predecessors(&self, key: NodeKey) -> Vec<NodeKey> {
        self.backward
            .read()
            .get(&key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Immediate successors of `key`.
    pub fn get_successors(&self, key: NodeKey) -> Vec<NodeKey> {
        self.forward
            .read()
            .get(&key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every node transitively reachable backward from `key` (all
    /// ancestors), via BFS.
    pub fn get_all_predecessors(&self, key: NodeKey) -> Vec<NodeKey> {
        self.transitive(key, &self.backward.read())
    }

    /// Every node transitively reachable forward from `key` (all
    /// descendants), via BFS.
    pub fn get_all_successors(&self, key: NodeKey) -> Vec<NodeKey> {
        self.transitive(key, &self.forward.read())
    }

    fn transitive(&self, key: NodeKey, adjacency: &IndexMap<NodeKey, IndexSet<NodeKey>>) -> Vec<NodeKey> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from(
            adjacency
                .get(&key)
                .map(|s| s.iter().copied().collect::<Vec<_>>())
                .unwrap_or_default(),
        );
        let mut order = Vec::new();
        while let Some(k) = queue.pop_front() {
            if !visited.insert(k) {
                continue;
            }
            order.push(k);
            if let Some(next) = adjacency.get(&k) {
                queue.extend(next.iter().copied());
            }
        }
        order
    }

    /// Nodes with no predecessors (graph roots).
    pub fn get_sources(&self) -> Vec<NodeKey> {
        let backward = self.backward.read();
        self.nodes
            .read()
            .keys()
            .filter(|k| backward.get(k).map(|s| s.is_empty()).unwrap_or(true))
            .copied()
            .collect()
    }

    /// Nodes with no successors (graph leaves).
    pub fn get_sinks(&self) -> Vec<NodeKey> {
        let forward = self.forward.read();
        self.nodes
            .read()
            .keys()
            .filter(|k| forward.get(k).map(|s| s.is_empty()).unwrap_or(true))
            .copied()
            .collect()
    }

    /// Shortest directed path from `from` to `to`, via BFS, or `None` if
    /// unreachable.
    pub fn find_path(&self, from: NodeKey, to: NodeKey) -> Option<Vec<NodeKey>> {
        if from == to {
            return Some(vec![from]);
        }
        let forward = self.forward.read();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(vec![from]);
        visited.insert(from);
        while let Some(path) = queue.pop_front() {
            let last = *path.last().expect("path is never empty");
            if let Some(succs) = forward.get(&last) {
                for succ in succs {
                    if *succ == to {
                        let mut full = path.clone();
                        full.push(*succ);
                        return Some(full);
                    }
                    if visited.insert(*succ) {
                        let mut next = path.clone();
                        next.push(*succ);
                        queue.push_back(next);
                    }
                }
            }
        }
        None
    }

    /// Number of incoming edges.
    pub fn get_in_degree(&self, key: NodeKey) -> usize {
        self.backward.read().get(&key).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of outgoing edges.
    pub fn get_out_degree(&self, key: NodeKey) -> usize {
        self.forward.read().get(&key).map(|s| s.len()).unwrap_or(0)
    }

    /// Whether `key` is present.
    pub fn has_node(&self, key: NodeKey) -> bool {
        self.nodes.read().contains_key(&key)
    }

    /// Whether the edge `src -> tgt` is present.
    pub fn has_edge(&self, src: NodeKey, tgt: NodeKey) -> bool {
        self.forward
            .read()
            .get(&src)
            .is_some_and(|s| s.contains(&tgt))
    }

    /// Every node reachable from `key` ignoring edge direction (treats the
    /// graph as undirected), via BFS.
    pub fn get_connected_component(&self, key: NodeKey) -> Vec<NodeKey> {
        let forward = self.forward.read();
        let backward = self.backward.read();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeKey> = VecDeque::new();
        queue.push_back(key);
        visited.insert(key);
        let mut order = Vec::new();
        while let Some(k) = queue.pop_front() {
            order.push(k);
            let neighbors = forward
                .get(&k)
                .into_iter()
                .flatten()
                .chain(backward.get(&k).into_iter().flatten());
            for n in neighbors {
                if visited.insert(*n) {
                    queue.push_back(*n);
                }
            }
        }
        order
    }
}

impl std::fmt::Display for ReactiveGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ReactiveGraph {{")?;
        for key in self.nodes.read().keys() {
            let succs = self.get_successors(*key);
            writeln!(
                f,
                "  {key} -> [{}]",
                succs.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
            )?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ComputeFn, ComputeOutcome, NodeConfig, Observer};
    use crate::runtime::Context;
    use crate::scheduler::SyncScheduler;
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};

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

    fn passthrough() -> ComputeFn {
        Arc::new(|values| {
            let crate::dependency::DependencyValues::Ordered(v) = values else {
                unreachable!()
            };
            match v.first() {
                Some(value) => ComputeOutcome::Value((**value).clone()),
                None => ComputeOutcome::NoEmit,
            }
        })
    }

    #[test]
    fn connect_mirrors_into_the_target_dependency_description() {
        let ctx = sync_ctx();
        let graph = ReactiveGraph::new();
        let a = Node::stateful(json!(1), NodeConfig::default(), ctx.clone());
        let b = Node::computed(
            passthrough(),
            crate::dependency::DependencyDescription::Ordered(vec![]),
            NodeConfig::default(),
            ctx,
        )
        .unwrap();
        graph.add_node(a.clone()).unwrap();
        graph.add_node(b.clone()).unwrap();
        graph.connect(&a, &b).unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _c = b
            .subscribe(Observer::on_next(move |v| s.lock().unwrap().push((*v).clone())))
            .unwrap();
        // `connect` already triggered one recompute, delivered here as the
        // new subscriber's initial value; `a.set` triggers the second.
        a.set(json!(42)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(42)]);
    }

    #[test]
    fn connect_rejects_a_cycle() {
        let ctx = sync_ctx();
        let graph = ReactiveGraph::new();
        let a = Node::computed(
            passthrough(),
            crate::dependency::DependencyDescription::Ordered(vec![]),
            NodeConfig::default(),
            ctx.clone(),
        )
        .unwrap();
        let b = Node::computed(
            passthrough(),
            crate::dependency::DependencyDescription::Ordered(vec![]),
            NodeConfig::default(),
            ctx.clone(),
        )
        .unwrap();
        let c = Node::computed(
            passthrough(),
            crate::dependency::DependencyDescription::Ordered(vec![]),
            NodeConfig::default(),
            ctx,
        )
        .unwrap();
        graph.add_nodes([a.clone(), b.clone(), c.clone()]).unwrap();
        graph.connect(&a, &b).unwrap();
        graph.connect(&b, &c).unwrap();
        let result = graph.connect(&c, &a);
        assert!(matches!(result, Err(DagifyError::CycleDetected { .. })));
    }

    #[test]
    fn topological_sort_orders_dependencies_before_dependents() {
        let ctx = sync_ctx();
        let graph = ReactiveGraph::new();
        let a = Node::stateful(json!(1), NodeConfig::default(), ctx.clone());
        let b = Node::computed(
            passthrough(),
            crate::dependency::DependencyDescription::Ordered(vec![]),
            NodeConfig::default(),
            ctx.clone(),
        )
        .unwrap();
        let c = Node::computed(
            passthrough(),
            crate::dependency::DependencyDescription::Ordered(vec![]),
            NodeConfig::default(),
            ctx,
        )
        .unwrap();
        graph.add_nodes([a.clone(), b.clone(), c.clone()]).unwrap();
        graph.connect(&a, &b).unwrap();
        graph.connect(&b, &c).unwrap();
        let order = graph.topological_sort().unwrap();
        assert_eq!(order, vec![a.key(), b.key(), c.key()]);
    }

    #[test]
    fn connected_component_ignores_edge_direction() {
        let ctx = sync_ctx();
        let graph = ReactiveGraph::new();
        let a = Node::stateful(json!(1), NodeConfig::default(), ctx.clone());
        let b = Node::computed(
            passthrough(),
            crate::dependency::DependencyDescription::Ordered(vec![]),
            NodeConfig::default(),
            ctx.clone(),
        )
        .unwrap();
        let isolated = Node::stateful(json!(0), NodeConfig::default(), ctx);
        graph.add_nodes([a.clone(), b.clone(), isolated.clone()]).unwrap();
        graph.connect(&a, &b).unwrap();
        let component = graph.get_connected_component(b.key());
        assert!(component.contains(&a.key()));
        assert!(!component.contains(&isolated.key()));
    }
}
