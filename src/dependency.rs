//! Dependency description: the normalized shape a computed node's inputs
//! are reduced to before the compute algorithm runs.
//!
//! A computed node is built from either a positional list or a named map
//! of dependencies. Each entry is either another node (anything
//! implementing [`DependencySource`]) or a static value wrapped directly.
//! Non-node inputs (promises, async iterables, plain thunks) are the
//! caller's responsibility to adapt into a [`DependencySource`] or a
//! [`DependencyLeaf::Static`] before construction — this module only
//! normalizes and holds the result, so it has no dependency on the node
//! core and the node core depends on it, not the other way around.

use crate::emission::Emission;
use crate::key::NodeKey;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// A listener callback invoked with the source's freshly emitted value.
pub type DependencyListener = Arc<dyn Fn(Arc<Value>) + Send + Sync>;

/// Anything a computed node can depend on: another node, a bridged
/// observable, or any adapter exposing the same read/subscribe surface.
pub trait DependencySource: Send + Sync {
    /// The source's identity, used for cycle detection and diagnostics.
    fn key(&self) -> NodeKey;
    /// The source's current emission state.
    fn snapshot(&self) -> Emission;
    /// Registers `listener` to be called on every future non-`NoEmit`
    /// emission, and returns a closure that removes it.
    fn subscribe(&self, listener: DependencyListener) -> Box<dyn FnOnce() + Send>;
    /// Whether this source is a terminal (sink) node, which cannot serve as
    /// a dependency. Non-node adapters are never sinks.
    fn is_sink(&self) -> bool {
        false
    }
}

/// One dependency slot: either a live source or a value fixed at
/// construction time that never changes and never blocks compute.
#[derive(Clone)]
pub enum DependencyLeaf {
    /// A live, subscribable source.
    Source(Arc<dyn DependencySource>),
    /// A constant, supplied once and never re-evaluated.
    Static(Arc<Value>),
}

impl DependencyLeaf {
    /// The current emission state of this leaf. Static leaves are always
    /// `Emission::Value`.
    pub fn snapshot(&self) -> Emission {
        match self {
            DependencyLeaf::Source(source) => source.snapshot(),
            DependencyLeaf::Static(value) => Emission::Value(value.clone()),
        }
    }

    /// The leaf's identity for cycle detection, if it has one. Static
    /// leaves have no graph identity.
    pub fn key(&self) -> Option<NodeKey> {
        match self {
            DependencyLeaf::Source(source) => Some(source.key()),
            DependencyLeaf::Static(_) => None,
        }
    }
}

/// The normalized set of inputs feeding a computed node's compute
/// function: either positional (array-style access) or named (record-style
/// access), matching how the caller declared them.
#[derive(Clone)]
pub enum DependencyDescription {
    /// Dependencies addressed by position, passed to compute as an array.
    Ordered(Vec<DependencyLeaf>),
    /// Dependencies addressed by name, passed to compute as a record.
    /// Preserves declaration order for iteration and diagnostics.
    Keyed(IndexMap<String, DependencyLeaf>),
}

impl DependencyDescription {
    /// Number of dependency slots.
    pub fn len(&self) -> usize {
        match self {
            DependencyDescription::Ordered(v) => v.len(),
            DependencyDescription::Keyed(m) => m.len(),
        }
    }

    /// Whether there are no dependency slots (a source-only node).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over `(name, leaf)` pairs; ordered leaves report `None` for
    /// name.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (Option<&str>, &DependencyLeaf)> + '_> {
        match self {
            DependencyDescription::Ordered(v) => Box::new(v.iter().map(|leaf| (None, leaf))),
            DependencyDescription::Keyed(m) => {
                Box::new(m.iter().map(|(k, leaf)| (Some(k.as_str()), leaf)))
            }
        }
    }

    /// Graph identities of every live (non-static) leaf, for cycle
    /// detection and predecessor queries.
    pub fn source_keys(&self) -> Vec<NodeKey> {
        self.iter().filter_map(|(_, leaf)| leaf.key()).collect()
    }

    /// Snapshots every leaf into the shape compute expects. Returns `None`
    /// as soon as any leaf is `NoEmit`, matching the rule that a node with
    /// any not-yet-ready (or suppressed) dependency does not compute.
    pub fn snapshot_all(&self) -> Option<DependencyValues> {
        match self {
            DependencyDescription::Ordered(v) => {
                let mut values = Vec::with_capacity(v.len());
                for leaf in v {
                    values.push(leaf.snapshot().value()?.clone());
                }
                Some(DependencyValues::Ordered(values))
            }
            DependencyDescription::Keyed(m) => {
                let mut values = IndexMap::with_capacity(m.len());
                for (k, leaf) in m {
                    values.insert(k.clone(), leaf.snapshot().value()?.clone());
                }
                Some(DependencyValues::Keyed(values))
            }
        }
    }
}

/// A fully-resolved snapshot of every dependency's current value, passed
/// to a compute function as its argument.
#[derive(Clone)]
pub enum DependencyValues {
    /// Positional values, in declaration order.
    Ordered(Vec<Arc<Value>>),
    /// Named values, in declaration order.
    Keyed(IndexMap<String, Arc<Value>>),
}

impl DependencyValues {
    /// Renders this snapshot as a single JSON value: an array for ordered
    /// dependencies, an object for keyed ones. Convenient for compute
    /// functions that want to pattern-match on `serde_json::Value` rather
    /// than on this type directly.
    pub fn to_json(&self) -> Value {
        match self {
            DependencyValues::Ordered(values) => {
                Value::Array(values.iter().map(|v| (**v).clone()).collect())
            }
            DependencyValues::Keyed(values) => Value::Object(
                values
                    .iter()
                    .map(|(k, v)| (k.clone(), (**v).clone()))
                    .collect(),
            ),
        }
    }
}
