//! The `NO_EMIT` sentinel: a node's value is always either a stored value
//! or this distinguished "nothing to propagate" marker, never both and
//! never neither.

use serde_json::Value;
use std::sync::Arc;

/// A node's current value state.
#[derive(Clone)]
pub enum Emission {
    /// No value available; propagation and dependent compute must be
    /// suppressed.
    NoEmit,
    /// A stored domain value.
    Value(Arc<Value>),
}

impl Emission {
    /// Borrows the stored value, or `None` if this is `NoEmit`.
    pub fn value(&self) -> Option<&Arc<Value>> {
        match self {
            Emission::NoEmit => None,
            Emission::Value(v) => Some(v),
        }
    }

    /// Whether this is the `NoEmit` sentinel.
    pub fn is_no_emit(&self) -> bool {
        matches!(self, Emission::NoEmit)
    }
}

impl From<Arc<Value>> for Emission {
    fn from(value: Arc<Value>) -> Self {
        Emission::Value(value)
    }
}
