//! Equality modes and snapshotting used before emission.
//!
//! Every non-reference node compares its newly-computed value against the
//! last emitted one before notifying subscribers, suppressing no-op
//! emissions. Node values are carried as `Arc<serde_json::Value>`; since
//! `serde_json::Value` is a tree (no back-references are representable),
//! structural deep-equality is inherently cycle-free, so a "seen-map" cycle
//! guard for deep comparison is unnecessary here — see `DESIGN.md` for the
//! rationale.

use serde_json::Value;
use std::sync::Arc;

/// Controls the comparator a node uses before deciding whether a newly
/// computed value differs enough from the last emitted one to notify
/// subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityMode {
    /// Compare by pointer identity (`Arc::ptr_eq`). Always considers a fresh
    /// `Arc` a change, even if the inner value is structurally identical.
    Reference,
    /// Compare only the top-level keys/elements, not nested structure.
    Shallow,
    /// Full structural comparison. The default.
    Deep,
}

impl Default for EqualityMode {
    fn default() -> Self {
        EqualityMode::Deep
    }
}

/// Returns `true` when `next` should be treated as equal to `prev` under
/// `mode` and therefore suppressed from emission. `prev = None` (no prior
/// emission) is never equal.
pub fn values_equal(mode: EqualityMode, prev: Option<&Arc<Value>>, next: &Arc<Value>) -> bool {
    let Some(prev) = prev else { return false };
    match mode {
        EqualityMode::Reference => Arc::ptr_eq(prev, next),
        EqualityMode::Shallow => shallow_equal(prev, next),
        EqualityMode::Deep => deep_equal(prev, next),
    }
}

/// Structural comparison. Reflexive, symmetric, and returns `true` for
/// structurally equivalent clones by construction of `PartialEq` on
/// `serde_json::Value`.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Compares only one level deep: for objects, same key set with `==` on
/// each value; for arrays, same length with `==` per element; otherwise
/// falls back to full equality.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| v == bv))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
        }
        _ => a == b,
    }
}

/// Captures an independent structural clone of `value`, suitable for
/// comparing against a later in-place mutation of the caller's own copy.
pub fn snapshot(value: &Value) -> Value {
    value.clone()
}
