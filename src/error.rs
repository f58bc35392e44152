//! Error types for node construction, graph operations, and propagation.
//!
//! Errors split into two families, matching the propagation policy of the
//! reactive core:
//!
//! - **Synchronous / constructional** errors (`CycleDetected`, `KeyShape`,
//!   `InvalidDependency`, ...) fail the calling operation immediately and
//!   never mutate state.
//! - **Propagated** errors (`UserCompute`, `TypeMismatch`, `EncodingFailure`,
//!   `ValidationFailure`) are routed to a node's subscriber `error` channel
//!   and to the dependency-error replay stream visible to dependents; the
//!   node stays alive and may recover on its next successful emission.
//!
//! See [`DagifyError::is_fatal`] for the fatal-error escape hatch described
//! in the propagation policy.

use thiserror::Error;

/// Convenience alias for `Result<T, DagifyError>`.
pub type Result<T> = std::result::Result<T, DagifyError>;

/// Errors raised by node construction, dependency management, graph
/// mutation, and value propagation.
#[derive(Error, Debug, Clone)]
pub enum DagifyError {
    /// Graph lookup on an unknown node, a malformed key, or a reference that
    /// does not resolve to a node when one was required.
    #[error("invalid node reference: {0}")]
    InvalidReference(String),

    /// `connect` would introduce a cycle.
    #[error("connecting {from} -> {to} would create a cycle")]
    CycleDetected {
        /// Source node's encoded key.
        from: String,
        /// Target node's encoded key.
        to: String,
    },

    /// `addNode` called with an already-registered key.
    #[error("node {0} already exists in the graph")]
    DuplicateNode(String),

    /// A key was not exactly 32 bytes.
    #[error("node keys must be exactly 32 bytes, got {0}")]
    KeyShape(usize),

    /// Attempted to add a sink as a dependency, or to alter dependencies on
    /// a non-computed node.
    #[error("invalid dependency: {0}")]
    InvalidDependency(String),

    /// `subscribe` called on a sink node.
    #[error("sink node {0} cannot be subscribed to as a dependency")]
    SinkSubscribe(String),

    /// Manual `set` called on a computed node.
    #[error("cannot call set() on computed node {0}; use update() or let dependencies drive it")]
    ComputedSet(String),

    /// An encoder or decoder raised while encoding/decoding a value.
    #[error("encoding failure on node {node}: {reason}")]
    EncodingFailure {
        /// Node where encoding was attempted.
        node: String,
        /// Underlying reason.
        reason: String,
    },

    /// No encoding is configured for `encodeForSink()`.
    #[error("node {0} has no value encoding configured")]
    NoEncoding(String),

    /// A value failed the node's registered type validator.
    #[error("type mismatch on node {node}: expected {expected}")]
    TypeMismatch {
        /// Node whose validator rejected the value.
        node: String,
        /// The type tag that was being validated against.
        expected: String,
    },

    /// A queued node's overflow strategy resolved to `error`.
    #[error("queue overflow on node {0}")]
    QueueOverflow(String),

    /// An async-iterable or stream-mode queued node's buffer exceeded its
    /// configured bound.
    #[error("stream buffer overflow on node {0}")]
    StreamOverflow(String),

    /// A command node's validator rejected incoming data.
    #[error("validation failed on command node {node}: {reason}")]
    ValidationFailure {
        /// Node that rejected the input.
        node: String,
        /// Reason reported by the validator.
        reason: String,
    },

    /// The user-supplied compute/handler function panicked or returned an
    /// error.
    #[error("compute failed on node {node}: {reason}")]
    UserCompute {
        /// Node whose compute function failed.
        node: String,
        /// Error message surfaced from the user function.
        reason: String,
    },

    /// Registry lookup failed (unknown type tag or encoder descriptor).
    #[error("registry error: {0}")]
    Registry(String),
}

impl DagifyError {
    /// Classifies an error as fatal per the default fail-fast predicate:
    /// programmer errors (bad references, shape mismatches, invalid
    /// operations) are fatal and should be rethrown from the compute frame
    /// rather than swallowed into the dependency-error stream.
    ///
    /// Implementations may substitute their own predicate; this is only
    /// the default.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DagifyError::InvalidReference(_)
                | DagifyError::CycleDetected { .. }
                | DagifyError::DuplicateNode(_)
                | DagifyError::KeyShape(_)
                | DagifyError::InvalidDependency(_)
                | DagifyError::SinkSubscribe(_)
                | DagifyError::ComputedSet(_)
        )
    }
}
