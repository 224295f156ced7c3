//! Lifecycle Errors
//!
//! Every error in this crate describes a caller bug: attaching a node twice,
//! building a cycle, extending a pipeline that is already linked or frozen,
//! resolving a single-value pipeline twice. They are returned synchronously
//! from the call that caused them.
//!
//! Panics raised by user callbacks are not errors in this sense. They are
//! caught at the invocation site and logged (see `Runtime::isolate`).

use crate::lifecycle::NodeId;

/// Misuse of the attachment tree or of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// `attach`, `attach_to_root` or a chain operator was applied to a node
    /// that has already been attached.
    #[error("node {0} is already attached")]
    AlreadyAttached(NodeId),

    /// The requested parent is the node itself or one of its descendants.
    #[error("attaching node {node} under {parent} would create a cycle")]
    CircularAttachment { node: NodeId, parent: NodeId },

    /// A pipeline stage can be extended exactly once.
    #[error("stage {0} is already linked to a following stage")]
    AlreadyLinked(NodeId),

    /// A single-value pipeline resolves at most once.
    #[error("single pipeline {0} has already been resolved")]
    AlreadyResolved(NodeId),

    /// `update` on an effect channel after it was destroyed.
    #[error("effect channel {0} has been destroyed")]
    EffectDestroyed(NodeId),

    /// The same source object was handed to `merge`/`combine` more than once.
    #[error("the same source was supplied more than once")]
    DuplicateSource,

    /// Reported by `Runtime::tick` for a node that was neither attached nor
    /// destroyed since it was created.
    #[error("node {node} ({label}) was never attached")]
    NeverAttached { node: NodeId, label: &'static str },
}

/// Result alias used throughout the crate.
pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;
