//! Lifecycle Runtime
//!
//! The runtime owns the per-thread state every node shares:
//!
//! 1. The implicit root. Nodes attached with `attach_to_root` become its
//!    children, which keeps them (and whatever they retain) alive until they
//!    are destroyed. The root itself is never destroyed.
//!
//! 2. The hygiene check. Every node created since the last [`Runtime::tick`]
//!    is remembered weakly; the tick reports those that were neither attached
//!    nor destroyed. This replaces a timer on an event loop: the host calls
//!    `tick` at the end of each turn (or in tests, whenever it wants the
//!    check to run).
//!
//! 3. Configuration and fault isolation for user callbacks.
//!
//! # Threading
//!
//! Everything here is thread-local. Nodes are `Rc`-based and never cross
//! threads, so each thread is an independent runtime.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use super::config::{AttachCheck, RuntimeConfig};
use super::node::{Node, WeakNode};
use crate::error::LifecycleError;

/// Below this many tracked nodes the pending list is never pruned.
const PRUNE_FLOOR: usize = 1024;

struct RuntimeState {
    config: RuntimeConfig,
    unchecked: Vec<WeakNode>,
    prune_at: usize,
}

thread_local! {
    static ROOT: Node = Node::root();
    static STATE: RefCell<RuntimeState> = RefCell::new(RuntimeState {
        config: RuntimeConfig::default(),
        unchecked: Vec::new(),
        prune_at: PRUNE_FLOOR,
    });
}

/// The per-thread lifecycle runtime.
pub struct Runtime;

impl Runtime {
    /// Install a configuration for the current thread.
    pub fn configure(config: RuntimeConfig) {
        STATE.with(|state| state.borrow_mut().config = config);
    }

    /// The configuration in effect on the current thread.
    pub fn config() -> RuntimeConfig {
        STATE
            .try_with(|state| state.borrow().config)
            .unwrap_or_default()
    }

    /// The implicit root node. Calling `destroy` on it has no effect.
    pub fn root() -> Node {
        ROOT.with(Node::clone)
    }

    /// Remember a freshly created node for the next hygiene check.
    pub(crate) fn track(node: &Node) {
        let weak = node.downgrade();
        let _ = STATE.try_with(|state| {
            let mut state = state.borrow_mut();
            state.unchecked.push(weak);

            // Long-running hosts that never tick would otherwise grow this
            // list without bound.
            if state.unchecked.len() >= state.prune_at {
                state.unchecked.retain(WeakNode::is_pending);
                state.prune_at = (state.unchecked.len() * 2).max(PRUNE_FLOOR);
            }
        });
    }

    /// Run the deferred "was this ever attached?" check.
    ///
    /// Every node created since the previous tick is inspected exactly once.
    /// Nodes that are still alive, not attached and not destroyed are
    /// returned as [`LifecycleError::NeverAttached`] and handled according to
    /// [`RuntimeConfig::attach_check`].
    pub fn tick() -> Vec<LifecycleError> {
        let (config, candidates) = STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.prune_at = PRUNE_FLOOR;
            (state.config, std::mem::take(&mut state.unchecked))
        });

        if config.attach_check == AttachCheck::Off {
            return Vec::new();
        }

        let errors: Vec<LifecycleError> = candidates
            .iter()
            .filter_map(WeakNode::upgrade)
            .filter(|node| !node.is_attached() && !node.is_destroyed())
            .map(|node| LifecycleError::NeverAttached {
                node: node.id(),
                label: node.label(),
            })
            .collect();

        for error in &errors {
            tracing::error!(%error, "lifecycle hygiene check failed");
        }

        if config.attach_check == AttachCheck::Panic {
            if let Some(first) = errors.first() {
                panic!("{first}");
            }
        }

        errors
    }

    /// Run a user callback, catching and logging a panic.
    ///
    /// Returns `None` if the callback panicked. With
    /// [`RuntimeConfig::isolate_panics`] off, the panic propagates.
    pub(crate) fn isolate<R>(site: &'static str, callback: impl FnOnce() -> R) -> Option<R> {
        if !Self::config().isolate_panics {
            return Some(callback());
        }

        match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(value) => Some(value),
            Err(payload) => {
                tracing::error!(site, panic = panic_message(payload.as_ref()), "callback panicked");
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn tick_reports_unattached_nodes() {
        Runtime::tick();
        let orphan = Node::named("orphan");

        let errors = Runtime::tick();

        assert_eq!(
            errors,
            vec![LifecycleError::NeverAttached {
                node: orphan.id(),
                label: "orphan"
            }]
        );
    }

    #[test]
    fn tick_ignores_attached_and_destroyed_nodes() {
        Runtime::tick();
        let attached = Node::new();
        attached.attach_to_root().unwrap();
        let destroyed = Node::new();
        destroyed.destroy();

        assert!(Runtime::tick().is_empty());
    }

    #[test]
    fn each_node_is_checked_once() {
        Runtime::tick();
        let _orphan = Node::new();

        assert_eq!(Runtime::tick().len(), 1);
        assert!(Runtime::tick().is_empty());
    }

    #[test]
    fn dropped_nodes_are_not_reported() {
        Runtime::tick();
        drop(Node::new());

        assert!(Runtime::tick().is_empty());
    }

    #[test]
    fn tick_can_be_disabled() {
        Runtime::configure(RuntimeConfig {
            attach_check: AttachCheck::Off,
            ..RuntimeConfig::default()
        });
        let _orphan = Node::new();

        assert!(Runtime::tick().is_empty());
        Runtime::configure(RuntimeConfig::default());
    }

    #[test]
    #[should_panic(expected = "was never attached")]
    fn tick_panics_when_configured() {
        Runtime::configure(RuntimeConfig {
            attach_check: AttachCheck::Panic,
            ..RuntimeConfig::default()
        });
        let _orphan = Node::new();
        Runtime::tick();
    }

    #[test]
    fn root_keeps_children_alive() {
        let payload: Rc<dyn Any> = Rc::new("payload");
        let weak = Rc::downgrade(&payload);
        let node = Node::new();
        node.attach_retaining(&Runtime::root(), Some(payload)).unwrap();

        assert!(Runtime::root().children().contains(&node));
        assert!(weak.upgrade().is_some());

        node.destroy();
        assert!(weak.upgrade().is_none());
        assert!(!Runtime::root().children().contains(&node));
    }

    #[test]
    fn root_survives_destroy() {
        let before = Node::new();
        before.attach_to_root().unwrap();

        Runtime::root().destroy();

        assert!(!Runtime::root().is_destroyed());
        assert!(!before.is_destroyed());
        let after = Node::new();
        after.attach_to_root().unwrap();
        assert!(!after.is_destroyed());
        assert_eq!(after.parent(), Some(Runtime::root()));

        before.destroy();
        after.destroy();
    }

    #[test]
    fn isolate_catches_panics() {
        assert_eq!(Runtime::isolate("test", || 7), Some(7));
        assert_eq!(Runtime::isolate("test", || -> i32 { panic!("boom") }), None);
    }
}
