//! Attachment Nodes
//!
//! A node has one parent slot, an ordered set of owned children and a
//! destroyed flag. Ownership runs from parent to child only: the parent keeps
//! its children (and whatever handle they asked it to retain) alive, the child
//! refers back to its parent weakly.
//!
//! Destroying a node destroys its children first, depth first, then runs its
//! own on-destroy hooks. By the time `destroy` returns the whole subtree is
//! gone.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::runtime::Runtime;
use super::slots::OrderedSlots;
use crate::error::{LifecycleError, Result};

/// Unique identifier for a node in the attachment tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that is, or wraps, a node of the attachment tree.
///
/// Pipelines, execution contexts and effect channels all implement this so
/// they can be used as parents and be attached themselves.
pub trait Attachable {
    /// The underlying tree node.
    fn node(&self) -> &Node;

    /// A handle the parent keeps alive for as long as this node is its child.
    fn retained(&self) -> Option<Rc<dyn Any>> {
        None
    }
}

type Hook = Box<dyn FnOnce()>;

struct Child {
    node: Node,
    _retained: Option<Rc<dyn Any>>,
}

struct NodeState {
    parent: Option<Weak<NodeInner>>,
    children: OrderedSlots<NodeId, Child>,
    destroyed: bool,
    attach_called: bool,
    hooks: SmallVec<[Hook; 2]>,
}

struct NodeInner {
    id: NodeId,
    label: &'static str,
    /// Set on the runtime root only; `destroy` ignores it.
    permanent: bool,
    state: RefCell<NodeState>,
}

/// A node in the attachment tree.
///
/// Cloning a `Node` clones the handle; both clones refer to the same node.
#[derive(Clone)]
pub struct Node {
    inner: Rc<NodeInner>,
}

/// Weak handle used by the runtime's hygiene check.
pub(crate) struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub(crate) fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }

    /// Still alive, never attached and not destroyed.
    pub(crate) fn is_pending(&self) -> bool {
        match self.0.upgrade() {
            Some(inner) => inner
                .state
                .try_borrow()
                .map(|state| !state.attach_called && !state.destroyed)
                .unwrap_or(true),
            None => false,
        }
    }
}

impl Node {
    /// Create an unattached node.
    ///
    /// The node must be attached (or destroyed) before the next
    /// [`Runtime::tick`], otherwise the tick reports it.
    #[must_use]
    pub fn new() -> Self {
        Self::named("node")
    }

    /// Create an unattached node with a diagnostic label.
    #[must_use]
    pub fn named(label: &'static str) -> Self {
        let node = Self::build(label, false);
        Runtime::track(&node);
        node
    }

    /// The runtime root: exempt from the hygiene check and never destroyed.
    pub(crate) fn root() -> Self {
        Self::build("root", true)
    }

    fn build(label: &'static str, permanent: bool) -> Self {
        Self {
            inner: Rc::new(NodeInner {
                id: NodeId::new(),
                label,
                permanent,
                state: RefCell::new(NodeState {
                    parent: None,
                    children: OrderedSlots::new(),
                    destroyed: false,
                    attach_called: false,
                    hooks: SmallVec::new(),
                }),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.inner))
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the node's diagnostic label.
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Whether `destroy` has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }

    /// Whether `attach` or `attach_to_root` has been called.
    pub fn is_attached(&self) -> bool {
        self.inner.state.borrow().attach_called
    }

    /// The current parent, if it is still alive.
    pub fn parent(&self) -> Option<Node> {
        self.inner
            .state
            .borrow()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Node { inner })
    }

    /// Number of live children.
    pub fn child_count(&self) -> usize {
        self.inner.state.borrow().children.len()
    }

    /// Snapshot of the children, in attachment order.
    pub fn children(&self) -> Vec<Node> {
        self.inner
            .state
            .borrow()
            .children
            .values()
            .map(|child| child.node.clone())
            .collect()
    }

    /// Attach this node under `parent`.
    pub fn attach<P: Attachable + ?Sized>(&self, parent: &P) -> Result<()> {
        self.attach_retaining(parent.node(), None)
    }

    /// Attach this node under the implicit, never-destroyed root.
    pub fn attach_to_root(&self) -> Result<()> {
        self.attach_retaining(&Runtime::root(), None)
    }

    /// Attach `child` under this node, keeping the child's retained handle
    /// alive for as long as it stays attached.
    pub(crate) fn adopt<C: Attachable + ?Sized>(&self, child: &C) -> Result<()> {
        child.node().attach_retaining(self, child.retained())
    }

    /// Attach under `parent`, which keeps `retained` alive while this node is
    /// its child.
    pub(crate) fn attach_retaining(
        &self,
        parent: &Node,
        retained: Option<Rc<dyn Any>>,
    ) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.attach_called {
                return Err(LifecycleError::AlreadyAttached(self.id()));
            }
            if state.destroyed {
                state.attach_called = true;
                return Ok(());
            }
        }

        // Walk the ancestor chain of the new parent looking for ourselves.
        let mut cursor = Some(parent.clone());
        while let Some(ancestor) = cursor {
            if ancestor.id() == self.id() {
                return Err(LifecycleError::CircularAttachment {
                    node: self.id(),
                    parent: parent.id(),
                });
            }
            cursor = ancestor.parent();
        }

        self.inner.state.borrow_mut().attach_called = true;

        if parent.is_destroyed() {
            tracing::trace!(node = %self.id(), parent = %parent.id(), "attached to destroyed parent");
            self.destroy();
            return Ok(());
        }

        self.inner.state.borrow_mut().parent = Some(Rc::downgrade(&parent.inner));
        parent.inner.state.borrow_mut().children.insert(
            self.id(),
            Child {
                node: self.clone(),
                _retained: retained,
            },
        );
        tracing::trace!(node = %self.id(), label = self.label(), parent = %parent.id(), "attached");
        Ok(())
    }

    /// Register a hook that runs once when this node is destroyed.
    ///
    /// If the node is already destroyed the hook runs immediately.
    pub fn on_destroy(&self, hook: impl FnOnce() + 'static) {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.destroyed {
                state.hooks.push(Box::new(hook));
                return;
            }
        }
        Runtime::isolate("node.on_destroy", hook);
    }

    /// Destroy this node and its whole subtree. Idempotent.
    ///
    /// The runtime root cannot be destroyed; the call is logged and ignored.
    pub fn destroy(&self) {
        if self.inner.permanent {
            tracing::warn!(node = %self.id(), "ignoring destroy of the runtime root");
            return;
        }
        let (parent, children, hooks) = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            (
                state.parent.take(),
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.hooks),
            )
        };

        tracing::trace!(
            node = %self.id(),
            label = self.label(),
            children = children.len(),
            "destroying node"
        );

        // Held until the end so a retained handle outlives this call.
        let detached = match parent.and_then(|weak| weak.upgrade()) {
            Some(parent) => {
                let removed = parent.state.borrow_mut().children.remove(&self.id());
                removed
            }
            None => None,
        };

        for child in children.into_values() {
            child.node.destroy();
        }

        for hook in hooks {
            Runtime::isolate("node.on_destroy", hook);
        }

        drop(detached);
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Attachable for Node {
    fn node(&self) -> &Node {
        self
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.try_borrow();
        let mut debug = f.debug_struct("Node");
        debug.field("id", &self.id()).field("label", &self.label());
        if let Ok(state) = state {
            debug
                .field("children", &state.children.len())
                .field("attached", &state.attach_called)
                .field("destroyed", &state.destroyed);
        }
        debug.finish()
    }
}
