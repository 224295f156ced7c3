//! Multi-Contribution Aggregator
//!
//! An aggregator collects one value per live [`Effect`] and publishes the
//! list of all current contributions (in the order the effects were created)
//! whenever it changes.
//!
//! # Effects
//!
//! An effect is an attachment node. Its contribution lives exactly as long as
//! the node: destroying the effect, or anything it is attached under, removes
//! the contribution and republishes the aggregate. This is what makes
//! "wait until all of these are destroyed" a one-liner (see
//! `pipeline::when_all_destroyed`).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::channel::ReplayChannel;
use super::registry::Subscription;
use crate::error::{LifecycleError, Result};
use crate::lifecycle::{Attachable, Node, NodeId};

struct AggregatorInner<T> {
    contributions: RefCell<IndexMap<NodeId, T>>,
    aggregate: ReplayChannel<Vec<T>>,
}

impl<T: Clone + 'static> AggregatorInner<T> {
    fn publish(&self) {
        let snapshot: Vec<T> = self.contributions.borrow().values().cloned().collect();
        self.aggregate.notify(snapshot);
    }
}

/// Collects contributions from many effects into one list.
pub struct Aggregator<T> {
    inner: Rc<AggregatorInner<T>>,
}

impl<T: Clone + 'static> Aggregator<T> {
    /// Create an aggregator with no contributions.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(AggregatorInner {
                contributions: RefCell::new(IndexMap::new()),
                aggregate: ReplayChannel::with_value(Vec::new()),
            }),
        }
    }

    /// Add a contribution. The returned effect must be attached.
    #[must_use = "an effect must be attached or destroyed"]
    pub fn effect(&self, value: T) -> Effect<T> {
        let node = Node::named("effect");
        let id = node.id();
        self.inner.contributions.borrow_mut().insert(id, value);

        let inner = Rc::clone(&self.inner);
        node.on_destroy(move || {
            inner.contributions.borrow_mut().shift_remove(&id);
            inner.publish();
        });

        self.inner.publish();
        Effect {
            node,
            aggregator: Rc::clone(&self.inner),
        }
    }

    /// Listen for the aggregate. The current aggregate is delivered
    /// immediately.
    pub fn subscribe(&self, listener: impl Fn(&Vec<T>) + 'static) -> Subscription {
        self.inner.aggregate.subscribe(listener)
    }

    /// The current aggregate.
    pub fn current(&self) -> Vec<T> {
        self.inner.contributions.borrow().values().cloned().collect()
    }

    /// Number of live contributions.
    pub fn len(&self) -> usize {
        self.inner.contributions.borrow().len()
    }

    /// Whether there are no live contributions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + 'static> Default for Aggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Aggregator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Aggregator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("contributions", &self.inner.contributions.borrow().len())
            .finish()
    }
}

/// One contribution to an [`Aggregator`].
pub struct Effect<T> {
    node: Node,
    aggregator: Rc<AggregatorInner<T>>,
}

impl<T: Clone + 'static> Effect<T> {
    /// Replace this effect's contribution.
    pub fn update(&self, value: T) -> Result<()> {
        if self.node.is_destroyed() {
            return Err(LifecycleError::EffectDestroyed(self.node.id()));
        }
        self.aggregator
            .contributions
            .borrow_mut()
            .insert(self.node.id(), value);
        self.aggregator.publish();
        Ok(())
    }

    /// Attach under `parent`; the contribution is withdrawn when the parent
    /// is destroyed.
    pub fn attach<P: Attachable + ?Sized>(&self, parent: &P) -> Result<()> {
        self.node.attach(parent)
    }

    /// Attach under the implicit root.
    pub fn attach_to_root(&self) -> Result<()> {
        self.node.attach_to_root()
    }

    /// Withdraw the contribution.
    pub fn destroy(&self) {
        self.node.destroy();
    }

    /// Whether the effect has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.node.is_destroyed()
    }

    /// The effect's node id.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }
}

impl<T> Attachable for Effect<T> {
    fn node(&self) -> &Node {
        &self.node
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("node", &self.node).finish()
    }
}
