//! Execution Contexts
//!
//! Every value entering an asynchronous stage gets its own [`Execution`]: a
//! node attached under the stage, alive for as long as the step for that
//! value is in flight. Anything created while handling the value can be
//! attached to it and is torn down when the step resolves, is cancelled, or
//! the chain is destroyed.
//!
//! `read_scoped` and `map_scoped` hand out the same context to synchronous
//! steps; there it ends as soon as the callback returns.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::lifecycle::{Attachable, Node};

type FinalizeHook = Box<dyn FnOnce()>;

struct ExecutionInner {
    node: Node,
    sequence: u64,
    finalized: Cell<bool>,
    on_finalize: RefCell<Option<FinalizeHook>>,
}

/// The per-value context of an asynchronous step.
#[derive(Clone)]
pub struct Execution {
    inner: Rc<ExecutionInner>,
}

impl Execution {
    pub(crate) fn new(sequence: u64) -> Self {
        Self {
            inner: Rc::new(ExecutionInner {
                node: Node::named("execution"),
                sequence,
                finalized: Cell::new(false),
                on_finalize: RefCell::new(None),
            }),
        }
    }

    /// Arrival order of the value this execution handles, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// Declare this value the last one the stage accepts.
    ///
    /// Later arrivals are dropped and later in-flight executions are
    /// cancelled. Once this execution and every earlier one have been
    /// forwarded, the stage completes. No-op after the execution ended.
    pub fn finalize(&self) {
        if self.inner.finalized.replace(true) || self.inner.node.is_destroyed() {
            return;
        }
        let hook = self.inner.on_finalize.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Whether [`finalize`](Self::finalize) has been called.
    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.get()
    }

    /// Whether the execution has ended (resolved, cancelled or torn down).
    pub fn is_destroyed(&self) -> bool {
        self.inner.node.is_destroyed()
    }

    pub(crate) fn set_finalize_hook(&self, hook: impl FnOnce() + 'static) {
        *self.inner.on_finalize.borrow_mut() = Some(Box::new(hook));
    }

    pub(crate) fn destroy(&self) {
        self.inner.on_finalize.borrow_mut().take();
        self.inner.node.destroy();
    }
}

impl Attachable for Execution {
    fn node(&self) -> &Node {
        &self.inner.node
    }

    fn retained(&self) -> Option<Rc<dyn Any>> {
        let inner: Rc<dyn Any> = self.inner.clone();
        Some(inner)
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("sequence", &self.inner.sequence)
            .field("node", &self.inner.node.id())
            .field("finalized", &self.inner.finalized.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_runs_hook_once() {
        let execution = Execution::new(3);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        execution.set_finalize_hook(move || counter.set(counter.get() + 1));

        execution.finalize();
        execution.finalize();

        assert_eq!(calls.get(), 1);
        assert!(execution.is_finalized());
        assert_eq!(execution.sequence(), 3);
        execution.destroy();
    }

    #[test]
    fn finalize_after_destroy_is_a_noop() {
        let execution = Execution::new(0);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        execution.set_finalize_hook(move || counter.set(counter.get() + 1));

        execution.destroy();
        execution.finalize();

        assert_eq!(calls.get(), 0);
        assert!(execution.is_destroyed());
    }

    #[test]
    fn resources_attached_to_execution_are_torn_down() {
        let execution = Execution::new(0);
        execution.node().attach_to_root().unwrap();
        let resource = Node::new();
        resource.attach(&execution).unwrap();

        execution.destroy();

        assert!(resource.is_destroyed());
    }
}
