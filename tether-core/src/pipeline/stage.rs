//! Pipeline Stages
//!
//! A stage is the unit both pipeline kinds are built from: an attachment node
//! plus a slot for the single downstream listener.
//!
//! # How It Works
//!
//! ```text
//!   push ──▶ [ stage A ] ──listener──▶ [ stage B ] ──listener──▶ [ tail ]
//!              child of B                child of tail             attached
//! ```
//!
//! 1. Values pushed before a listener exists are buffered. Linking the next
//!    stage flushes the buffer in arrival order; after that values pass
//!    straight through.
//! 2. Linking makes the upstream stage an owned child of the downstream one,
//!    so attaching the tail keeps the whole chain alive and destroying any
//!    stage takes the whole chain with it.
//! 3. Completion travels downstream only once every buffered value has been
//!    delivered and no delivery is in progress. A completed tail (attached,
//!    no listener) destroys itself and therefore the chain.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::execution::Execution;
use crate::error::{LifecycleError, Result};
use crate::lifecycle::{Node, Runtime};

pub(crate) type Listener<T> = Rc<dyn Fn(T)>;
pub(crate) type Completion = Rc<dyn Fn()>;

struct StageState<T> {
    pending: VecDeque<T>,
    listener: Option<Listener<T>>,
    on_complete: Option<Completion>,
    linked: bool,
    completed: bool,
    completion_sent: bool,
    /// Deliveries currently running through the listener.
    depth: usize,
}

enum Settle {
    Forward(Completion),
    Destroy,
    Wait,
}

/// Per-value execution contexts for a synchronous step.
///
/// Each value gets a fresh [`Execution`] attached below the next stage for
/// the duration of the callback. Finalizing it makes that value the last one
/// the step accepts.
struct StepScope {
    sequence: Cell<u64>,
    closed: Rc<Cell<bool>>,
}

impl StepScope {
    fn new() -> Self {
        Self {
            sequence: Cell::new(0),
            closed: Rc::new(Cell::new(false)),
        }
    }

    /// Run `step` for one value. `None` once the scope was finalized or if
    /// the step panicked.
    fn run<U: 'static, R>(
        &self,
        next: &Rc<Stage<U>>,
        site: &'static str,
        step: impl FnOnce(&Execution) -> R,
    ) -> Option<R> {
        if self.closed.get() {
            return None;
        }
        let execution = Execution::new(self.sequence.replace(self.sequence.get() + 1));
        let closed = Rc::clone(&self.closed);
        execution.set_finalize_hook(move || closed.set(true));
        if let Err(error) = next.node.adopt(&execution) {
            tracing::error!(%error, "execution context could not be attached");
        }

        let output = Runtime::isolate(site, || step(&execution));
        execution.destroy();
        output
    }

    /// Complete `next` if the last step finalized.
    fn settle<U: 'static>(&self, next: &Stage<U>) {
        if self.closed.get() {
            next.complete();
        }
    }
}

pub(crate) struct Stage<T> {
    node: Node,
    state: RefCell<StageState<T>>,
}

impl<T: 'static> Stage<T> {
    pub(crate) fn new(label: &'static str) -> Rc<Self> {
        Rc::new(Self {
            node: Node::named(label),
            state: RefCell::new(StageState {
                pending: VecDeque::new(),
                listener: None,
                on_complete: None,
                linked: false,
                completed: false,
                completion_sent: false,
                depth: 0,
            }),
        })
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    #[cfg(test)]
    pub(crate) fn is_linked(&self) -> bool {
        self.state.borrow().linked
    }

    #[cfg(test)]
    pub(crate) fn is_completed(&self) -> bool {
        self.state.borrow().completed
    }

    #[cfg(test)]
    /// Number of values waiting for a listener.
    pub(crate) fn pending_len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Offer a value to the stage.
    pub(crate) fn push(&self, value: T) {
        if self.node.is_destroyed() {
            return;
        }

        let listener = {
            let mut state = self.state.borrow_mut();
            match state.listener.clone() {
                Some(listener) if state.pending.is_empty() => {
                    state.depth += 1;
                    listener
                }
                // Mid-flush: keep arrival order.
                Some(_) => {
                    state.pending.push_back(value);
                    return;
                }
                None if self.node.is_attached() => {
                    tracing::trace!(stage = %self.node.id(), "terminal stage dropped a value");
                    return;
                }
                None => {
                    state.pending.push_back(value);
                    return;
                }
            }
        };

        listener(value);
        self.state.borrow_mut().depth -= 1;
        self.settle();
    }

    /// Mark the stage as exhausted. Idempotent.
    pub(crate) fn complete(&self) {
        if self.node.is_destroyed() {
            return;
        }
        self.state.borrow_mut().completed = true;
        self.settle();
    }

    pub(crate) fn ensure_linkable(&self) -> Result<()> {
        if self.state.borrow().linked {
            return Err(LifecycleError::AlreadyLinked(self.node.id()));
        }
        if self.node.is_attached() {
            return Err(LifecycleError::AlreadyAttached(self.node.id()));
        }
        Ok(())
    }

    /// Install the downstream listener and flush the buffer into it.
    pub(crate) fn link(
        &self,
        listener: impl Fn(T) + 'static,
        on_complete: impl Fn() + 'static,
    ) -> Result<()> {
        self.ensure_linkable()?;
        {
            let mut state = self.state.borrow_mut();
            state.listener = Some(Rc::new(listener));
            state.on_complete = Some(Rc::new(on_complete));
            state.linked = true;
        }
        self.drain();
        Ok(())
    }

    /// Create the next stage and link it behind this one.
    ///
    /// `forward` receives every value, `finish` runs once this stage has
    /// completed and delivered everything.
    pub(crate) fn chain_with<U: 'static>(
        self: &Rc<Self>,
        label: &'static str,
        forward: impl Fn(&Rc<Stage<U>>, T) + 'static,
        finish: impl Fn(&Rc<Stage<U>>) + 'static,
    ) -> Result<Rc<Stage<U>>> {
        self.ensure_linkable()?;
        let next = Stage::<U>::new(label);

        let values = Rc::downgrade(&next);
        let completion = Rc::downgrade(&next);
        self.link(
            move |value| {
                if let Some(next) = values.upgrade() {
                    forward(&next, value);
                }
            },
            move || {
                if let Some(next) = completion.upgrade() {
                    finish(&next);
                }
            },
        )?;

        // Linking checks that this stage is not attached yet, so it has to
        // happen before this stage becomes a child of `next`.
        let downstream = Rc::downgrade(&next);
        self.node.on_destroy(move || {
            if let Some(next) = downstream.upgrade() {
                next.node.destroy();
            }
        });
        let retained: Rc<dyn Any> = self.clone();
        self.node.attach_retaining(&next.node, Some(retained))?;
        Ok(next)
    }

    /// [`chain_with`](Self::chain_with) that forwards completion as is.
    pub(crate) fn chain<U: 'static>(
        self: &Rc<Self>,
        label: &'static str,
        forward: impl Fn(&Rc<Stage<U>>, T) + 'static,
    ) -> Result<Rc<Stage<U>>> {
        self.chain_with(label, forward, |next| next.complete())
    }

    pub(crate) fn read(self: &Rc<Self>, inspect: impl Fn(&T) + 'static) -> Result<Rc<Stage<T>>> {
        self.chain::<T>("read", move |next, value| {
            if Runtime::isolate("stage.read", || inspect(&value)).is_some() {
                next.push(value);
            }
        })
    }

    pub(crate) fn map<U: 'static>(
        self: &Rc<Self>,
        transform: impl Fn(T) -> U + 'static,
    ) -> Result<Rc<Stage<U>>> {
        self.chain("map", move |next, value| {
            if let Some(mapped) = Runtime::isolate("stage.map", || transform(value)) {
                next.push(mapped);
            }
        })
    }

    pub(crate) fn filter(
        self: &Rc<Self>,
        predicate: impl Fn(&T) -> bool + 'static,
    ) -> Result<Rc<Stage<T>>> {
        self.chain::<T>("filter", move |next, value| {
            if Runtime::isolate("stage.filter", || predicate(&value)) == Some(true) {
                next.push(value);
            }
        })
    }

    pub(crate) fn filter_map<U: 'static>(
        self: &Rc<Self>,
        transform: impl Fn(T) -> Option<U> + 'static,
    ) -> Result<Rc<Stage<U>>> {
        self.chain("filter_map", move |next, value| {
            if let Some(Some(mapped)) = Runtime::isolate("stage.filter_map", || transform(value)) {
                next.push(mapped);
            }
        })
    }

    /// [`read`](Self::read) with a per-value execution context.
    pub(crate) fn read_scoped(
        self: &Rc<Self>,
        inspect: impl Fn(&T, &Execution) + 'static,
    ) -> Result<Rc<Stage<T>>> {
        let scope = StepScope::new();
        self.chain::<T>("read", move |next, value| {
            let inspected = scope.run(next, "stage.read", |execution| {
                inspect(&value, execution)
            });
            if inspected.is_some() {
                next.push(value);
            }
            scope.settle(next);
        })
    }

    /// [`map`](Self::map) with a per-value execution context.
    pub(crate) fn map_scoped<U: 'static>(
        self: &Rc<Self>,
        transform: impl Fn(T, &Execution) -> U + 'static,
    ) -> Result<Rc<Stage<U>>> {
        let scope = StepScope::new();
        self.chain("map", move |next, value| {
            let mapped = scope.run(next, "stage.map", |execution| {
                transform(value, execution)
            });
            if let Some(mapped) = mapped {
                next.push(mapped);
            }
            scope.settle(next);
        })
    }

    /// Called after the user attached this stage as the tail of a chain.
    pub(crate) fn on_attached(&self) {
        let dropped = {
            let mut state = self.state.borrow_mut();
            if state.listener.is_some() {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        if !dropped.is_empty() {
            tracing::trace!(
                stage = %self.node.id(),
                count = dropped.len(),
                "terminal stage dropped buffered values"
            );
        }
        drop(dropped);
        self.settle();
    }

    fn drain(&self) {
        loop {
            if self.node.is_destroyed() {
                return;
            }
            let next = {
                let mut state = self.state.borrow_mut();
                match (state.pending.pop_front(), state.listener.clone()) {
                    (Some(value), Some(listener)) => {
                        state.depth += 1;
                        Some((value, listener))
                    }
                    _ => None,
                }
            };
            let Some((value, listener)) = next else {
                break;
            };
            listener(value);
            self.state.borrow_mut().depth -= 1;
        }
        self.settle();
    }

    /// Forward completion, or destroy a completed tail, once idle.
    fn settle(&self) {
        let action = {
            let mut state = self.state.borrow_mut();
            if !state.completed
                || state.completion_sent
                || state.depth > 0
                || !state.pending.is_empty()
            {
                Settle::Wait
            } else {
                match state.on_complete.clone() {
                    Some(on_complete) => {
                        state.completion_sent = true;
                        Settle::Forward(on_complete)
                    }
                    None if self.node.is_attached() => {
                        state.completion_sent = true;
                        Settle::Destroy
                    }
                    None => Settle::Wait,
                }
            }
        };

        match action {
            Settle::Forward(on_complete) => on_complete(),
            Settle::Destroy => {
                tracing::trace!(stage = %self.node.id(), "completed tail; destroying chain");
                self.node.destroy();
            }
            Settle::Wait => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn collect<T: Clone + 'static>(stage: &Rc<Stage<T>>) -> Rc<RefCell<Vec<T>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        stage
            .link(move |value: T| sink.borrow_mut().push(value), || {})
            .unwrap();
        seen
    }

    #[test]
    fn buffers_until_linked_then_passes_through() {
        let stage = Stage::new("head");
        stage.push(1);
        stage.push(2);
        assert_eq!(stage.pending_len(), 2);

        let seen = collect(&stage);
        assert_eq!(*seen.borrow(), vec![1, 2]);

        stage.push(3);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(stage.pending_len(), 0);
        stage.node().destroy();
    }

    #[test]
    fn linking_twice_fails() {
        let stage = Stage::<i32>::new("head");
        stage.link(|_| {}, || {}).unwrap();

        assert_eq!(
            stage.link(|_| {}, || {}),
            Err(LifecycleError::AlreadyLinked(stage.node().id()))
        );
        assert!(stage.is_linked());
        stage.node().destroy();
    }

    #[test]
    fn linking_after_attach_fails() {
        let stage = Stage::<i32>::new("head");
        stage.node().attach_to_root().unwrap();

        assert!(matches!(
            stage.chain::<i32>("map", |next, v| next.push(v)),
            Err(LifecycleError::AlreadyAttached(_))
        ));
        stage.node().destroy();
    }

    #[test]
    fn every_operator_links_a_fresh_stage() {
        let head = Stage::<i32>::new("head");
        let mapped = head.map(|v| v + 1).unwrap();
        let read = mapped.read(|_| {}).unwrap();
        let filtered = read.filter(|v| *v > 0).unwrap();
        let tail = filtered.filter_map(|v| Some(v * 2)).unwrap();

        assert!(head.is_linked());
        assert!(head.node().is_attached());
        assert!(!tail.node().is_attached());
        assert!(!tail.is_linked());

        let seen = collect(&tail);
        head.push(4);
        assert_eq!(*seen.borrow(), vec![10]);
        tail.node().destroy();
    }

    #[test]
    fn chain_makes_upstream_a_child_of_downstream() {
        let head = Stage::<i32>::new("head");
        let tail = head.map(|v| v * 10).unwrap();

        assert_eq!(head.node().parent(), Some(tail.node().clone()));
        assert_eq!(tail.node().child_count(), 1);
        tail.node().destroy();
    }

    #[test]
    fn destroying_either_end_destroys_the_chain() {
        let head = Stage::<i32>::new("head");
        let middle = head.map(|v| v + 1).unwrap();
        let tail = middle.map(|v| v + 1).unwrap();
        tail.node().attach_to_root().unwrap();

        head.node().destroy();
        assert!(middle.node().is_destroyed());
        assert!(tail.node().is_destroyed());

        let head = Stage::<i32>::new("head");
        let tail = head.read(|_| {}).unwrap();
        tail.node().attach_to_root().unwrap();
        tail.node().destroy();
        assert!(head.node().is_destroyed());
    }

    #[test]
    fn terminal_stage_drops_values() {
        let stage = Stage::new("tail");
        stage.push(1);
        stage.node().attach_to_root().unwrap();
        stage.on_attached();
        stage.push(2);

        assert_eq!(stage.pending_len(), 0);
        stage.node().destroy();
    }

    #[test]
    fn completion_waits_for_buffered_values() {
        let stage = Stage::new("head");
        stage.push('a');
        stage.complete();
        assert!(stage.is_completed());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let done = Rc::new(Cell::new(false));
        let done_flag = done.clone();
        stage
            .link(
                move |v| sink.borrow_mut().push(v),
                move || {
                    assert_eq!(*seen.borrow(), vec!['a']);
                    done_flag.set(true);
                },
            )
            .unwrap();

        assert!(done.get());
        stage.node().destroy();
    }

    #[test]
    fn completed_tail_destroys_chain() {
        let head = Stage::<i32>::new("head");
        let tail = head.map(|v| v).unwrap();
        tail.node().attach_to_root().unwrap();
        tail.on_attached();

        head.push(1);
        assert!(!tail.node().is_destroyed());

        head.complete();
        assert!(tail.node().is_destroyed());
        assert!(head.node().is_destroyed());
    }

    #[test]
    fn panicking_map_drops_only_that_value() {
        let head = Stage::new("head");
        let mapped = head
            .map(|v: i32| {
                if v == 2 {
                    panic!("bad value");
                }
                v
            })
            .unwrap();
        let seen = collect(&mapped);

        head.push(1);
        head.push(2);
        head.push(3);

        assert_eq!(*seen.borrow(), vec![1, 3]);
        assert!(!mapped.node().is_destroyed());
        mapped.node().destroy();
    }

    #[test]
    fn reentrant_push_keeps_order() {
        let head = Stage::new("head");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let weak_head = Rc::downgrade(&head);
        head.push(1);
        head.link(
            move |v: i32| {
                sink.borrow_mut().push(v);
                if v == 1 {
                    if let Some(head) = weak_head.upgrade() {
                        head.push(10);
                    }
                }
            },
            || {},
        )
        .unwrap();
        head.push(2);

        assert_eq!(*seen.borrow(), vec![1, 10, 2]);
        head.node().destroy();
    }
}
