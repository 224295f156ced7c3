//! Asynchronous Mapping
//!
//! An asynchronous stage turns each incoming value into a nested [`Source`]
//! and forwards that source's first value. Every value gets an execution
//! slot:
//!
//! ```text
//!   slot { sequence, execution, result }
//! ```
//!
//! # Policies
//!
//! - [`AsyncPolicy::Ordered`]: every step starts immediately; results are
//!   held back and released in arrival order.
//! - [`AsyncPolicy::Direct`]: results are forwarded as they complete.
//! - [`AsyncPolicy::DropIncoming`]: a new arrival cancels every older slot
//!   still in flight, so only the latest value can produce a result.
//!
//! A slot ends when its nested source emits, completes or is destroyed
//! without emitting, or when the slot is cancelled. Its execution context is
//! destroyed at that point, taking any resources attached to it along.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use super::execution::Execution;
use super::source::Source;
use super::stage::Stage;
use crate::error::Result;
use crate::lifecycle::{Attachable, Runtime};

/// How an asynchronous stage orders and cancels in-flight work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncPolicy {
    /// Release results in arrival order.
    #[default]
    Ordered,
    /// Release results in completion order.
    Direct,
    /// Cancel older in-flight work whenever a new value arrives.
    DropIncoming,
}

type Step<T, U> = Box<dyn Fn(T, &Execution) -> Source<U>>;

struct Slot<U> {
    sequence: u64,
    execution: Execution,
    result: Option<U>,
}

struct AsyncState<U> {
    next_sequence: u64,
    slots: VecDeque<Slot<U>>,
    /// Finalized: no further arrivals are accepted.
    closed: bool,
    upstream_done: bool,
}

struct AsyncStage<T, U> {
    policy: AsyncPolicy,
    step: Step<T, U>,
    state: RefCell<AsyncState<U>>,
}

enum Resolved<U> {
    Hold(Execution),
    Emit(Execution, U),
}

fn upgrade_both<A, B>(a: &Weak<A>, b: &Weak<B>) -> Option<(Rc<A>, Rc<B>)> {
    Some((a.upgrade()?, b.upgrade()?))
}

/// Link an asynchronous stage behind `upstream`.
pub(crate) fn link<T, U>(
    upstream: &Rc<Stage<T>>,
    label: &'static str,
    policy: AsyncPolicy,
    step: impl Fn(T, &Execution) -> Source<U> + 'static,
) -> Result<Rc<Stage<U>>>
where
    T: 'static,
    U: Clone + 'static,
{
    let engine = Rc::new(AsyncStage {
        policy,
        step: Box::new(step),
        state: RefCell::new(AsyncState {
            next_sequence: 0,
            slots: VecDeque::new(),
            closed: false,
            upstream_done: false,
        }),
    });
    let on_value = Rc::clone(&engine);
    upstream.chain_with(
        label,
        move |next, value| on_value.accept(next, value),
        move |next| engine.upstream_completed(next),
    )
}

impl<T: 'static, U: Clone + 'static> AsyncStage<T, U> {
    fn accept(self: &Rc<Self>, next: &Rc<Stage<U>>, value: T) {
        if next.node().is_destroyed() {
            return;
        }

        let (sequence, superseded) = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                tracing::trace!(stage = %next.node().id(), "finalized; dropping value");
                return;
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let superseded: Vec<Slot<U>> = if self.policy == AsyncPolicy::DropIncoming {
                state.slots.drain(..).collect()
            } else {
                Vec::new()
            };
            (sequence, superseded)
        };
        for slot in superseded {
            tracing::debug!(sequence = slot.sequence, "superseded by a newer value; cancelling");
            slot.execution.destroy();
        }

        let execution = Execution::new(sequence);
        if let Err(error) = next.node().adopt(&execution) {
            tracing::error!(%error, sequence, "execution context could not be attached");
            execution.destroy();
            return;
        }
        self.state.borrow_mut().slots.push_back(Slot {
            sequence,
            execution: execution.clone(),
            result: None,
        });

        let engine = Rc::downgrade(self);
        let downstream = Rc::downgrade(next);
        execution.set_finalize_hook(move || {
            if let Some((engine, next)) = upgrade_both(&engine, &downstream) {
                engine.finalize(&next, sequence);
            }
        });

        let Some(source) =
            Runtime::isolate("async_map.step", || (self.step)(value, &execution))
        else {
            self.abandon(next, sequence);
            return;
        };
        self.connect(next, sequence, &execution, source);
    }

    /// Wire the nested source's first value into the slot.
    fn connect(
        self: &Rc<Self>,
        next: &Rc<Stage<U>>,
        sequence: u64,
        execution: &Execution,
        source: Source<U>,
    ) {
        if let Err(error) = source.ensure_linkable() {
            tracing::error!(%error, sequence, "nested source could not be connected");
            self.abandon(next, sequence);
            return;
        }
        let nested = source.into_stage();

        let engine = Rc::downgrade(self);
        let downstream = Rc::downgrade(next);
        nested.node().on_destroy({
            let (engine, downstream) = (engine.clone(), downstream.clone());
            move || {
                if let Some((engine, next)) = upgrade_both(&engine, &downstream) {
                    engine.abandon(&next, sequence);
                }
            }
        });

        let linked = nested.link(
            {
                let (engine, downstream) = (engine.clone(), downstream.clone());
                move |value: U| {
                    if let Some((engine, next)) = upgrade_both(&engine, &downstream) {
                        engine.resolve(&next, sequence, value);
                    }
                }
            },
            move || {
                if let Some((engine, next)) = upgrade_both(&engine, &downstream) {
                    engine.abandon(&next, sequence);
                }
            },
        );
        if let Err(error) = linked {
            tracing::error!(%error, sequence, "nested source could not be connected");
            nested.node().destroy();
            return;
        }

        let retained: Rc<dyn Any> = nested.clone();
        if let Err(error) = nested
            .node()
            .attach_retaining(execution.node(), Some(retained))
        {
            tracing::error!(%error, sequence, "nested source could not be attached");
            nested.node().destroy();
        }
    }

    fn resolve(&self, next: &Rc<Stage<U>>, sequence: u64, value: U) {
        let resolved = {
            let mut state = self.state.borrow_mut();
            let Some(index) = state.slots.iter().position(|s| s.sequence == sequence) else {
                return;
            };
            match self.policy {
                AsyncPolicy::Ordered => {
                    let slot = &mut state.slots[index];
                    if slot.result.is_some() {
                        return;
                    }
                    slot.result = Some(value);
                    Resolved::Hold(slot.execution.clone())
                }
                AsyncPolicy::Direct | AsyncPolicy::DropIncoming => {
                    match state.slots.remove(index) {
                        Some(slot) => Resolved::Emit(slot.execution, value),
                        None => return,
                    }
                }
            }
        };

        match resolved {
            Resolved::Hold(execution) => {
                execution.destroy();
                self.release(next);
            }
            Resolved::Emit(execution, value) => {
                execution.destroy();
                next.push(value);
                self.settle(next);
            }
        }
    }

    /// Forward every leading slot that already has its result.
    fn release(&self, next: &Rc<Stage<U>>) {
        loop {
            if next.node().is_destroyed() {
                return;
            }
            let ready = {
                let mut state = self.state.borrow_mut();
                let front_ready = state
                    .slots
                    .front()
                    .map_or(false, |slot| slot.result.is_some());
                if front_ready {
                    state.slots.pop_front()
                } else {
                    None
                }
            };
            let Some(slot) = ready else {
                break;
            };
            if let Some(value) = slot.result {
                next.push(value);
            }
        }
        self.settle(next);
    }

    /// End a slot that will never produce a value.
    fn abandon(&self, next: &Rc<Stage<U>>, sequence: u64) {
        let removed = {
            let mut state = self.state.borrow_mut();
            match state
                .slots
                .iter()
                .position(|s| s.sequence == sequence && s.result.is_none())
            {
                Some(index) => state.slots.remove(index),
                None => None,
            }
        };
        let Some(slot) = removed else {
            return;
        };
        tracing::debug!(sequence, "execution ended without a value");
        slot.execution.destroy();
        match self.policy {
            AsyncPolicy::Ordered => self.release(next),
            AsyncPolicy::Direct | AsyncPolicy::DropIncoming => self.settle(next),
        }
    }

    fn finalize(&self, next: &Rc<Stage<U>>, sequence: u64) {
        let cancelled = {
            let mut state = self.state.borrow_mut();
            state.closed = true;
            let (keep, cancel): (VecDeque<Slot<U>>, VecDeque<Slot<U>>) = state
                .slots
                .drain(..)
                .partition(|slot| slot.sequence <= sequence);
            state.slots = keep;
            cancel
        };
        for slot in cancelled {
            tracing::debug!(sequence = slot.sequence, "cancelled by finalize");
            slot.execution.destroy();
        }
        self.settle(next);
    }

    fn upstream_completed(&self, next: &Rc<Stage<U>>) {
        self.state.borrow_mut().upstream_done = true;
        self.settle(next);
    }

    /// Complete downstream once no more results can arrive.
    fn settle(&self, next: &Rc<Stage<U>>) {
        let done = {
            let state = self.state.borrow();
            (state.closed || state.upstream_done) && state.slots.is_empty()
        };
        if done {
            next.complete();
        }
    }
}
