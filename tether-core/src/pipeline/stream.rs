//! Repeated Pipelines
//!
//! A [`Stream`] carries any number of values. Every operator consumes the
//! current stage's listener slot and hands back the next stage; only the
//! tail is attached.
//!
//! ```ignore
//! let (trigger, stream) = Stream::channel();
//! stream
//!     .map(|n: i32| n * 2)?
//!     .read(|n| println!("{n}"))?
//!     .attach(&scope)?;
//! trigger.emit(21);
//! ```

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::async_map::{self, AsyncPolicy};
use super::execution::Execution;
use super::source::Source;
use super::stage::Stage;
use crate::broadcast::{Channel, ReplayChannel};
use crate::error::Result;
use crate::lifecycle::{Attachable, Node, NodeId, Runtime};

/// A pipeline of any number of values.
#[must_use = "a stream must be attached or destroyed"]
pub struct Stream<T> {
    pub(crate) stage: Rc<Stage<T>>,
}

impl<T: 'static> Stream<T> {
    pub(crate) fn from_stage(stage: Rc<Stage<T>>) -> Self {
        Self { stage }
    }

    /// A stream fed by the returned trigger.
    pub fn channel() -> (Trigger<T>, Stream<T>) {
        let stage = Stage::new("stream");
        let trigger = Trigger {
            stage: Rc::downgrade(&stage),
        };
        (trigger, Self::from_stage(stage))
    }

    /// A stream of the given values, complete once they are delivered.
    pub fn of(values: impl IntoIterator<Item = T>) -> Self {
        let stage = Stage::new("stream");
        for value in values {
            stage.push(value);
        }
        stage.complete();
        Self::from_stage(stage)
    }

    /// A stream that completes without a value.
    pub fn empty() -> Self {
        Self::of(std::iter::empty())
    }

    /// Call `inspect` with every value, forwarding it unchanged.
    pub fn read(&self, inspect: impl Fn(&T) + 'static) -> Result<Stream<T>> {
        self.stage.read(inspect).map(Stream::from_stage)
    }

    /// Forward `transform(value)`.
    pub fn map<U: 'static>(&self, transform: impl Fn(T) -> U + 'static) -> Result<Stream<U>> {
        self.stage.map(transform).map(Stream::from_stage)
    }

    /// [`read`](Self::read) with an [`Execution`] that lives for the
    /// duration of the call. Anything attached to it is destroyed when the
    /// callback returns; finalizing it makes this value the last one.
    pub fn read_scoped(&self, inspect: impl Fn(&T, &Execution) + 'static) -> Result<Stream<T>> {
        self.stage.read_scoped(inspect).map(Stream::from_stage)
    }

    /// [`map`](Self::map) with a per-call [`Execution`], as in
    /// [`read_scoped`](Self::read_scoped).
    pub fn map_scoped<U: 'static>(
        &self,
        transform: impl Fn(T, &Execution) -> U + 'static,
    ) -> Result<Stream<U>> {
        self.stage.map_scoped(transform).map(Stream::from_stage)
    }

    /// Forward values for which `predicate` holds.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Result<Stream<T>> {
        self.stage.filter(predicate).map(Stream::from_stage)
    }

    /// Forward the `Some` results of `transform`.
    pub fn filter_map<U: 'static>(
        &self,
        transform: impl Fn(T) -> Option<U> + 'static,
    ) -> Result<Stream<U>> {
        self.stage.filter_map(transform).map(Stream::from_stage)
    }

    /// Forward the first `count` values, then complete.
    ///
    /// Values arriving after the quota are ignored.
    pub fn take(&self, count: usize) -> Result<Stream<T>> {
        let seen = Cell::new(0usize);
        let next = self.stage.chain::<T>("take", move |next, value| {
            let taken = seen.get();
            if taken >= count {
                return;
            }
            seen.set(taken + 1);
            next.push(value);
            if taken + 1 == count {
                next.complete();
            }
        })?;
        if count == 0 {
            next.complete();
        }
        Ok(Stream::from_stage(next))
    }

    /// Map each value to a nested source and forward its first value, in
    /// completion order.
    pub fn then<U: Clone + 'static>(
        &self,
        step: impl Fn(T) -> Source<U> + 'static,
    ) -> Result<Stream<U>> {
        async_map::link(&self.stage, "then", AsyncPolicy::Direct, move |value, _| {
            step(value)
        })
        .map(Stream::from_stage)
    }

    /// Map each value to a nested source under `policy`, with a per-value
    /// [`Execution`] context.
    pub fn async_map<U: Clone + 'static>(
        &self,
        policy: AsyncPolicy,
        step: impl Fn(T, &Execution) -> Source<U> + 'static,
    ) -> Result<Stream<U>> {
        async_map::link(&self.stage, "async_map", policy, step).map(Stream::from_stage)
    }

    /// Attach the chain under `parent`. This stage becomes the tail.
    pub fn attach<P: Attachable + ?Sized>(&self, parent: &P) -> Result<()> {
        parent.node().adopt(self)?;
        self.stage.on_attached();
        Ok(())
    }

    /// Attach the chain under the implicit root.
    pub fn attach_to_root(&self) -> Result<()> {
        self.attach(&Runtime::root())
    }

    /// Destroy the whole chain.
    pub fn destroy(&self) {
        self.stage.node().destroy();
    }

    /// Whether the chain has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.stage.node().is_destroyed()
    }

    /// Node id of this stage.
    pub fn id(&self) -> NodeId {
        self.stage.node().id()
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// A stream of every value `channel` sends from now on.
    pub fn from_channel(channel: &Channel<T>) -> Self {
        let stage = Stage::new("channel");
        let weak = Rc::downgrade(&stage);
        let subscription = channel.subscribe(move |value: &T| {
            if let Some(stage) = weak.upgrade() {
                stage.push(value.clone());
            }
        });
        stage.node().on_destroy(move || drop(subscription));
        Self::from_stage(stage)
    }

    /// A stream of `channel`'s last value (if any) and every value after it.
    pub fn from_replay(channel: &ReplayChannel<T>) -> Self {
        let stage = Stage::new("replay");
        let weak = Rc::downgrade(&stage);
        let subscription = channel.subscribe(move |value: &T| {
            if let Some(stage) = weak.upgrade() {
                stage.push(value.clone());
            }
        });
        stage.node().on_destroy(move || drop(subscription));
        Self::from_stage(stage)
    }
}

impl<T: 'static> Attachable for Stream<T> {
    fn node(&self) -> &Node {
        self.stage.node()
    }

    fn retained(&self) -> Option<Rc<dyn Any>> {
        let stage: Rc<dyn Any> = self.stage.clone();
        Some(stage)
    }
}

impl<T: 'static> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("node", self.stage.node())
            .finish()
    }
}

/// Feeds values into the head of a [`Stream`].
pub struct Trigger<T> {
    stage: Weak<Stage<T>>,
}

impl<T: 'static> Trigger<T> {
    /// Push a value into the stream.
    pub fn emit(&self, value: T) {
        match self.stage.upgrade() {
            Some(stage) => stage.push(value),
            None => tracing::trace!("emit on a dropped stream"),
        }
    }

    /// Mark the stream as exhausted.
    pub fn close(&self) {
        if let Some(stage) = self.stage.upgrade() {
            stage.complete();
        }
    }

    /// Whether the stream is gone or destroyed.
    pub fn is_closed(&self) -> bool {
        self.stage
            .upgrade()
            .map_or(true, |stage| stage.node().is_destroyed())
    }
}

impl<T> Clone for Trigger<T> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
        }
    }
}

impl<T> fmt::Debug for Trigger<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("live", &(self.stage.strong_count() > 0))
            .finish()
    }
}
