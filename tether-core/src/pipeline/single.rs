//! Single-Resolution Pipelines
//!
//! A [`Single`] carries at most one value. It is resolved through its
//! [`Resolver`] exactly once; once the value has travelled through every
//! linked stage the chain completes and the attached tail destroys it.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::async_map::{self, AsyncPolicy};
use super::execution::Execution;
use super::source::Source;
use super::stage::Stage;
use super::stream::Stream;
use crate::error::{LifecycleError, Result};
use crate::lifecycle::{Attachable, Node, NodeId, Runtime};

/// A pipeline of at most one value.
#[must_use = "a single must be attached or destroyed"]
pub struct Single<T> {
    pub(crate) stage: Rc<Stage<T>>,
}

impl<T: 'static> Single<T> {
    fn from_stage(stage: Rc<Stage<T>>) -> Self {
        Self { stage }
    }

    /// A single resolved through the returned resolver.
    pub fn channel() -> (Resolver<T>, Single<T>) {
        let stage = Stage::new("single");
        let resolver = Resolver {
            stage: Rc::downgrade(&stage),
            id: stage.node().id(),
            resolved: Rc::new(Cell::new(false)),
        };
        (resolver, Self::from_stage(stage))
    }

    /// A single that already holds `value`.
    pub fn resolved(value: T) -> Self {
        let stage = Stage::new("single");
        stage.push(value);
        stage.complete();
        Self::from_stage(stage)
    }

    /// Call `inspect` with the value, forwarding it unchanged.
    pub fn read(&self, inspect: impl Fn(&T) + 'static) -> Result<Single<T>> {
        self.stage.read(inspect).map(Single::from_stage)
    }

    /// Forward `transform(value)`.
    pub fn map<U: 'static>(&self, transform: impl Fn(T) -> U + 'static) -> Result<Single<U>> {
        self.stage.map(transform).map(Single::from_stage)
    }

    /// [`read`](Self::read) with an [`Execution`] destroyed when the
    /// callback returns.
    pub fn read_scoped(&self, inspect: impl Fn(&T, &Execution) + 'static) -> Result<Single<T>> {
        self.stage.read_scoped(inspect).map(Single::from_stage)
    }

    /// [`map`](Self::map) with an [`Execution`] destroyed when the callback
    /// returns.
    pub fn map_scoped<U: 'static>(
        &self,
        transform: impl Fn(T, &Execution) -> U + 'static,
    ) -> Result<Single<U>> {
        self.stage.map_scoped(transform).map(Single::from_stage)
    }

    /// Forward the value only if `predicate` holds; otherwise the chain
    /// completes empty.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Result<Single<T>> {
        self.stage.filter(predicate).map(Single::from_stage)
    }

    /// Resolve with the first value of the source `step` returns.
    pub fn then<U: Clone + 'static>(
        &self,
        step: impl Fn(T) -> Source<U> + 'static,
    ) -> Result<Single<U>> {
        async_map::link(&self.stage, "then", AsyncPolicy::Direct, move |value, _| {
            step(value)
        })
        .map(Single::from_stage)
    }

    /// View this pipeline as a stream of at most one value.
    pub fn into_stream(self) -> Stream<T> {
        Stream::from_stage(self.stage)
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

impl<T: 'static> Attachable for Single<T> {
    fn node(&self) -> &Node {
        self.stage.node()
    }

    fn retained(&self) -> Option<Rc<dyn Any>> {
        let stage: Rc<dyn Any> = self.stage.clone();
        Some(stage)
    }
}

impl<T: 'static> fmt::Debug for Single<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Single")
            .field("node", self.stage.node())
            .finish()
    }
}

/// Resolves the head of a [`Single`].
pub struct Resolver<T> {
    stage: Weak<Stage<T>>,
    id: NodeId,
    resolved: Rc<Cell<bool>>,
}

impl<T: 'static> Resolver<T> {
    /// Resolve the single. Fails if it was already resolved; the value of a
    /// failed call never reaches the pipeline.
    pub fn resolve(&self, value: T) -> Result<()> {
        if self.resolved.replace(true) {
            return Err(LifecycleError::AlreadyResolved(self.id));
        }
        match self.stage.upgrade() {
            Some(stage) => {
                stage.push(value);
                stage.complete();
            }
            None => tracing::trace!(single = %self.id, "resolved after the pipeline was dropped"),
        }
        Ok(())
    }

    /// Whether [`resolve`](Self::resolve) has succeeded.
    pub fn is_resolved(&self) -> bool {
        self.resolved.get()
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
            id: self.id,
            resolved: Rc::clone(&self.resolved),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("single", &self.id)
            .field("resolved", &self.resolved.get())
            .finish()
    }
}
