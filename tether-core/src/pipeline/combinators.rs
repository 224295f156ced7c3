//! Combinators
//!
//! Fan-in over several sources. Each source is linked into the combined
//! stage and becomes an owned child of it, so attaching (or destroying) the
//! result covers every input. A source that completes is destroyed; the
//! combined stream completes once every source is gone.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::single::Single;
use super::source::Source;
use super::stage::Stage;
use super::stream::Stream;
use crate::broadcast::Aggregator;
use crate::error::{LifecycleError, Result};
use crate::lifecycle::{Attachable, NodeId};

fn ensure_distinct<'a, T: Clone + 'static>(
    sources: impl IntoIterator<Item = &'a Source<T>>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        source.ensure_linkable()?;
        if !seen.insert(source.identity()) {
            return Err(LifecycleError::DuplicateSource);
        }
    }
    Ok(())
}

/// Link `source` into `target`, adopting it and counting it down when it
/// goes away.
fn fan_in<T, O>(
    target: &Rc<Stage<O>>,
    remaining: &Rc<RefCell<IndexSet<NodeId>>>,
    source: Rc<Stage<T>>,
    forward: impl Fn(&Rc<Stage<O>>, T) + 'static,
) -> Result<()>
where
    T: 'static,
    O: 'static,
{
    let id = source.node().id();
    {
        let remaining = Rc::clone(remaining);
        let downstream = Rc::downgrade(target);
        source.node().on_destroy(move || {
            let drained = {
                let mut remaining = remaining.borrow_mut();
                remaining.shift_remove(&id) && remaining.is_empty()
            };
            if drained {
                if let Some(target) = downstream.upgrade() {
                    target.complete();
                }
            }
        });
    }

    let downstream = Rc::downgrade(target);
    let finished = Rc::downgrade(&source);
    source.link(
        move |value| {
            if let Some(target) = downstream.upgrade() {
                forward(&target, value);
            }
        },
        move || {
            if let Some(source) = finished.upgrade() {
                source.node().destroy();
            }
        },
    )?;

    let retained: Rc<dyn Any> = source.clone();
    source.node().attach_retaining(target.node(), Some(retained))
}

/// Forward every value of every source.
pub fn merge<T: Clone + 'static>(sources: impl IntoIterator<Item = Source<T>>) -> Result<Stream<T>> {
    let sources: Vec<Source<T>> = sources.into_iter().collect();
    ensure_distinct(&sources)?;

    let merged = Stage::<T>::new("merge");
    let stages: Vec<Rc<Stage<T>>> = sources.into_iter().map(Source::into_stage).collect();
    let remaining = Rc::new(RefCell::new(
        stages.iter().map(|stage| stage.node().id()).collect::<IndexSet<_>>(),
    ));

    if stages.is_empty() {
        merged.complete();
    }
    for stage in stages {
        fan_in(&merged, &remaining, stage, |target, value| target.push(value))?;
    }
    Ok(Stream::from_stage(merged))
}

/// Emit a snapshot of every source's latest value each time any source
/// emits, once all of them have emitted at least once.
pub fn combine<K, T>(sources: IndexMap<K, Source<T>>) -> Result<Stream<IndexMap<K, T>>>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + 'static,
{
    ensure_distinct(sources.values())?;

    let combined = Stage::<IndexMap<K, T>>::new("combine");
    let latest: Rc<RefCell<IndexMap<K, Option<T>>>> = Rc::new(RefCell::new(
        sources.keys().map(|key| (key.clone(), None)).collect(),
    ));
    let stages: Vec<(K, Rc<Stage<T>>)> = sources
        .into_iter()
        .map(|(key, source)| (key, source.into_stage()))
        .collect();
    let remaining = Rc::new(RefCell::new(
        stages.iter().map(|(_, stage)| stage.node().id()).collect::<IndexSet<_>>(),
    ));

    if stages.is_empty() {
        combined.complete();
    }
    for (key, stage) in stages {
        let latest = Rc::clone(&latest);
        fan_in(&combined, &remaining, stage, move |target, value| {
            let snapshot = {
                let mut latest = latest.borrow_mut();
                if let Some(slot) = latest.get_mut(&key) {
                    *slot = Some(value);
                }
                latest
                    .iter()
                    .map(|(key, value)| value.clone().map(|value| (key.clone(), value)))
                    .collect::<Option<IndexMap<K, T>>>()
            };
            if let Some(snapshot) = snapshot {
                target.push(snapshot);
            }
        })?;
    }
    Ok(Stream::from_stage(combined))
}

/// Resolve once every node in `nodes` has been destroyed.
///
/// Resolves immediately when `nodes` is empty.
pub fn when_all_destroyed(nodes: &[&dyn Attachable]) -> Result<Single<()>> {
    let (resolver, single) = Single::channel();
    let aggregator = Aggregator::new();
    let mut effects = Vec::with_capacity(nodes.len());
    for watched in nodes {
        let effect = aggregator.effect(());
        let attached = effect.attach(*watched);
        effects.push(effect);
        if let Err(error) = attached {
            effects.iter().for_each(|effect| effect.destroy());
            single.destroy();
            return Err(error);
        }
    }

    let subscription = aggregator.subscribe(move |live: &Vec<()>| {
        if live.is_empty() && !resolver.is_resolved() {
            if let Err(error) = resolver.resolve(()) {
                tracing::debug!(%error, "wait-all resolved twice");
            }
        }
    });
    single.node().on_destroy(move || {
        drop(subscription);
        drop(aggregator);
    });
    Ok(single)
}
