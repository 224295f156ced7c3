//! Sources
//!
//! Everything a pipeline can be fed from: another pipeline of either kind or
//! one of the broadcast channels. Used by `then`, `async_map`, `merge` and
//! `combine`.

use std::fmt;
use std::rc::Rc;

use super::single::Single;
use super::stage::Stage;
use super::stream::Stream;
use crate::broadcast::{Channel, ReplayChannel};
use crate::error::Result;

/// Something that produces values of type `T`.
pub enum Source<T> {
    Stream(Stream<T>),
    Single(Single<T>),
    Channel(Channel<T>),
    Replay(ReplayChannel<T>),
}

impl<T: Clone + 'static> Source<T> {
    /// An already-resolved source of one value.
    pub fn value(value: T) -> Self {
        Source::Single(Single::resolved(value))
    }

    /// Identity used to reject the same source being supplied twice.
    pub(crate) fn identity(&self) -> usize {
        match self {
            Source::Stream(stream) => Rc::as_ptr(&stream.stage) as *const () as usize,
            Source::Single(single) => Rc::as_ptr(&single.stage) as *const () as usize,
            Source::Channel(channel) => channel.identity(),
            Source::Replay(channel) => channel.identity(),
        }
    }

    /// Pipelines must still accept a listener; channels always can.
    pub(crate) fn ensure_linkable(&self) -> Result<()> {
        match self {
            Source::Stream(stream) => stream.stage.ensure_linkable(),
            Source::Single(single) => single.stage.ensure_linkable(),
            Source::Channel(_) | Source::Replay(_) => Ok(()),
        }
    }

    pub(crate) fn into_stage(self) -> Rc<Stage<T>> {
        match self {
            Source::Stream(stream) => stream.stage,
            Source::Single(single) => single.stage,
            Source::Channel(channel) => Stream::from_channel(&channel).stage,
            Source::Replay(channel) => Stream::from_replay(&channel).stage,
        }
    }
}

impl<T> From<Stream<T>> for Source<T> {
    fn from(stream: Stream<T>) -> Self {
        Source::Stream(stream)
    }
}

impl<T> From<Single<T>> for Source<T> {
    fn from(single: Single<T>) -> Self {
        Source::Single(single)
    }
}

impl<T> From<Channel<T>> for Source<T> {
    fn from(channel: Channel<T>) -> Self {
        Source::Channel(channel)
    }
}

impl<T> From<ReplayChannel<T>> for Source<T> {
    fn from(channel: ReplayChannel<T>) -> Self {
        Source::Replay(channel)
    }
}

impl<T> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Source::Stream(_) => "Stream",
            Source::Single(_) => "Single",
            Source::Channel(_) => "Channel",
            Source::Replay(_) => "Replay",
        };
        f.debug_tuple("Source").field(&kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_of_a_channel_share_identity() {
        let channel = Channel::<i32>::new();
        let a = Source::from(channel.clone());
        let b = Source::from(channel);

        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn distinct_pipelines_have_distinct_identity() {
        let a = Source::value(1);
        let b = Source::value(1);

        assert_ne!(a.identity(), b.identity());
        a.into_stage().node().destroy();
        b.into_stage().node().destroy();
    }
}
