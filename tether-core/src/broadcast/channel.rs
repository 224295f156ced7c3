//! Broadcast Channels
//!
//! Two thin layers over [`Registry`]:
//!
//! - [`Channel`] forwards each value to whoever is listening at that moment
//!   and forgets it.
//! - [`ReplayChannel`] also remembers the last value and hands it to every
//!   new subscriber immediately.
//!
//! Listeners receive `&T`, so nothing a listener does can change what the
//! next listener (or the sender) sees.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::registry::{Registry, Subscription};
use crate::lifecycle::Runtime;

/// Fire-and-forget multicast channel.
pub struct Channel<T> {
    registry: Registry<T>,
}

impl<T: 'static> Channel<T> {
    /// Create a channel with no listeners.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    /// Deliver `value` to every current listener.
    pub fn notify(&self, value: T) {
        self.registry.notify_all(&value);
    }

    /// Listen for future values.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        self.registry.subscribe(listener)
    }

    /// Number of current listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    pub(crate) fn identity(&self) -> usize {
        self.registry.identity()
    }
}

impl<T: 'static> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Multicast channel that replays its last value to new subscribers.
pub struct ReplayChannel<T> {
    registry: Registry<T>,
    last: Rc<RefCell<Option<T>>>,
}

impl<T: Clone + 'static> ReplayChannel<T> {
    /// Create a channel that has not seen a value yet.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            last: Rc::new(RefCell::new(None)),
        }
    }

    /// Create a channel whose last value is `value`.
    pub fn with_value(value: T) -> Self {
        let channel = Self::new();
        *channel.last.borrow_mut() = Some(value);
        channel
    }

    /// Remember `value` and deliver it to every current listener.
    pub fn notify(&self, value: T) {
        *self.last.borrow_mut() = Some(value.clone());
        self.registry.notify_all(&value);
    }

    /// Listen for values, starting with the last one if there is one.
    ///
    /// The replay happens before the listener is registered, so values sent
    /// from inside the replayed call are not seen by this listener.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let current = self.last.borrow().clone();
        if let Some(value) = current {
            Runtime::isolate("replay.subscribe", || listener(&value));
        }
        self.registry.subscribe(listener)
    }

    /// The last value sent, if any.
    pub fn get(&self) -> Option<T> {
        self.last.borrow().clone()
    }

    /// Number of current listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    pub(crate) fn identity(&self) -> usize {
        self.registry.identity()
    }
}

impl<T: Clone + 'static> Default for ReplayChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ReplayChannel<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            last: Rc::clone(&self.last),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReplayChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayChannel")
            .field("last", &self.last.borrow())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_delivers_to_current_listeners_only() {
        let channel = Channel::new();
        channel.notify(1);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = channel.subscribe(move |v: &i32| seen_clone.borrow_mut().push(*v));
        channel.notify(2);
        channel.notify(3);

        assert_eq!(*seen.borrow(), vec![2, 3]);
    }

    #[test]
    fn channel_clones_share_listeners() {
        let channel = Channel::<i32>::new();
        let other = channel.clone();
        let _sub = other.subscribe(|_| {});

        assert_eq!(channel.listener_count(), 1);
        assert_eq!(channel.identity(), other.identity());
    }

    #[test]
    fn replay_channel_replays_last_value() {
        let channel = ReplayChannel::new();
        channel.notify("a");
        channel.notify("b");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = channel.subscribe(move |v: &&str| seen_clone.borrow_mut().push(*v));
        channel.notify("c");

        assert_eq!(*seen.borrow(), vec!["b", "c"]);
        assert_eq!(channel.get(), Some("c"));
    }

    #[test]
    fn replay_channel_without_value_replays_nothing() {
        let channel = ReplayChannel::<u8>::new();
        let calls = Rc::new(RefCell::new(0));
        let calls_clone = calls.clone();
        let _sub = channel.subscribe(move |_| *calls_clone.borrow_mut() += 1);

        assert_eq!(*calls.borrow(), 0);
        assert_eq!(channel.listener_count(), 1);
    }

    #[test]
    fn listeners_cannot_mutate_delivered_value() {
        let channel = ReplayChannel::with_value(vec![1, 2, 3]);
        let _sub = channel.subscribe(|v: &Vec<i32>| {
            let mut copy = v.clone();
            copy.push(4);
        });

        assert_eq!(channel.get(), Some(vec![1, 2, 3]));
    }
}
