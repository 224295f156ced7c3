//! Broadcast Registry
//!
//! An insertion-ordered set of callbacks keyed by a monotonically increasing
//! id. Notification works on a snapshot of the registry, so listeners may
//! subscribe or unsubscribe (themselves or each other) while a notification
//! is running: every listener present when `notify_all` starts is offered
//! exactly one call, and listeners added during the call wait for the next
//! one.
//!
//! A panic in one listener is caught and logged; the remaining listeners
//! still run.
//!
//! Unsubscribing is amortized O(1): the slot is tombstoned and swept later.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::lifecycle::{OrderedSlots, Runtime};

/// Identifier of a listener within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

type Callback<T> = Rc<dyn Fn(&T)>;

struct Slots<T> {
    next_id: u64,
    callbacks: OrderedSlots<ListenerId, Callback<T>>,
}

/// A multicast registry of callbacks.
///
/// Clones share the same set of listeners.
pub struct Registry<T> {
    slots: Rc<RefCell<Slots<T>>>,
}

impl<T: 'static> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Slots {
                next_id: 0,
                callbacks: OrderedSlots::new(),
            })),
        }
    }

    /// Register a callback. It stays registered until the returned
    /// [`Subscription`] is destroyed or dropped.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut slots = self.slots.borrow_mut();
            let id = ListenerId(slots.next_id);
            slots.next_id += 1;
            slots.callbacks.insert(id, Rc::new(callback));
            id
        };

        let weak = Rc::downgrade(&self.slots);
        Subscription::new(id, move || {
            if let Some(slots) = weak.upgrade() {
                slots.borrow_mut().callbacks.remove(&id);
            }
        })
    }

    /// Invoke every registered callback with `value`.
    pub fn notify_all(&self, value: &T) {
        let snapshot: Vec<(ListenerId, Callback<T>)> = self
            .slots
            .borrow()
            .callbacks
            .iter()
            .map(|(id, callback)| (*id, Rc::clone(callback)))
            .collect();

        for (id, callback) in snapshot {
            if Runtime::isolate("registry.notify_all", || callback(value)).is_none() {
                tracing::debug!(listener = id.raw(), "listener failed; continuing with the rest");
            }
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.slots.borrow().callbacks.len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().callbacks.is_empty()
    }

    /// Stable identity of the shared listener set.
    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.slots) as *const () as usize
    }
}

impl<T: 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Rc::clone(&self.slots),
        }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("listeners", &self.slots.borrow().callbacks.len())
            .finish()
    }
}

/// Handle to one registered callback.
///
/// Destroying or dropping the handle removes the callback.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: ListenerId,
    remove: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(id: ListenerId, remove: impl FnOnce() + 'static) -> Self {
        Self {
            id,
            remove: Some(Box::new(remove)),
        }
    }

    /// The listener's id within its registry.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the callback is still registered through this handle.
    pub fn is_active(&self) -> bool {
        self.remove.is_some()
    }

    /// Remove the callback. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&i32)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |name: &str| -> Box<dyn Fn(&i32)> {
            let log = log_clone.clone();
            let name = name.to_string();
            Box::new(move |value: &i32| log.borrow_mut().push(format!("{name}:{value}")))
        };
        (log, make)
    }

    #[test]
    fn notifies_in_subscription_order() {
        let registry = Registry::new();
        let (log, make) = recorder();
        let _a = registry.subscribe(make("a"));
        let _b = registry.subscribe(make("b"));

        registry.notify_all(&1);

        assert_eq!(*log.borrow(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn ids_increase_monotonically() {
        let registry = Registry::<i32>::new();
        let a = registry.subscribe(|_| {});
        let b = registry.subscribe(|_| {});
        assert!(b.id() > a.id());
    }

    #[test]
    fn destroy_removes_listener() {
        let registry = Registry::new();
        let (log, make) = recorder();
        let mut a = registry.subscribe(make("a"));
        let _b = registry.subscribe(make("b"));

        a.destroy();
        a.destroy();
        registry.notify_all(&2);

        assert!(!a.is_active());
        assert_eq!(*log.borrow(), vec!["b:2"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let registry = Registry::<i32>::new();
        {
            let _sub = registry.subscribe(|_| {});
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let registry = Registry::new();
        let calls = Rc::new(Cell::new(0));
        let _bad = registry.subscribe(|_: &i32| panic!("listener failure"));
        let calls_clone = calls.clone();
        let _good = registry.subscribe(move |_: &i32| calls_clone.set(calls_clone.get() + 1));

        registry.notify_all(&1);
        registry.notify_all(&2);

        assert_eq!(calls.get(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn listener_removed_mid_notification_still_called_once() {
        let registry = Registry::new();
        let (log, make) = recorder();
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let victim_clone = victim.clone();
        let _killer = registry.subscribe(move |_: &i32| {
            victim_clone.borrow_mut().take();
        });
        *victim.borrow_mut() = Some(registry.subscribe(make("victim")));

        registry.notify_all(&1);
        registry.notify_all(&2);

        assert_eq!(*log.borrow(), vec!["victim:1"]);
    }

    #[test]
    fn listener_added_mid_notification_waits_for_next_round() {
        let registry = Registry::new();
        let (log, make) = recorder();
        let late: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let registry_clone = registry.clone();
        let late_clone = late.clone();
        let make = Rc::new(make);
        let _adder = registry.subscribe(move |_: &i32| {
            if late_clone.borrow().is_empty() {
                let sub = registry_clone.subscribe(make("late"));
                late_clone.borrow_mut().push(sub);
            }
        });

        registry.notify_all(&1);
        assert!(log.borrow().is_empty());

        registry.notify_all(&2);
        assert_eq!(*log.borrow(), vec!["late:2"]);
    }
}
