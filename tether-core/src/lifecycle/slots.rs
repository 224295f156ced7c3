//! Ordered Slots
//!
//! An insertion-ordered map with constant-time removal. Removing an entry
//! leaves a tombstone in its place; tombstones are swept in one pass once
//! they outnumber the live entries, so removal is amortized O(1) and
//! iteration stays proportional to the live count.
//!
//! Listener registries and child sets both need "remove by id, iterate in
//! insertion order", which a plain `IndexMap` only offers through the O(n)
//! `shift_remove`.

use std::hash::Hash;

use indexmap::IndexMap;

/// Below this many entries tombstones are never swept.
const SWEEP_FLOOR: usize = 16;

pub(crate) struct OrderedSlots<K, V> {
    entries: IndexMap<K, Option<V>>,
    live: usize,
}

impl<K, V> OrderedSlots<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            live: 0,
        }
    }

    /// Number of live entries.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live entries in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries
            .iter()
            .filter_map(|(key, slot)| slot.as_ref().map(|value| (key, value)))
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().flatten()
    }

    pub(crate) fn into_values(self) -> impl Iterator<Item = V> {
        self.entries.into_values().flatten()
    }
}

impl<K: Hash + Eq, V> OrderedSlots<K, V> {
    pub(crate) fn insert(&mut self, key: K, value: V) {
        match self.entries.insert(key, Some(value)) {
            Some(Some(_)) => {}
            _ => self.live += 1,
        }
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.get_mut(key).and_then(Option::take)?;
        self.live -= 1;
        if self.entries.len() > SWEEP_FLOOR && self.entries.len() > 2 * self.live {
            self.entries.retain(|_, slot| slot.is_some());
        }
        Some(removed)
    }
}

impl<K, V> Default for OrderedSlots<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_keeps_insertion_order() {
        let mut slots = OrderedSlots::new();
        for key in 0..5 {
            slots.insert(key, key * 10);
        }

        assert_eq!(slots.remove(&2), Some(20));
        assert_eq!(slots.remove(&2), None);
        slots.insert(7, 70);

        assert_eq!(slots.len(), 5);
        assert_eq!(
            slots.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>(),
            vec![(0, 0), (1, 10), (3, 30), (4, 40), (7, 70)]
        );
    }

    #[test]
    fn sweeping_tombstones_preserves_survivors() {
        let mut slots = OrderedSlots::new();
        for key in 0..100u32 {
            slots.insert(key, key);
        }
        for key in (0..100u32).filter(|key| key % 3 != 0) {
            slots.remove(&key);
        }

        let expected: Vec<u32> = (0..100).filter(|key| key % 3 == 0).collect();
        assert_eq!(slots.len(), expected.len());
        assert!(slots.entries.len() < 100);
        assert_eq!(slots.values().copied().collect::<Vec<_>>(), expected);
        assert_eq!(slots.into_values().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn emptied_slots_report_empty() {
        let mut slots = OrderedSlots::new();
        slots.insert("a", ());
        slots.remove(&"a");

        assert!(slots.is_empty());
        assert_eq!(slots.iter().count(), 0);
    }
}
