//! A `HashSet` that remembers insertion order.

use linked_hash_map::{Keys, LinkedHashMap};
use std::borrow::Borrow;
use std::hash::Hash;

/// A set whose iteration order matches the order in which values were first
/// inserted. Re-inserting a present value keeps its original position.
pub struct LinkedHashSet<T> {
    map: LinkedHashMap<T, ()>,
}

impl<T: Hash + Eq + Clone> Clone for LinkedHashSet<T> {
    fn clone(&self) -> Self {
        LinkedHashSet {
            map: self.map.clone(),
        }
    }
}

impl<T: Hash + Eq + std::fmt::Debug> std::fmt::Debug for LinkedHashSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedHashSet").field("map", &self.map).finish()
    }
}

impl<T: Hash + Eq> LinkedHashSet<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        LinkedHashSet {
            map: LinkedHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(value)
    }

    /// Appends `value` at the back if it is not already present. Returns
    /// whether the value was newly inserted.
    pub fn insert(&mut self, value: T) -> bool {
        if self.map.contains_key(&value) {
            false
        } else {
            self.map.insert(value, ());
            true
        }
    }

    pub fn remove<Q>(&mut self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(value).is_some()
    }

    /// Removes and returns the oldest value.
    pub fn pop_front(&mut self) -> Option<T> {
        self.map.pop_front().map(|(value, _)| value)
    }

    pub fn iter(&self) -> Keys<'_, T, ()> {
        self.map.keys()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<T: Hash + Eq> Default for LinkedHashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq> Extend<T> for LinkedHashSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<'a, T: Hash + Eq> IntoIterator for &'a LinkedHashSet<T> {
    type Item = &'a T;
    type IntoIter = Keys<'a, T, ()>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
