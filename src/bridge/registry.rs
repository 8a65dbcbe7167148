//! Identity registry.
//!
//! Maps a native identity to the single live handle for it. Entries hold
//! weak references: a handle's lifetime is governed by its strong
//! references (external ones plus an optional keep-alive self reference),
//! never by the registry.

use std::hash::Hash;
use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;

/// Who an entry belongs to, as seen by a handle being destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOwner {
    /// The entry pointed at the caller and has been removed.
    Caller,
    /// A different handle has since been registered for the identity.
    Other,
    /// No entry exists.
    Vacant,
}

pub struct Registry<K, T> {
    entries: FxHashMap<K, Weak<T>>,
}

impl<K: Eq + Hash + Copy + std::fmt::Debug, T> Registry<K, T> {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    /// The live handle for `key`, if any.
    ///
    /// An entry whose handle is mid-destruction reads as absent.
    pub fn find_or_none(&self, key: &K) -> Option<Arc<T>> {
        self.entries.get(key).and_then(Weak::upgrade)
    }

    /// Register `handle` for `key`.
    ///
    /// # Panics
    ///
    /// Panics if a live handle is already registered for `key`. Callers
    /// must look the identity up first; a second live handle means the
    /// bridge itself is broken.
    pub fn insert(&mut self, key: K, handle: &Arc<T>) {
        if let Some(existing) = self.entries.get(&key) {
            assert!(
                existing.strong_count() == 0,
                "a live handle is already registered for {key:?}"
            );
        }
        self.entries.insert(key, Arc::downgrade(handle));
    }

    /// Remove the entry for `key` if it refers to `handle`.
    pub fn remove(&mut self, key: &K, handle: *const T) -> EntryOwner {
        match self.entries.get(key) {
            None => EntryOwner::Vacant,
            Some(entry) if std::ptr::eq(entry.as_ptr(), handle) => {
                self.entries.remove(key);
                EntryOwner::Caller
            }
            Some(_) => EntryOwner::Other,
        }
    }

    /// Number of entries with a live handle.
    pub fn live_len(&self) -> usize {
        self.entries.values().filter(|e| e.strong_count() > 0).count()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// True while the handle for `key` has lost its last strong reference
    /// but has not yet removed its entry.
    pub fn is_pending(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|e| e.strong_count() == 0)
    }

    /// Upgrade every live handle.
    pub fn live_handles(&self) -> Vec<Arc<T>> {
        self.entries.values().filter_map(Weak::upgrade).collect()
    }
}

impl<K: Eq + Hash + Copy + std::fmt::Debug, T> Default for Registry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_returns_same_instance() {
        let mut registry = Registry::new();
        let handle = Arc::new(5u32);
        registry.insert(1u32, &handle);

        let a = registry.find_or_none(&1).unwrap();
        let b = registry.find_or_none(&1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &handle));
    }

    #[test]
    fn test_registry_does_not_keep_handles_alive() {
        let mut registry = Registry::new();
        let handle = Arc::new("h");
        registry.insert(7u32, &handle);
        assert_eq!(Arc::strong_count(&handle), 1);
        assert!(!registry.is_pending(&7));
        drop(handle);
        assert!(registry.find_or_none(&7).is_none());
        assert!(registry.is_pending(&7));
        assert_eq!(registry.live_len(), 0);
    }

    #[test]
    fn test_dead_entry_may_be_replaced() {
        let mut registry = Registry::new();
        let first = Arc::new(1u8);
        let first_ptr = Arc::as_ptr(&first);
        registry.insert(3u32, &first);
        drop(first);

        let second = Arc::new(2u8);
        registry.insert(3u32, &second);
        assert_eq!(registry.remove(&3, first_ptr), EntryOwner::Other);
        assert_eq!(registry.remove(&3, Arc::as_ptr(&second)), EntryOwner::Caller);
        assert_eq!(registry.remove(&3, Arc::as_ptr(&second)), EntryOwner::Vacant);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_live_duplicate_panics() {
        let mut registry = Registry::new();
        let first = Arc::new(1u8);
        let second = Arc::new(2u8);
        registry.insert(9u32, &first);
        registry.insert(9u32, &second);
    }
}
