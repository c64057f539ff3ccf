//! Thread-safe keyed storage for live sessions and game objects
//!
//! A [`SharedCollection`] maps an auto-assigned `u64` id to a value and is
//! safe to use from any number of tasks at once. It backs the hub's session
//! registry as well as the live player and spore sets.
//!
//! Ids start at 1 (0 is reserved for the server itself as a packet sender)
//! and only ever increase, so an id is never handed out twice.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Inner<T> {
    objects: HashMap<u64, T>,
    next_id: u64,
}

pub struct SharedCollection<T> {
    inner: RwLock<Inner<T>>,
}

impl<T> SharedCollection<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                objects: HashMap::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `value` under the next free id and returns that id.
    pub fn add(&self, value: T) -> u64 {
        let mut inner = self.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.objects.insert(id, value);
        id
    }

    /// Inserts `value` under a caller-chosen id, replacing any previous entry.
    ///
    /// Used for players, whose id must match the owning session's id.
    pub fn add_with_id(&self, value: T, id: u64) -> u64 {
        let mut inner = self.write();
        inner.objects.insert(id, value);
        if id >= inner.next_id {
            inner.next_id = id + 1;
        }
        id
    }

    /// Removes the entry for `id`, returning it if it was present.
    pub fn remove(&self, id: u64) -> Option<T> {
        self.write().objects.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.read().objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().objects.is_empty()
    }

    /// Visits every entry while holding the read lock.
    ///
    /// The visitor must not call a mutating method on this same collection;
    /// touching other collections is fine.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(u64, &T),
    {
        let inner = self.read();
        for (id, value) in &inner.objects {
            visit(*id, value);
        }
    }
}

impl<T: Clone> SharedCollection<T> {
    pub fn get(&self, id: u64) -> Option<T> {
        self.read().objects.get(&id).cloned()
    }

    /// Copies every entry out so the caller can work without holding the lock.
    pub fn snapshot(&self) -> Vec<(u64, T)> {
        self.read()
            .objects
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect()
    }
}

impl<T> Default for SharedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}
