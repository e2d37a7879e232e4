//! Storage identity → coherence state registry.
//!
//! Two views over the same storage must see each other's writes as dirtying
//! the same host entry, so every view constructor resolves its coherence
//! state here instead of creating one.
//!
//! # Memory Management
//!
//! The cache holds weak references only. A coherence state lives exactly as
//! long as some view of its storage does; the storage removes its entry when
//! it is dropped. Inserts never sweep the map: [`IdentityCache::prune`] is
//! the only sweep, for entries whose state was dropped some other way.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::coherence::CoherenceState;

/// Coherence state shared by every view of one storage.
pub type SharedState = Rc<RefCell<CoherenceState>>;

/// Identity of an underlying storage allocation.
///
/// Derived from the allocation address. Only meaningful while the storage is
/// alive, which a live cache entry guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageKey(usize);

impl StorageKey {
    pub fn of<T: ?Sized>(storage: *const T) -> Self {
        Self(storage as *const () as usize)
    }
}

#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: RefCell<HashMap<StorageKey, Weak<RefCell<CoherenceState>>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live state registered for `key`, or register the one
    /// built by `factory`.
    pub fn lookup_or_create<F>(&self, key: StorageKey, factory: F) -> SharedState
    where
        F: FnOnce() -> CoherenceState,
    {
        // Fast path: state already exists
        if let Some(state) = self.lookup(key) {
            tracing::trace!(?key, "coherence state cache hit");
            return state;
        }

        let state = Rc::new(RefCell::new(factory()));
        let mut entries = self.entries.borrow_mut();
        entries.insert(key, Rc::downgrade(&state));
        tracing::trace!(?key, live = entries.len(), "registered coherence state");
        state
    }

    /// The live state registered for `key`, if any.
    pub fn lookup(&self, key: StorageKey) -> Option<SharedState> {
        self.entries.borrow().get(&key).and_then(Weak::upgrade)
    }

    /// Drop the entry of a storage that is going away.
    pub(crate) fn remove(&self, key: StorageKey) {
        self.entries.borrow_mut().remove(&key);
    }

    /// Remove entries whose state is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries with a live state.
    pub fn len(&self) -> usize {
        self.entries.borrow().values().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
