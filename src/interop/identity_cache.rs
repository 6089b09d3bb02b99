use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, PoisonError, Weak};

use crossbeam_utils::sync::ShardedLock;

/// Maps native addresses to the one live Rust wrapper for each.
///
/// Wrappers are held weakly: once the last `Arc` is dropped the entry counts as absent and the
/// next lookup builds a fresh wrapper.
pub struct IdentityCache<T: ?Sized> {
    entries: ShardedLock<HashMap<usize, Weak<T>>>,
}

impl<T: ?Sized> IdentityCache<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: ShardedLock::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn reserve(&self, additional: usize) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .reserve(additional);
    }

    #[inline(always)]
    fn key(address: NonNull<c_void>) -> usize {
        address.as_ptr() as usize
    }

    /// The live wrapper for `address`, if any.
    pub fn get(&self, address: NonNull<c_void>) -> Option<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(address))
            .and_then(Weak::upgrade)
    }

    /// Returns the live wrapper for `address`, or stores and returns the one `factory` builds.
    ///
    /// The factory runs without the lock held. When two threads race on the same address, the
    /// first to store wins and the loser's wrapper is dropped.
    pub fn intern_for<F>(&self, address: NonNull<c_void>, factory: F) -> Arc<T>
    where
        F: FnOnce() -> Arc<T>,
    {
        if let Some(existing) = self.get(address) {
            return existing;
        }
        let created = factory();
        self.store_if_absent(address, created)
    }

    /// Like [`IdentityCache::intern_for`] with a fallible factory. Nothing is stored on failure.
    pub fn try_intern_for<F, E>(&self, address: NonNull<c_void>, factory: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<Arc<T>, E>,
    {
        if let Some(existing) = self.get(address) {
            return Ok(existing);
        }
        let created = factory()?;
        Ok(self.store_if_absent(address, created))
    }

    fn store_if_absent(&self, address: NonNull<c_void>, created: Arc<T>) -> Arc<T> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let key = Self::key(address);
        if let Some(winner) = entries.get(&key).and_then(Weak::upgrade) {
            return winner;
        }
        entries.insert(key, Arc::downgrade(&created));
        created
    }

    /// Associates `wrapper` with `address`, replacing any previous entry.
    pub fn insert(&self, address: NonNull<c_void>, wrapper: &Arc<T>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::key(address), Arc::downgrade(wrapper));
    }

    /// Forgets `address`. Called when the native object is destroyed.
    pub fn invalidate(&self, address: NonNull<c_void>) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(address))
            .is_some()
    }

    /// Drops entries whose wrapper is gone. Returns how many were removed.
    pub fn purge_stale(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, wrapper| wrapper.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for IdentityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for IdentityCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.len())
            .finish()
    }
}
