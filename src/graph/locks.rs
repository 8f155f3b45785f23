// Striped per-key locks serializing writes that target the same graph key

use std::hash::{BuildHasher, Hash};
use std::sync::{Mutex, MutexGuard};

/// Default number of stripes
pub(crate) const DEFAULT_STRIPES: usize = 64;

/// Fixed set of mutexes; a key always maps to the same stripe, so two writers
/// of one key never overlap. Unrelated keys may share a stripe.
pub(crate) struct KeyLocks {
    stripes: Vec<Mutex<()>>,
    hasher: ahash::RandomState,
}

impl KeyLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
            hasher: ahash::RandomState::new(),
        }
    }

    pub(crate) fn stripe_of<K: Hash>(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.stripes.len() as u64) as usize
    }

    /// Lock the stripe owning `key`. The guarded data is `()`, so a poisoned
    /// stripe is simply recovered.
    pub(crate) fn lock<K: Hash>(&self, key: &K) -> MutexGuard<'_, ()> {
        let stripe = &self.stripes[self.stripe_of(key)];
        stripe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the stripes of several keys at once. Stripes are taken in index
    /// order and each only once, so overlapping callers cannot deadlock.
    pub(crate) fn lock_all<K: Hash>(&self, keys: &[K]) -> Vec<MutexGuard<'_, ()>> {
        let mut indexes: Vec<usize> = keys.iter().map(|key| self.stripe_of(key)).collect();
        indexes.sort_unstable();
        indexes.dedup();

        indexes
            .into_iter()
            .map(|i| {
                self.stripes[i]
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
            })
            .collect()
    }
}
