//! Keyed mutual exclusion for commits
//!
//! Every commit locks the ids of the documents it touches before it reads or
//! writes them. Locks are taken in sorted key order so two commits over
//! overlapping sets can never wait on each other in a cycle.
//!
//! Entries are created on demand and pruned when the last holder releases
//! them, so the table stays proportional to in-flight commits rather than to
//! the number of documents ever touched.

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;
use tracing::trace;

type Guard = ArcMutexGuard<RawMutex, ()>;

/// Table of named locks
#[derive(Debug, Default)]
pub struct ObjectLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ObjectLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked (held or being waited on)
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if no key is tracked
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        // the shard write lock is released before we block on the mutex
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock a single key
    pub fn lock(&self, key: &str) -> LockSet<'_> {
        self.lock_many([key])
    }

    /// Lock every key in `keys`; duplicates are collapsed
    ///
    /// Blocks until all keys are held. The returned set releases them on drop.
    pub fn lock_many<I, S>(&self, keys: I) -> LockSet<'_>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self.entry(&key);
            let guard = match mutex.try_lock_arc() {
                Some(guard) => guard,
                None => {
                    trace!(target: "doctx::locks", key = %key, "waiting for object lock");
                    mutex.lock_arc()
                }
            };
            guards.push((key, guard));
        }
        LockSet {
            table: self,
            guards,
        }
    }

    fn prune(&self, key: &str) {
        // only the table holds the Arc once every holder and waiter is gone
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Held locks; released in reverse order on drop
#[must_use = "locks are released as soon as the set is dropped"]
pub struct LockSet<'a> {
    table: &'a ObjectLocks,
    guards: Vec<(String, Guard)>,
}

impl LockSet<'_> {
    /// Keys held by this set, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.guards.iter().map(|(key, _)| key.as_str())
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// True if the set holds nothing
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        while let Some((key, guard)) = self.guards.pop() {
            drop(guard);
            self.table.prune(&key);
        }
    }
}

impl std::fmt::Debug for LockSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSet")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}
