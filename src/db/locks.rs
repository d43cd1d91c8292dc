//! Key-level lock manager.
//!
//! A fixed table of reader-writer locks, indexed by key hash. This is the
//! correctness lock for the keyspace: any handler that reads or writes the
//! logical value of a key must hold that key's lock in the appropriate mode
//! for the whole operation. The shard locks inside the map only protect the
//! map's internal structure and are never held across an operation.
//!
//! Two distinct keys may hash to the same lock. That only costs concurrency,
//! never correctness, but it is why multi-key acquisition must dedup lock
//! indices: locking the same slot twice from one thread would self-deadlock.
//!
//! Multi-key acquisition sorts the deduped indices ascending and acquires in
//! that order. Every multi-key operation in the system goes through
//! [`LockManager::write_multi`] or [`LockManager::read_multi`], which gives a
//! single global acquisition order and rules out lock-order deadlocks.
//! Release order does not matter; guards release on drop.

use crate::storage::hash_key;
use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A guard for one key's lock, held in shared mode.
pub type KeyReadGuard<'a> = RwLockReadGuard<'a, ()>;
/// A guard for one key's lock, held in exclusive mode.
pub type KeyWriteGuard<'a> = RwLockWriteGuard<'a, ()>;

/// Fixed-size table of key locks.
#[derive(Debug)]
pub struct LockManager {
    locks: Vec<RwLock<()>>,
}

impl LockManager {
    /// Creates a table with `size` locks (at least one). The size is
    /// typically a multiple of the shard count.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            locks: (0..size).map(|_| RwLock::new(())).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.locks.len()
    }

    #[inline]
    fn index(&self, key: &[u8]) -> usize {
        (hash_key(key) % self.locks.len() as u64) as usize
    }

    /// Acquires `key`'s lock in shared mode.
    pub fn read(&self, key: &[u8]) -> KeyReadGuard<'_> {
        self.locks[self.index(key)].read().unwrap()
    }

    /// Acquires `key`'s lock in exclusive mode.
    pub fn write(&self, key: &[u8]) -> KeyWriteGuard<'_> {
        self.locks[self.index(key)].write().unwrap()
    }

    /// Deduped lock indices for a key set, in ascending order.
    fn sorted_indices(&self, keys: &[&[u8]]) -> Vec<usize> {
        let set: BTreeSet<usize> = keys.iter().map(|key| self.index(key)).collect();
        set.into_iter().collect()
    }

    /// Acquires the locks covering `keys` in shared mode, deadlock-free for
    /// arbitrary key sets.
    pub fn read_multi(&self, keys: &[&[u8]]) -> Vec<KeyReadGuard<'_>> {
        self.sorted_indices(keys)
            .into_iter()
            .map(|i| self.locks[i].read().unwrap())
            .collect()
    }

    /// Acquires the locks covering `keys` in exclusive mode, deadlock-free
    /// for arbitrary key sets.
    pub fn write_multi(&self, keys: &[&[u8]]) -> Vec<KeyWriteGuard<'_>> {
        self.sorted_indices(keys)
            .into_iter()
            .map(|i| self.locks[i].write().unwrap())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_same_key_same_lock() {
        let locks = LockManager::new(64);
        assert_eq!(locks.index(b"k"), locks.index(b"k"));
    }

    #[test]
    fn test_reads_share() {
        let locks = LockManager::new(64);
        let a = locks.read(b"k");
        let b = locks.read(b"k");
        drop(a);
        drop(b);
    }

    #[test]
    fn test_write_excludes() {
        let locks = Arc::new(LockManager::new(64));
        let guard = locks.write(b"k");

        let contender = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            let _guard = contender.write(b"k");
        });

        // the contender cannot finish while we hold the lock
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!handle.is_finished());

        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn test_multi_dedups_colliding_keys() {
        // one slot: every key collides, and a naive multi-acquire would
        // self-deadlock
        let locks = LockManager::new(1);
        let guards = locks.write_multi(&[b"a", b"b", b"c"]);
        assert_eq!(guards.len(), 1);
    }

    #[test]
    fn test_multi_indices_sorted() {
        let locks = LockManager::new(1024);
        let keys: Vec<&[u8]> = vec![b"k1", b"k2", b"k3", b"k4", b"k1"];
        let indices = locks.sorted_indices(&keys);
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn test_opposite_order_multi_acquire_completes() {
        // two threads acquire the same pair in opposite argument order many
        // times; with unordered acquisition this deadlocks almost instantly
        let locks = Arc::new(LockManager::new(8));
        let mut handles = Vec::new();
        for flip in [false, true] {
            let locks = Arc::clone(&locks);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let keys: Vec<&[u8]> = if flip {
                        vec![b"k1", b"k2"]
                    } else {
                        vec![b"k2", b"k1"]
                    };
                    let _guards = locks.write_multi(&keys);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
