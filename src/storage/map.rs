//! Sharded concurrent hash map.
//!
//! One big lock around one big map serializes every touch of the keyspace.
//! Instead the key space is partitioned into a fixed number of shards, each
//! guarding its own `HashMap` with its own reader-writer lock:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    ShardedMap                       │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐    │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │    │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │    │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │    │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! A key's shard is chosen by a salted FNV-1a hash of its bytes, so the
//! assignment is stable for the lifetime of the process. The shard lock only
//! protects the map structure itself; logical serialization of reads and
//! writes to one key is the job of the key-level lock manager, which callers
//! must hold in the appropriate mode before touching the map.
//!
//! The map is generic over its value type: the keyspace stores tagged values
//! and the TTL table stores expiry entries, both over this structure.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fixed salts folded around the key bytes to keep trivially related keys
/// from clustering in one shard.
const SALT_PREFIX: &[u8] = b"@#&";
const SALT_SUFFIX: &[u8] = b"*^%$";

/// Stable 64-bit FNV-1a hash of a key, with fixed prefix and suffix salts.
///
/// Deterministic within a process lifetime (and across processes, which
/// makes shard assignment reproducible in tests).
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for chunk in [SALT_PREFIX, key, SALT_SUFFIX] {
        for &byte in chunk {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

#[derive(Debug)]
struct Shard<V> {
    entries: RwLock<HashMap<Bytes, V>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

/// A fixed-width sharded map from binary keys to values of type `V`.
///
/// All operations take the owning shard's lock for their duration and
/// release it on return. The entry count is tracked with a relaxed atomic,
/// so it is approximate while structural changes are in flight.
#[derive(Debug)]
pub struct ShardedMap<V> {
    shards: Vec<Shard<V>>,
    count: AtomicI64,
}

impl<V: Clone> ShardedMap<V> {
    /// Creates a map with `shard_count` shards (at least one).
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
            count: AtomicI64::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard<V> {
        let index = (hash_key(key) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Inserts or overwrites. Returns 1 when the key was absent, 0 when an
    /// existing entry was replaced.
    pub fn set(&self, key: Bytes, value: V) -> i64 {
        let shard = self.shard(&key);
        let mut entries = shard.entries.write().unwrap();
        let added = i64::from(!entries.contains_key(key.as_ref() as &[u8]));
        entries.insert(key, value);
        self.count.fetch_add(added, Ordering::Relaxed);
        added
    }

    /// Overwrite-only variant. Returns 1 when the key existed and was
    /// replaced, 0 otherwise.
    pub fn set_if_exists(&self, key: &[u8], value: V) -> i64 {
        let shard = self.shard(key);
        let mut entries = shard.entries.write().unwrap();
        match entries.get_mut(key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Insert-only variant. Returns 1 when the key was absent and inserted,
    /// 0 otherwise.
    pub fn set_if_not_exists(&self, key: Bytes, value: V) -> i64 {
        let shard = self.shard(&key);
        let mut entries = shard.entries.write().unwrap();
        if entries.contains_key(key.as_ref() as &[u8]) {
            return 0;
        }
        entries.insert(key, value);
        self.count.fetch_add(1, Ordering::Relaxed);
        1
    }

    /// Returns a clone of the stored value, under the shard's read lock.
    pub fn get(&self, key: &[u8]) -> Option<V> {
        let shard = self.shard(key);
        let entries = shard.entries.read().unwrap();
        entries.get(key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let shard = self.shard(key);
        let entries = shard.entries.read().unwrap();
        entries.contains_key(key)
    }

    /// Removes a key. Returns whether it was present.
    pub fn delete(&self, key: &[u8]) -> bool {
        let shard = self.shard(key);
        let mut entries = shard.entries.write().unwrap();
        let existed = entries.remove(key).is_some();
        if existed {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        existed
    }

    /// Best-effort entry count.
    pub fn len(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots all keys, taking each shard's read lock in turn. The
    /// result is not a globally consistent point-in-time view.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len().max(0) as usize);
        for shard in &self.shards {
            let entries = shard.entries.read().unwrap();
            keys.extend(entries.keys().cloned());
        }
        keys
    }
}
