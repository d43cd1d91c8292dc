//! TTL bookkeeping.
//!
//! The registry maps keys to their absolute expiry instant (epoch seconds)
//! plus a cancellation channel for the timer task that watches the entry.
//! A key is present here iff it has an active expiry.
//!
//! When an entry is replaced or removed, its cancellation channel fires so
//! the in-flight timer for the superseded entry aborts instead of expiring
//! a key that since got a new deadline. The timer tasks themselves are
//! spawned by [`crate::db::Database::set_ttl`], which owns the interplay
//! with the keyspace.

use crate::storage::ShardedMap;
use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Current time as whole seconds since the epoch.
pub fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

/// One key's expiry state.
#[derive(Debug, Clone)]
pub struct TtlEntry {
    /// Absolute expiry instant, epoch seconds.
    pub expire_at: i64,
    /// Fires when the entry is superseded or removed.
    cancel: watch::Sender<bool>,
}

/// Table of active expiries, sharded like the keyspace.
#[derive(Debug)]
pub struct TtlRegistry {
    entries: ShardedMap<TtlEntry>,
}

impl TtlRegistry {
    pub fn new(shard_count: usize) -> Self {
        Self {
            entries: ShardedMap::new(shard_count),
        }
    }

    /// The expiry instant recorded for `key`, if any.
    pub fn expire_at(&self, key: &[u8]) -> Option<i64> {
        self.entries.get(key).map(|entry| entry.expire_at)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains(key)
    }

    /// Records an expiry for `key`, cancelling any previous timer. Returns
    /// the receiver the new timer task should watch for cancellation.
    pub fn insert(&self, key: Bytes, expire_at: i64) -> watch::Receiver<bool> {
        if let Some(old) = self.entries.get(&key) {
            let _ = old.cancel.send(true);
        }
        let (cancel, watcher) = watch::channel(false);
        self.entries.set(key, TtlEntry { expire_at, cancel });
        watcher
    }

    /// Removes `key`'s expiry, firing its cancellation. Returns whether an
    /// entry existed.
    pub fn remove(&self, key: &[u8]) -> bool {
        if let Some(entry) = self.entries.get(key) {
            let _ = entry.cancel.send(true);
        }
        self.entries.delete(key)
    }

    /// Number of keys with an active expiry (approximate).
    pub fn len(&self) -> i64 {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
