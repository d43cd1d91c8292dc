//! The database: sharded keyspace + key locks + TTL table.
//!
//! [`Database`] is a thin facade over the three storage pieces. It is a
//! cheap-clone handle (the internals are behind `Arc`), so connection tasks
//! and TTL timer tasks all share the same state.
//!
//! ## Locking contract
//!
//! The canonical sequence for a handler touching key K is:
//!
//! 1. [`Database::check_ttl`] (never while holding K's lock; it takes the
//!    lock itself when it has to evict),
//! 2. acquire K's lock in the required mode,
//! 3. re-read state under the lock,
//! 4. mutate,
//! 5. drop the guard.
//!
//! Step 1 may race with an expiry or a concurrent writer; step 3 is what
//! the handler actually trusts.
//!
//! ## Expiry
//!
//! Expiry is enforced twice over:
//!
//! - **actively**: [`Database::set_ttl`] spawns a one-shot timer task that
//!   sleeps until the deadline and then evicts, unless the entry's cancel
//!   signal fires first (entry replaced or removed);
//! - **passively**: [`Database::check_ttl`] evicts on first touch, so even
//!   with a timer task gone missing no handler ever observes an expired key.

pub mod locks;
pub mod ttl;

pub use locks::LockManager;
pub use ttl::{epoch_seconds, TtlRegistry};

use crate::storage::{ShardedMap, Value};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Shared handle to one logical database.
#[derive(Debug, Clone)]
pub struct Database {
    map: Arc<ShardedMap<Value>>,
    ttl: Arc<TtlRegistry>,
    locks: Arc<LockManager>,
}

impl Database {
    /// Creates a database with `shard_count` map shards and a lock table
    /// twice that size.
    pub fn new(shard_count: usize) -> Self {
        Self {
            map: Arc::new(ShardedMap::new(shard_count)),
            ttl: Arc::new(TtlRegistry::new(shard_count)),
            locks: Arc::new(LockManager::new(shard_count * 2)),
        }
    }

    /// The keyspace. Callers must hold the key lock in the appropriate mode
    /// for any access they expect to be serialized.
    pub fn map(&self) -> &ShardedMap<Value> {
        &self.map
    }

    /// The key-level lock table.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Checks whether `key` is still alive, evicting it if its TTL has
    /// passed.
    ///
    /// Returns true when the key has no TTL or the TTL lies in the future.
    /// Otherwise the key is removed from both the keyspace and the TTL
    /// table under its write lock, and false is returned.
    ///
    /// Callers must NOT hold `key`'s lock: this is the one TTL operation
    /// that acquires it internally.
    pub fn check_ttl(&self, key: &[u8]) -> bool {
        let Some(expire_at) = self.ttl.expire_at(key) else {
            return true;
        };
        if expire_at > epoch_seconds() {
            return true;
        }

        let _guard = self.locks.write(key);
        self.map.delete(key);
        self.ttl.remove(key);
        debug!(key = %String::from_utf8_lossy(key), "expired key evicted");
        false
    }

    /// Records an absolute expiry for `key` and arms a timer task for it.
    ///
    /// Must be called while holding `key`'s write lock. Fails (returns
    /// false) when the key is absent from the keyspace: a TTL must never
    /// outlive, or predate, its value. An existing entry is cancelled and
    /// replaced.
    pub fn set_ttl(&self, key: &[u8], expire_at: i64) -> bool {
        if !self.map.contains(key) {
            trace!(key = %String::from_utf8_lossy(key), "set_ttl on missing key");
            return false;
        }

        let key = Bytes::copy_from_slice(key);
        let mut cancelled = self.ttl.insert(key.clone(), expire_at);

        let db = self.clone();
        tokio::spawn(async move {
            let wait = (expire_at - epoch_seconds()).max(0) as u64;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {
                    db.check_ttl(&key);
                    trace!(key = %String::from_utf8_lossy(&key), "ttl timer fired");
                }
                _ = cancelled.changed() => {
                    trace!(key = %String::from_utf8_lossy(&key), "ttl timer cancelled");
                }
            }
        });

        true
    }

    /// Drops `key`'s TTL (the key itself stays). Returns whether a TTL
    /// existed.
    pub fn delete_ttl(&self, key: &[u8]) -> bool {
        self.ttl.remove(key)
    }

    /// The absolute expiry recorded for `key`, if any.
    pub fn expire_at(&self, key: &[u8]) -> Option<i64> {
        self.ttl.expire_at(key)
    }

    /// Removes a key and its TTL. The caller holds the key's write lock.
    /// Returns whether the value existed.
    pub fn delete_key(&self, key: &[u8]) -> bool {
        let existed = self.map.delete(key);
        self.ttl.remove(key);
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::new(16)
    }

    #[test]
    fn test_check_without_ttl_is_alive() {
        let db = db();
        db.map().set(Bytes::from("k"), Value::str("v"));
        assert!(db.check_ttl(b"k"));
        // a missing key has no TTL either
        assert!(db.check_ttl(b"missing"));
    }

    #[tokio::test]
    async fn test_set_ttl_requires_value() {
        let db = db();
        assert!(!db.set_ttl(b"missing", epoch_seconds() + 10));
        assert_eq!(db.expire_at(b"missing"), None);
    }

    #[tokio::test]
    async fn test_future_ttl_keeps_key_alive() {
        let db = db();
        db.map().set(Bytes::from("k"), Value::str("v"));
        {
            let _guard = db.locks().write(b"k");
            assert!(db.set_ttl(b"k", epoch_seconds() + 100));
        }
        assert!(db.check_ttl(b"k"));
        assert!(db.map().contains(b"k"));
    }

    #[tokio::test]
    async fn test_passive_expiry_removes_both_entries() {
        let db = db();
        db.map().set(Bytes::from("k"), Value::str("v"));
        // already in the past; no timer will beat us to it within the test
        {
            let _guard = db.locks().write(b"k");
            assert!(db.set_ttl(b"k", epoch_seconds() - 1));
        }

        assert!(!db.check_ttl(b"k"));
        assert!(!db.map().contains(b"k"));
        assert_eq!(db.expire_at(b"k"), None);
    }

    #[tokio::test]
    async fn test_active_expiry_fires() {
        let db = db();
        db.map().set(Bytes::from("k"), Value::str("v"));
        {
            let _guard = db.locks().write(b"k");
            assert!(db.set_ttl(b"k", epoch_seconds() + 1));
        }

        tokio::time::sleep(Duration::from_millis(2200)).await;
        // the timer task evicted the key with no reads involved
        assert!(!db.map().contains(b"k"));
        assert_eq!(db.expire_at(b"k"), None);
    }

    #[tokio::test]
    async fn test_replacing_ttl_cancels_old_timer() {
        let db = db();
        db.map().set(Bytes::from("k"), Value::str("v"));
        {
            let _guard = db.locks().write(b"k");
            assert!(db.set_ttl(b"k", epoch_seconds() + 1));
            assert!(db.set_ttl(b"k", epoch_seconds() + 60));
        }

        tokio::time::sleep(Duration::from_millis(2200)).await;
        // superseded timer must not have evicted the key
        assert!(db.map().contains(b"k"));
        assert!(db.check_ttl(b"k"));
    }

    #[tokio::test]
    async fn test_delete_ttl_disarms_timer() {
        let db = db();
        db.map().set(Bytes::from("k"), Value::str("v"));
        {
            let _guard = db.locks().write(b"k");
            assert!(db.set_ttl(b"k", epoch_seconds() + 1));
            assert!(db.delete_ttl(b"k"));
        }

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(db.map().contains(b"k"));
    }

    #[tokio::test]
    async fn test_delete_key_clears_ttl() {
        let db = db();
        db.map().set(Bytes::from("k"), Value::str("v"));
        {
            let _guard = db.locks().write(b"k");
            assert!(db.set_ttl(b"k", epoch_seconds() + 100));
            assert!(db.delete_key(b"k"));
        }
        assert_eq!(db.expire_at(b"k"), None);
        assert!(!db.map().contains(b"k"));
    }
}
