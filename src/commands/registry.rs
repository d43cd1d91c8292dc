//! The command table.
//!
//! A process-lifetime mapping from lower-cased command name to handler.
//! The table is built once at startup, shared behind an `Arc`, and only
//! ever read afterwards, so dispatch needs no locking.
//!
//! Handlers come in two shapes:
//!
//! - [`SyncHandler`]: runs to completion without suspending. This is every
//!   command except the blocking pops. Sync handlers may take key locks but
//!   never hold one across anything that waits.
//! - [`BlockingHandler`]: returns a future. Used by `BLPOP`/`BRPOP`, which
//!   sleep between polling rounds. Blocking handlers also never hold a lock
//!   across an await point.

use crate::commands::{keys, list, string};
use crate::db::Database;
use crate::protocol::Reply;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// A future returned by a blocking handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Reply> + Send + 'a>>;

/// A handler that completes without suspending.
pub type SyncHandler = fn(&Database, &[Bytes]) -> Reply;

/// A handler that may wait (blocking pops).
pub type BlockingHandler = for<'a> fn(&'a Database, &'a [Bytes]) -> HandlerFuture<'a>;

/// One registered command.
#[derive(Clone, Copy)]
pub enum Handler {
    Sync(SyncHandler),
    Blocking(BlockingHandler),
}

/// The command name to handler table.
pub struct CommandRegistry {
    table: HashMap<&'static str, Handler>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// A registry with every built-in command registered.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        string::register(&mut registry);
        list::register(&mut registry);
        keys::register(&mut registry);
        registry
    }

    /// Registers a non-suspending handler under a lower-case name.
    pub fn register(&mut self, name: &'static str, handler: SyncHandler) {
        self.table.insert(name, Handler::Sync(handler));
    }

    /// Registers a blocking handler under a lower-case name.
    pub fn register_blocking(&mut self, name: &'static str, handler: BlockingHandler) {
        self.table.insert(name, Handler::Blocking(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Looks up `argv[0]` case-insensitively and runs the handler. The full
    /// argv, command name included, is passed through.
    pub async fn dispatch(&self, db: &Database, argv: &[Bytes]) -> Reply {
        let Some(first) = argv.first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();

        match self.table.get(name.as_str()).copied() {
            Some(Handler::Sync(handler)) => handler(db, argv),
            Some(Handler::Blocking(handler)) => handler(db, argv).await,
            None => Reply::error(format!("ERR unknown command '{name}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let registry = CommandRegistry::standard();
        let db = Database::new(4);
        let reply = registry.dispatch(&db, &argv(&["NOSUCH", "x"])).await;
        assert_eq!(reply, Reply::error("ERR unknown command 'nosuch'"));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let registry = CommandRegistry::standard();
        let db = Database::new(4);
        let reply = registry.dispatch(&db, &[]).await;
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn test_case_insensitive_lookup() {
        let registry = CommandRegistry::standard();
        let db = Database::new(4);
        assert_eq!(registry.dispatch(&db, &argv(&["ping"])).await, Reply::pong());
        assert_eq!(registry.dispatch(&db, &argv(&["PING"])).await, Reply::pong());
        assert_eq!(registry.dispatch(&db, &argv(&["PiNg"])).await, Reply::pong());
    }

    #[test]
    fn test_standard_set_is_complete() {
        let registry = CommandRegistry::standard();
        for name in [
            "set", "get", "getrange", "setrange", "mget", "mset", "setex", "setnx", "strlen",
            "incr", "incrby", "decr", "decrby", "incrbyfloat", "append", "llen", "lindex", "lpos",
            "lpop", "rpop", "lpush", "lpushx", "rpush", "rpushx", "lset", "lrem", "ltrim",
            "lrange", "lmove", "blpop", "brpop", "ping", "echo", "del", "exists", "keys",
            "expire", "persist", "ttl", "rename",
        ] {
            assert!(registry.contains(name), "missing command {name}");
        }
    }
}
