//! # novakv - In-Memory Key-Value Server
//!
//! novakv is a protocol-compatible, in-memory key-value server. It speaks the
//! line-framed `+`/`-`/`:`/`$`/`*` request/response format over TCP and stores
//! byte strings and doubly linked lists in a sharded keyspace with per-key
//! locking and TTL expiry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            novakv                                │
//! │                                                                  │
//! │  ┌────────────┐    ┌────────────┐    ┌──────────────────┐        │
//! │  │ TCP Server │───>│ Connection │───>│ CommandRegistry  │        │
//! │  │ (Listener) │    │   Loop     │    │   + Handlers     │        │
//! │  └────────────┘    └────────────┘    └────────┬─────────┘        │
//! │                                               │                  │
//! │                                               ▼                  │
//! │  ┌────────────┐    ┌────────────────────────────────────────┐    │
//! │  │  Request   │    │               Database                 │    │
//! │  │  Parser    │    │  ┌────────────┐ ┌───────┐ ┌─────────┐  │    │
//! │  │            │    │  │ ShardedMap │ │ TTL   │ │ Key     │  │    │
//! │  └────────────┘    │  │            │ │ table │ │ locks   │  │    │
//! │                    │  └────────────┘ └───────┘ └─────────┘  │    │
//! │                    └────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bytes from a connection flow through the request parser into a command
//! array, the registry looks up the handler, the handler drives the database
//! under the appropriate key locks, and the reply is serialized back out.
//!
//! ## Guarantees
//!
//! - Two operations on the same key are strictly serialized under that key's
//!   lock; reads may share the lock.
//! - Multi-key operations (`MSET`, `LMOVE`, `RENAME`) acquire their locks in
//!   a globally consistent order and are atomic with respect to every other
//!   operation touching any of the same keys.
//! - No handler ever observes an expired key: expiry is enforced both by
//!   per-key timer tasks and by a check on first touch.

pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod glob;
pub mod protocol;
pub mod storage;

pub use commands::CommandRegistry;
pub use config::Config;
pub use connection::{serve_connection, ConnectionStats};
pub use db::Database;
pub use protocol::{FrameError, Reply};

/// Server version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
