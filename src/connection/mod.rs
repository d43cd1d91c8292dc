//! Client connection handling.
//!
//! One task per accepted socket, each owning its read buffer and its
//! current database selection. See [`handler`] for the loop itself.

pub mod handler;

pub use handler::{serve_connection, Connection, ConnectionError, ConnectionStats};
