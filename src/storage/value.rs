//! The tagged value stored under a key.

use crate::storage::list::List;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// A stored value. Every key maps to exactly one variant; a command that
/// expects one variant and finds another must fail without mutating state.
///
/// The variant of a stored value never changes in place: converting a key
/// from one type to another is always an explicit delete plus insert.
///
/// List values are shared handles. Cloning a `Value` out of the map clones
/// the handle, not the list, and the caller mutates the list through the
/// handle while holding the key's lock.
#[derive(Debug, Clone)]
pub enum Value {
    /// A binary-safe byte string.
    Str(Bytes),
    /// A doubly linked list.
    List(Arc<Mutex<List>>),
}

impl Value {
    pub fn str(data: impl Into<Bytes>) -> Self {
        Value::Str(data.into())
    }

    /// Creates an empty list value with a fresh handle.
    pub fn new_list() -> Self {
        Value::List(Arc::new(Mutex::new(List::new())))
    }

    /// The type name reported to clients.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}
