//! Command handlers and the registry that dispatches to them.
//!
//! Handlers share a signature: the database and the full argv (element 0 is
//! the command name). They validate arity and options, follow the locking
//! contract documented on [`crate::db::Database`], and map every failure to
//! an error reply. Nothing here panics on user input.

pub mod keys;
pub mod list;
pub mod registry;
pub mod string;

pub use registry::{CommandRegistry, Handler};

/// Parses a command argument as a signed 64-bit decimal integer.
pub(crate) fn parse_int(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// Parses a command argument as a 64-bit float.
pub(crate) fn parse_float(data: &[u8]) -> Option<f64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// Builds an argv from string literals. Test helper.
#[cfg(test)]
pub(crate) fn test_argv(parts: &[&str]) -> Vec<bytes::Bytes> {
    parts
        .iter()
        .map(|s| bytes::Bytes::from(s.to_string()))
        .collect()
}
