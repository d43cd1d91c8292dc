//! Reply values and their wire encoding.
//!
//! Every reply the server sends starts with a type prefix byte:
//! - `+` simple string
//! - `-` error
//! - `:` integer
//! - `$` bulk string (binary safe; `$-1` is the nil bulk string)
//! - `*` array (`*-1` is the nil array)
//!
//! All lines are terminated with CRLF. The nil bulk string and the nil array
//! are distinct encodings from the empty bulk string (`$0\r\n\r\n`) and the
//! empty array (`*0\r\n`).

use bytes::Bytes;
use std::fmt;

/// The CRLF line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Reply type prefixes.
pub mod prefix {
    pub const SIMPLE: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply produced by a command handler, ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Non-binary text without CRLF. Encoded as `+<s>\r\n`.
    Simple(String),

    /// An error condition. Encoded as `-<s>\r\n`.
    Error(String),

    /// A 64-bit signed integer. Encoded as `:<n>\r\n`.
    Integer(i64),

    /// A binary-safe byte payload. Encoded as `$<len>\r\n<bytes>\r\n`.
    Bulk(Bytes),

    /// The nil bulk string, `$-1\r\n`.
    NullBulk,

    /// A sequence of replies. Encoded as `*<len>\r\n` followed by the
    /// elements' encodings.
    Array(Vec<Reply>),

    /// The nil array, `*-1\r\n`.
    NullArray,

    /// A raw line without a prefix, `<s>\r\n`.
    Plain(String),
}

impl Reply {
    pub fn simple(s: impl Into<String>) -> Self {
        Reply::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(items)
    }

    /// The standard success reply, `+OK`.
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Simple("PONG".to_string())
    }

    /// The error returned when a command finds a value of the wrong variant.
    pub fn wrong_type() -> Self {
        Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".to_string())
    }

    /// The error returned when a command receives the wrong number of
    /// arguments.
    pub fn wrong_arity(cmd: &str) -> Self {
        Reply::Error(format!("ERR wrong number of arguments for '{cmd}' command"))
    }

    pub fn syntax_error() -> Self {
        Reply::Error("ERR syntax error".to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Serializes the reply into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                buf.push(prefix::SIMPLE);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::NullBulk => {
                buf.extend_from_slice(b"$-1");
                buf.extend_from_slice(CRLF);
            }
            Reply::Array(items) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    item.serialize_into(buf);
                }
            }
            Reply::NullArray => {
                buf.extend_from_slice(b"*-1");
                buf.extend_from_slice(CRLF);
            }
            Reply::Plain(s) => {
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{s}"),
            Reply::Error(s) => write!(f, "(error) {s}"),
            Reply::Integer(n) => write!(f, "(integer) {n}"),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{s}\""),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::NullBulk | Reply::NullArray => write!(f, "(nil)"),
            Reply::Array(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {item}", i + 1)?;
                }
                Ok(())
            }
            Reply::Plain(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_serialize() {
        assert_eq!(Reply::ok().serialize(), b"+OK\r\n");
        assert_eq!(Reply::pong().serialize(), b"+PONG\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let reply = Reply::error("ERR unknown command 'nope'");
        assert_eq!(reply.serialize(), b"-ERR unknown command 'nope'\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Reply::integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_serialize() {
        let reply = Reply::bulk(Bytes::from("hello"));
        assert_eq!(reply.serialize(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_empty_bulk_is_not_nil() {
        assert_eq!(Reply::bulk(Bytes::new()).serialize(), b"$0\r\n\r\n");
        assert_eq!(Reply::NullBulk.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_empty_array_is_not_nil() {
        assert_eq!(Reply::array(vec![]).serialize(), b"*0\r\n");
        assert_eq!(Reply::NullArray.serialize(), b"*-1\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let reply = Reply::array(vec![
            Reply::bulk(Bytes::from("k")),
            Reply::bulk(Bytes::from("v")),
        ]);
        assert_eq!(reply.serialize(), b"*2\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn test_nested_array_serialize() {
        let reply = Reply::array(vec![
            Reply::integer(1),
            Reply::array(vec![Reply::integer(2), Reply::integer(3)]),
        ]);
        assert_eq!(reply.serialize(), b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n");
    }

    #[test]
    fn test_plain_serialize() {
        assert_eq!(Reply::Plain("hello".to_string()).serialize(), b"hello\r\n");
    }

    #[test]
    fn test_binary_bulk() {
        let reply = Reply::bulk(Bytes::from(&b"a\x00b"[..]));
        assert_eq!(reply.serialize(), b"$3\r\na\x00b\r\n");
    }

    #[test]
    fn test_wrong_arity_message() {
        assert_eq!(
            Reply::wrong_arity("get"),
            Reply::error("ERR wrong number of arguments for 'get' command")
        );
    }
}
