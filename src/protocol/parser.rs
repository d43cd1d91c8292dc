//! Incremental request parser.
//!
//! A request is an array of bulk strings:
//!
//! ```text
//! *<N>\r\n$<len1>\r\n<bytes1>\r\n ... $<lenN>\r\n<bytesN>\r\n
//! ```
//!
//! TCP delivers a byte stream, so the parser must tolerate partial frames.
//! The caller appends incoming bytes to a buffer and calls [`parse_request`]:
//!
//! - `Ok(Some((argv, consumed)))` means a complete request was parsed and
//!   `consumed` bytes should be dropped from the front of the buffer;
//! - `Ok(None)` means the frame is incomplete and more bytes are needed;
//! - `Err(_)` means the stream violates the framing and the connection must
//!   be closed. No reply is sent for framing errors.

use crate::protocol::types::CRLF;
use bytes::Bytes;
use thiserror::Error;

/// Maximum size of a single bulk string payload (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a request array.
pub const MAX_ARGS: usize = 1024 * 1024;

/// Violations of the request framing. All of them are fatal for the
/// connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame does not start with the array prefix `*`.
    #[error("expected array header, got {0:#04x}")]
    ExpectedArray(u8),

    /// An array element does not start with the bulk prefix `$`.
    #[error("expected bulk string header, got {0:#04x}")]
    ExpectedBulk(u8),

    /// A length line is not a decimal integer, or a bulk length is negative.
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// The array header carries a negative element count.
    #[error("negative element count: {0}")]
    NegativeCount(i64),

    /// A bulk string payload is not followed by CRLF.
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// A declared size exceeds the configured maximum.
    #[error("frame too large: {size} (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Attempts to parse one complete request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> Result<Option<(Vec<Bytes>, usize)>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != b'*' {
        return Err(FrameError::ExpectedArray(buf[0]));
    }

    let (count, header_len) = match parse_length_line(&buf[1..])? {
        Some(parsed) => parsed,
        None => return Ok(None),
    };
    if count < 0 {
        return Err(FrameError::NegativeCount(count));
    }
    let count = count as usize;
    if count > MAX_ARGS {
        return Err(FrameError::TooLarge {
            size: count,
            max: MAX_ARGS,
        });
    }

    let mut consumed = 1 + header_len;
    let mut argv = Vec::with_capacity(count);

    for _ in 0..count {
        let rest = &buf[consumed..];
        if rest.is_empty() {
            return Ok(None);
        }
        if rest[0] != b'$' {
            return Err(FrameError::ExpectedBulk(rest[0]));
        }

        let (len, len_line) = match parse_length_line(&rest[1..])? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        if len < 0 {
            return Err(FrameError::InvalidLength(len.to_string()));
        }
        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(FrameError::TooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = consumed + 1 + len_line;
        let frame_end = data_start + len + CRLF.len();
        if buf.len() < frame_end {
            return Ok(None);
        }
        if &buf[data_start + len..frame_end] != CRLF {
            return Err(FrameError::MissingCrlf);
        }

        argv.push(Bytes::copy_from_slice(&buf[data_start..data_start + len]));
        consumed = frame_end;
    }

    Ok(Some((argv, consumed)))
}

/// Parses a `<decimal>\r\n` line. Returns the value and the number of bytes
/// consumed including the terminator, or `None` when the line is incomplete.
fn parse_length_line(buf: &[u8]) -> Result<Option<(i64, usize)>, FrameError> {
    let pos = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let line = std::str::from_utf8(&buf[..pos])
        .map_err(|_| FrameError::InvalidLength(String::from_utf8_lossy(&buf[..pos]).into_owned()))?;
    let n: i64 = line
        .parse()
        .map_err(|_| FrameError::InvalidLength(line.to_string()))?;

    Ok(Some((n, pos + CRLF.len())))
}

/// Finds the position of the first `\r\n` in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv_of(strs: &[&str]) -> Vec<Bytes> {
        strs.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_parse_get() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        let (argv, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(argv, argv_of(&["GET", "name"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_set() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhello\r\n";
        let (argv, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(argv, argv_of(&["SET", "k", "hello"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_incomplete_header() {
        assert_eq!(parse_request(b"*2").unwrap(), None);
        assert_eq!(parse_request(b"*2\r\n").unwrap(), None);
    }

    #[test]
    fn test_incomplete_bulk() {
        assert_eq!(parse_request(b"*1\r\n$5\r\nhel").unwrap(), None);
        assert_eq!(parse_request(b"*1\r\n$5\r\nhello").unwrap(), None);
        // payload present but terminator not yet arrived
        assert_eq!(parse_request(b"*1\r\n$5\r\nhello\r").unwrap(), None);
    }

    #[test]
    fn test_empty_bulk_element() {
        let input = b"*1\r\n$0\r\n\r\n";
        let (argv, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(argv, vec![Bytes::new()]);
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_empty_array() {
        let (argv, consumed) = parse_request(b"*0\r\n").unwrap().unwrap();
        assert!(argv.is_empty());
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_pipelined_requests_consume_one_at_a_time() {
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (argv, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(argv, argv_of(&["PING"]));
        assert_eq!(consumed, 14);

        let (argv, consumed) = parse_request(&input[14..]).unwrap().unwrap();
        assert_eq!(argv, argv_of(&["PING"]));
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_binary_safe_payload() {
        let input = b"*1\r\n$5\r\nhe\x00lo\r\n";
        let (argv, _) = parse_request(input).unwrap().unwrap();
        assert_eq!(argv[0], Bytes::from(&b"he\x00lo"[..]));
    }

    #[test]
    fn test_rejects_non_array() {
        assert!(matches!(
            parse_request(b"PING\r\n"),
            Err(FrameError::ExpectedArray(b'P'))
        ));
        assert!(matches!(
            parse_request(b"+OK\r\n"),
            Err(FrameError::ExpectedArray(b'+'))
        ));
    }

    #[test]
    fn test_rejects_non_bulk_element() {
        assert!(matches!(
            parse_request(b"*1\r\n:42\r\n"),
            Err(FrameError::ExpectedBulk(b':'))
        ));
    }

    #[test]
    fn test_rejects_negative_count() {
        assert!(matches!(
            parse_request(b"*-1\r\n"),
            Err(FrameError::NegativeCount(-1))
        ));
    }

    #[test]
    fn test_rejects_negative_bulk_length() {
        assert!(matches!(
            parse_request(b"*1\r\n$-1\r\n"),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_rejects_garbage_length() {
        assert!(matches!(
            parse_request(b"*x\r\n"),
            Err(FrameError::InvalidLength(_))
        ));
        assert!(matches!(
            parse_request(b"*1\r\n$abc\r\n"),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_rejects_missing_payload_terminator() {
        assert!(matches!(
            parse_request(b"*1\r\n$2\r\nabXY"),
            Err(FrameError::MissingCrlf)
        ));
    }
}
