//! Wire protocol: request framing and reply serialization.
//!
//! Inbound, a request is an array of bulk strings whose first element is the
//! command name (matched case-insensitively). Outbound, replies are one of
//! the five prefixed types plus the two nil encodings. See [`parser`] for
//! the incremental parsing contract and [`types`] for the reply encoding.

pub mod parser;
pub mod types;

pub use parser::{parse_request, FrameError, MAX_BULK_SIZE};
pub use types::Reply;
