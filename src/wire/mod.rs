//! The HTTP/1.1 wire adapter §1 treats as an external collaborator ("HTTP/1.1
//! wire parsing and framing... assumed to be a library that exposes messages
//! and body streams"): a minimal request-head parser and response-head
//! encoder, just enough to drive [`crate::connection::HttpConnection`].

mod head;

pub use head::{encode_response_head, parse_request_head, ParsedHead, DEFAULT_MAX_HEADERS};
