//! Request-line/header-block parsing and response-head encoding — the
//! minimal slice of the "external" HTTP/1.1 wire library §1 treats as a
//! collaborator, implemented just enough to drive the core.
//!
//! Grounded on `rama-http-core::proto::h1::role.rs`: header constants and
//! the `Date` header cadence mirror that file's `encode_headers`, though
//! without its `Http1HeaderMap`/small-vec header-name interning — this
//! core parses directly into `http::HeaderMap`.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

use crate::error::CoreError;

/// Maximum header block `httparse` will tokenize in one parse attempt.
pub const DEFAULT_MAX_HEADERS: usize = 100;

/// A fully parsed request line + header block, with the byte offset the
/// body begins at within the buffer that was parsed.
#[derive(Debug)]
pub struct ParsedHead {
    pub method: Method,
    pub target: String,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body_offset: usize,
}

/// `None` means "not enough bytes yet, read more and retry"; matches
/// `httparse::Status::Partial` one level up so callers don't need to know
/// about `httparse` directly.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<ParsedHead>, CoreError> {
    let mut header_storage = [httparse::EMPTY_HEADER; DEFAULT_MAX_HEADERS];
    let mut req = httparse::Request::new(&mut header_storage);
    let status = req.parse(buf).map_err(|e| CoreError::BadMessage {
        status: StatusCode::BAD_REQUEST,
        reason: httparse_reason(&e),
    })?;
    let httparse::Status::Complete(body_offset) = status else {
        return Ok(None);
    };

    let method = req
        .method
        .ok_or(CoreError::BadMessage {
            status: StatusCode::BAD_REQUEST,
            reason: "missing method",
        })?
        .parse::<Method>()
        .map_err(|_| CoreError::BadMessage {
            status: StatusCode::BAD_REQUEST,
            reason: "unrecognized method",
        })?;
    let target = req
        .path
        .ok_or(CoreError::BadMessage {
            status: StatusCode::BAD_REQUEST,
            reason: "missing request target",
        })?
        .to_string();
    let uri: Uri = target.parse().map_err(|_| CoreError::BadMessage {
        status: StatusCode::BAD_REQUEST,
        reason: "malformed request target",
    })?;
    let version = match req.version {
        Some(1) => Version::HTTP_11,
        Some(0) => Version::HTTP_10,
        _ => {
            return Err(CoreError::BadMessage {
                status: StatusCode::BAD_REQUEST,
                reason: "unsupported HTTP version",
            });
        }
    };

    let mut headers = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
            CoreError::BadMessage {
                status: StatusCode::BAD_REQUEST,
                reason: "malformed header name",
            }
        })?;
        let value = HeaderValue::from_bytes(header.value).map_err(|_| CoreError::BadMessage {
            status: StatusCode::BAD_REQUEST,
            reason: "malformed header value",
        })?;
        headers.append(name, value);
    }

    let content_length = match headers.get(http::header::CONTENT_LENGTH) {
        Some(value) => {
            let parsed: u64 = value
                .to_str()
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CoreError::BadMessage {
                    status: StatusCode::BAD_REQUEST,
                    reason: "malformed Content-Length",
                })?;
            Some(parsed)
        }
        None => None,
    };

    Ok(Some(ParsedHead {
        method,
        target,
        uri,
        version,
        headers,
        content_length,
        body_offset,
    }))
}

fn httparse_reason(e: &httparse::Error) -> &'static str {
    match e {
        httparse::Error::HeaderName => "malformed header name",
        httparse::Error::HeaderValue => "malformed header value",
        httparse::Error::NewLine => "malformed line ending",
        httparse::Error::Status => "malformed status",
        httparse::Error::Token => "invalid token",
        httparse::Error::TooManyHeaders => "too many headers",
        httparse::Error::Version => "unsupported version",
        _ => "malformed request",
    }
}

/// Encode a response head (status line + headers + the blank line) ready
/// to prefix a body. Always writes `Date` (§6 wire contract) and
/// `Content-Length` when the caller knows the body length up front.
pub fn encode_response_head(
    version: Version,
    status: StatusCode,
    reason: Option<&str>,
    headers: &HeaderMap,
    content_length: Option<u64>,
) -> Bytes {
    let mut dst = BytesMut::with_capacity(256);
    let version_str = match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    };
    dst.extend_from_slice(version_str.as_bytes());
    dst.extend_from_slice(b" ");
    let mut code_buf = itoa::Buffer::new();
    dst.extend_from_slice(code_buf.format(status.as_u16()).as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(
        reason
            .or_else(|| status.canonical_reason())
            .unwrap_or("Unknown")
            .as_bytes(),
    );
    dst.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    if let Some(len) = content_length
        && !headers.contains_key(http::header::CONTENT_LENGTH)
    {
        dst.extend_from_slice(b"content-length: ");
        let mut len_buf = itoa::Buffer::new();
        dst.extend_from_slice(len_buf.format(len).as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    if !headers.contains_key(http::header::DATE) {
        dst.extend_from_slice(b"date: ");
        dst.extend_from_slice(httpdate::fmt_http_date(std::time::SystemTime::now()).as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
    dst.freeze()
}
