//! The error pipeline of §4.7: a [`Handler`] that renders a status into a
//! body once the state machine has routed a request to error dispatch.
//!
//! Grounded on `rama-http-core::proto::h1::role.rs`'s header handling (the
//! canonical-reason-phrase lookup and the discipline of only ever writing
//! `Content-Type`/`Content-Length` once a body is actually produced) and on
//! §4.7's own contract: content-negotiate among `text/html`, `text/json`,
//! `text/plain` from the incoming `Accept` header, write status/reason/URI/
//! cause chain, and fall back to a header-only response if rendering the
//! body itself overflows the response limit.

use std::sync::Arc;

use http::StatusCode;
use mime::Mime;

use crate::attributes::DispatcherType;
use crate::channel::Channel;
use crate::error::{BoxError, CoreError};
use crate::handler::Handler;
use crate::response::Response;

/// The three representations §4.7 names for a negotiated error page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorMime {
    Html,
    Json,
    Plain,
}

impl ErrorMime {
    fn content_type(self) -> &'static str {
        match self {
            Self::Html => "text/html;charset=utf-8",
            Self::Json => "application/json;charset=utf-8",
            Self::Plain => "text/plain;charset=utf-8",
        }
    }

    /// Parse the incoming `Accept` header and pick the first of
    /// {html, json, plain} it names, falling back to plain text when the
    /// header is absent, unparseable, or names none of the three.
    fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return Self::Plain;
        };
        let mut best: Option<(Self, f32)> = None;
        for part in accept.split(',') {
            let part = part.trim();
            let (essence, q) = match part.split_once(';') {
                Some((essence, params)) => (essence.trim(), parse_q(params)),
                None => (part, 1.0),
            };
            let Ok(mime): Result<Mime, _> = essence.parse() else {
                continue;
            };
            let candidate = match (mime.type_(), mime.subtype()) {
                (mime::TEXT, mime::HTML) => Self::Html,
                (mime::APPLICATION, mime::JSON) => Self::Json,
                (mime::TEXT, mime::PLAIN) => Self::Plain,
                (mime::STAR, mime::STAR) | (mime::TEXT, mime::STAR) => Self::Plain,
                _ => continue,
            };
            if best.is_none_or(|(_, best_q)| q > best_q) {
                best = Some((candidate, q));
            }
        }
        best.map_or(Self::Plain, |(mime, _)| mime)
    }
}

/// Parse the `q=` parameter out of an `Accept` segment's parameter list;
/// defaults to `1.0` on anything unparseable, matching a permissive client.
fn parse_q(params: &str) -> f32 {
    for param in params.split(';') {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("q=") {
            return value.trim().parse().unwrap_or(1.0);
        }
    }
    1.0
}

/// Configuration mirroring §6's "error handler" keys: `showStacks` governs
/// whether the rendered page includes a cause chain at all; `disableStacks`
/// is the one-shot flag §4.7 asks for on the overflow retry.
#[derive(Debug, Clone)]
pub struct ErrorHandlerConfig {
    pub show_stacks: bool,
    pub show_servlet_name: bool,
    pub cache_control: Option<&'static str>,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            show_stacks: true,
            show_servlet_name: false,
            cache_control: Some("must-revalidate,no-cache,no-store"),
        }
    }
}

/// A central, near-root-of-chain handler that only acts on
/// [`DispatcherType::Error`] dispatches; anything else is passed through
/// unhandled so the rest of the chain (or the caller's own error handler)
/// still gets a chance, matching §4.7's "the error handler is located via
/// the context then the server" framing — here that's just "mount it
/// before the rest of the chain."
pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    servlet_name: Option<&'static str>,
}

impl ErrorHandler {
    #[must_use]
    pub fn new(config: ErrorHandlerConfig) -> Self {
        Self {
            config,
            servlet_name: None,
        }
    }

    #[must_use]
    pub fn with_servlet_name(mut self, name: &'static str) -> Self {
        self.servlet_name = Some(name);
        self
    }

    /// Render the error page, retrying once with stacks disabled if the
    /// first attempt overflows the response limit, then falling back to a
    /// header-only response (§4.7: "On buffer overflow during rendering,
    /// retry once with stack-trace rendering disabled, then write a
    /// header-only response").
    fn render(&self, channel: &Arc<Channel>, target: &str) {
        channel.with_exchange(|req, resp| {
            let accept = req
                .headers
                .get(http::header::ACCEPT)
                .and_then(|v| v.to_str().ok());
            let mime = ErrorMime::negotiate(accept);
            let cause = channel.error_cause_message();

            if self
                .write_body(resp, target, mime, cause.as_deref(), self.config.show_stacks)
                .is_err()
            {
                let _ = resp.reset();
                if self
                    .write_body(resp, target, mime, cause.as_deref(), false)
                    .is_err()
                {
                    let _ = resp.reset();
                    self.write_headers_only(resp);
                }
            }
        });
    }

    fn write_headers_only(&self, resp: &mut Response) {
        if let Some(cache_control) = self.config.cache_control
            && let Ok(value) = http::HeaderValue::from_str(cache_control)
        {
            resp.headers_mut().insert(http::header::CACHE_CONTROL, value);
        }
        resp.set_content_length(0);
    }

    fn write_body(
        &self,
        resp: &mut Response,
        target: &str,
        mime: ErrorMime,
        cause: Option<&str>,
        show_stacks: bool,
    ) -> Result<(), CoreError> {
        let status = resp.status();
        let reason = resp
            .reason()
            .map(str::to_string)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "Unknown".to_string());
        let servlet_name = self.config.show_servlet_name.then_some(self.servlet_name).flatten();
        let body = match mime {
            ErrorMime::Html => render_html(status, &reason, target, cause, show_stacks, servlet_name),
            ErrorMime::Json => render_json(status, &reason, target, cause, show_stacks, servlet_name),
            ErrorMime::Plain => render_plain(status, &reason, target, cause, show_stacks, servlet_name),
        };
        if let Some(cache_control) = self.config.cache_control
            && let Ok(value) = http::HeaderValue::from_str(cache_control)
        {
            resp.headers_mut().insert(http::header::CACHE_CONTROL, value);
        }
        resp.set_content_type(mime.content_type());
        resp.set_content_length(body.len() as u64);
        resp.write(body.as_bytes())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_html(
    status: StatusCode,
    reason: &str,
    target: &str,
    cause: Option<&str>,
    show_stacks: bool,
    servlet_name: Option<&'static str>,
) -> String {
    let mut body = format!(
        "<html><head><title>Error {status}</title></head><body><h2>HTTP ERROR {status}</h2>\
         <p>Problem accessing {target}. Reason:</p><pre>{reason}</pre>",
        status = status.as_u16(),
        target = escape_html(target),
        reason = escape_html(reason),
    );
    if let Some(name) = servlet_name {
        body.push_str(&format!("<p>Servlet: {}</p>", escape_html(name)));
    }
    if show_stacks && let Some(cause) = cause {
        body.push_str(&format!("<pre>{}</pre>", escape_html(cause)));
    }
    body.push_str("</body></html>");
    body
}

fn render_plain(
    status: StatusCode,
    reason: &str,
    target: &str,
    cause: Option<&str>,
    show_stacks: bool,
    servlet_name: Option<&'static str>,
) -> String {
    let mut body = format!(
        "HTTP ERROR {} {reason}\nURI: {target}\n",
        status.as_u16()
    );
    if let Some(name) = servlet_name {
        body.push_str(&format!("SERVLET: {name}\n"));
    }
    if show_stacks && let Some(cause) = cause {
        body.push_str(&format!("CAUSE: {cause}\n"));
    }
    body
}

fn render_json(
    status: StatusCode,
    reason: &str,
    target: &str,
    cause: Option<&str>,
    show_stacks: bool,
    servlet_name: Option<&'static str>,
) -> String {
    let mut body = format!(
        "{{\"status\":{},\"message\":{:?},\"url\":{:?}",
        status.as_u16(),
        reason,
        target
    );
    if let Some(name) = servlet_name {
        body.push_str(&format!(",\"servlet\":{name:?}"));
    }
    if show_stacks && let Some(cause) = cause {
        body.push_str(&format!(",\"cause\":{cause:?}"));
    }
    body.push('}');
    body
}

impl Handler for ErrorHandler {
    fn handle(
        &self,
        target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            let is_error = channel.with_exchange(|req, _resp| {
                req.dispatcher_type() == DispatcherType::Error
            });
            if !is_error {
                return Ok(false);
            }
            self.render(&channel, &target);
            Ok(true)
        }
    }
}
