//! Request/response attribute storage and dispatch classification.
//!
//! The spec's `attributes` surface (§4.4) is a typed, per-request bag that
//! forward/include/async-dispatch all read and write. `rama-core` models
//! this with a multi-store [`rama_core::extensions::Extensions`] type to
//! support its layered-service use case; this core only ever has one
//! request in flight per `Channel`, so the plain [`http::Extensions`] type
//! map (the same type `rama-http-types` re-exports under its `hyperium`
//! feature) is the simpler, sufficient fit.

pub use http::Extensions as Attributes;

/// How the current pass through the handler chain was reached.
///
/// Mirrors the servlet `DispatcherType` this spec's §4.4/§4.5 assume:
/// a plain request, a `forward`/`include` from another handler, a
/// dispatch back in from an async cycle, or an error dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatcherType {
    Request,
    Forward,
    Include,
    AsyncDispatch,
    Error,
}

impl DispatcherType {
    /// Error dispatch and async dispatch are re-entries into the handler
    /// chain driven by the state machine rather than a fresh request.
    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        matches!(self, Self::AsyncDispatch | Self::Error)
    }
}
