//! An embeddable HTTP/1.1 server runtime core: acceptor and connection
//! lifecycle, protocol detection, a per-request async state machine, a
//! request/response bridge (`Channel`), composable handlers, a timeout
//! scheduler, and error/size-limit interception.
//!
//! Grounded on `plabayo-rama`'s `rama-http-core`/`rama-core` sub-crates —
//! see `DESIGN.md` for the full grounding ledger.

pub mod acceptor;
pub mod async_event;
pub mod attributes;
pub mod channel;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod error_handler;
pub mod factory;
pub mod handler;
pub mod interceptor;
pub mod request;
pub mod response;
pub mod rt;
pub mod server;
pub mod state_machine;
pub mod stats;
pub mod timeout;
pub mod wire;

pub use channel::Channel;
pub use error::{BoxError, CoreError};
pub use handler::Handler;
pub use server::{Server, ServerConfig};
