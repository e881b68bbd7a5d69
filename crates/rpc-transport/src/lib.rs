//! The core of a length-prefixed, message-oriented RPC transport: address
//! parsing, listener/bind lifecycle, a single-threaded event loop handing
//! ready fds to a worker pool, per-connection framing, and a synchronous
//! client engine with a read-side timeout.
//!
//! This crate never interprets payload bytes or decides which handler a
//! `method_index` maps to — that seam is [`rpc_service`]. It never decides
//! how a header is packed — that is [`rpc_wire`]. It is the glue: readiness
//! polling, thread dispatch, and the framing state machine around both.

mod client;
mod connection;
pub mod error;
mod semaphore;
mod server;
mod socket;
mod stream;
pub mod url;
mod worker;

pub use client::{Client, ClientBuilder, DEFAULT_RPC_TIMEOUT, destroy_service};
pub use server::{Server, ServerBuilder, provide_service};
pub use url::{Endpoint, UrlError, parse_url};

/// `connect_service` (spec §6): connects to `url` with the default timeout.
/// Use [`ClientBuilder`] to customize it.
pub fn connect_service(
    url: &str,
    descriptor: std::sync::Arc<dyn rpc_service::ServiceDescriptor>,
) -> Result<Client, error::ConnectError> {
    Client::connect(url, descriptor)
}
