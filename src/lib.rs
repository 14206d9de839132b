//! litesockets - length-prefixed message framing over TCP.
//!
//! Two pieces, used as peers of the same protocol:
//!
//! - [`Connection`] - wraps one byte stream; `read` and `write` move whole
//!   messages, each call bounded by its own deadline.
//! - [`Server`] - accepts connections forever and runs a
//!   [`ConnectionHandler`] for each on its own tokio task. Accept failures
//!   are reported on a bounded channel and never stop the loop.
//!
//! # Modules
//!
//! - [`socket`] - framing codec, connection and server
//! - [`config`] - configuration loading
//! - [`error`] - error types

pub mod config;
pub mod error;
pub mod socket;

pub use config::SocketConfig;
pub use error::{Result, SocketError};
pub use socket::connection::Connection;
pub use socket::framing::LENGTH_PREFIX_SIZE;
pub use socket::server::{
    handler_fn, Acceptor, ConnectionHandler, HandlerFn, Server, ServerHandle, ServerState,
};
