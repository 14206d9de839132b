//! Length-prefixed message sockets.
//!
//! A [`Connection`](connection::Connection) frames a byte stream into
//! messages; a [`Server`](server::Server) accepts streams and hands each one,
//! already framed, to a handler on its own task.
//!
//! # Architecture
//!
//! ```text
//! Client                               Server
//! ┌──────────────────┐                ┌──────────────────────┐
//! │ Connection::open │                │ Server::bind         │
//! │  TcpStream       │◄──────────────►│  accept loop         │
//! │  read / write    │  frames over   │  spawn handler task  │
//! └──────────────────┘  TCP           │  per Connection      │
//!                                     └──────────┬───────────┘
//!                                                │ accept errors (try_send)
//!                                                ▼
//!                                          bounded mpsc
//! ```
//!
//! # Wire Protocol
//!
//! Length-prefixed frames: `[u64 LE length][payload]`
//!
//! See [`framing`] for the codec.

pub mod connection;
pub mod framing;
pub mod server;
