//! Framed connection over a single byte stream.
//!
//! A [`Connection`] owns one bidirectional stream and turns it into discrete
//! messages using the [`framing`](super::framing) codec. Every `read` and
//! `write` gets its own deadline of "now + timeout"; a stall fails that call
//! only and leaves the decision to retry or close with the caller.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use super::framing;
use crate::error::{deadline_exceeded, Result, SocketError};

/// A length-prefixed message connection.
///
/// Generic over the stream so accepted TCP sockets, client sockets and
/// in-memory pipes share the same framing. Defaults to [`TcpStream`].
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: S,
    timeout: Duration,
    max_message_size: Option<u64>,
}

impl Connection<TcpStream> {
    /// Open a TCP connection to `address`.
    ///
    /// The connection attempt itself is bounded by `timeout`, which also
    /// becomes the per-operation deadline for later reads and writes.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Connect`] if the address is invalid or
    /// unreachable, or the attempt does not finish within `timeout`.
    pub async fn open(address: &str, timeout: Duration) -> Result<Self> {
        let connect_error = |source| SocketError::Connect {
            address: address.to_string(),
            source,
        };

        let stream = match time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_error(e)),
            Err(_elapsed) => return Err(connect_error(deadline_exceeded("connect"))),
        };
        // Prefix and payload go out as separate writes.
        stream.set_nodelay(true).map_err(connect_error)?;

        log::info!("[Socket] Connected to {address}");
        Ok(Self::new(stream, timeout))
    }

    /// Address of the local end of the connection.
    pub fn local_address(&self) -> std::io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Address of the remote peer.
    pub fn remote_address(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl<S> Connection<S> {
    /// Wrap an established stream.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream,
            timeout,
            max_message_size: None,
        }
    }

    /// Reject incoming messages announcing more than `limit` bytes.
    ///
    /// `None` (the default) trusts every length prefix.
    pub fn with_max_message_size(mut self, limit: Option<u64>) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Per-operation deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured incoming message limit.
    pub fn max_message_size(&self) -> Option<u64> {
        self.max_message_size
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the next message.
    ///
    /// Returns the full payload or an error; never a partial message. A
    /// keep-alive and an explicit empty message both read as an empty vec.
    ///
    /// # Errors
    ///
    /// [`SocketError::Read`] on transport failure or when the deadline
    /// elapses (check [`SocketError::is_timeout`]), plus the size errors
    /// described on [`framing::read_frame`].
    pub async fn read(&mut self) -> Result<Vec<u8>> {
        let frame = framing::read_frame(&mut self.stream, self.max_message_size);
        match time::timeout(self.timeout, frame).await {
            Ok(Ok(payload)) => {
                log::trace!("[Socket] Read message of {} bytes", payload.len());
                Ok(payload)
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Err(SocketError::Read(deadline_exceeded("read"))),
        }
    }

    /// Write one message and return the bytes written (prefix + payload).
    ///
    /// `None` is the keep-alive form: only the zero length prefix goes on
    /// the wire, exactly as for `Some(&[])`.
    ///
    /// # Errors
    ///
    /// [`SocketError::Write`] carrying the number of bytes the transport had
    /// already accepted. If that count is at least
    /// [`LENGTH_PREFIX_SIZE`](framing::LENGTH_PREFIX_SIZE),
    /// the peer has seen a length prefix whose payload will never complete.
    pub async fn write(&mut self, message: Option<&[u8]>) -> Result<usize> {
        let payload: &[u8] = match message {
            Some(payload) => payload,
            None => {
                log::trace!("[Socket] Writing keep-alive");
                &[]
            }
        };

        let mut written = 0;
        let outcome = time::timeout(
            self.timeout,
            framing::write_frame(&mut self.stream, payload, &mut written),
        )
        .await;

        match outcome {
            Ok(Ok(())) => Ok(written),
            Ok(Err(source)) => Err(SocketError::Write { written, source }),
            Err(_elapsed) => Err(SocketError::Write {
                written,
                source: deadline_exceeded("write"),
            }),
        }
    }

    /// Send the keep-alive signal.
    ///
    /// Returns [`LENGTH_PREFIX_SIZE`](framing::LENGTH_PREFIX_SIZE) on success.
    pub async fn keep_alive(&mut self) -> Result<usize> {
        self.write(None).await
    }

    /// Shut the stream down and release it.
    ///
    /// # Errors
    ///
    /// [`SocketError::Close`] if the transport reports a failure while
    /// shutting down.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(SocketError::Close)
    }
}
