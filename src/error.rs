//! Error types for framed connections and the accept-loop server.

use std::io;

use thiserror::Error;

/// Result type for socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

/// Errors raised by [`Connection`](crate::socket::connection::Connection) and
/// [`Server`](crate::socket::server::Server).
///
/// Deadline expiry is not a separate variant: it surfaces as an
/// [`io::ErrorKind::TimedOut`] source on the operation that stalled.
/// Use [`SocketError::is_timeout`] to tell it apart.
#[derive(Error, Debug)]
pub enum SocketError {
    /// Could not establish a transport connection.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Address that was dialled.
        address: String,
        /// Underlying transport error.
        source: io::Error,
    },

    /// Could not bind the listening endpoint.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: String,
        /// Underlying transport error.
        source: io::Error,
    },

    /// I/O failure while reading a length prefix or payload.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// I/O failure while writing a frame.
    ///
    /// `written` counts the bytes the transport accepted before the failure,
    /// so the peer may have seen a length prefix without its full payload.
    #[error("write failed after {written} bytes: {source}")]
    Write {
        /// Bytes flushed to the transport before the error.
        written: usize,
        /// Underlying transport error.
        source: io::Error,
    },

    /// Failure accepting one incoming connection.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Failure releasing a connection.
    #[error("close failed: {0}")]
    Close(#[source] io::Error),

    /// Incoming length prefix exceeds the configured maximum.
    #[error("message of {len} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Length announced by the peer.
        len: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// The allocator refused a receive buffer for the announced length.
    #[error("cannot allocate a {len}-byte receive buffer")]
    Allocation {
        /// Length announced by the peer.
        len: u64,
    },
}

impl SocketError {
    /// Returns true if the operation failed because its deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        self.io_source()
            .is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
    }

    /// Underlying I/O error, if this variant carries one.
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::Connect { source, .. }
            | Self::Bind { source, .. }
            | Self::Write { source, .. } => Some(source),
            Self::Read(source) | Self::Accept(source) | Self::Close(source) => Some(source),
            Self::MessageTooLarge { .. } | Self::Allocation { .. } => None,
        }
    }
}

/// Build the error reported when a per-call deadline elapses.
pub(crate) fn deadline_exceeded(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{operation} deadline exceeded"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_error_is_timeout() {
        let err = SocketError::Read(deadline_exceeded("read"));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "read failed: read deadline exceeded");
    }

    #[test]
    fn test_write_error_reports_partial_count() {
        let err = SocketError::Write {
            written: 8,
            source: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("after 8 bytes"));
    }

    #[test]
    fn test_size_errors_have_no_io_source() {
        let err = SocketError::MessageTooLarge { len: 10, limit: 4 };
        assert!(err.io_source().is_none());
        assert!(!err.is_timeout());
    }
}
