//! Accept-loop server that hands each connection to a handler task.
//!
//! Binds a listener and runs an accept loop that wraps every accepted
//! stream in a [`Connection`] and spawns the handler on it. Accept failures
//! go to a bounded error channel with `try_send`; when the owner is not
//! draining it, errors are dropped instead of stalling the loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::connection::Connection;
use crate::config::SocketConfig;
use crate::error::{Result, SocketError};

/// Pause after a failed accept unless configured otherwise.
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of incoming streams (the listening half of a transport).
#[async_trait]
pub trait Acceptor: Send + 'static {
    /// Stream type produced by a successful accept.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next incoming stream.
    async fn accept(&mut self) -> io::Result<Self::Stream>;

    /// Address the acceptor is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, peer) = TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        log::debug!("[Socket] Accepted connection from {peer}");
        Ok(stream)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Per-connection callback, invoked concurrently on its own task.
///
/// The handler owns the connection for its whole lifetime, including
/// closing it. The server keeps no reference to dispatched connections.
#[async_trait]
pub trait ConnectionHandler<S>: Send + Sync + 'static
where
    S: Send + 'static,
{
    /// Serve one connection.
    async fn handle(&self, connection: Connection<S>);
}

/// Adapter that turns an async closure into a [`ConnectionHandler`].
#[derive(Debug, Clone)]
pub struct HandlerFn<F>(F);

/// Wrap `f` as a [`ConnectionHandler`].
///
/// ```rust,no_run
/// use litesockets::socket::server::handler_fn;
///
/// let echo = handler_fn(|mut conn: litesockets::Connection| async move {
///     while let Ok(msg) = conn.read().await {
///         if conn.write(Some(&msg)).await.is_err() {
///             break;
///         }
///     }
/// });
/// # drop(echo);
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

#[async_trait]
impl<S, F, Fut> ConnectionHandler<S> for HandlerFn<F>
where
    S: Send + 'static,
    F: Fn(Connection<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, connection: Connection<S>) {
        (self.0)(connection).await;
    }
}

/// Lifecycle of a spawned accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accept loop is running.
    Serving,
    /// Listener closed and loop exited. Terminal.
    Stopped,
}

/// Accept-loop server.
///
/// Built with [`Server::bind`] (TCP) or [`Server::new`] (any [`Acceptor`]),
/// then driven with [`Server::serve`] or [`Server::begin_serving`].
pub struct Server<A, H> {
    acceptor: A,
    handler: Arc<H>,
    timeout: Duration,
    max_message_size: Option<u64>,
    accept_backoff: Duration,
    max_consecutive_errors: Option<u32>,
    errors_tx: mpsc::Sender<SocketError>,
    errors_rx: Option<mpsc::Receiver<SocketError>>,
}

impl<A, H> std::fmt::Debug for Server<A, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("timeout", &self.timeout)
            .field("max_message_size", &self.max_message_size)
            .field("accept_backoff", &self.accept_backoff)
            .field("max_consecutive_errors", &self.max_consecutive_errors)
            .finish_non_exhaustive()
    }
}

impl<H> Server<TcpListener, H>
where
    H: ConnectionHandler<TcpStream>,
{
    /// Bind a TCP listener at `address`.
    ///
    /// `error_buffer_size` bounds the accept-error channel (minimum 1);
    /// `timeout` becomes the per-operation deadline of every accepted
    /// connection.
    ///
    /// # Errors
    ///
    /// [`SocketError::Bind`] if the address is invalid, in use, or not
    /// permitted.
    pub async fn bind(
        address: &str,
        error_buffer_size: usize,
        timeout: Duration,
        handler: H,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| SocketError::Bind {
                address: address.to_string(),
                source,
            })?;

        match listener.local_addr() {
            Ok(addr) => log::info!("[Socket] Server listening on {addr}"),
            Err(_) => log::info!("[Socket] Server listening on {address}"),
        }

        Ok(Self::new(listener, error_buffer_size, timeout, handler))
    }

    /// Bind using every server setting from `config`.
    pub async fn from_config(config: &SocketConfig, handler: H) -> Result<Self> {
        let server = Self::bind(
            &config.address,
            config.error_buffer_size,
            config.timeout(),
            handler,
        )
        .await?;

        Ok(server
            .with_max_message_size(config.max_message_size)
            .with_accept_backoff(config.accept_backoff())
            .with_max_consecutive_errors(config.max_consecutive_accept_errors))
    }
}

impl<A, H> Server<A, H>
where
    A: Acceptor,
    H: ConnectionHandler<A::Stream>,
{
    /// Serve connections from an existing acceptor.
    pub fn new(acceptor: A, error_buffer_size: usize, timeout: Duration, handler: H) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(error_buffer_size.max(1));
        Self {
            acceptor,
            handler: Arc::new(handler),
            timeout,
            max_message_size: None,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
            max_consecutive_errors: None,
            errors_tx,
            errors_rx: Some(errors_rx),
        }
    }

    /// Limit incoming message size on every accepted connection.
    pub fn with_max_message_size(mut self, limit: Option<u64>) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Pause between a failed accept and the next attempt.
    ///
    /// With zero the loop only yields to other tasks before retrying.
    pub fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }

    /// Treat the listener as unusable after `limit` accept failures in a row.
    ///
    /// `None` (the default) keeps accepting forever.
    pub fn with_max_consecutive_errors(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_errors = limit;
        self
    }

    /// Take the receiving end of the accept-error channel.
    ///
    /// Returns `None` after the first call.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<SocketError>> {
        self.errors_rx.take()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Run the accept loop on a new task.
    pub fn begin_serving(self) -> ServerHandle {
        let local_addr = self.local_addr().ok();
        let task = tokio::spawn(self.serve());
        ServerHandle { local_addr, task }
    }

    /// Run the accept loop on the current task.
    ///
    /// Returns only once the listener is considered unusable (see
    /// [`Server::with_max_consecutive_errors`]); the listener is closed on
    /// the way out.
    pub async fn serve(self) {
        let Server {
            mut acceptor,
            handler,
            timeout,
            max_message_size,
            accept_backoff,
            max_consecutive_errors,
            errors_tx,
            errors_rx: _,
        } = self;

        let mut consecutive_errors: u32 = 0;
        loop {
            match acceptor.accept().await {
                Ok(stream) => {
                    consecutive_errors = 0;
                    let connection =
                        Connection::new(stream, timeout).with_max_message_size(max_message_size);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        handler.handle(connection).await;
                    });
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    log::warn!("[Socket] Accept error: {e}");
                    report_error(&errors_tx, SocketError::Accept(e));

                    if max_consecutive_errors.is_some_and(|limit| consecutive_errors >= limit) {
                        log::error!(
                            "[Socket] {consecutive_errors} consecutive accept errors, stopping accept loop"
                        );
                        break;
                    }
                    if accept_backoff.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(accept_backoff).await;
                    }
                }
            }
        }

        drop(acceptor);
        log::info!("[Socket] Listener closed");
    }
}

/// Non-blocking enqueue; a full or abandoned channel drops the error.
fn report_error(errors_tx: &mpsc::Sender<SocketError>, error: SocketError) {
    match errors_tx.try_send(error) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => {
            log::debug!("[Socket] Error channel full, dropping: {dropped}");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Handle to an accept loop started with [`Server::begin_serving`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener was bound to when serving began.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        if self.task.is_finished() {
            ServerState::Stopped
        } else {
            ServerState::Serving
        }
    }

    /// Wait for the accept loop to exit on its own.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            log::error!("[Socket] Accept loop task failed: {e}");
        }
    }

    /// Stop accepting and close the listener.
    ///
    /// Connections already handed to the handler keep running.
    pub async fn shutdown(self) {
        self.task.abort();
        match self.task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::error!("[Socket] Accept loop task failed: {e}"),
        }
        log::info!("[Socket] Server shut down");
    }
}
