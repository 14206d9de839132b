//! litesockets CLI - echo server and one-shot client for the framing protocol.
//!
//! See the `litesockets` library for the protocol itself.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use litesockets::{handler_fn, Connection, Server, SocketConfig};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "litesockets")]
#[command(version)]
#[command(about = "Length-prefixed message framing over TCP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by both subcommands; flags beat env vars beat the file.
#[derive(Args)]
struct Common {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to bind or dial
    #[arg(long)]
    address: Option<String>,
    /// Per-operation deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Reject incoming messages larger than this many bytes
    #[arg(long)]
    max_message_size: Option<u64>,
}

impl Common {
    fn resolve(&self) -> Result<SocketConfig> {
        let mut config = SocketConfig::load(self.config.as_deref())?;
        if let Some(address) = &self.address {
            config.address.clone_from(address);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if self.max_message_size.is_some() {
            config.max_message_size = self.max_message_size;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run an echo server
    Serve {
        #[command(flatten)]
        common: Common,
        /// Capacity of the accept-error channel
        #[arg(long)]
        error_buffer: Option<usize>,
    },
    /// Send one message and print the reply
    Send {
        #[command(flatten)]
        common: Common,
        /// Send the keep-alive signal instead of a message
        #[arg(long, conflicts_with = "message")]
        keep_alive: bool,
        /// Message to send
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            common,
            error_buffer,
        } => {
            let mut config = common.resolve()?;
            if let Some(size) = error_buffer {
                config.error_buffer_size = size;
            }
            serve(&config).await
        }
        Commands::Send {
            common,
            keep_alive,
            message,
        } => {
            let config = common.resolve()?;
            let payload = if keep_alive { None } else { message };
            send(&config, payload.as_deref()).await
        }
    }
}

/// Echo every message back on every connection until Ctrl-C.
async fn serve(config: &SocketConfig) -> Result<()> {
    let echo = handler_fn(|mut conn: Connection| async move {
        let peer = conn
            .remote_address()
            .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
        log::info!("Client connected: {peer}");

        loop {
            match conn.read().await {
                Ok(msg) => {
                    log::debug!("Echoing {} bytes to {peer}", msg.len());
                    if let Err(e) = conn.write(Some(&msg)).await {
                        log::warn!("Write to {peer} failed: {e}");
                        break;
                    }
                }
                Err(e) => {
                    log::info!("Client {peer} done: {e}");
                    break;
                }
            }
        }

        if let Err(e) = conn.close().await {
            log::debug!("Close for {peer} failed: {e}");
        }
    });

    let mut server = Server::from_config(config, echo)
        .await
        .context("Failed to start server")?;
    let mut errors = server
        .take_errors()
        .context("Error channel already taken")?;

    let handle = server.begin_serving();
    println!(
        "Listening on {}",
        handle
            .local_addr()
            .map_or_else(|| config.address.clone(), |addr| addr.to_string())
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            println!("Shutting down...");
            handle.shutdown().await;
        }
        () = async {
            while let Some(e) = errors.recv().await {
                log::warn!("Accept error: {e}");
            }
        } => {
            // Sender dropped: the accept loop gave up on the listener.
            handle.wait().await;
            anyhow::bail!("Accept loop stopped");
        }
    }

    Ok(())
}

/// Open a connection, write one message, print the reply.
async fn send(config: &SocketConfig, message: Option<&str>) -> Result<()> {
    let mut conn = Connection::open(&config.address, config.timeout())
        .await?
        .with_max_message_size(config.max_message_size);

    let written = conn.write(message.map(str::as_bytes)).await?;
    log::debug!("Wrote {written} bytes to {}", config.address);

    let reply = conn.read().await?;
    conn.close().await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&reply)?;
    if !reply.is_empty() {
        writeln!(stdout)?;
    }
    Ok(())
}
