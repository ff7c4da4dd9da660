//! line-echo: a CRLF line-oriented TCP server
//!
//! Protocol:
//! - Welcome line on connect
//! - `PING` (any case) answered with `PONG`
//! - Any other non-empty line echoed back as `ECHO: <line>`
//! - Empty line answered with `ACK`
//!
//! Features:
//! - Two interchangeable single-threaded runtimes (tokio, mio)
//! - Bounded line length
//! - Configuration via CLI arguments, environment variables or TOML file

mod config;
mod protocols;
mod runtime;
mod server;

use config::{Config, RuntimeType};
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        runtime = ?config.runtime,
        max_frame_size = config.max_frame_size,
        max_connections = config.max_connections,
        keepalive = config.keepalive,
        nodelay = config.nodelay,
        "Starting line-echo server"
    );

    match config.runtime {
        RuntimeType::Tokio => run_tokio(config),
        RuntimeType::Mio => run_mio(config),
    }
}

/// Run on a current-thread tokio runtime, one task per connection
fn run_tokio(config: Config) -> Result<(), BoxError> {
    info!("Using tokio runtime");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(config).await?;
        info!(address = %server.local_addr()?, "TCP server listening");
        server.run().await
    })
}

/// Run with the mio event loop (epoll on Linux, kqueue on macOS)
fn run_mio(config: Config) -> Result<(), BoxError> {
    info!("Using mio runtime (epoll/kqueue)");
    runtime::run_mio(config)?;
    Ok(())
}
