//! Connection runtimes.
//!
//! - `Connection`: transport-independent per-connection state machine
//! - `mio_impl`: single-threaded readiness event loop (epoll on Linux,
//!   kqueue on macOS)
//!
//! The tokio runtime lives in `crate::server` and drives the same
//! `Connection` type from an async task.

mod connection;
pub mod mio_impl;

pub(crate) use connection::{CloseReason, Connection};
#[cfg(test)]
pub(crate) use connection::ConnState;

use crate::config::Config;
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tracing::info;

/// Run the mio event loop on the current thread.
pub fn run_mio(config: Config) -> std::io::Result<()> {
    let event_loop = mio_impl::EventLoop::bind(config)?;
    info!(address = %event_loop.local_addr()?, "TCP server listening");
    event_loop.run()
}

/// Apply TCP_NODELAY and keep-alive from the config to an accepted socket.
pub(crate) fn configure_stream<S>(stream: &S, config: &Config) -> std::io::Result<()>
where
    S: std::os::fd::AsFd,
{
    let socket = SockRef::from(stream);
    socket.set_nodelay(config.nodelay)?;
    if config.keepalive > 0 {
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive));
        socket.set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}
