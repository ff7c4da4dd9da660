//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. Each slab entry owns its socket, its
//! receive buffer and its pending output, so no locking is involved.

use crate::config::Config;
use crate::runtime::{configure_stream, CloseReason, Connection};
use bytes::{Buf, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Events handled per poll call.
const EVENT_CAPACITY: usize = 1024;

/// Bytes read per `read` syscall.
const READ_CHUNK: usize = 16 * 1024;

/// Per-connection state for the mio backend.
struct MioConnection {
    stream: TcpStream,
    conn: Connection,
    /// Replies not yet accepted by the socket.
    out: BytesMut,
    /// Interest currently registered with the poller.
    interest: Interest,
    /// Set once no more input will be processed; the entry is removed when
    /// `out` drains.
    closing: Option<CloseReason>,
}

impl MioConnection {
    /// Read until the socket would block, answering complete lines.
    fn read_ready(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    info!(
                        peer = %self.conn.peer(),
                        unframed = self.conn.buffered(),
                        "Peer ended stream"
                    );
                    self.closing = Some(CloseReason::EndOfStream);
                    return Ok(());
                }
                Ok(n) => {
                    if self.conn.receive(&chunk[..n], &mut self.out).is_err() {
                        self.closing = Some(CloseReason::Overflow);
                        return Ok(());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Handle a readiness event: read if readable and still accepting
    /// input, then flush whatever output is pending.
    fn ready(&mut self, readable: bool) -> io::Result<()> {
        if readable && self.closing.is_none() {
            self.read_ready()?;
        }
        self.write_ready()
    }

    /// Write pending output until done or the socket would block.
    fn write_ready(&mut self) -> io::Result<()> {
        while !self.out.is_empty() {
            match self.stream.write(&self.out) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.out.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Interest needed for the current state.
    fn wanted_interest(&self) -> Interest {
        match (self.closing.is_some(), self.out.is_empty()) {
            (false, true) => Interest::READABLE,
            (false, false) => Interest::READABLE | Interest::WRITABLE,
            (true, _) => Interest::WRITABLE,
        }
    }

    /// Whether the entry should be removed now.
    fn finished(&self) -> bool {
        self.closing.is_some() && self.out.is_empty()
    }
}

/// Single-threaded line server over mio.
pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    connections: Slab<MioConnection>,
    config: Config,
}

impl EventLoop {
    /// Bind the listener and register it with a new poller.
    pub fn bind(config: Config) -> io::Result<Self> {
        let addr = resolve_addr(&config.listen_addr())?;
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections: Slab::with_capacity(config.max_connections.min(EVENT_CAPACITY)),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Dispatch readiness events forever.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    Token(conn_id) => self.connection_ready(conn_id, event),
                }
            }
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!(%peer, "Connection limit reached");
                        continue;
                    }
                    if let Err(e) = self.open_connection(stream, peer) {
                        warn!(%peer, error = %e, "Failed to open connection");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    break;
                }
            }
        }
    }

    fn open_connection(&mut self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        info!(%peer, "Connection opened");

        if let Err(e) = configure_stream(&stream, &self.config) {
            warn!(%peer, error = %e, "Failed to set socket options");
        }

        let conn = Connection::new(peer, self.config.frame_limit());
        let mut out = BytesMut::new();
        conn.greet(&self.config.welcome, &mut out);

        let entry = self.connections.vacant_entry();
        let conn_id = entry.key();
        let mut mio_conn = MioConnection {
            stream,
            conn,
            out,
            interest: Interest::READABLE,
            closing: None,
        };
        mio_conn.write_ready()?;
        mio_conn.interest = mio_conn.wanted_interest();
        self.poll
            .registry()
            .register(&mut mio_conn.stream, Token(conn_id), mio_conn.interest)?;
        entry.insert(mio_conn);

        debug!(conn_id, %peer, "Registered connection");
        Ok(())
    }

    fn connection_ready(&mut self, conn_id: usize, event: &mio::event::Event) {
        let Some(mio_conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        if let Err(e) = mio_conn.ready(event.is_readable()) {
            warn!(peer = %mio_conn.conn.peer(), error = %e, "Connection error");
            self.close_connection(conn_id, CloseReason::Error);
            return;
        }

        if mio_conn.finished() {
            let reason = mio_conn.closing.unwrap_or(CloseReason::EndOfStream);
            self.close_connection(conn_id, reason);
            return;
        }

        let wanted = mio_conn.wanted_interest();
        if wanted != mio_conn.interest {
            let result = self
                .poll
                .registry()
                .reregister(&mut mio_conn.stream, Token(conn_id), wanted);
            if let Err(e) = result {
                warn!(peer = %mio_conn.conn.peer(), error = %e, "Failed to update interest");
                self.close_connection(conn_id, CloseReason::Error);
                return;
            }
            mio_conn.interest = wanted;
        }
    }

    fn close_connection(&mut self, conn_id: usize, reason: CloseReason) {
        if let Some(mut mio_conn) = self.connections.try_remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut mio_conn.stream);
            mio_conn.conn.close(reason);
            info!(
                peer = %mio_conn.conn.peer(),
                state = ?mio_conn.conn.state(),
                "Connection closed"
            );
        }
    }
}

fn resolve_addr(listen: &str) -> io::Result<SocketAddr> {
    listen.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address found for {listen}"),
        )
    })
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
