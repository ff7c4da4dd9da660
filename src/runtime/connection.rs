//! Connection state shared by both runtimes.
//!
//! A `Connection` owns the receive buffer for one socket and turns received
//! bytes into reply bytes. It never touches the socket itself, so the tokio
//! task and the mio event loop drive it the same way.

use crate::protocols::line::parser::{decode, FrameError, LineBuffer};
use crate::protocols::line::response::{encode_line, encode_too_long, Reply};
use bytes::BytesMut;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Why a connection stopped being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer finished sending.
    EndOfStream,
    /// Peer sent a line longer than the frame limit.
    Overflow,
    /// Transport error (reset, broken pipe, ...).
    Error,
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closed(CloseReason),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    lines: LineBuffer,
    state: ConnState,
}

impl Connection {
    /// Create a new open connection.
    pub fn new(peer: SocketAddr, max_frame_size: Option<usize>) -> Self {
        Self {
            peer,
            lines: LineBuffer::new(max_frame_size),
            state: ConnState::Open,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.lines.buffered()
    }

    /// Buffer to read socket data into before calling `process`.
    pub fn read_buf(&mut self) -> &mut BytesMut {
        self.lines.buf_mut()
    }

    /// Write the welcome line to `out`.
    pub fn greet(&self, welcome: &str, out: &mut BytesMut) {
        encode_line(welcome, out);
        info!(peer = %self.peer, line = ?welcome, "=>");
    }

    /// Append `chunk` to the buffer and answer every line it completes.
    pub fn receive(&mut self, chunk: &[u8], out: &mut BytesMut) -> Result<usize, FrameError> {
        if !self.is_open() {
            return Ok(0);
        }
        self.lines.extend(chunk);
        self.process(out)
    }

    /// Answer every complete line currently buffered, in order.
    ///
    /// Returns the number of lines answered. On overflow the error reply is
    /// appended to `out` and the connection is closed.
    pub fn process(&mut self, out: &mut BytesMut) -> Result<usize, FrameError> {
        if !self.is_open() {
            return Ok(0);
        }

        let mut answered = 0;
        loop {
            let frame = match self.lines.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(answered),
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "Dropping connection");
                    encode_too_long(out);
                    self.close(CloseReason::Overflow);
                    return Err(e);
                }
            };

            let line = decode(&frame);
            info!(peer = %self.peer, line = ?line, "<=");

            let reply = Reply::for_line(&line);
            reply.encode(out);
            info!(peer = %self.peer, ?reply, "=>");
            answered += 1;
        }
    }

    /// Mark the connection closed and release its buffer.
    ///
    /// Only the first call has any effect.
    pub fn close(&mut self, reason: CloseReason) {
        if self.is_open() {
            self.state = ConnState::Closed(reason);
            self.lines.release();
        }
    }
}
