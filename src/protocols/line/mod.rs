//! Line protocol implementation.
//!
//! A text protocol framed on CRLF:
//! - Server sends a welcome line as soon as the connection is accepted
//! - Client sends arbitrary lines
//! - Server answers every line with exactly one reply line, in order
//!
//! ## Protocol Format
//!
//! ```text
//! On connect: WELCOME\r\n
//!
//! Request:  PING\r\n            (any case, surrounding whitespace allowed)
//! Response: PONG\r\n
//!
//! Request:  hello\r\n
//! Response: ECHO: hello\r\n
//!
//! Request:  \r\n
//! Response: ACK\r\n
//! ```
//!
//! A line longer than the configured frame limit gets
//! `ERROR line too long\r\n` and the connection is closed.

pub mod handler;
pub mod parser;
pub mod response;

pub use handler::handle_connection;
