//! Protocol implementations.
//!
//! - `line`: CRLF-framed PING/echo protocol

pub mod line;
