//! Reply selection for received lines.

use bytes::{BufMut, BytesMut};

use super::parser::CRLF;

/// Health check command, matched case-insensitively after trimming.
/// Must stay ASCII so its byte length equals its char count.
pub const LIVENESS_TOKEN: &str = "PING";

/// Reply to the liveness token.
const PONG: &[u8] = b"PONG";

/// Prefix for echoed lines.
const ECHO_PREFIX: &[u8] = b"ECHO: ";

/// Reply to an empty line.
const ACK: &[u8] = b"ACK";

/// Reply to a line that exceeded the frame limit, sent before closing.
const TOO_LONG: &[u8] = b"ERROR line too long";

/// The single reply owed for one received line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Pong,
    /// Echo of the line exactly as received.
    Echo(&'a str),
    Ack,
}

impl<'a> Reply<'a> {
    /// Pick the reply for a decoded line.
    pub fn for_line(line: &'a str) -> Self {
        if is_liveness(line) {
            Reply::Pong
        } else if !line.is_empty() {
            Reply::Echo(line)
        } else {
            Reply::Ack
        }
    }

    /// Encoded length including the trailing CRLF.
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            Reply::Pong => PONG.len(),
            Reply::Echo(line) => ECHO_PREFIX.len() + line.len(),
            Reply::Ack => ACK.len(),
        };
        body + CRLF.len()
    }

    /// Append the wire form of this reply to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(self.encoded_len());
        match self {
            Reply::Pong => out.put_slice(PONG),
            Reply::Echo(line) => {
                out.put_slice(ECHO_PREFIX);
                out.put_slice(line.as_bytes());
            }
            Reply::Ack => out.put_slice(ACK),
        }
        out.put_slice(CRLF);
    }
}

/// Whitespace (including a byte order mark) is trimmed and the rest is
/// compared after full Unicode uppercasing, so `pıng` counts as well.
fn is_liveness(line: &str) -> bool {
    let trimmed = line.trim_matches(|c: char| c.is_whitespace() || c == '\u{FEFF}');
    // every char uppercases to at least one char
    if trimmed.chars().nth(LIVENESS_TOKEN.len()).is_some() {
        return false;
    }
    trimmed.to_uppercase() == LIVENESS_TOKEN
}

/// Append `line` followed by CRLF, used for the greeting.
pub fn encode_line(line: &str, out: &mut BytesMut) {
    out.reserve(line.len() + CRLF.len());
    out.put_slice(line.as_bytes());
    out.put_slice(CRLF);
}

/// Append the overflow error reply.
pub fn encode_too_long(out: &mut BytesMut) {
    out.reserve(TOO_LONG.len() + CRLF.len());
    out.put_slice(TOO_LONG);
    out.put_slice(CRLF);
}
