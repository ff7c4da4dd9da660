//! CRLF line framing.
//!
//! `LineBuffer` accumulates bytes as they arrive and hands out complete
//! frames. Anything after the last delimiter stays buffered until more data
//! shows up.

use bytes::{Buf, Bytes, BytesMut};

/// Frame delimiter.
pub const CRLF: &[u8] = b"\r\n";

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A line exceeded the configured maximum length.
    TooLong { limit: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooLong { limit } => {
                write!(f, "line exceeds maximum length of {limit} bytes")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Per-connection receive buffer with delimiter framing.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Bytes at the front of `buf` already known to contain no CRLF.
    scanned: usize,
    max_frame_size: Option<usize>,
}

impl LineBuffer {
    /// Create an empty buffer. `max_frame_size` of `None` means unbounded.
    pub fn new(max_frame_size: Option<usize>) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            scanned: 0,
            max_frame_size,
        }
    }

    /// Append a received chunk.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Raw buffer for reading directly from a socket.
    ///
    /// Only append to it; consumed bytes are tracked by `next_frame`.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of bytes received but not yet emitted as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame, without its delimiter.
    ///
    /// Returns `Ok(None)` when no delimiter is buffered yet.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        // A '\r' at the end of the scanned region may pair with a later '\n'.
        let start = self.scanned.saturating_sub(1);

        match find_crlf(&self.buf[start..]) {
            Some(offset) => {
                let end = start + offset;
                if let Some(limit) = self.max_frame_size {
                    if end > limit {
                        return Err(FrameError::TooLong { limit });
                    }
                }
                let frame = self.buf.split_to(end).freeze();
                self.buf.advance(CRLF.len());
                self.scanned = 0;
                Ok(Some(frame))
            }
            None => {
                self.scanned = self.buf.len();
                if let Some(limit) = self.max_frame_size {
                    // a trailing '\r' may still turn out to be the delimiter
                    let pending_cr = self.buf.last() == Some(&b'\r');
                    let content = self.buf.len() - usize::from(pending_cr);
                    if content > limit {
                        return Err(FrameError::TooLong { limit });
                    }
                }
                Ok(None)
            }
        }
    }

    /// Drop everything buffered and give the allocation back.
    pub fn release(&mut self) {
        self.buf = BytesMut::new();
        self.scanned = 0;
    }
}

/// Find \r\n in buffer, returning the position of \r.
pub fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == CRLF)
}

/// Decode a frame as text. Invalid UTF-8 is replaced rather than rejected.
pub fn decode(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(lines: &mut LineBuffer) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = lines.next_frame().unwrap() {
            frames.push(frame.to_vec());
        }
        frames
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"PING\r\n"), Some(4));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"no crlf here\r"), None);
        assert_eq!(find_crlf(b"a\nb\rc\r\n"), Some(5));
        assert_eq!(find_crlf(b""), None);
    }

    #[test]
    fn test_single_chunk_multiple_frames() {
        let mut lines = LineBuffer::new(None);
        lines.extend(b"PING\r\nhello\r\n\r\ntail");
        assert_eq!(
            drain(&mut lines),
            vec![b"PING".to_vec(), b"hello".to_vec(), Vec::new()]
        );
        assert_eq!(lines.buffered(), 4);
    }

    #[test]
    fn test_partial_frame_waits_for_delimiter() {
        let mut lines = LineBuffer::new(None);
        lines.extend(b"hel");
        assert!(lines.next_frame().unwrap().is_none());
        lines.extend(b"lo\r");
        assert!(lines.next_frame().unwrap().is_none());
        lines.extend(b"\n");
        assert_eq!(lines.next_frame().unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(lines.next_frame().unwrap().is_none());
        assert_eq!(lines.buffered(), 0);
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let stream: &[u8] = b"PING\r\n  ping \r\nhello world\r\n\r\nx\ry\r\n\n\r\r\nlast";

        let mut whole = LineBuffer::new(None);
        whole.extend(stream);
        let expected = drain(&mut whole);
        assert_eq!(expected.len(), 6);

        for chunk_size in 1..=stream.len() {
            let mut lines = LineBuffer::new(None);
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                lines.extend(chunk);
                frames.extend(drain(&mut lines));
            }
            assert_eq!(frames, expected, "chunk size {chunk_size}");
            assert_eq!(lines.buffered(), 4);
        }

        // split at every single position
        for split in 0..=stream.len() {
            let mut lines = LineBuffer::new(None);
            lines.extend(&stream[..split]);
            let mut frames = drain(&mut lines);
            lines.extend(&stream[split..]);
            frames.extend(drain(&mut lines));
            assert_eq!(frames, expected, "split at {split}");
        }
    }

    #[test]
    fn test_frame_at_limit() {
        let mut lines = LineBuffer::new(Some(4));
        lines.extend(b"abcd\r");
        assert!(lines.next_frame().unwrap().is_none());
        lines.extend(b"\n");
        assert_eq!(lines.next_frame().unwrap().as_deref(), Some(&b"abcd"[..]));
    }

    #[test]
    fn test_frame_too_long() {
        let mut lines = LineBuffer::new(Some(4));
        lines.extend(b"abcde\r\n");
        assert_eq!(lines.next_frame(), Err(FrameError::TooLong { limit: 4 }));

        let mut lines = LineBuffer::new(Some(4));
        lines.extend(b"abcdef");
        assert_eq!(lines.next_frame(), Err(FrameError::TooLong { limit: 4 }));
    }

    #[test]
    fn test_tail_rejected_once_it_cannot_fit() {
        let mut lines = LineBuffer::new(Some(4));
        lines.extend(b"abcde");
        assert_eq!(lines.next_frame(), Err(FrameError::TooLong { limit: 4 }));

        let mut lines = LineBuffer::new(Some(4));
        lines.extend(b"abcd");
        assert!(lines.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_largest_limit() {
        let mut lines = LineBuffer::new(Some(usize::MAX));
        lines.extend(b"partial");
        assert!(lines.next_frame().unwrap().is_none());
        lines.extend(b" line\r");
        assert!(lines.next_frame().unwrap().is_none());
        lines.extend(b"\n");
        assert_eq!(
            lines.next_frame().unwrap().as_deref(),
            Some(&b"partial line"[..])
        );
    }

    #[test]
    fn test_unbounded() {
        let mut lines = LineBuffer::new(None);
        lines.extend(&vec![b'a'; 1 << 20]);
        assert!(lines.next_frame().unwrap().is_none());
        assert_eq!(lines.buffered(), 1 << 20);
    }

    #[test]
    fn test_release() {
        let mut lines = LineBuffer::new(None);
        lines.extend(b"partial");
        lines.release();
        assert_eq!(lines.buffered(), 0);
        assert_eq!(lines.buf_mut().capacity(), 0);
        lines.extend(b"\r\n");
        assert_eq!(lines.next_frame().unwrap().as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_decode_lossy() {
        assert_eq!(decode(b"hello"), "hello");
        assert_eq!(decode(b"caf\xc3\xa9"), "café");
        assert_eq!(decode(b"a\xffb"), "a\u{FFFD}b");
    }
}
