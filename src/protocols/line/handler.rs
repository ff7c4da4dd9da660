//! Line protocol handler for the Tokio runtime.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::runtime::{CloseReason, Connection};

/// Reply buffer size
const WRITE_BUFFER_SIZE: usize = 4 * 1024;

/// Serve one connection until the peer finishes, overflows, or errors.
///
/// Sends `welcome` first, then answers every CRLF-terminated line in the
/// order received. Transport errors are returned to the caller after the
/// connection has been marked closed.
pub async fn handle_connection<S>(
    mut stream: S,
    conn: &mut Connection,
    welcome: &str,
) -> io::Result<CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match serve(&mut stream, conn, welcome).await {
        Ok(reason) => {
            conn.close(reason);
            info!(peer = %conn.peer(), state = ?conn.state(), "Connection closed");
            Ok(reason)
        }
        Err(e) => {
            conn.close(CloseReason::Error);
            Err(e)
        }
    }
}

async fn serve<S>(stream: &mut S, conn: &mut Connection, welcome: &str) -> io::Result<CloseReason>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = BytesMut::with_capacity(WRITE_BUFFER_SIZE);

    conn.greet(welcome, &mut out);
    stream.write_all(&out).await?;
    out.clear();

    loop {
        let n = stream.read_buf(conn.read_buf()).await?;
        if n == 0 {
            info!(peer = %conn.peer(), unframed = conn.buffered(), "Peer ended stream");
            return Ok(CloseReason::EndOfStream);
        }

        let result = conn.process(&mut out);
        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }

        if result.is_err() {
            stream.shutdown().await?;
            return Ok(CloseReason::Overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ConnState;
    use std::net::SocketAddr;
    use tokio_test::io::Builder;

    fn connection(max_frame_size: Option<usize>) -> Connection {
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        Connection::new(peer, max_frame_size)
    }

    #[tokio::test]
    async fn test_welcome_and_replies() {
        let stream = Builder::new()
            .write(b"WELCOME\r\n")
            .read(b"PING\r\n")
            .write(b"PONG\r\n")
            .read(b"hello\r\n")
            .write(b"ECHO: hello\r\n")
            .read(b"\r\n")
            .write(b"ACK\r\n")
            .build();

        let mut conn = connection(None);
        let reason = handle_connection(stream, &mut conn, "WELCOME").await.unwrap();
        assert_eq!(reason, CloseReason::EndOfStream);
        assert_eq!(conn.state(), ConnState::Closed(CloseReason::EndOfStream));
    }

    #[tokio::test]
    async fn test_two_lines_one_read() {
        let stream = Builder::new()
            .write(b"WELCOME\r\n")
            .read(b"ping \r\nhello\r\n")
            .write(b"PONG\r\n")
            .write(b"ECHO: hello\r\n")
            .build();

        let mut conn = connection(None);
        handle_connection(stream, &mut conn, "WELCOME").await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_line_across_reads() {
        let stream = Builder::new()
            .write(b"HI\r\n")
            .read(b"hel")
            .read(b"lo\r")
            .read(b"\nPI")
            .write(b"ECHO: hello\r\n")
            .read(b"NG\r\ntrailing")
            .write(b"PONG\r\n")
            .build();

        let mut conn = connection(None);
        let reason = handle_connection(stream, &mut conn, "HI").await.unwrap();
        assert_eq!(reason, CloseReason::EndOfStream);
        assert_eq!(conn.buffered(), 0);
    }

    #[tokio::test]
    async fn test_overflow_sends_error_and_stops() {
        let stream = Builder::new()
            .write(b"WELCOME\r\n")
            .read(b"PING\r\n0123456789ABCDEF")
            .write(b"PONG\r\nERROR line too long\r\n")
            .build();

        let mut conn = connection(Some(8));
        let reason = handle_connection(stream, &mut conn, "WELCOME").await.unwrap();
        assert_eq!(reason, CloseReason::Overflow);
        assert_eq!(conn.state(), ConnState::Closed(CloseReason::Overflow));
    }

    #[tokio::test]
    async fn test_transport_error() {
        let stream = Builder::new()
            .write(b"WELCOME\r\n")
            .read(b"PI")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let mut conn = connection(None);
        let err = handle_connection(stream, &mut conn, "WELCOME").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(conn.state(), ConnState::Closed(CloseReason::Error));
        assert_eq!(conn.buffered(), 0);
    }
}
