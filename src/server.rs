//! TCP server for the line protocol on the Tokio runtime.
//!
//! Accepts connections and spawns one task per connection. Every task owns
//! its `Connection` outright; nothing is shared between tasks except the
//! connection limit.

use crate::config::Config;
use crate::protocols::line::handle_connection;
use crate::runtime::{configure_stream, Connection};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Server instance
pub struct Server {
    config: Arc<Config>,
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal for the process.
    pub async fn bind(config: Config) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;

        Ok(Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
            listener,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            // Wait for a connection slot
            if self.connection_limit.available_permits() == 0 {
                warn!("Connection limit reached");
            }
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "Connection opened");

                    if let Err(e) = configure_stream(&stream, &self.config) {
                        warn!(%peer, error = %e, "Failed to set socket options");
                    }

                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        let mut conn = Connection::new(peer, config.frame_limit());
                        if let Err(e) = handle_connection(stream, &mut conn, &config.welcome).await {
                            warn!(%peer, error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_frame_size: 32,
            ..Config::default()
        }
    }

    async fn start(config: Config) -> SocketAddr {
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn read_exact_str(stream: &mut TcpStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let server = Server::bind(test_config()).await.unwrap();
        let taken = server.local_addr().unwrap();
        let config = Config {
            port: taken.port(),
            ..test_config()
        };
        assert!(Server::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_loopback_session() {
        let addr = start(test_config()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        assert_eq!(read_exact_str(&mut client, 9).await, "WELCOME\r\n");

        client.write_all(b"PING\r\nhello\r\n").await.unwrap();
        assert_eq!(read_exact_str(&mut client, 19).await, "PONG\r\nECHO: hello\r\n");

        client.write_all(b"par").await.unwrap();
        client.write_all(b"tial\r\n\r\n").await.unwrap();
        assert_eq!(read_exact_str(&mut client, 20).await, "ECHO: partial\r\nACK\r\n");
    }

    #[tokio::test]
    async fn test_connections_are_isolated() {
        let addr = start(test_config()).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        read_exact_str(&mut first, 9).await;
        read_exact_str(&mut second, 9).await;

        first.write_all(b"half").await.unwrap();
        second.write_all(b"other\r\n").await.unwrap();
        assert_eq!(read_exact_str(&mut second, 13).await, "ECHO: other\r\n");
        first.write_all(b"\r\n").await.unwrap();
        assert_eq!(read_exact_str(&mut first, 12).await, "ECHO: half\r\n");

        // overflow on one connection leaves the other serving
        first.write_all(&[b'x'; 64]).await.unwrap();
        assert_eq!(read_exact_str(&mut first, 21).await, "ERROR line too long\r\n");
        let mut rest = Vec::new();
        first.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        second.write_all(b" PiNg\r\n").await.unwrap();
        assert_eq!(read_exact_str(&mut second, 6).await, "PONG\r\n");
    }
}
