//! Local endpoint
//!
//! The client end of the tunnel: either one accepted TCP connection, or the
//! process's stdin/stdout pair. Both are exposed as boxed halves so the
//! pumps never care which they got.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

pub type LocalReader = Box<dyn AsyncRead + Send + Unpin>;
pub type LocalWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How the local endpoint should be produced.
///
/// Resolution is deferred until after the tunnel is open on the bridge, so
/// a destination the bridge cannot reach fails fast without ever waiting
/// for a local connection.
pub enum LocalMode {
    /// Bind a loopback listener on this port and accept exactly one
    /// connection
    Listen(u16),
    /// Accept exactly one connection from an already-bound listener
    Listener(TcpListener),
    /// Use the process's stdin/stdout
    Stdio,
}

impl LocalMode {
    pub(crate) async fn into_endpoint(self) -> io::Result<LocalEndpoint> {
        match self {
            LocalMode::Listen(port) => {
                let listener = TcpListener::bind(("127.0.0.1", port)).await?;
                accept_one(listener).await
            }
            LocalMode::Listener(listener) => accept_one(listener).await,
            LocalMode::Stdio => Ok(LocalEndpoint::stdio()),
        }
    }
}

/// One local byte stream, split per direction.
pub struct LocalEndpoint {
    reader: LocalReader,
    writer: LocalWriter,
    peer: Option<SocketAddr>,
}

impl LocalEndpoint {
    /// Wrap stdin/stdout. Writes are flushed chunk by chunk in the pump, so
    /// no extra buffering sits between the tunnel and the terminal or pipe.
    pub fn stdio() -> Self {
        Self {
            reader: Box::new(tokio::io::stdin()),
            writer: Box::new(tokio::io::stdout()),
            peer: None,
        }
    }

    /// Wrap an accepted TCP stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        set_keepalive(&stream);
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: Some(peer),
        })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn into_split(self) -> (LocalReader, LocalWriter) {
        (self.reader, self.writer)
    }
}

/// Accept one connection and close the listener; later local connections
/// are not served.
async fn accept_one(listener: TcpListener) -> io::Result<LocalEndpoint> {
    info!(
        "waiting for one local connection on {}",
        listener.local_addr()?
    );
    let (stream, peer) = listener.accept().await?;
    info!("local connection from {}", peer);
    LocalEndpoint::from_stream(stream)
}

fn set_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_accepts_exactly_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let endpoint = tokio::spawn(LocalMode::Listener(listener).into_endpoint());

        let mut first = TcpStream::connect(addr).await.unwrap();
        let endpoint = endpoint.await.unwrap().unwrap();
        assert_eq!(endpoint.peer().unwrap(), first.local_addr().unwrap());

        // The listener is gone with the accept; nobody serves this port now.
        let (mut reader, mut writer) = endpoint.into_split();
        first.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        writer.write_all(b"pong").await.unwrap();
        writer.flush().await.unwrap();
        first.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
