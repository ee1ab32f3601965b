//! Socket transports that connect when the channel opens.
//!
//! The accepting side binds a listener, accepts a stream and wraps it in a
//! [`StreamTransport`](crate::transport::StreamTransport).

use crate::error::Result;
use crate::transport::{ByteStream, StreamTransport, Transport};
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, instrument};

#[cfg(unix)]
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Connects to a Unix domain socket on `open()`.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixTransport {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixTransport {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Bind a listener at `path`, removing a stale socket file first.
    #[instrument(skip(path), fields(socket_path = %path.as_ref().display()))]
    pub async fn listen<P: AsRef<Path>>(path: P) -> Result<UnixListener> {
        if path.as_ref().exists() {
            tokio::fs::remove_file(&path).await.ok();
        }
        let listener = UnixListener::bind(&path)?;
        debug!("Listening on unix socket");
        Ok(listener)
    }

    /// Accept one connection as a transport for the accepting endpoint.
    pub async fn accept(listener: &UnixListener) -> Result<StreamTransport> {
        let (stream, _) = listener.accept().await?;
        Ok(StreamTransport::labelled(stream, "unix-accepted"))
    }
}

#[cfg(unix)]
#[async_trait]
impl Transport for UnixTransport {
    #[instrument(skip(self), fields(socket_path = %self.path.display()))]
    async fn open(&mut self) -> Result<Box<dyn ByteStream>> {
        let stream = UnixStream::connect(&self.path).await?;
        debug!("Connected to unix socket");
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Connects to a TCP address on `open()`.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Accept one connection as a transport for the accepting endpoint.
    pub async fn accept(listener: &TcpListener) -> Result<StreamTransport> {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(StreamTransport::labelled(stream, format!("tcp:{peer}")))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    #[instrument(skip(self), fields(address = %self.address))]
    async fn open(&mut self) -> Result<Box<dyn ByteStream>> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        debug!("Connected over tcp");
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.address)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tcp_transport_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move { TcpTransport::accept(&listener).await });
        let mut client = TcpTransport::new(address).open().await.unwrap();
        let mut server = accept.await.unwrap().unwrap().open().await.unwrap();

        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_transport_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = UnixTransport::listen(&path).await.unwrap();
        let mut transport = UnixTransport::new(&path);
        let accept = tokio::spawn(async move { UnixTransport::accept(&listener).await });

        let mut client = transport.open().await.unwrap();
        let mut server = accept.await.unwrap().unwrap().open().await.unwrap();
        server.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        assert!(transport.describe().starts_with("unix:"));
    }
}
