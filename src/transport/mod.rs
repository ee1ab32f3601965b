//! # Transport Layer
//!
//! A [`Transport`] produces a connected byte stream; a [`Channel`] frames
//! that stream and owns its lifecycle. The session layer only ever talks to
//! a `Channel`, so any stream that implements `AsyncRead + AsyncWrite` can
//! carry a session.
//!
//! ## Adapters
//! - [`StreamTransport`]: wraps an already connected stream (pipes, accepted sockets)
//! - [`memory_pair`]: two connected in-memory transports, handy for tests
//! - [`UnixTransport`] (Unix only) and [`TcpTransport`]: connect on `open()`

pub mod channel;
pub mod local;
pub mod stream;

use crate::error::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub use channel::{Channel, ChannelEvent, ChannelState};
#[cfg(unix)]
pub use local::UnixTransport;
pub use local::TcpTransport;
pub use stream::{memory_pair, StreamTransport};

/// A bidirectional byte stream a channel can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ByteStream for T {}

/// Source of a connected byte stream.
#[async_trait]
pub trait Transport: Send {
    /// Connect (or hand over) the underlying stream.
    async fn open(&mut self) -> Result<Box<dyn ByteStream>>;

    /// Human readable peer description for logs.
    fn describe(&self) -> String {
        String::from("stream")
    }
}
