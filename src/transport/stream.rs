use crate::error::{ProtocolError, Result};
use crate::transport::{ByteStream, Transport};
use async_trait::async_trait;

/// Hands an already connected stream to a channel, exactly once.
pub struct StreamTransport {
    stream: Option<Box<dyn ByteStream>>,
    label: String,
}

impl StreamTransport {
    pub fn new<S: ByteStream>(stream: S) -> Self {
        Self::labelled(stream, "stream")
    }

    pub fn labelled<S: ByteStream>(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream: Some(Box::new(stream)),
            label: label.into(),
        }
    }

    /// Whether the stream has already been handed out.
    pub fn is_consumed(&self) -> bool {
        self.stream.is_none()
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn open(&mut self) -> Result<Box<dyn ByteStream>> {
        self.stream
            .take()
            .ok_or(ProtocolError::InvalidState("stream transport already opened"))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Two transports connected to each other through an in-memory pipe.
///
/// `capacity` is the number of bytes each direction buffers before writes
/// wait for the reader.
pub fn memory_pair(capacity: usize) -> (StreamTransport, StreamTransport) {
    let (a, b) = tokio::io::duplex(capacity);
    (
        StreamTransport::labelled(a, "memory-a"),
        StreamTransport::labelled(b, "memory-b"),
    )
}
