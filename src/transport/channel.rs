//! Framed, lifecycle-managed byte channel.
//!
//! ```text
//! Closed -> Opening -> Open -> Closing -> Closed
//! ```
//!
//! Sends are serialized by the writer lock so frames never interleave.
//! Receives hold the reader lock for the duration of one frame. `close()`
//! waits up to the configured grace period for an in-flight send or receive
//! and cancels it afterwards.

use crate::config::ChannelConfig;
use crate::core::codec::FrameCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::{ByteStream, Transport};
use crate::utils::metrics::global_metrics;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

type Reader = FramedRead<ReadHalf<Box<dyn ByteStream>>, FrameCodec>;
type Writer = FramedWrite<WriteHalf<Box<dyn ByteStream>>, FrameCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Lifecycle and traffic notifications published by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opening,
    Opened,
    Closing,
    Closed,
    /// Payload bytes of one frame written.
    BytesSent(usize),
    /// Payload bytes of one frame read.
    BytesReceived(usize),
}

struct Inner {
    config: ChannelConfig,
    state: watch::Sender<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,
    cancel: std::sync::Mutex<CancellationToken>,
    lifecycle: Mutex<()>,
}

/// A framed byte channel. Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Closed);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                events,
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                cancel: std::sync::Mutex::new(CancellationToken::new()),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn transition(&self, next: ChannelState, event: ChannelEvent) {
        let previous = self.inner.state.send_replace(next);
        debug!(from = ?previous, to = ?next, "Channel state");
        self.emit(event);
    }

    fn cancel_token(&self) -> Result<CancellationToken> {
        self.inner
            .cancel
            .lock()
            .map(|token| token.clone())
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Open the channel over the stream `transport` produces.
    ///
    /// Only a `Closed` channel can be opened. A failed connect leaves it `Closed`.
    #[instrument(skip_all, fields(peer = %transport.describe()))]
    pub async fn open<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state() != ChannelState::Closed {
            return Err(ProtocolError::InvalidState(
                constants::ERR_CHANNEL_NOT_CLOSED,
            ));
        }

        self.transition(ChannelState::Opening, ChannelEvent::Opening);
        let stream = match transport.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.transition(ChannelState::Closed, ChannelEvent::Closed);
                return Err(e);
            }
        };

        let codec = FrameCodec::new(
            self.inner.config.min_message_length,
            self.inner.config.max_message_length,
        );
        let (read, write) = tokio::io::split(stream);
        *self.inner.reader.lock().await = Some(FramedRead::new(read, codec));
        *self.inner.writer.lock().await = Some(FramedWrite::new(write, codec));
        {
            let mut cancel = self
                .inner
                .cancel
                .lock()
                .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
            *cancel = CancellationToken::new();
        }

        self.transition(ChannelState::Open, ChannelEvent::Opened);
        Ok(())
    }

    /// Write one frame carrying `payload`.
    ///
    /// A send still blocked on backpressure when `close()` gives up waiting
    /// is abandoned and fails with `InvalidState`.
    pub async fn send_bytes(&self, payload: Bytes) -> Result<()> {
        let token = self.cancel_token()?;
        let mut writer = self.inner.writer.lock().await;
        let framed = match writer.as_mut() {
            Some(framed) if self.is_open() => framed,
            _ => {
                return Err(ProtocolError::InvalidState(
                    constants::ERR_CHANNEL_NOT_OPEN,
                ))
            }
        };

        let length = payload.len();
        tokio::select! {
            _ = token.cancelled() => {
                return Err(ProtocolError::InvalidState(constants::ERR_SEND_ABORTED))
            }
            sent = framed.send(payload) => sent?,
        }
        drop(writer);

        trace!(bytes = length, "Frame sent");
        global_metrics().message_sent(length as u64);
        self.emit(ChannelEvent::BytesSent(length));
        Ok(())
    }

    /// Read the next frame payload.
    ///
    /// `None` means the peer finished the stream or the channel was closed
    /// locally. Framing violations surface as errors.
    pub async fn receive_bytes(&self) -> Result<Option<BytesMut>> {
        let token = self.cancel_token()?;
        let mut reader = self.inner.reader.lock().await;
        let framed = match reader.as_mut() {
            Some(framed) => framed,
            None => return Ok(None),
        };

        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(None),
            frame = framed.next() => frame,
        };
        drop(reader);

        match frame {
            Some(Ok(payload)) => {
                trace!(bytes = payload.len(), "Frame received");
                global_metrics().message_received(payload.len() as u64);
                self.emit(ChannelEvent::BytesReceived(payload.len()));
                Ok(Some(payload))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Shut the channel down. Closing a closed channel does nothing.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state() == ChannelState::Closed {
            return Ok(());
        }
        self.transition(ChannelState::Closing, ChannelEvent::Closing);

        let grace = self.inner.config.close_grace_period;
        let writer = match tokio::time::timeout(grace, self.inner.writer.lock()).await {
            Ok(mut writer) => writer.take(),
            Err(_) => {
                debug!(grace_ms = grace.as_millis(), "Cancelling in-flight send");
                self.cancel_token()?.cancel();
                self.inner.writer.lock().await.take()
            }
        };
        if let Some(mut writer) = writer {
            match tokio::time::timeout(grace, writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Write half shutdown failed"),
                Err(_) => debug!("Write half shutdown timed out; dropping unflushed frames"),
            }
        }

        let reader = match tokio::time::timeout(grace, self.inner.reader.lock()).await {
            Ok(mut reader) => reader.take(),
            Err(_) => {
                debug!(grace_ms = grace.as_millis(), "Cancelling in-flight receive");
                self.cancel_token()?.cancel();
                self.inner.reader.lock().await.take()
            }
        };
        drop(reader);

        self.transition(ChannelState::Closed, ChannelEvent::Closed);
        Ok(())
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
