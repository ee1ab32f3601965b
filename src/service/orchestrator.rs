//! Session orchestration: handshake, receive loop and outbound sends.
//!
//! ```text
//! Idle -> Handshaking -> Ready -> { Closed | Faulted }
//! ```
//!
//! One receive loop per session decodes frames and routes them. Inbound
//! commands and requests run on their own tasks, so a slow or failing
//! handler never stalls the loop. Framing, decoding and transport failures
//! fault the whole session; handler failures are reported and isolated.

use crate::config::{ProtocolConfig, SessionConfig};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::definition::Protocol;
use crate::protocol::dispatcher::HandlerFuture;
use crate::protocol::envelope::{
    decode_frame, encode_envelope, DispatchType, InboundFrame, MessageEnvelope, RequestId,
};
use crate::protocol::handshake::{Endpoint, HandshakeEngine};
use crate::protocol::message::{Message, MessageType};
use crate::service::pending::{PendingRequests, PendingResponse};
use crate::transport::{Channel, Transport};
use crate::utils::metrics::global_metrics;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Ready,
    Faulted,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Faulted | SessionState::Closed)
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed,
    Faulted(Arc<ProtocolError>),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed)
    }

    pub fn fault(&self) -> Option<&ProtocolError> {
        match self {
            SessionOutcome::Completed => None,
            SessionOutcome::Faulted(cause) => Some(cause),
        }
    }
}

/// Notifications published while a session runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    MessageReceived {
        dispatch: DispatchType,
        request_id: RequestId,
        type_name: &'static str,
    },
    MessageSent {
        dispatch: DispatchType,
        request_id: RequestId,
        type_name: &'static str,
    },
    /// A handler returned an error, panicked, was never bound, or its
    /// response could not be sent. `error` is `HandlerExecution`,
    /// `UnhandledMessage`, or the send failure.
    HandlerFailed {
        type_name: &'static str,
        request_id: Option<RequestId>,
        error: Arc<ProtocolError>,
    },
    /// A response arrived for a request that is no longer outstanding.
    StaleResponse { request_id: RequestId },
}

/// What [`Orchestrator::send_message`] handed back.
#[derive(Debug)]
pub enum SendReceipt {
    /// A command was written; nothing further will arrive.
    Queued,
    /// A request was written; its response resolves this handle.
    Pending(PendingResponse),
}

struct Inner {
    protocol: Arc<Protocol>,
    channel: Channel,
    endpoint: Endpoint,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    outcome: watch::Sender<Option<SessionOutcome>>,
    events: broadcast::Sender<SessionEvent>,
    pending: Arc<PendingRequests>,
    next_request_id: AtomicU64,
    started: AtomicBool,
    receive_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Drives one session over one channel. Cloning yields another handle to
/// the same session.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create a session over an already open `channel`. Nothing happens on
    /// the wire until [`start`](Self::start).
    pub fn new(
        protocol: Arc<Protocol>,
        channel: Channel,
        endpoint: Endpoint,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (outcome, _) = watch::channel(None);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                protocol,
                channel,
                endpoint,
                config,
                state,
                outcome,
                events,
                pending: Arc::new(PendingRequests::new()),
                next_request_id: AtomicU64::new(1),
                started: AtomicBool::new(false),
                receive_loop: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Open a fresh channel over `transport` and wrap it in a session.
    pub async fn open<T: Transport + ?Sized>(
        protocol: Arc<Protocol>,
        transport: &mut T,
        endpoint: Endpoint,
        config: &ProtocolConfig,
    ) -> Result<Self> {
        let channel = Channel::new(config.channel.clone());
        channel.open(transport).await?;
        Ok(Self::new(protocol, channel, endpoint, config.session.clone()))
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.inner.protocol
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// The terminal outcome, once there is one.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.inner.outcome.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Session events as a stream. Events missed by a lagging consumer are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|event| event.ok())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.inner.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Session state");
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            _ => Err(ProtocolError::NotReady),
        }
    }

    /// Run the handshake and, on success, start the receive loop.
    ///
    /// On failure the channel is closed, the session ends `Faulted` and the
    /// cause is returned.
    #[instrument(skip(self), fields(endpoint = ?self.inner.endpoint))]
    pub async fn start(&self) -> Result<()> {
        if !self.inner.channel.is_open() {
            return Err(ProtocolError::InvalidState(constants::ERR_CHANNEL_NOT_OPEN));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::InvalidState(
                constants::ERR_SESSION_ALREADY_STARTED,
            ));
        }

        global_metrics().session_started();
        self.set_state(SessionState::Handshaking);

        let protocol = self.inner.protocol.clone();
        let mut engine = HandshakeEngine::new(
            protocol.handshake(),
            protocol.registry(),
            self.inner.endpoint,
        );
        if let Err(e) = engine
            .run(&self.inner.channel, self.inner.config.handshake_timeout)
            .await
        {
            let reported = e.detached();
            self.fault(e).await;
            return Err(reported);
        }

        self.set_state(SessionState::Ready);
        info!(role = ?engine.role(), "Session ready");

        let session = self.clone();
        let handle = tokio::spawn(async move { session.receive_loop().await });
        if let Ok(mut slot) = self.inner.receive_loop.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    async fn receive_loop(self) {
        loop {
            let payload = match self.inner.channel.receive_bytes().await {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => return self.fault(e).await,
            };

            let routed = match decode_frame(self.inner.protocol.registry(), &payload) {
                Ok(InboundFrame::Application(envelope)) => self.route(envelope),
                Ok(InboundFrame::Handshake(frame)) => Err(ProtocolError::HandshakeViolation(
                    format!(
                        "{}: `{}`",
                        constants::ERR_HANDSHAKE_AFTER_READY,
                        frame.message.type_name()
                    ),
                )),
                Err(e) => Err(e),
            };
            if let Err(e) = routed {
                return self.fault(e).await;
            }
        }

        debug!("Peer finished the stream");
        if let Err(e) = self.inner.channel.close().await {
            debug!(error = %e, "Channel close after end of stream failed");
        }
        self.finish(SessionOutcome::Completed);
    }

    /// Hand one inbound envelope to its handler. Only protocol violations
    /// come back as errors.
    fn route(&self, envelope: MessageEnvelope) -> Result<()> {
        let MessageEnvelope {
            dispatch,
            request_id,
            message,
        } = envelope;
        let type_name = message.type_name();
        debug!(?dispatch, request_id, message_type = type_name, "Message received");
        self.emit(SessionEvent::MessageReceived {
            dispatch,
            request_id,
            type_name,
        });

        let dispatcher = self.inner.protocol.dispatcher();
        match dispatch {
            DispatchType::Command => match dispatcher.dispatch_command(message) {
                Ok(handler) => {
                    let session = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = guarded(type_name, handler).await {
                            session.report_failure(type_name, None, e);
                        }
                    });
                }
                Err(e) => self.report_failure(type_name, None, e),
            },
            DispatchType::Request => match dispatcher.dispatch_request(message) {
                Ok(handler) => {
                    let session = self.clone();
                    tokio::spawn(async move {
                        match guarded(type_name, handler).await {
                            Ok(response) => {
                                let envelope = MessageEnvelope::response(request_id, response);
                                if let Err(e) = session.send_envelope(envelope).await {
                                    session.report_failure(type_name, Some(request_id), e);
                                }
                            }
                            Err(e) => session.report_failure(type_name, Some(request_id), e),
                        }
                    });
                }
                Err(e) => self.report_failure(type_name, Some(request_id), e),
            },
            DispatchType::Response => self.resolve_response(request_id, message),
            DispatchType::Handshake => {
                return Err(ProtocolError::HandshakeViolation(
                    constants::ERR_HANDSHAKE_AFTER_READY.into(),
                ))
            }
        }
        Ok(())
    }

    fn resolve_response(&self, request_id: RequestId, message: Message) {
        let slot = match self.inner.pending.take(request_id) {
            Some(slot) => slot,
            None => {
                warn!(request_id, "Discarding response without a pending request");
                global_metrics().stale_response();
                self.emit(SessionEvent::StaleResponse { request_id });
                return;
            }
        };

        let dispatcher = self.inner.protocol.dispatcher();
        let type_name = message.type_name();
        let handled = std::panic::catch_unwind(AssertUnwindSafe(|| {
            dispatcher.handle_response(slot.request_type(), &message)
        }));
        let failure = match handled {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_reason(panic.as_ref())),
        };
        if let Some(reason) = failure {
            self.report_failure(
                type_name,
                Some(request_id),
                ProtocolError::HandlerExecution { type_name, reason },
            );
        }

        slot.complete(Ok(MessageEnvelope::response(request_id, message)));
    }

    fn report_failure(
        &self,
        type_name: &'static str,
        request_id: Option<RequestId>,
        error: ProtocolError,
    ) {
        warn!(message_type = type_name, ?request_id, %error, "Handler failed");
        global_metrics().handler_failed();
        self.emit(SessionEvent::HandlerFailed {
            type_name,
            request_id,
            error: Arc::new(error),
        });
    }

    /// Refuse a payload the channel's codec would reject, before anything
    /// reaches the stream.
    fn check_outbound_length(&self, type_name: &'static str, length: usize) -> Result<()> {
        let config = self.inner.channel.config();
        if length < config.min_message_length || length > config.max_message_length {
            return Err(ProtocolError::SerializeError(format!(
                "encoded `{type_name}` is {length} bytes, outside the frame bounds {}..={}",
                config.min_message_length, config.max_message_length
            )));
        }
        Ok(())
    }

    async fn send_envelope(&self, envelope: MessageEnvelope) -> Result<()> {
        let payload = encode_envelope(self.inner.protocol.registry(), &envelope)?;
        self.check_outbound_length(envelope.message.type_name(), payload.len())?;
        if let Err(e) = self.inner.channel.send_bytes(payload).await {
            if e.is_fatal() {
                let reported = e.detached();
                self.fault(e).await;
                return Err(reported);
            }
            return Err(e);
        }

        let type_name = envelope.message.type_name();
        debug!(dispatch = ?envelope.dispatch, request_id = envelope.request_id, message_type = type_name, "Message sent");
        self.emit(SessionEvent::MessageSent {
            dispatch: envelope.dispatch,
            request_id: envelope.request_id,
            type_name,
        });
        Ok(())
    }

    fn allocate_request_id(&self) -> RequestId {
        loop {
            let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    async fn send_request_message(&self, message: Message) -> Result<PendingResponse> {
        self.ensure_ready()?;
        let request_id = self.allocate_request_id();
        let handle =
            self.inner
                .pending
                .register(request_id, message.type_id())?;

        let pending = self.inner.pending.clone();
        let timeout = self.inner.config.request_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if pending.expire(request_id) {
                warn!(request_id, timeout_ms = timeout.as_millis(), "Request timed out");
                global_metrics().request_timed_out();
            }
        });
        self.inner.pending.arm_timer(request_id, timer.abort_handle());
        global_metrics().request_issued();

        // Closed between the readiness check and registration.
        if self.state().is_terminal() {
            if let Some(slot) = self.inner.pending.take(request_id) {
                slot.complete(Err(ProtocolError::Cancelled(request_id)));
            }
            return Err(ProtocolError::NotReady);
        }

        if let Err(e) = self
            .send_envelope(MessageEnvelope::request(request_id, message))
            .await
        {
            if let Some(slot) = self.inner.pending.take(request_id) {
                slot.complete(Err(ProtocolError::Cancelled(request_id)));
            }
            return Err(e);
        }
        Ok(handle)
    }

    /// Send `value` as a request. Returns as soon as it is written; the
    /// handle resolves when the response arrives.
    pub async fn send_request<T: MessageType>(&self, value: T) -> Result<PendingResponse> {
        self.send_request_message(Message::new(value)).await
    }

    /// Send a request and wait for its response as an `R`.
    pub async fn request<T: MessageType, R: MessageType>(&self, value: T) -> Result<R> {
        self.send_request(value).await?.await?.into_inner::<R>()
    }

    /// Send `value` as a one-way command.
    pub async fn send_command<T: MessageType>(&self, value: T) -> Result<()> {
        self.ensure_ready()?;
        self.send_envelope(MessageEnvelope::command(value)).await
    }

    /// Send an already erased message with an explicit dispatch type.
    ///
    /// Responses are produced by request handlers and handshake frames by the
    /// handshake engine; neither can be sent here.
    pub async fn send_message(&self, dispatch: DispatchType, message: Message) -> Result<SendReceipt> {
        match dispatch {
            DispatchType::Command => {
                self.ensure_ready()?;
                self.send_envelope(MessageEnvelope {
                    dispatch,
                    request_id: 0,
                    message,
                })
                .await?;
                Ok(SendReceipt::Queued)
            }
            DispatchType::Request => self
                .send_request_message(message)
                .await
                .map(SendReceipt::Pending),
            DispatchType::Response => Err(ProtocolError::InvalidState(
                constants::ERR_RESPONSE_NOT_SENDABLE,
            )),
            DispatchType::Handshake => Err(ProtocolError::InvalidState(
                constants::ERR_HANDSHAKE_NOT_SENDABLE,
            )),
        }
    }

    /// Close the channel and stop the receive loop. Outstanding requests fail
    /// with `Cancelled`. The outcome is `Completed` unless the session had
    /// already faulted.
    #[instrument(skip(self), fields(endpoint = ?self.inner.endpoint))]
    pub async fn close(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Ok(());
        }

        let closed = self.inner.channel.close().await;
        let receive_loop = self
            .inner
            .receive_loop
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = receive_loop {
            if let Err(e) = handle.await {
                debug!(error = %e, "Receive loop ended abnormally");
            }
        }

        self.finish(SessionOutcome::Completed);
        closed
    }

    /// Wait for the session's terminal outcome.
    pub async fn run_to_end(&self) -> SessionOutcome {
        let mut outcome = self.inner.outcome.subscribe();
        loop {
            let current = outcome.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if outcome.changed().await.is_err() {
                return SessionOutcome::Completed;
            }
        }
    }

    async fn fault(&self, cause: ProtocolError) {
        error!(error = %cause, "Session faulted");
        global_metrics().protocol_error();
        let won = self.finish(SessionOutcome::Faulted(Arc::new(cause)));
        if won {
            if let Err(e) = self.inner.channel.close().await {
                debug!(error = %e, "Channel close after fault failed");
            }
        }
    }

    /// Record the terminal outcome. Only the first caller wins.
    fn finish(&self, outcome: SessionOutcome) -> bool {
        let faulted = !outcome.is_completed();
        let won = self.inner.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
        if !won {
            return false;
        }

        self.set_state(if faulted {
            SessionState::Faulted
        } else {
            SessionState::Closed
        });
        let cancelled = self.inner.pending.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled outstanding requests");
        }
        if self.inner.started.load(Ordering::SeqCst) {
            global_metrics().session_ended(faulted);
        }
        info!(faulted, "Session ended");
        true
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

/// Run a handler future, turning errors and panics into `HandlerExecution`.
async fn guarded<T>(type_name: &'static str, handler: HandlerFuture<T>) -> Result<T> {
    let reason = match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => e.to_string(),
        Err(panic) => panic_reason(panic.as_ref()),
    };
    Err(ProtocolError::HandlerExecution { type_name, reason })
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        String::from("handler panicked")
    }
}
