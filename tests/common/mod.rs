//! Shared fixture: a three-way handshake plus a small ping/pong protocol.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde::{Deserialize, Serialize};
use session_protocol::config::{ChannelConfig, SessionConfig};
use session_protocol::core::serialization::SerializationFormat;
use session_protocol::error::{ProtocolError, Result};
use session_protocol::protocol::envelope::{decode_frame, InboundFrame, MessageEnvelope};
use session_protocol::protocol::handshake::{Endpoint, HandshakeEngine, HandshakeOutcome};
use session_protocol::protocol::Protocol;
use session_protocol::service::{Orchestrator, SessionEvent};
use session_protocol::transport::{memory_pair, Channel};
use session_protocol::utils::logging::init_for_tests;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub client: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    pub nonce: u64,
    pub session: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ready {
    pub session: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u64,
}

/// One-way command counted by the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note(pub String);

/// Request whose handler always returns an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fail;

/// Request whose handler panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boom(pub u64);

/// Request answered after `delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slow {
    pub seq: u64,
    pub delay_ms: u64,
}

/// Registered on the wire but bound to no handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orphan;

/// Command whose handler can be told to fail or to panic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chore {
    pub fail: bool,
    pub panic: bool,
}

/// Echo request. The initiator's response handler fails on
/// [`ECHO_REFUSED`] and panics on [`ECHO_EXPLODES`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Echo(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echoed(pub u64);

pub const ECHO_REFUSED: u64 = 1;
pub const ECHO_EXPLODES: u64 = 2;

/// Request answered with a blob of the asked-for size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bulky(pub usize);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob(pub Vec<u8>);

/// How the fixture's acceptor and initiator judge the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Admit,
    /// `receive` answers `Rejected`.
    Reject,
    /// `receive` echoes the wrong nonce, so `verify` answers `Invalid`.
    Garble,
    /// `acknowledge` refuses the verack.
    Unacknowledged,
}

#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub notes: Arc<AtomicUsize>,
    pub pongs_handled: Arc<AtomicUsize>,
    pub chores: Arc<AtomicUsize>,
    pub echoes_handled: Arc<AtomicUsize>,
}

impl Counters {
    pub fn notes(&self) -> usize {
        self.notes.load(Ordering::SeqCst)
    }

    pub fn pongs_handled(&self) -> usize {
        self.pongs_handled.load(Ordering::SeqCst)
    }

    pub fn chores(&self) -> usize {
        self.chores.load(Ordering::SeqCst)
    }

    pub fn echoes_handled(&self) -> usize {
        self.echoes_handled.load(Ordering::SeqCst)
    }
}

fn explode(code: u64) -> u64 {
    panic!("handler exploded with code {code}")
}

/// Build the fixture protocol. When `admit` is false the acceptor rejects
/// every handshake.
pub fn protocol(counters: &Counters, admit: bool) -> Arc<Protocol> {
    gated_protocol(counters, if admit { Gate::Admit } else { Gate::Reject })
}

pub fn gated_protocol(counters: &Counters, gate: Gate) -> Arc<Protocol> {
    let notes = counters.notes.clone();
    let pongs = counters.pongs_handled.clone();
    let chores = counters.chores.clone();
    let echoes = counters.echoes_handled.clone();

    let protocol = Protocol::builder()
        .message::<Hello>(1, SerializationFormat::Bincode)
        .message::<Welcome>(2, SerializationFormat::Bincode)
        .message::<Ready>(3, SerializationFormat::Bincode)
        .message::<Ping>(10, SerializationFormat::Bincode)
        .message::<Pong>(11, SerializationFormat::MessagePack)
        .message::<Note>(12, SerializationFormat::Json)
        .message::<Fail>(13, SerializationFormat::Bincode)
        .message::<Boom>(14, SerializationFormat::Bincode)
        .message::<Slow>(15, SerializationFormat::Bincode)
        .message::<Orphan>(16, SerializationFormat::Bincode)
        .message::<Chore>(17, SerializationFormat::Json)
        .message::<Echo>(18, SerializationFormat::Bincode)
        .message::<Echoed>(19, SerializationFormat::Bincode)
        .message::<Bulky>(20, SerializationFormat::Bincode)
        .message::<Blob>(21, SerializationFormat::Bincode)
        .handshake()
        .initiated_by(Endpoint::Client)
        .three_way::<Hello, Welcome, Ready>()
        .generate(|| Hello {
            client: String::from("fixture"),
            nonce: 42,
        })
        .receive(move |hello| {
            let outcome = if gate == Gate::Reject {
                HandshakeOutcome::Rejected
            } else {
                HandshakeOutcome::Accepted
            };
            let nonce = if gate == Gate::Garble {
                hello.nonce.wrapping_add(1)
            } else {
                hello.nonce
            };
            (
                Welcome {
                    nonce,
                    session: 7,
                },
                outcome,
            )
        })
        .verify(|hello, welcome| {
            let outcome = if hello.nonce == welcome.nonce {
                HandshakeOutcome::Accepted
            } else {
                HandshakeOutcome::Invalid
            };
            (
                Ready {
                    session: welcome.session,
                },
                outcome,
            )
        })
        .acknowledge(move |_, welcome, ready| {
            gate != Gate::Unacknowledged && welcome.session == ready.session
        })
        .finish()
        .for_request::<Ping>()
        .respond_with(|ping: Ping| async move { Ok(Pong { seq: ping.seq }) })
        .for_request::<Slow>()
        .respond_with(|slow: Slow| async move {
            tokio::time::sleep(Duration::from_millis(slow.delay_ms)).await;
            Ok(Pong { seq: slow.seq })
        })
        .for_request::<Fail>()
        .respond_with(|_: Fail| async { Err::<Pong, _>(ProtocolError::Custom("refused".into())) })
        .for_request::<Boom>()
        .respond_with(|boom: Boom| async move { Ok(Pong { seq: explode(boom.0) }) })
        .for_request::<Echo>()
        .respond_with(|echo: Echo| async move { Ok(Echoed(echo.0)) })
        .for_request::<Bulky>()
        .respond_with(|bulky: Bulky| async move { Ok(Blob(vec![0x5A; bulky.0])) })
        .for_response::<Echoed>()
        .to_request::<Echo>()
        .handle_with(move |echoed: &Echoed| {
            echoes.fetch_add(1, Ordering::SeqCst);
            match echoed.0 {
                ECHO_REFUSED => Err(ProtocolError::Custom("echo refused".into())),
                ECHO_EXPLODES => {
                    explode(echoed.0);
                    Ok(())
                }
                _ => Ok(()),
            }
        })
        .for_response::<Pong>()
        .to_request::<Ping>()
        .handle_with(move |_| {
            pongs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .for_command::<Chore>()
        .execute(move |chore: Chore| {
            let chores = chores.clone();
            async move {
                chores.fetch_add(1, Ordering::SeqCst);
                if chore.panic {
                    explode(0);
                }
                if chore.fail {
                    return Err(ProtocolError::Custom("chore refused".into()));
                }
                Ok(())
            }
        })
        .for_command::<Note>()
        .execute(move |_: Note| {
            let notes = notes.clone();
            async move {
                notes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .expect("fixture protocol is valid");

    Arc::new(protocol)
}

pub fn session_config(request_timeout: Duration) -> SessionConfig {
    SessionConfig {
        handshake_timeout: Duration::from_secs(2),
        request_timeout,
        ..SessionConfig::default()
    }
}

/// Two sessions over an in-memory pipe, not yet started.
pub async fn pair(
    protocol: Arc<Protocol>,
    config: SessionConfig,
) -> (Orchestrator, Orchestrator) {
    init_for_tests();
    let (mut a, mut b) = memory_pair(64 * 1024);
    let client_channel = Channel::new(ChannelConfig::default());
    let server_channel = Channel::new(ChannelConfig::default());
    client_channel.open(&mut a).await.unwrap();
    server_channel.open(&mut b).await.unwrap();

    let client = Orchestrator::new(
        protocol.clone(),
        client_channel,
        Endpoint::Client,
        config.clone(),
    );
    let server = Orchestrator::new(protocol, server_channel, Endpoint::Server, config);
    (client, server)
}

/// Two sessions with the handshake already completed.
pub async fn ready_pair(
    protocol: Arc<Protocol>,
    config: SessionConfig,
) -> (Orchestrator, Orchestrator) {
    let (client, server) = pair(protocol, config).await;
    let (c, s) = tokio::join!(client.start(), server.start());
    c.expect("client handshake");
    s.expect("server handshake");
    (client, server)
}

/// A ready server session whose peer is a bare channel driven by the test.
pub async fn raw_client(
    protocol: Arc<Protocol>,
    server_channel: ChannelConfig,
) -> (Channel, Orchestrator) {
    init_for_tests();
    let (mut a, mut b) = memory_pair(64 * 1024);
    let raw = Channel::new(ChannelConfig::default());
    raw.open(&mut a).await.unwrap();
    let channel = Channel::new(server_channel);
    channel.open(&mut b).await.unwrap();

    let server = Orchestrator::new(
        protocol.clone(),
        channel,
        Endpoint::Server,
        session_config(Duration::from_secs(2)),
    );
    let mut engine = HandshakeEngine::new(protocol.handshake(), protocol.registry(), Endpoint::Client);
    let (c, s) = tokio::join!(engine.run(&raw, Duration::from_secs(2)), server.start());
    c.expect("raw client handshake");
    s.expect("server handshake");
    (raw, server)
}

/// Read the next application envelope off a bare channel.
pub async fn next_envelope(protocol: &Protocol, channel: &Channel) -> Result<MessageEnvelope> {
    let payload = tokio::time::timeout(WAIT, channel.receive_bytes())
        .await
        .map_err(|_| ProtocolError::Timeout)??
        .ok_or(ProtocolError::ConnectionClosed)?;
    match decode_frame(protocol.registry(), &payload)? {
        InboundFrame::Application(envelope) => Ok(envelope),
        InboundFrame::Handshake(_) => Err(ProtocolError::InvalidState("unexpected handshake frame")),
    }
}

/// Wait for the first event matching `pred`.
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

/// Poll `check` until it holds or the wait expires.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition did not hold in time");
}
