//! Handshake contract and the engine that runs it over a channel.
//!
//! The application supplies the handshake messages and the callbacks that
//! judge them; the engine only moves frames and enforces ordering.
//!
//! ```text
//! Initiator                              Acceptor
//!   | generate() -> H                       |
//!   |----------- H (Accepted) ------------->| receive(H) -> (A, outcome)
//!   |<---------- A (outcome) ---------------|
//!   | verify(H, A) -> (V, outcome)          |
//!   |----------- V (outcome) -------------->| acknowledge(H, A, V) -> bool
//!                 (three-way only)
//! ```
//!
//! In a two-way handshake the initiator completes after `verify` and sends
//! nothing back. Any outcome other than `Accepted`, whether computed locally
//! or carried by a peer frame, aborts with `HandshakeFailed`. A locally
//! computed verdict is still delivered to the peer before aborting.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::envelope::{decode_frame, encode_handshake, InboundFrame};
use crate::protocol::message::{Message, MessageType};
use crate::protocol::registry::MessageRegistry;
use crate::transport::channel::Channel;
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::with_timeout_or;
use std::any::TypeId;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// The two ends of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeArity {
    TwoWay,
    ThreeWay,
}

/// Which side of the exchange the local endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Initiator,
    Acceptor,
}

/// Verdict attached to every handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accepted,
    Rejected,
    Invalid,
}

impl HandshakeOutcome {
    pub fn as_byte(self) -> u8 {
        match self {
            HandshakeOutcome::Accepted => 0x00,
            HandshakeOutcome::Rejected => 0x01,
            HandshakeOutcome::Invalid => 0x02,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(HandshakeOutcome::Accepted),
            0x01 => Some(HandshakeOutcome::Rejected),
            0x02 => Some(HandshakeOutcome::Invalid),
            _ => None,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == HandshakeOutcome::Accepted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Initiating,
    AwaitingHandshake,
    Verifying,
    Acknowledging,
    Completed,
    Rejected,
    Failed,
}

type GenerateFn = dyn Fn() -> Message + Send + Sync + 'static;
type ReceiveFn = dyn Fn(&Message) -> Result<(Message, HandshakeOutcome)> + Send + Sync + 'static;
type VerifyFn =
    dyn Fn(&Message, &Message) -> Result<(Option<Message>, HandshakeOutcome)> + Send + Sync + 'static;
type AcknowledgeFn = dyn Fn(&Message, &Message, &Message) -> Result<bool> + Send + Sync + 'static;

/// A handshake message type and the step it plays.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeMessageRef {
    pub role: &'static str,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl HandshakeMessageRef {
    fn of<T: MessageType>(role: &'static str) -> Self {
        Self {
            role,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

fn unwrap_ref<'m, T: MessageType>(message: &'m Message) -> Result<&'m T> {
    message.downcast_ref::<T>().ok_or_else(|| {
        ProtocolError::HandshakeViolation(format!(
            "{}: expected `{}`, got `{}`",
            constants::ERR_UNEXPECTED_HANDSHAKE_TYPE,
            std::any::type_name::<T>(),
            message.type_name()
        ))
    })
}

/// The application's handshake definition, type-erased.
pub struct HandshakeContract {
    arity: HandshakeArity,
    initiator: Endpoint,
    handshake: HandshakeMessageRef,
    ack: HandshakeMessageRef,
    verack: Option<HandshakeMessageRef>,
    generate: Box<GenerateFn>,
    receive: Box<ReceiveFn>,
    verify: Box<VerifyFn>,
    acknowledge: Option<Box<AcknowledgeFn>>,
}

impl HandshakeContract {
    /// Handshake, then Ack; the initiator validates the Ack and completes.
    pub fn two_way<H, A>(
        initiator: Endpoint,
        generate: impl Fn() -> H + Send + Sync + 'static,
        receive: impl Fn(&H) -> (A, HandshakeOutcome) + Send + Sync + 'static,
        verify: impl Fn(&H, &A) -> HandshakeOutcome + Send + Sync + 'static,
    ) -> Self
    where
        H: MessageType,
        A: MessageType,
    {
        Self {
            arity: HandshakeArity::TwoWay,
            initiator,
            handshake: HandshakeMessageRef::of::<H>("handshake"),
            ack: HandshakeMessageRef::of::<A>("ack"),
            verack: None,
            generate: Box::new(move || Message::new(generate())),
            receive: Box::new(move |h: &Message| -> Result<(Message, HandshakeOutcome)> {
                let (ack, outcome) = receive(unwrap_ref::<H>(h)?);
                Ok((Message::new(ack), outcome))
            }),
            verify: Box::new(move |h: &Message, a: &Message| -> Result<(Option<Message>, HandshakeOutcome)> {
                let outcome = verify(unwrap_ref::<H>(h)?, unwrap_ref::<A>(a)?);
                Ok((None, outcome))
            }),
            acknowledge: None,
        }
    }

    /// Handshake, Ack, then Verack; the acceptor finalizes with `acknowledge`.
    pub fn three_way<H, A, V>(
        initiator: Endpoint,
        generate: impl Fn() -> H + Send + Sync + 'static,
        receive: impl Fn(&H) -> (A, HandshakeOutcome) + Send + Sync + 'static,
        verify: impl Fn(&H, &A) -> (V, HandshakeOutcome) + Send + Sync + 'static,
        acknowledge: impl Fn(&H, &A, &V) -> bool + Send + Sync + 'static,
    ) -> Self
    where
        H: MessageType,
        A: MessageType,
        V: MessageType,
    {
        Self {
            arity: HandshakeArity::ThreeWay,
            initiator,
            handshake: HandshakeMessageRef::of::<H>("handshake"),
            ack: HandshakeMessageRef::of::<A>("ack"),
            verack: Some(HandshakeMessageRef::of::<V>("verack")),
            generate: Box::new(move || Message::new(generate())),
            receive: Box::new(move |h: &Message| -> Result<(Message, HandshakeOutcome)> {
                let (ack, outcome) = receive(unwrap_ref::<H>(h)?);
                Ok((Message::new(ack), outcome))
            }),
            verify: Box::new(move |h: &Message, a: &Message| -> Result<(Option<Message>, HandshakeOutcome)> {
                let (verack, outcome) = verify(unwrap_ref::<H>(h)?, unwrap_ref::<A>(a)?);
                Ok((Some(Message::new(verack)), outcome))
            }),
            acknowledge: Some(Box::new(move |h: &Message, a: &Message, v: &Message| -> Result<bool> {
                Ok(acknowledge(
                    unwrap_ref::<H>(h)?,
                    unwrap_ref::<A>(a)?,
                    unwrap_ref::<V>(v)?,
                ))
            })),
        }
    }

    pub fn arity(&self) -> HandshakeArity {
        self.arity
    }

    pub fn initiator(&self) -> Endpoint {
        self.initiator
    }

    pub fn role_of(&self, local: Endpoint) -> HandshakeRole {
        if local == self.initiator {
            HandshakeRole::Initiator
        } else {
            HandshakeRole::Acceptor
        }
    }

    /// Every message type this handshake puts on the wire.
    pub fn message_types(&self) -> Vec<HandshakeMessageRef> {
        let mut types = vec![self.handshake, self.ack];
        types.extend(self.verack);
        types
    }
}

impl std::fmt::Debug for HandshakeContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeContract")
            .field("arity", &self.arity)
            .field("initiator", &self.initiator)
            .field("handshake", &self.handshake.type_name)
            .field("ack", &self.ack.type_name)
            .field("verack", &self.verack.map(|v| v.type_name))
            .finish_non_exhaustive()
    }
}

/// Drives one handshake exchange over an open channel.
pub struct HandshakeEngine<'a> {
    contract: &'a HandshakeContract,
    registry: &'a MessageRegistry,
    role: HandshakeRole,
    state: HandshakeState,
}

impl<'a> HandshakeEngine<'a> {
    pub fn new(
        contract: &'a HandshakeContract,
        registry: &'a MessageRegistry,
        local: Endpoint,
    ) -> Self {
        Self {
            contract,
            registry,
            role: contract.role_of(local),
            state: HandshakeState::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    /// Run the whole exchange, bounded by `timeout`.
    ///
    /// Leaves the engine in `Completed`, `Rejected` (a non-Accepted outcome)
    /// or `Failed` (timeout, violation, transport error). Closing the channel
    /// on failure is the caller's job.
    #[instrument(skip_all, fields(role = ?self.role, arity = ?self.contract.arity))]
    pub async fn run(&mut self, channel: &Channel, timeout: Duration) -> Result<()> {
        let _timer = Timer::start("handshake");
        global_metrics().handshake_attempt();

        let result = with_timeout_or(self.exchange(channel), timeout, || {
            ProtocolError::HandshakeTimedOut
        })
        .await;

        match &result {
            Ok(()) => {
                self.state = HandshakeState::Completed;
                global_metrics().handshake_success();
                debug!("Handshake completed");
            }
            Err(ProtocolError::HandshakeFailed { stage, outcome }) => {
                self.state = HandshakeState::Rejected;
                global_metrics().handshake_failed();
                warn!(?stage, ?outcome, "Handshake rejected");
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                global_metrics().handshake_failed();
                warn!(error = %e, "Handshake failed");
            }
        }
        result
    }

    async fn exchange(&mut self, channel: &Channel) -> Result<()> {
        match self.role {
            HandshakeRole::Initiator => self.initiate(channel).await,
            HandshakeRole::Acceptor => self.accept(channel).await,
        }
    }

    async fn initiate(&mut self, channel: &Channel) -> Result<()> {
        let contract = self.contract;
        self.transition(HandshakeState::Initiating);
        let handshake = (contract.generate)();
        self.send(channel, &handshake, HandshakeOutcome::Accepted)
            .await?;

        self.transition(HandshakeState::Verifying);
        let ack = self.expect(channel, contract.ack).await?;
        let (verack, outcome) = (contract.verify)(&handshake, &ack)?;

        if contract.arity == HandshakeArity::ThreeWay {
            self.transition(HandshakeState::Acknowledging);
            let verack = verack.ok_or_else(|| {
                ProtocolError::InvalidState("three-way verify produced no verack")
            })?;
            self.send(channel, &verack, outcome).await?;
        }
        self.check(outcome)
    }

    async fn accept(&mut self, channel: &Channel) -> Result<()> {
        let contract = self.contract;
        self.transition(HandshakeState::AwaitingHandshake);
        let handshake = self.expect(channel, contract.handshake).await?;

        self.transition(HandshakeState::Verifying);
        let (ack, outcome) = (contract.receive)(&handshake)?;
        self.send(channel, &ack, outcome).await?;
        self.check(outcome)?;

        if let (Some(expected), Some(acknowledge)) =
            (contract.verack, contract.acknowledge.as_ref())
        {
            self.transition(HandshakeState::Acknowledging);
            let verack = self.expect(channel, expected).await?;
            if !acknowledge(&handshake, &ack, &verack)? {
                return Err(ProtocolError::HandshakeFailed {
                    stage: self.state,
                    outcome: HandshakeOutcome::Rejected,
                });
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "Handshake state");
        self.state = next;
    }

    fn check(&self, outcome: HandshakeOutcome) -> Result<()> {
        if outcome.is_accepted() {
            Ok(())
        } else {
            Err(ProtocolError::HandshakeFailed {
                stage: self.state,
                outcome,
            })
        }
    }

    async fn send(
        &self,
        channel: &Channel,
        message: &Message,
        outcome: HandshakeOutcome,
    ) -> Result<()> {
        let payload = encode_handshake(self.registry, message, outcome)?;
        channel.send_bytes(payload).await
    }

    /// Receive the next frame and insist it is the expected handshake step.
    async fn expect(&self, channel: &Channel, expected: HandshakeMessageRef) -> Result<Message> {
        let payload = channel.receive_bytes().await?.ok_or_else(|| {
            ProtocolError::HandshakeViolation(constants::ERR_PEER_CLOSED_DURING_HANDSHAKE.into())
        })?;

        let frame = match decode_frame(self.registry, &payload)? {
            InboundFrame::Handshake(frame) => frame,
            InboundFrame::Application(envelope) => {
                return Err(ProtocolError::HandshakeViolation(format!(
                    "{}: {:?} `{}`",
                    constants::ERR_UNEXPECTED_DISPATCH,
                    envelope.dispatch,
                    envelope.message.type_name()
                )))
            }
        };

        if frame.message.type_id() != expected.type_id {
            return Err(ProtocolError::HandshakeViolation(format!(
                "{}: expected {} `{}`, got `{}`",
                constants::ERR_UNEXPECTED_HANDSHAKE_TYPE,
                expected.role,
                expected.type_name,
                frame.message.type_name()
            )));
        }
        self.check(frame.outcome)?;
        Ok(frame.message)
    }
}
