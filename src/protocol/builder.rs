//! Fluent construction of a [`Protocol`].
//!
//! Every stage consumes the builder and hands it back once its declaration
//! is complete, so a half-finished declaration can't be built:
//!
//! ```rust
//! use session_protocol::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Hello(u32);
//! #[derive(Serialize, Deserialize)]
//! struct Welcome(u32);
//! #[derive(Serialize, Deserialize)]
//! struct Ping(u64);
//! #[derive(Serialize, Deserialize)]
//! struct Pong(u64);
//!
//! let protocol = Protocol::builder()
//!     .message::<Hello>(1, SerializationFormat::Bincode)
//!     .message::<Welcome>(2, SerializationFormat::Bincode)
//!     .message::<Ping>(10, SerializationFormat::Bincode)
//!     .message::<Pong>(11, SerializationFormat::Bincode)
//!     .handshake()
//!     .initiated_by(Endpoint::Client)
//!     .two_way::<Hello, Welcome>()
//!     .generate(|| Hello(1))
//!     .receive(|hello| (Welcome(hello.0), HandshakeOutcome::Accepted))
//!     .verify(|hello, welcome| {
//!         if hello.0 == welcome.0 {
//!             HandshakeOutcome::Accepted
//!         } else {
//!             HandshakeOutcome::Rejected
//!         }
//!     })
//!     .finish()
//!     .for_request::<Ping>()
//!     .respond_with(|ping: Ping| async move { Ok(Pong(ping.0)) })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(protocol.registry().len(), 4);
//! ```
//!
//! `build()` checks the whole definition at once and reports every defect it
//! finds in a single [`ProtocolError::BuilderValidation`].

use crate::core::serialization::Serializer;
use crate::error::{ProtocolError, Result, ValidationDefect};
use crate::protocol::definition::Protocol;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{Endpoint, HandshakeContract, HandshakeOutcome};
use crate::protocol::message::MessageType;
use crate::protocol::registry::{MessageRegistry, WireCode};
use std::any::TypeId;
use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;

type Generate<H> = Box<dyn Fn() -> H + Send + Sync + 'static>;
type Receive<H, A> = Box<dyn Fn(&H) -> (A, HandshakeOutcome) + Send + Sync + 'static>;
type VerifyTwoWay<H, A> = Box<dyn Fn(&H, &A) -> HandshakeOutcome + Send + Sync + 'static>;
type VerifyThreeWay<H, A, V> = Box<dyn Fn(&H, &A) -> (V, HandshakeOutcome) + Send + Sync + 'static>;
type Acknowledge<H, A, V> = Box<dyn Fn(&H, &A, &V) -> bool + Send + Sync + 'static>;

/// Accumulates registrations, bindings and the handshake contract.
#[derive(Default)]
pub struct ProtocolBuilder {
    registry: MessageRegistry,
    dispatcher: Dispatcher,
    handshake: Option<HandshakeContract>,
    handshake_declared: bool,
    defects: Vec<ValidationDefect>,
}

impl ProtocolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `code` with the serializer that encodes it.
    pub fn message<T: MessageType>(
        mut self,
        code: WireCode,
        serializer: impl Serializer<T>,
    ) -> Self {
        if let Err(ProtocolError::DuplicateRegistration(detail)) =
            self.registry.register::<T, _>(code, serializer)
        {
            self.defects.push(ValidationDefect::DuplicateRegistration(detail));
        }
        self
    }

    /// Declare the handshake. The initiator defaults to [`Endpoint::Client`].
    pub fn handshake(self) -> HandshakeStage {
        HandshakeStage {
            builder: self,
            initiator: Endpoint::Client,
        }
    }

    pub fn for_request<T: MessageType>(self) -> RequestStage<T> {
        RequestStage {
            builder: self,
            _marker: PhantomData,
        }
    }

    pub fn for_response<R: MessageType>(self) -> ResponseStage<R> {
        ResponseStage {
            builder: self,
            _marker: PhantomData,
        }
    }

    pub fn for_command<T: MessageType>(self) -> CommandStage<T> {
        CommandStage {
            builder: self,
            _marker: PhantomData,
        }
    }

    fn set_handshake(&mut self, contract: Option<HandshakeContract>) {
        if self.handshake_declared {
            self.defects.push(ValidationDefect::DuplicateBinding {
                binding: "handshake",
                type_name: "handshake contract",
            });
            return;
        }
        self.handshake_declared = true;
        self.handshake = contract;
    }

    fn record_binding<T: MessageType>(&mut self, binding: &'static str, result: Result<()>) {
        if result.is_err() {
            self.defects.push(ValidationDefect::DuplicateBinding {
                binding,
                type_name: std::any::type_name::<T>(),
            });
        }
    }

    /// Validate the definition and freeze it.
    pub fn build(self) -> Result<Protocol> {
        let ProtocolBuilder {
            registry,
            dispatcher,
            handshake,
            handshake_declared,
            mut defects,
        } = self;

        if !handshake_declared {
            defects.push(ValidationDefect::MissingHandshake);
        }

        if let Some(contract) = &handshake {
            for reference in contract.message_types() {
                if !registry.contains(reference.type_id) {
                    defects.push(ValidationDefect::UnregisteredHandshakeType {
                        role: reference.role,
                        type_name: reference.type_name,
                    });
                }
            }
        }

        if !dispatcher.has_bindings() {
            defects.push(ValidationDefect::NoMessageGroups);
        }

        let mut reported: HashSet<TypeId> = HashSet::new();
        for reference in dispatcher.references() {
            if !registry.contains(reference.type_id) && reported.insert(reference.type_id) {
                defects.push(ValidationDefect::UnregisteredHandlerType {
                    binding: reference.binding,
                    type_name: reference.type_name,
                });
            }
        }

        match handshake {
            Some(contract) if defects.is_empty() => {
                Ok(Protocol::new(registry, contract, dispatcher))
            }
            _ => {
                if defects.is_empty() {
                    defects.push(ValidationDefect::MissingHandshake);
                }
                Err(ProtocolError::BuilderValidation(defects))
            }
        }
    }
}

/// Choose the initiator and the arity of the handshake.
pub struct HandshakeStage {
    builder: ProtocolBuilder,
    initiator: Endpoint,
}

impl HandshakeStage {
    pub fn initiated_by(mut self, endpoint: Endpoint) -> Self {
        self.initiator = endpoint;
        self
    }

    pub fn two_way<H: MessageType, A: MessageType>(self) -> TwoWayHandshake<H, A> {
        TwoWayHandshake {
            builder: self.builder,
            initiator: self.initiator,
            generate: None,
            receive: None,
            verify: None,
        }
    }

    pub fn three_way<H: MessageType, A: MessageType, V: MessageType>(
        self,
    ) -> ThreeWayHandshake<H, A, V> {
        ThreeWayHandshake {
            builder: self.builder,
            initiator: self.initiator,
            generate: None,
            receive: None,
            verify: None,
            acknowledge: None,
        }
    }
}

/// Handshake `H` answered by Ack `A`.
pub struct TwoWayHandshake<H, A> {
    builder: ProtocolBuilder,
    initiator: Endpoint,
    generate: Option<Generate<H>>,
    receive: Option<Receive<H, A>>,
    verify: Option<VerifyTwoWay<H, A>>,
}

impl<H: MessageType, A: MessageType> TwoWayHandshake<H, A> {
    /// Initiator: produce the opening message.
    pub fn generate(mut self, f: impl Fn() -> H + Send + Sync + 'static) -> Self {
        self.generate = Some(Box::new(f));
        self
    }

    /// Acceptor: judge the opening message and answer it.
    pub fn receive(mut self, f: impl Fn(&H) -> (A, HandshakeOutcome) + Send + Sync + 'static) -> Self {
        self.receive = Some(Box::new(f));
        self
    }

    /// Initiator: judge the answer.
    pub fn verify(mut self, f: impl Fn(&H, &A) -> HandshakeOutcome + Send + Sync + 'static) -> Self {
        self.verify = Some(Box::new(f));
        self
    }

    pub fn finish(self) -> ProtocolBuilder {
        let TwoWayHandshake {
            mut builder,
            initiator,
            generate,
            receive,
            verify,
        } = self;

        let contract = match (generate, receive, verify) {
            (Some(generate), Some(receive), Some(verify)) => {
                Some(HandshakeContract::two_way(initiator, generate, receive, verify))
            }
            (generate, receive, verify) => {
                missing_callbacks(
                    &mut builder.defects,
                    [
                        ("generate", generate.is_some()),
                        ("receive", receive.is_some()),
                        ("verify", verify.is_some()),
                    ],
                );
                None
            }
        };
        builder.set_handshake(contract);
        builder
    }
}

/// Handshake `H`, Ack `A`, then Verack `V`.
pub struct ThreeWayHandshake<H, A, V> {
    builder: ProtocolBuilder,
    initiator: Endpoint,
    generate: Option<Generate<H>>,
    receive: Option<Receive<H, A>>,
    verify: Option<VerifyThreeWay<H, A, V>>,
    acknowledge: Option<Acknowledge<H, A, V>>,
}

impl<H: MessageType, A: MessageType, V: MessageType> ThreeWayHandshake<H, A, V> {
    /// Initiator: produce the opening message.
    pub fn generate(mut self, f: impl Fn() -> H + Send + Sync + 'static) -> Self {
        self.generate = Some(Box::new(f));
        self
    }

    /// Acceptor: judge the opening message and answer it.
    pub fn receive(mut self, f: impl Fn(&H) -> (A, HandshakeOutcome) + Send + Sync + 'static) -> Self {
        self.receive = Some(Box::new(f));
        self
    }

    /// Initiator: judge the answer and produce the verack.
    pub fn verify(
        mut self,
        f: impl Fn(&H, &A) -> (V, HandshakeOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.verify = Some(Box::new(f));
        self
    }

    /// Acceptor: final go/no-go over all three messages.
    pub fn acknowledge(mut self, f: impl Fn(&H, &A, &V) -> bool + Send + Sync + 'static) -> Self {
        self.acknowledge = Some(Box::new(f));
        self
    }

    pub fn finish(self) -> ProtocolBuilder {
        let ThreeWayHandshake {
            mut builder,
            initiator,
            generate,
            receive,
            verify,
            acknowledge,
        } = self;

        let contract = match (generate, receive, verify, acknowledge) {
            (Some(generate), Some(receive), Some(verify), Some(acknowledge)) => Some(
                HandshakeContract::three_way(initiator, generate, receive, verify, acknowledge),
            ),
            (generate, receive, verify, acknowledge) => {
                missing_callbacks(
                    &mut builder.defects,
                    [
                        ("generate", generate.is_some()),
                        ("receive", receive.is_some()),
                        ("verify", verify.is_some()),
                        ("acknowledge", acknowledge.is_some()),
                    ],
                );
                None
            }
        };
        builder.set_handshake(contract);
        builder
    }
}

fn missing_callbacks<const N: usize>(
    defects: &mut Vec<ValidationDefect>,
    callbacks: [(&'static str, bool); N],
) {
    defects.extend(
        callbacks
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| ValidationDefect::MissingHandshakeCallback(name)),
    );
}

pub struct RequestStage<T> {
    builder: ProtocolBuilder,
    _marker: PhantomData<fn() -> T>,
}

impl<T: MessageType> RequestStage<T> {
    /// Answer every inbound `T` request with the `R` the handler produces.
    pub fn respond_with<R, F, Fut>(self, handler: F) -> ProtocolBuilder
    where
        R: MessageType,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let mut builder = self.builder;
        let result = builder.dispatcher.bind_request::<T, R, F, Fut>(handler);
        builder.record_binding::<T>("request", result);
        builder
    }
}

pub struct ResponseStage<R> {
    builder: ProtocolBuilder,
    _marker: PhantomData<fn() -> R>,
}

impl<R: MessageType> ResponseStage<R> {
    /// Name the request type this response answers.
    pub fn to_request<T: MessageType>(self) -> ResponseBindingStage<R, T> {
        ResponseBindingStage {
            builder: self.builder,
            _marker: PhantomData,
        }
    }
}

pub struct ResponseBindingStage<R, T> {
    builder: ProtocolBuilder,
    _marker: PhantomData<fn() -> (R, T)>,
}

impl<R: MessageType, T: MessageType> ResponseBindingStage<R, T> {
    /// Run `handler` when an `R` answers one of our `T` requests, before the
    /// caller's pending handle completes.
    pub fn handle_with<F>(self, handler: F) -> ProtocolBuilder
    where
        F: Fn(&R) -> Result<()> + Send + Sync + 'static,
    {
        let mut builder = self.builder;
        let result = builder.dispatcher.bind_response::<R, T, F>(handler);
        builder.record_binding::<R>("response", result);
        builder
    }
}

pub struct CommandStage<T> {
    builder: ProtocolBuilder,
    _marker: PhantomData<fn() -> T>,
}

impl<T: MessageType> CommandStage<T> {
    pub fn execute<F, Fut>(self, handler: F) -> ProtocolBuilder
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut builder = self.builder;
        let result = builder.dispatcher.bind_command::<T, F, Fut>(handler);
        builder.record_binding::<T>("command", result);
        builder
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::serialization::SerializationFormat;
    use crate::protocol::handshake::HandshakeArity;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Hello(u8);
    #[derive(Debug, Serialize, Deserialize)]
    struct Welcome(u8);
    #[derive(Debug, Serialize, Deserialize)]
    struct Ready(u8);
    #[derive(Debug, Serialize, Deserialize)]
    struct Ping(u32);
    #[derive(Debug, Serialize, Deserialize)]
    struct Pong(u32);
    #[derive(Debug, Serialize, Deserialize)]
    struct Shout(String);

    fn defects_of(result: Result<Protocol>) -> Vec<ValidationDefect> {
        match result {
            Err(ProtocolError::BuilderValidation(defects)) => defects,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    fn with_three_way(builder: ProtocolBuilder) -> ProtocolBuilder {
        builder
            .handshake()
            .initiated_by(Endpoint::Server)
            .three_way::<Hello, Welcome, Ready>()
            .generate(|| Hello(1))
            .receive(|h| (Welcome(h.0), HandshakeOutcome::Accepted))
            .verify(|_, w| (Ready(w.0), HandshakeOutcome::Accepted))
            .acknowledge(|h, w, r| h.0 == w.0 && w.0 == r.0)
            .finish()
    }

    fn registered() -> ProtocolBuilder {
        ProtocolBuilder::new()
            .message::<Hello>(1, SerializationFormat::Bincode)
            .message::<Welcome>(2, SerializationFormat::Bincode)
            .message::<Ready>(3, SerializationFormat::Bincode)
            .message::<Ping>(10, SerializationFormat::Bincode)
            .message::<Pong>(11, SerializationFormat::Json)
    }

    #[test]
    fn complete_definition_builds() {
        let protocol = with_three_way(registered())
            .for_request::<Ping>()
            .respond_with(|p: Ping| async move { Ok(Pong(p.0)) })
            .for_response::<Pong>()
            .to_request::<Ping>()
            .handle_with(|_| Ok(()))
            .build()
            .unwrap();

        assert_eq!(protocol.handshake().arity(), HandshakeArity::ThreeWay);
        assert_eq!(protocol.handshake().initiator(), Endpoint::Server);
        assert_eq!(protocol.registry().len(), 5);
        assert!(protocol.dispatcher().has_bindings());
    }

    #[test]
    fn empty_builder_reports_every_defect_at_once() {
        let defects = defects_of(ProtocolBuilder::new().build());
        assert_eq!(
            defects,
            vec![
                ValidationDefect::MissingHandshake,
                ValidationDefect::NoMessageGroups
            ]
        );
    }

    #[test]
    fn unregistered_types_are_reported() {
        let defects = defects_of(
            with_three_way(ProtocolBuilder::new().message::<Hello>(1, SerializationFormat::Bincode))
                .for_command::<Shout>()
                .execute(|_: Shout| async { Ok(()) })
                .build(),
        );

        let handshake_roles: Vec<_> = defects
            .iter()
            .filter_map(|d| match d {
                ValidationDefect::UnregisteredHandshakeType { role, .. } => Some(*role),
                _ => None,
            })
            .collect();
        assert_eq!(handshake_roles, vec!["ack", "verack"]);
        assert!(defects.iter().any(|d| matches!(
            d,
            ValidationDefect::UnregisteredHandlerType { binding: "command", .. }
        )));
    }

    #[test]
    fn request_binding_checks_both_sides() {
        let defects = defects_of(
            with_three_way(registered())
                .for_request::<Shout>()
                .respond_with(|s: Shout| async move { Ok(Pong(s.0.len() as u32)) })
                .build(),
        );
        assert_eq!(defects.len(), 1);
        assert!(matches!(
            defects[0],
            ValidationDefect::UnregisteredHandlerType { binding: "request", type_name }
                if type_name.ends_with("Shout")
        ));
    }

    #[test]
    fn missing_callbacks_are_named() {
        let defects = defects_of(
            registered()
                .handshake()
                .two_way::<Hello, Welcome>()
                .generate(|| Hello(0))
                .finish()
                .for_command::<Ping>()
                .execute(|_: Ping| async { Ok(()) })
                .build(),
        );
        assert_eq!(
            defects,
            vec![
                ValidationDefect::MissingHandshakeCallback("receive"),
                ValidationDefect::MissingHandshakeCallback("verify"),
            ]
        );
    }

    #[test]
    fn duplicates_are_collected_not_fatal() {
        let defects = defects_of(
            with_three_way(registered().message::<Shout>(10, SerializationFormat::Json))
                .for_command::<Ping>()
                .execute(|_: Ping| async { Ok(()) })
                .for_command::<Ping>()
                .execute(|_: Ping| async { Ok(()) })
                .build(),
        );
        assert!(matches!(defects[0], ValidationDefect::DuplicateRegistration(_)));
        assert!(matches!(
            defects[1],
            ValidationDefect::DuplicateBinding { binding: "command", .. }
        ));
        assert_eq!(defects.len(), 2);
    }
}
