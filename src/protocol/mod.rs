//! # Protocol Definition
//!
//! Everything a session needs to know about the conversation it carries:
//! which types exist on the wire ([`registry`]), how they are wrapped
//! ([`envelope`]), who handles them ([`dispatcher`]) and how the two peers
//! agree to talk ([`handshake`]). A [`Protocol`] bundles all of it and is
//! produced by the [`ProtocolBuilder`].

pub mod builder;
pub mod definition;
pub mod dispatcher;
pub mod envelope;
pub mod handshake;
pub mod message;
pub mod registry;


pub use builder::ProtocolBuilder;
pub use definition::Protocol;
pub use envelope::{DispatchType, MessageEnvelope, RequestId};
pub use handshake::{
    Endpoint, HandshakeArity, HandshakeContract, HandshakeOutcome, HandshakeRole, HandshakeState,
};
pub use message::{Message, MessageType};
pub use registry::{MessageRegistry, WireCode};
