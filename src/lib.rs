//! # Session Protocol
//!
//! A transport-agnostic session protocol engine. It negotiates an
//! application-defined handshake, frames and routes one-way commands and
//! correlated request/response pairs, and drives the message loop over any
//! byte-oriented channel.
//!
//! ## Layers
//! - [`core`]: length-prefixed framing and body serializers
//! - [`protocol`]: message registry, envelopes, handler bindings, the
//!   handshake engine and the [`ProtocolBuilder`]
//! - [`transport`]: the framed [`Channel`] and the transports it runs over
//! - [`service`]: the [`Orchestrator`] that runs a session end to end
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging,
//!   metrics and timeouts
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE)] [WireCode(2, LE)] [Dispatch(1)] [RequestId(8, LE)] [Body(N)]
//! ```
//!
//! ## Quick Start
//! ```no_run
//! use session_protocol::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Hello;
//! #[derive(Serialize, Deserialize)]
//! struct Welcome;
//! #[derive(Serialize, Deserialize)]
//! struct Ping(u64);
//! #[derive(Serialize, Deserialize)]
//! struct Pong(u64);
//!
//! # async fn run() -> session_protocol::error::Result<()> {
//! let protocol = Arc::new(
//!     Protocol::builder()
//!         .message::<Hello>(1, SerializationFormat::Bincode)
//!         .message::<Welcome>(2, SerializationFormat::Bincode)
//!         .message::<Ping>(3, SerializationFormat::Bincode)
//!         .message::<Pong>(4, SerializationFormat::Bincode)
//!         .handshake()
//!         .two_way::<Hello, Welcome>()
//!         .generate(|| Hello)
//!         .receive(|_| (Welcome, HandshakeOutcome::Accepted))
//!         .verify(|_, _| HandshakeOutcome::Accepted)
//!         .finish()
//!         .for_request::<Ping>()
//!         .respond_with(|ping: Ping| async move { Ok(Pong(ping.0)) })
//!         .build()?,
//! );
//!
//! let config = ProtocolConfig::default();
//! let mut transport = TcpTransport::new("127.0.0.1:7000");
//! let session = Orchestrator::open(protocol, &mut transport, Endpoint::Client, &config).await?;
//! session.start().await?;
//!
//! let pong: Pong = session.request(Ping(1)).await?;
//! assert_eq!(pong.0, 1);
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::ProtocolConfig;
pub use error::{ProtocolError, Result, ValidationDefect};
pub use protocol::{Protocol, ProtocolBuilder};
pub use service::Orchestrator;
pub use transport::Channel;

/// The types most applications need.
pub mod prelude {
    pub use crate::config::{ChannelConfig, LoggingConfig, ProtocolConfig, SessionConfig};
    pub use crate::core::serialization::{SerializationFormat, Serializer};
    pub use crate::error::{ProtocolError, Result, ValidationDefect};
    pub use crate::protocol::{
        DispatchType, Endpoint, HandshakeOutcome, Message, MessageEnvelope, Protocol,
        ProtocolBuilder, RequestId,
    };
    pub use crate::service::{
        Orchestrator, PendingResponse, SendReceipt, SessionEvent, SessionOutcome, SessionState,
    };
    pub use crate::transport::{memory_pair, Channel, ChannelEvent, StreamTransport, TcpTransport, Transport};
    #[cfg(unix)]
    pub use crate::transport::UnixTransport;
}
