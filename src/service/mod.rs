//! # Session Service
//!
//! The [`Orchestrator`] runs a session end to end: it negotiates the
//! handshake over a [`Channel`](crate::transport::Channel), routes inbound
//! commands, requests and responses to the protocol's handlers, and
//! correlates outbound requests with their responses through the
//! [`PendingRequests`] map.

pub mod orchestrator;
pub mod pending;

pub use orchestrator::{Orchestrator, SendReceipt, SessionEvent, SessionOutcome, SessionState};
pub use pending::{PendingRequests, PendingResponse};
