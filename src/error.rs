//! # Error Types
//!
//! Error handling for the session protocol engine.
//!
//! This module defines every error variant that can occur while building a
//! protocol, negotiating a handshake, framing bytes, or running a session.
//!
//! ## Error Categories
//! - **Definition Errors**: builder validation defects, duplicate registrations
//! - **Handshake Errors**: rejected outcomes, timeouts, violations
//! - **Framing Errors**: missing or out-of-range lengths, malformed envelopes
//! - **Session Errors**: handler failures, request timeouts, cancellation
//! - **Transport Errors**: I/O failures of the underlying byte stream
//!
//! Framing and transport errors are fatal to a session. Handler failures and
//! request timeouts are isolated to the message they belong to.
//!
//! ## Example Usage
//! ```rust
//! use session_protocol::error::{ProtocolError, Result};
//!
//! fn check_length(len: usize) -> Result<()> {
//!     if len > 1024 {
//!         return Err(ProtocolError::InvalidMessageLength { length: len, min: 11, max: 1024 });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_length(4096).is_err());
//! ```

use crate::protocol::handshake::{HandshakeOutcome, HandshakeState};
use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Channel lifecycle errors
    pub const ERR_CHANNEL_NOT_OPEN: &str = "Channel is not open";
    pub const ERR_SEND_ABORTED: &str = "Send abandoned: channel closed";
    pub const ERR_CHANNEL_NOT_CLOSED: &str = "Channel must be closed before it can be opened";

    /// Session lifecycle errors
    pub const ERR_SESSION_ALREADY_STARTED: &str = "Session has already been started";
    pub const ERR_RESPONSE_NOT_SENDABLE: &str =
        "Responses are produced by request handlers and cannot be sent directly";
    pub const ERR_HANDSHAKE_NOT_SENDABLE: &str =
        "Handshake frames are owned by the handshake engine";

    /// Envelope validation errors
    pub const ERR_TRUNCATED_HEADER: &str = "Envelope shorter than its fixed header";
    pub const ERR_TRUNCATED_FRAME: &str = "Stream ended inside a frame payload";
    pub const ERR_UNKNOWN_DISPATCH: &str = "Unknown dispatch type";
    pub const ERR_MISSING_OUTCOME: &str = "Handshake frame without an outcome byte";
    pub const ERR_UNKNOWN_OUTCOME: &str = "Unknown handshake outcome";
    pub const ERR_COMMAND_WITH_ID: &str = "Command envelope carries a request id";
    pub const ERR_REQUEST_WITHOUT_ID: &str = "Request or response envelope without a request id";

    /// Handshake errors
    pub const ERR_UNEXPECTED_DISPATCH: &str = "Application frame received during handshake";
    pub const ERR_UNEXPECTED_HANDSHAKE_TYPE: &str = "Unexpected handshake message type";
    pub const ERR_HANDSHAKE_AFTER_READY: &str = "Handshake frame received after session became ready";
    pub const ERR_PEER_CLOSED_DURING_HANDSHAKE: &str = "Peer closed the channel during handshake";
}

/// A single defect found while validating a protocol definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationDefect {
    /// No handshake contract was declared.
    MissingHandshake,
    /// A handshake callback required by the declared arity is missing.
    MissingHandshakeCallback(&'static str),
    /// Neither requests, responses nor commands were declared.
    NoMessageGroups,
    /// A handshake message type has no serializer registration.
    UnregisteredHandshakeType {
        role: &'static str,
        type_name: &'static str,
    },
    /// A handler binding references a type without a registration.
    UnregisteredHandlerType {
        binding: &'static str,
        type_name: &'static str,
    },
    /// A type or wire code was registered twice.
    DuplicateRegistration(String),
    /// The same handler binding was declared twice.
    DuplicateBinding {
        binding: &'static str,
        type_name: &'static str,
    },
}

impl fmt::Display for ValidationDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationDefect::MissingHandshake => write!(f, "handshake must be declared"),
            ValidationDefect::MissingHandshakeCallback(name) => {
                write!(f, "handshake callback `{name}` is missing")
            }
            ValidationDefect::NoMessageGroups => {
                write!(f, "at least one request, response or command must be declared")
            }
            ValidationDefect::UnregisteredHandshakeType { role, type_name } => {
                write!(f, "handshake {role} type `{type_name}` has no serializer")
            }
            ValidationDefect::UnregisteredHandlerType { binding, type_name } => {
                write!(f, "{binding} binding references unregistered type `{type_name}`")
            }
            ValidationDefect::DuplicateRegistration(detail) => write!(f, "{detail}"),
            ValidationDefect::DuplicateBinding { binding, type_name } => {
                write!(f, "{binding} handler for `{type_name}` declared more than once")
            }
        }
    }
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Invalid protocol definition: {}", join_defects(.0))]
    BuilderValidation(Vec<ValidationDefect>),

    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    #[error("Message type `{0}` is not registered")]
    UnregisteredType(&'static str),

    #[error("Handshake failed in state {stage:?}: outcome {outcome:?}")]
    HandshakeFailed {
        stage: HandshakeState,
        outcome: HandshakeOutcome,
    },

    #[error("Handshake timed out")]
    HandshakeTimedOut,

    #[error("Handshake violation: {0}")]
    HandshakeViolation(String),

    #[error("Stream ended before a complete message length was read")]
    MissingMessageLength,

    #[error("Invalid message length {length} (allowed {min}..={max})")]
    InvalidMessageLength { length: usize, min: usize, max: usize },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Handler for `{type_name}` failed: {reason}")]
    HandlerExecution {
        type_name: &'static str,
        reason: String,
    },

    #[error("No handler bound for `{0}`")]
    UnhandledMessage(&'static str),

    #[error("Request {0} timed out waiting for a response")]
    RequestTimeout(u64),

    #[error("Request {0} cancelled: session closed")]
    Cancelled(u64),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Session is not ready")]
    NotReady,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error means the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::MissingMessageLength
                | ProtocolError::InvalidMessageLength { .. }
                | ProtocolError::InvalidMessage(_)
                | ProtocolError::HandshakeFailed { .. }
                | ProtocolError::HandshakeTimedOut
                | ProtocolError::HandshakeViolation(_)
                | ProtocolError::ConnectionClosed
        )
    }
}

impl ProtocolError {
    /// A copy of this error for a second observer.
    ///
    /// I/O errors keep their kind and message but lose their source.
    pub fn detached(&self) -> Self {
        match self {
            ProtocolError::Io(e) => ProtocolError::Io(io::Error::new(e.kind(), e.to_string())),
            ProtocolError::SerializeError(s) => ProtocolError::SerializeError(s.clone()),
            ProtocolError::DeserializeError(s) => ProtocolError::DeserializeError(s.clone()),
            ProtocolError::BuilderValidation(d) => ProtocolError::BuilderValidation(d.clone()),
            ProtocolError::DuplicateRegistration(s) => {
                ProtocolError::DuplicateRegistration(s.clone())
            }
            ProtocolError::UnregisteredType(t) => ProtocolError::UnregisteredType(*t),
            ProtocolError::HandshakeFailed { stage, outcome } => ProtocolError::HandshakeFailed {
                stage: *stage,
                outcome: *outcome,
            },
            ProtocolError::HandshakeTimedOut => ProtocolError::HandshakeTimedOut,
            ProtocolError::HandshakeViolation(s) => ProtocolError::HandshakeViolation(s.clone()),
            ProtocolError::MissingMessageLength => ProtocolError::MissingMessageLength,
            ProtocolError::InvalidMessageLength { length, min, max } => {
                ProtocolError::InvalidMessageLength {
                    length: *length,
                    min: *min,
                    max: *max,
                }
            }
            ProtocolError::InvalidMessage(s) => ProtocolError::InvalidMessage(s.clone()),
            ProtocolError::HandlerExecution { type_name, reason } => {
                ProtocolError::HandlerExecution {
                    type_name: *type_name,
                    reason: reason.clone(),
                }
            }
            ProtocolError::UnhandledMessage(t) => ProtocolError::UnhandledMessage(*t),
            ProtocolError::RequestTimeout(id) => ProtocolError::RequestTimeout(*id),
            ProtocolError::Cancelled(id) => ProtocolError::Cancelled(*id),
            ProtocolError::InvalidState(s) => ProtocolError::InvalidState(*s),
            ProtocolError::NotReady => ProtocolError::NotReady,
            ProtocolError::ConnectionClosed => ProtocolError::ConnectionClosed,
            ProtocolError::Timeout => ProtocolError::Timeout,
            ProtocolError::ConfigError(s) => ProtocolError::ConfigError(s.clone()),
            ProtocolError::Custom(s) => ProtocolError::Custom(s.clone()),
        }
    }
}

fn join_defects(defects: &[ValidationDefect]) -> String {
    defects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
