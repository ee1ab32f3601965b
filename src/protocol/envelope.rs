//! Message envelopes and their wire layout.
//!
//! Every frame payload starts with a fixed 11-byte header:
//!
//! ```text
//! [WireCode(2, LE)] [Dispatch(1)] [RequestId(8, LE)] [Body(N)]
//! ```
//!
//! Handshake frames prefix the body with one outcome byte so a peer can
//! carry its verdict alongside the Ack or Verack it sends.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::HandshakeOutcome;
use crate::protocol::message::{Message, MessageType};
use crate::protocol::registry::{MessageRegistry, WireCode};
use bytes::{BufMut, Bytes, BytesMut};

/// Correlates a response with the request that caused it. Zero means "none".
pub type RequestId = u64;

/// Size of the fixed envelope header in bytes.
pub const ENVELOPE_HEADER_LEN: usize = 2 + 1 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchType {
    /// One-way message, no reply expected.
    Command,
    /// Expects exactly one correlated `Response`.
    Request,
    /// Answers the `Request` with the same id.
    Response,
    /// Handshake traffic, only valid before the session is ready.
    Handshake,
}

impl DispatchType {
    pub fn as_byte(self) -> u8 {
        match self {
            DispatchType::Command => 0x01,
            DispatchType::Request => 0x02,
            DispatchType::Response => 0x03,
            DispatchType::Handshake => 0x04,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(DispatchType::Command),
            0x02 => Some(DispatchType::Request),
            0x03 => Some(DispatchType::Response),
            0x04 => Some(DispatchType::Handshake),
            _ => None,
        }
    }

    /// Whether envelopes of this kind must carry a non-zero request id.
    pub fn is_correlated(self) -> bool {
        matches!(self, DispatchType::Request | DispatchType::Response)
    }
}

/// Dispatch metadata wrapped around an application message.
#[derive(Debug)]
pub struct MessageEnvelope {
    pub dispatch: DispatchType,
    pub request_id: RequestId,
    pub message: Message,
}

impl MessageEnvelope {
    pub fn command<T: MessageType>(value: T) -> Self {
        Self {
            dispatch: DispatchType::Command,
            request_id: 0,
            message: Message::new(value),
        }
    }

    pub fn request(request_id: RequestId, message: Message) -> Self {
        Self {
            dispatch: DispatchType::Request,
            request_id,
            message,
        }
    }

    pub fn response(request_id: RequestId, message: Message) -> Self {
        Self {
            dispatch: DispatchType::Response,
            request_id,
            message,
        }
    }

    /// Take the carried value out as `T`.
    pub fn into_inner<T: MessageType>(self) -> Result<T> {
        self.message
            .downcast::<T>()
            .map_err(|message| ProtocolError::InvalidMessage(format!(
                "expected `{}`, got `{}`",
                std::any::type_name::<T>(),
                message.type_name()
            )))
    }
}

/// A handshake message and the outcome its sender attached.
#[derive(Debug)]
pub struct HandshakeFrame {
    pub message: Message,
    pub outcome: HandshakeOutcome,
}

/// A decoded frame payload.
#[derive(Debug)]
pub enum InboundFrame {
    Application(MessageEnvelope),
    Handshake(HandshakeFrame),
}

fn write_header(buf: &mut BytesMut, code: WireCode, dispatch: DispatchType, id: RequestId) {
    buf.put_u16_le(code);
    buf.put_u8(dispatch.as_byte());
    buf.put_u64_le(id);
}

fn check_request_id(dispatch: DispatchType, request_id: RequestId) -> Result<()> {
    match (dispatch.is_correlated(), request_id) {
        (true, 0) => Err(ProtocolError::InvalidMessage(
            constants::ERR_REQUEST_WITHOUT_ID.into(),
        )),
        (false, id) if id != 0 => Err(ProtocolError::InvalidMessage(
            constants::ERR_COMMAND_WITH_ID.into(),
        )),
        _ => Ok(()),
    }
}

/// Serialize an application envelope into a frame payload.
pub fn encode_envelope(registry: &MessageRegistry, envelope: &MessageEnvelope) -> Result<Bytes> {
    if envelope.dispatch == DispatchType::Handshake {
        return Err(ProtocolError::InvalidState(
            constants::ERR_HANDSHAKE_NOT_SENDABLE,
        ));
    }
    check_request_id(envelope.dispatch, envelope.request_id)?;

    let (code, body) = registry.encode(&envelope.message)?;
    let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + body.len());
    write_header(&mut buf, code, envelope.dispatch, envelope.request_id);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Serialize a handshake message and its outcome into a frame payload.
pub fn encode_handshake(
    registry: &MessageRegistry,
    message: &Message,
    outcome: HandshakeOutcome,
) -> Result<Bytes> {
    let (code, body) = registry.encode(message)?;
    let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + 1 + body.len());
    write_header(&mut buf, code, DispatchType::Handshake, 0);
    buf.put_u8(outcome.as_byte());
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Parse a frame payload. Any structural problem is `InvalidMessage`.
pub fn decode_frame(registry: &MessageRegistry, payload: &[u8]) -> Result<InboundFrame> {
    if payload.len() < ENVELOPE_HEADER_LEN {
        return Err(ProtocolError::InvalidMessage(
            constants::ERR_TRUNCATED_HEADER.into(),
        ));
    }

    let code = u16::from_le_bytes([payload[0], payload[1]]);
    let dispatch = DispatchType::from_byte(payload[2]).ok_or_else(|| {
        ProtocolError::InvalidMessage(format!(
            "{}: {:#04x}",
            constants::ERR_UNKNOWN_DISPATCH,
            payload[2]
        ))
    })?;
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&payload[3..ENVELOPE_HEADER_LEN]);
    let request_id = u64::from_le_bytes(id_bytes);
    check_request_id(dispatch, request_id)?;

    let body = &payload[ENVELOPE_HEADER_LEN..];

    if dispatch == DispatchType::Handshake {
        let (&outcome_byte, body) = body.split_first().ok_or_else(|| {
            ProtocolError::InvalidMessage(constants::ERR_MISSING_OUTCOME.into())
        })?;
        let outcome = HandshakeOutcome::from_byte(outcome_byte).ok_or_else(|| {
            ProtocolError::InvalidMessage(format!(
                "{}: {outcome_byte:#04x}",
                constants::ERR_UNKNOWN_OUTCOME
            ))
        })?;
        let message = registry.decode(code, body)?;
        return Ok(InboundFrame::Handshake(HandshakeFrame { message, outcome }));
    }

    let message = registry.decode(code, body)?;
    Ok(InboundFrame::Application(MessageEnvelope {
        dispatch,
        request_id,
        message,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::serialization::SerializationFormat;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note(String);

    fn registry() -> MessageRegistry {
        let mut registry = MessageRegistry::new();
        registry
            .register::<Note, _>(0x0102, SerializationFormat::Bincode)
            .unwrap();
        registry
    }

    #[test]
    fn header_layout_is_stable() {
        let registry = registry();
        let envelope = MessageEnvelope::request(0x0A0B, Message::new(Note("x".into())));
        let bytes = encode_envelope(&registry, &envelope).unwrap();

        assert_eq!(&bytes[..2], &[0x02, 0x01]);
        assert_eq!(bytes[2], DispatchType::Request.as_byte());
        assert_eq!(&bytes[3..11], &0x0A0Bu64.to_le_bytes());
    }

    #[test]
    fn request_envelope_survives_the_wire() {
        let registry = registry();
        let envelope = MessageEnvelope::request(42, Message::new(Note("hi".into())));
        let bytes = encode_envelope(&registry, &envelope).unwrap();

        match decode_frame(&registry, &bytes).unwrap() {
            InboundFrame::Application(decoded) => {
                assert_eq!(decoded.dispatch, DispatchType::Request);
                assert_eq!(decoded.request_id, 42);
                assert_eq!(decoded.into_inner::<Note>().unwrap(), Note("hi".into()));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn handshake_frame_carries_outcome() {
        let registry = registry();
        let bytes = encode_handshake(
            &registry,
            &Message::new(Note("hello".into())),
            HandshakeOutcome::Rejected,
        )
        .unwrap();

        match decode_frame(&registry, &bytes).unwrap() {
            InboundFrame::Handshake(frame) => {
                assert_eq!(frame.outcome, HandshakeOutcome::Rejected);
                assert!(frame.message.is::<Note>());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn command_with_request_id_is_refused() {
        let registry = registry();
        let envelope = MessageEnvelope {
            dispatch: DispatchType::Command,
            request_id: 9,
            message: Message::new(Note("x".into())),
        };
        assert!(matches!(
            encode_envelope(&registry, &envelope),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn response_without_request_id_is_invalid_on_decode() {
        let registry = registry();
        let mut bytes = encode_envelope(
            &registry,
            &MessageEnvelope::response(1, Message::new(Note("x".into()))),
        )
        .unwrap()
        .to_vec();
        bytes[3..11].copy_from_slice(&0u64.to_le_bytes());

        assert!(matches!(
            decode_frame(&registry, &bytes),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn truncated_and_unknown_headers_are_invalid() {
        let registry = registry();
        assert!(matches!(
            decode_frame(&registry, &[0x02, 0x01, 0x01]),
            Err(ProtocolError::InvalidMessage(_))
        ));

        let mut bytes = vec![0x02, 0x01, 0xEE];
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decode_frame(&registry, &bytes),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn handshake_dispatch_cannot_be_sent_as_envelope() {
        let registry = registry();
        let envelope = MessageEnvelope {
            dispatch: DispatchType::Handshake,
            request_id: 0,
            message: Message::new(Note("x".into())),
        };
        assert!(matches!(
            encode_envelope(&registry, &envelope),
            Err(ProtocolError::InvalidState(_))
        ));
    }
}
