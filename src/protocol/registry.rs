//! Message registry: binds message types to wire codes and serializers.
//!
//! Lookups go both ways. Outbound frames resolve by type to find the wire
//! code, inbound frames resolve by code to find the type to deserialize into.

use crate::core::serialization::Serializer;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Message, MessageType};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Numeric identifier of a message type on the wire.
pub type WireCode = u16;

trait ErasedSerializer: Send + Sync {
    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Message>;
}

struct Typed<T, S> {
    serializer: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> ErasedSerializer for Typed<T, S>
where
    T: MessageType,
    S: Serializer<T>,
{
    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
        let value = value
            .downcast_ref::<T>()
            .ok_or(ProtocolError::UnregisteredType(std::any::type_name::<T>()))?;
        self.serializer.serialize(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        self.serializer.deserialize(bytes).map(Message::new)
    }
}

/// One `type <-> code <-> serializer` binding.
#[derive(Clone)]
pub struct MessageTypeRegistration {
    type_id: TypeId,
    type_name: &'static str,
    code: WireCode,
    serializer: Arc<dyn ErasedSerializer>,
}

impl MessageTypeRegistration {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn code(&self) -> WireCode {
        self.code
    }
}

impl fmt::Debug for MessageTypeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageTypeRegistration")
            .field("type", &self.type_name)
            .field("code", &self.code)
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MessageRegistry {
    by_type: HashMap<TypeId, MessageTypeRegistration>,
    by_code: HashMap<WireCode, TypeId>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `T` to `code`, failing if either side is already bound.
    pub fn register<T, S>(&mut self, code: WireCode, serializer: S) -> Result<()>
    where
        T: MessageType,
        S: Serializer<T>,
    {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        if let Some(existing) = self.by_type.get(&type_id) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "type `{type_name}` already bound to code {}",
                existing.code
            )));
        }
        if let Some(owner) = self.by_code.get(&code).and_then(|id| self.by_type.get(id)) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "code {code} already bound to `{}`",
                owner.type_name
            )));
        }

        self.by_code.insert(code, type_id);
        self.by_type.insert(
            type_id,
            MessageTypeRegistration {
                type_id,
                type_name,
                code,
                serializer: Arc::new(Typed::<T, S> {
                    serializer,
                    _marker: PhantomData,
                }),
            },
        );
        Ok(())
    }

    pub fn resolve_by_code(&self, code: WireCode) -> Option<&MessageTypeRegistration> {
        self.by_code.get(&code).and_then(|id| self.by_type.get(id))
    }

    pub fn resolve_by_type_id(&self, type_id: TypeId) -> Option<&MessageTypeRegistration> {
        self.by_type.get(&type_id)
    }

    pub fn resolve_by_type<T: MessageType>(&self) -> Option<&MessageTypeRegistration> {
        self.resolve_by_type_id(TypeId::of::<T>())
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.by_type.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &MessageTypeRegistration> {
        self.by_type.values()
    }

    /// Serialize a message body and return it with its wire code.
    pub fn encode(&self, message: &Message) -> Result<(WireCode, Vec<u8>)> {
        let registration = self
            .resolve_by_type_id(message.type_id())
            .ok_or(ProtocolError::UnregisteredType(message.type_name()))?;
        let bytes = registration.serializer.serialize(message.as_any())?;
        Ok((registration.code, bytes))
    }

    /// Deserialize a message body received under `code`.
    ///
    /// Unknown codes and undecodable bodies are both `InvalidMessage`: on the
    /// receive path either one means the stream can't be trusted.
    pub fn decode(&self, code: WireCode, bytes: &[u8]) -> Result<Message> {
        let registration = self
            .resolve_by_code(code)
            .ok_or_else(|| ProtocolError::InvalidMessage(format!("unknown wire code {code}")))?;
        registration.serializer.deserialize(bytes).map_err(|e| {
            ProtocolError::InvalidMessage(format!("`{}` body: {e}", registration.type_name))
        })
    }
}
