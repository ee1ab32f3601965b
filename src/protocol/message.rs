//! Type-erased application messages.

use std::any::{Any, TypeId};
use std::fmt;

/// Marker for types that can travel through a session.
pub trait MessageType: Any + Send + Sync + 'static {}

impl<T: Any + Send + Sync + 'static> MessageType for T {}

/// An application value of any registered message type.
///
/// The concrete type is remembered so the registry can find its wire code
/// and handlers can take the value back out with [`Message::downcast`].
pub struct Message {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl Message {
    pub fn new<T: MessageType>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: MessageType>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub(crate) fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }

    pub fn downcast_ref<T: MessageType>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the concrete value out, handing the message back on a type mismatch.
    pub fn downcast<T: MessageType>(self) -> std::result::Result<T, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let Message {
            type_id,
            type_name,
            value,
        } = self;
        value.downcast::<T>().map(|boxed| *boxed).map_err(|value| Message {
            type_id,
            type_name,
            value,
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}
