use crate::protocol::builder::ProtocolBuilder;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::HandshakeContract;
use crate::protocol::registry::MessageRegistry;
use std::fmt;

/// A validated, immutable protocol definition.
///
/// Built once through [`ProtocolBuilder`] and shared by every session via
/// `Arc<Protocol>`.
pub struct Protocol {
    registry: MessageRegistry,
    handshake: HandshakeContract,
    dispatcher: Dispatcher,
}

impl Protocol {
    pub fn builder() -> ProtocolBuilder {
        ProtocolBuilder::new()
    }

    pub(crate) fn new(
        registry: MessageRegistry,
        handshake: HandshakeContract,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            registry,
            handshake,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    pub fn handshake(&self) -> &HandshakeContract {
        &self.handshake
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("registry", &self.registry)
            .field("handshake", &self.handshake)
            .field("bindings", &self.dispatcher.references().len())
            .finish()
    }
}
