use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Message, MessageType};
use futures::future::{self, BoxFuture, FutureExt};
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;

pub type HandlerFuture<T> = BoxFuture<'static, Result<T>>;

type RequestHandlerFn = dyn Fn(Message) -> HandlerFuture<Message> + Send + Sync + 'static;
type CommandHandlerFn = dyn Fn(Message) -> HandlerFuture<()> + Send + Sync + 'static;
type ResponseHandlerFn = dyn Fn(&Message) -> Result<()> + Send + Sync + 'static;

/// A type referenced by a handler binding, used for definition validation.
#[derive(Debug, Clone, Copy)]
pub struct BindingRef {
    pub binding: &'static str,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl BindingRef {
    fn of<T: MessageType>(binding: &'static str) -> Self {
        Self {
            binding,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

struct RequestBinding {
    handler: Box<RequestHandlerFn>,
}

struct CommandBinding {
    handler: Box<CommandHandlerFn>,
}

struct ResponseBinding {
    handler: Box<ResponseHandlerFn>,
}

/// Handler tables keyed by message type, one per dispatch kind.
#[derive(Default)]
pub struct Dispatcher {
    requests: HashMap<TypeId, RequestBinding>,
    responses: HashMap<(TypeId, TypeId), ResponseBinding>,
    commands: HashMap<TypeId, CommandBinding>,
    references: Vec<BindingRef>,
}

fn mismatch<T: MessageType>(message: &Message) -> ProtocolError {
    ProtocolError::InvalidMessage(format!(
        "handler for `{}` received `{}`",
        std::any::type_name::<T>(),
        message.type_name()
    ))
}

fn duplicate<T: MessageType>(binding: &'static str) -> ProtocolError {
    ProtocolError::DuplicateRegistration(format!(
        "{binding} handler for `{}` already bound",
        std::any::type_name::<T>()
    ))
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handler that answers requests of type `T` with an `R`.
    pub fn bind_request<T, R, F, Fut>(&mut self, handler: F) -> Result<()>
    where
        T: MessageType,
        R: MessageType,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let key = TypeId::of::<T>();
        if self.requests.contains_key(&key) {
            return Err(duplicate::<T>("request"));
        }

        let erased = move |message: Message| -> HandlerFuture<Message> {
            match message.downcast::<T>() {
                Ok(request) => handler(request).map(|r| r.map(Message::new)).boxed(),
                Err(message) => future::ready(Err(mismatch::<T>(&message))).boxed(),
            }
        };

        self.references.push(BindingRef::of::<T>("request"));
        self.references.push(BindingRef::of::<R>("request"));
        self.requests.insert(
            key,
            RequestBinding {
                handler: Box::new(erased),
            },
        );
        Ok(())
    }

    /// Bind a handler run when an `R` answers an outbound request of type `T`.
    pub fn bind_response<R, T, F>(&mut self, handler: F) -> Result<()>
    where
        R: MessageType,
        T: MessageType,
        F: Fn(&R) -> Result<()> + Send + Sync + 'static,
    {
        let key = (TypeId::of::<T>(), TypeId::of::<R>());
        if self.responses.contains_key(&key) {
            return Err(duplicate::<R>("response"));
        }

        let erased = move |message: &Message| -> Result<()> {
            let response = message
                .downcast_ref::<R>()
                .ok_or_else(|| mismatch::<R>(message))?;
            handler(response)
        };

        self.references.push(BindingRef::of::<R>("response"));
        self.references.push(BindingRef::of::<T>("response"));
        self.responses.insert(
            key,
            ResponseBinding {
                handler: Box::new(erased),
            },
        );
        Ok(())
    }

    /// Bind the handler executed for commands of type `T`.
    pub fn bind_command<T, F, Fut>(&mut self, handler: F) -> Result<()>
    where
        T: MessageType,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let key = TypeId::of::<T>();
        if self.commands.contains_key(&key) {
            return Err(duplicate::<T>("command"));
        }

        let erased = move |message: Message| -> HandlerFuture<()> {
            match message.downcast::<T>() {
                Ok(command) => handler(command).boxed(),
                Err(message) => future::ready(Err(mismatch::<T>(&message))).boxed(),
            }
        };

        self.references.push(BindingRef::of::<T>("command"));
        self.commands.insert(
            key,
            CommandBinding {
                handler: Box::new(erased),
            },
        );
        Ok(())
    }

    /// Start the request handler for `message`. The returned future is
    /// `'static` so it can run on its own task.
    pub fn dispatch_request(&self, message: Message) -> Result<HandlerFuture<Message>> {
        let binding = self
            .requests
            .get(&message.type_id())
            .ok_or(ProtocolError::UnhandledMessage(message.type_name()))?;
        Ok((binding.handler)(message))
    }

    pub fn dispatch_command(&self, message: Message) -> Result<HandlerFuture<()>> {
        let binding = self
            .commands
            .get(&message.type_id())
            .ok_or(ProtocolError::UnhandledMessage(message.type_name()))?;
        Ok((binding.handler)(message))
    }

    /// Run the response handler bound for `(request_type, response type)`.
    ///
    /// Returns `Ok(false)` when no handler is bound for that pair.
    pub fn handle_response(&self, request_type: TypeId, response: &Message) -> Result<bool> {
        match self.responses.get(&(request_type, response.type_id())) {
            Some(binding) => (binding.handler)(response).map(|()| true),
            None => Ok(false),
        }
    }

    pub fn has_bindings(&self) -> bool {
        !(self.requests.is_empty() && self.responses.is_empty() && self.commands.is_empty())
    }

    /// Every type any binding refers to, for validation against the registry.
    pub fn references(&self) -> &[BindingRef] {
        &self.references
    }
}
