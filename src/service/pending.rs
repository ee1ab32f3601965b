//! Outstanding outbound requests awaiting their correlated response.
//!
//! A slot is resolved by whoever removes it from the map first: the matching
//! response, the request timer, or session shutdown. Removal happens under
//! the map lock, so each request completes exactly once.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::envelope::{MessageEnvelope, RequestId};
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

type Completion = oneshot::Sender<Result<MessageEnvelope>>;

/// One outstanding request.
pub struct PendingSlot {
    request_id: RequestId,
    request_type: TypeId,
    sender: Completion,
    timer: Option<AbortHandle>,
}

impl PendingSlot {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// `TypeId` of the request message, used to pick the response handler.
    pub fn request_type(&self) -> TypeId {
        self.request_type
    }

    /// Deliver the result to the waiting caller. A caller that dropped its
    /// handle simply never sees it.
    pub fn complete(mut self, result: Result<MessageEnvelope>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let _ = self.sender.send(result);
    }
}

/// Map of outstanding requests for one session.
#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<RequestId, PendingSlot>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<RequestId, PendingSlot>>> {
        self.slots
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Open a slot for `request_id` and return the caller's handle.
    pub fn register(
        &self,
        request_id: RequestId,
        request_type: TypeId,
    ) -> Result<PendingResponse> {
        let (sender, receiver) = oneshot::channel();
        let mut slots = self.slots()?;
        if slots.contains_key(&request_id) {
            return Err(ProtocolError::InvalidState("request id already outstanding"));
        }
        slots.insert(
            request_id,
            PendingSlot {
                request_id,
                request_type,
                sender,
                timer: None,
            },
        );
        Ok(PendingResponse {
            request_id,
            receiver,
        })
    }

    /// Attach the timeout task to its slot. If the slot already resolved the
    /// timer is aborted straight away.
    pub fn arm_timer(&self, request_id: RequestId, timer: AbortHandle) {
        match self.slots() {
            Ok(mut slots) => match slots.get_mut(&request_id) {
                Some(slot) => slot.timer = Some(timer),
                None => timer.abort(),
            },
            Err(_) => timer.abort(),
        }
    }

    /// Remove the slot for `request_id`, if still outstanding.
    pub fn take(&self, request_id: RequestId) -> Option<PendingSlot> {
        self.slots().ok()?.remove(&request_id)
    }

    /// Resolve `request_id` with `RequestTimeout`. Returns false if it
    /// already resolved another way.
    pub fn expire(&self, request_id: RequestId) -> bool {
        match self.take(request_id) {
            Some(mut slot) => {
                // The timer is the caller here; don't abort ourselves.
                slot.timer = None;
                slot.complete(Err(ProtocolError::RequestTimeout(request_id)));
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding request with `Cancelled`. Returns how many.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingSlot> = match self.slots() {
            Ok(mut slots) => slots.drain().map(|(_, slot)| slot).collect(),
            Err(_) => return 0,
        };
        let count = drained.len();
        for slot in drained {
            let id = slot.request_id;
            slot.complete(Err(ProtocolError::Cancelled(id)));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.slots().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to the response of an outbound request.
///
/// Resolves with the response envelope, `RequestTimeout` or `Cancelled`.
#[derive(Debug)]
pub struct PendingResponse {
    request_id: RequestId,
    receiver: oneshot::Receiver<Result<MessageEnvelope>>,
}

impl PendingResponse {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for PendingResponse {
    type Output = Result<MessageEnvelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let request_id = self.request_id;
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProtocolError::Cancelled(request_id))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::message::Message;
    use std::time::Duration;

    fn register(pending: &PendingRequests, id: RequestId) -> PendingResponse {
        pending
            .register(id, TypeId::of::<u32>())
            .unwrap()
    }

    #[tokio::test]
    async fn response_completes_the_slot_once() {
        let pending = PendingRequests::new();
        let handle = register(&pending, 1);

        let slot = pending.take(1).unwrap();
        assert_eq!(slot.request_type(), TypeId::of::<u32>());
        slot.complete(Ok(MessageEnvelope::response(1, Message::new(5u32))));

        assert!(pending.take(1).is_none());
        assert!(!pending.expire(1));
        let envelope = handle.await.unwrap();
        assert_eq!(envelope.into_inner::<u32>().unwrap(), 5);
    }

    #[tokio::test]
    async fn expiry_yields_request_timeout() {
        let pending = PendingRequests::new();
        let handle = register(&pending, 7);
        assert!(pending.expire(7));
        assert!(matches!(handle.await, Err(ProtocolError::RequestTimeout(7))));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_fails_every_slot() {
        let pending = PendingRequests::new();
        let first = register(&pending, 1);
        let second = register(&pending, 2);

        assert_eq!(pending.cancel_all(), 2);
        assert!(matches!(first.await, Err(ProtocolError::Cancelled(1))));
        assert!(matches!(second.await, Err(ProtocolError::Cancelled(2))));
    }

    #[tokio::test]
    async fn duplicate_id_is_refused() {
        let pending = PendingRequests::new();
        let _handle = register(&pending, 3);
        assert!(pending.register(3, TypeId::of::<u32>()).is_err());
    }

    #[tokio::test]
    async fn timer_armed_after_resolution_is_aborted() {
        let pending = PendingRequests::new();
        let _handle = register(&pending, 4);
        pending.take(4).unwrap().complete(Err(ProtocolError::Cancelled(4)));

        let timer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        pending.arm_timer(4, timer.abort_handle());
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
