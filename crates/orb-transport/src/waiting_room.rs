//! Request/reply correlation
//!
//! Each connection owns one waiting room. A sender registers its request id
//! before writing, then awaits the returned [`PendingInvocation`]. The reader
//! delivers replies by id. Delivery, cancellation and abort all remove the
//! entry under the same lock, so exactly one of them resolves a waiter and
//! the others find nothing to do.

use crate::backoff::BackoffTimer;
use crate::error::{Result, TransportError};
use giop::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

type Slot = oneshot::Sender<Result<Message>>;

/// A request awaiting its reply
#[derive(Debug)]
pub struct PendingInvocation {
    request_id: u32,
    receiver: oneshot::Receiver<Result<Message>>,
}

impl PendingInvocation {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Outcome already delivered, if any
    fn take_delivered(&mut self) -> Option<Result<Message>> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct Inner {
    waiters: HashMap<u32, Slot>,
    closed: bool,
}

#[derive(Default)]
pub struct ResponseWaitingRoom {
    inner: Mutex<Inner>,
}

impl ResponseWaitingRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_waiter(&self, request_id: u32) -> Result<PendingInvocation> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TransportError::ConnectionClosed);
        }
        if inner.waiters.contains_key(&request_id) {
            error!("request id {} registered twice", request_id);
            return Err(TransportError::DuplicateRequestId(request_id));
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(request_id, tx);
        trace!("registered waiter for request {}", request_id);
        Ok(PendingInvocation {
            request_id,
            receiver: rx,
        })
    }

    /// Deliver a reply to the waiter named by its request id.
    ///
    /// Returns false when nobody is waiting; the message is dropped.
    pub fn response_received(&self, message: Message) -> bool {
        let Some(request_id) = message.request_id() else {
            debug!("discarding {:?} without request id", message.msg_type());
            return false;
        };
        self.deliver(request_id, Ok(message))
    }

    /// Resolve one waiter with an arbitrary outcome
    pub fn deliver(&self, request_id: u32, outcome: Result<Message>) -> bool {
        let slot = self.inner.lock().waiters.remove(&request_id);
        match slot {
            Some(tx) => {
                // The receiver may be gone if the invoker stopped waiting
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!("discarding reply for unregistered request {}", request_id);
                false
            }
        }
    }

    /// Cancel a waiter. Returns false when the reply won the race.
    pub fn unregister_waiter(&self, request_id: u32) -> bool {
        let removed = self.inner.lock().waiters.remove(&request_id).is_some();
        if removed {
            trace!("unregistered waiter for request {}", request_id);
        }
        removed
    }

    /// Fail every current waiter with `error`. Returns how many were failed.
    pub fn signal_exception_to_all_waiters(&self, error: TransportError) -> usize {
        let drained: Vec<(u32, Slot)> = self.inner.lock().waiters.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        if count > 0 {
            debug!("signalled {} waiters: {}", count, error);
        }
        count
    }

    /// Reject future registrations and fail current waiters
    pub fn close(&self, error: TransportError) -> usize {
        self.inner.lock().closed = true;
        self.signal_exception_to_all_waiters(error)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub async fn wait_for_response(&self, invocation: PendingInvocation) -> Result<Message> {
        match invocation.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::ConnectionClosed),
        }
    }

    /// Wait at most `timeout`; on expiry the waiter is unregistered
    pub async fn wait_for_response_timeout(
        &self,
        mut invocation: PendingInvocation,
        timeout: Duration,
    ) -> Result<Message> {
        match tokio::time::timeout(timeout, &mut invocation.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => self.give_up(&mut invocation),
        }
    }

    /// Wait in slices handed out by `backoff` until a reply arrives or the
    /// timer expires
    pub async fn wait_for_response_with_backoff(
        &self,
        mut invocation: PendingInvocation,
        backoff: &mut BackoffTimer,
    ) -> Result<Message> {
        loop {
            let slice = backoff.get_time_for_sleep();
            match tokio::time::timeout(slice, &mut invocation.receiver).await {
                Ok(Ok(outcome)) => return outcome,
                Ok(Err(_)) => return Err(TransportError::ConnectionClosed),
                Err(_) if backoff.is_expired() => return self.give_up(&mut invocation),
                Err(_) => backoff.advance(),
            }
        }
    }

    fn give_up(&self, invocation: &mut PendingInvocation) -> Result<Message> {
        if self.unregister_waiter(invocation.request_id) {
            debug!("request {} timed out", invocation.request_id);
            return Err(TransportError::Timeout);
        }
        // Delivery won the race; the outcome is already in the slot
        invocation
            .take_delivered()
            .unwrap_or(Err(TransportError::Timeout))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self, request_id: u32) -> bool {
        self.inner.lock().waiters.contains_key(&request_id)
    }
}
