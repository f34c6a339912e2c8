//! Interceptor hook points
//!
//! Interceptor logic lives outside this crate; what this module guarantees is
//! the order in which hooks fire. Client side, per attempt:
//!
//! ```text
//! send_request ──► receive_reply | receive_exception | receive_other
//! ```
//!
//! Server side, per request:
//!
//! ```text
//! receive_request_service_contexts ──► receive_request ──► send_reply | send_exception | send_other
//! ```
//!
//! Every hook receives the same [`InterceptorState`], which records the
//! sequence of points and the number of requests still open. A finished
//! request always leaves the state balanced.

use crate::error::TransportError;
use bytes::Bytes;
use giop::ReplyStatus;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptionPoint {
    SendRequest,
    ReceiveReply,
    ReceiveException,
    ReceiveOther,
    ReceiveRequestServiceContexts,
    ReceiveRequest,
    SendReply,
    SendException,
    SendOther,
}

impl InterceptionPoint {
    /// +1 for points that open a request, -1 for points that end it
    fn balance_delta(self) -> i64 {
        match self {
            Self::SendRequest | Self::ReceiveRequestServiceContexts => 1,
            Self::ReceiveRequest => 0,
            Self::ReceiveReply
            | Self::ReceiveException
            | Self::ReceiveOther
            | Self::SendReply
            | Self::SendException
            | Self::SendOther => -1,
        }
    }
}

/// Explicit per-request (or per-test) interceptor bookkeeping
#[derive(Debug, Clone, Default)]
pub struct InterceptorState {
    steps: Vec<InterceptionPoint>,
    open_points: i64,
}

impl InterceptorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.steps.clear();
        self.open_points = 0;
    }

    pub fn record(&mut self, point: InterceptionPoint) {
        self.steps.push(point);
        self.open_points += point.balance_delta();
    }

    pub fn steps(&self) -> &[InterceptionPoint] {
        &self.steps
    }

    pub fn step(&self) -> usize {
        self.steps.len()
    }

    pub fn open_points(&self) -> i64 {
        self.open_points
    }

    pub fn is_balanced(&self) -> bool {
        self.open_points == 0
    }
}

/// What an interceptor can see about a request
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_id: u32,
    pub operation: String,
    pub object_key: Bytes,
    pub response_expected: bool,
    pub reply_status: Option<ReplyStatus>,
}

impl RequestInfo {
    pub fn new(request_id: u32, operation: impl Into<String>, object_key: Bytes) -> Self {
        Self {
            request_id,
            operation: operation.into(),
            object_key,
            response_expected: true,
            reply_status: None,
        }
    }
}

#[allow(unused_variables)]
pub trait ClientRequestInterceptor: Send + Sync {
    fn name(&self) -> &str;
    fn send_request(&self, state: &mut InterceptorState, info: &RequestInfo) {}
    fn receive_reply(&self, state: &mut InterceptorState, info: &RequestInfo) {}
    fn receive_exception(&self, state: &mut InterceptorState, info: &RequestInfo, error: &TransportError) {}
    fn receive_other(&self, state: &mut InterceptorState, info: &RequestInfo) {}
}

#[allow(unused_variables)]
pub trait ServerRequestInterceptor: Send + Sync {
    fn name(&self) -> &str;
    fn receive_request_service_contexts(&self, state: &mut InterceptorState, info: &RequestInfo) {}
    fn receive_request(&self, state: &mut InterceptorState, info: &RequestInfo) {}
    fn send_reply(&self, state: &mut InterceptorState, info: &RequestInfo) {}
    fn send_exception(&self, state: &mut InterceptorState, info: &RequestInfo) {}
    fn send_other(&self, state: &mut InterceptorState, info: &RequestInfo) {}
}

/// Registered interceptors, invoked in registration order
#[derive(Default)]
pub struct InterceptorChain {
    client: RwLock<Vec<Arc<dyn ClientRequestInterceptor>>>,
    server: RwLock<Vec<Arc<dyn ServerRequestInterceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&self, interceptor: Arc<dyn ClientRequestInterceptor>) {
        self.client.write().push(interceptor);
    }

    pub fn add_server(&self, interceptor: Arc<dyn ServerRequestInterceptor>) {
        self.server.write().push(interceptor);
    }

    fn clients(&self) -> Vec<Arc<dyn ClientRequestInterceptor>> {
        self.client.read().clone()
    }

    fn servers(&self) -> Vec<Arc<dyn ServerRequestInterceptor>> {
        self.server.read().clone()
    }

    pub fn send_request(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::SendRequest);
        for i in self.clients() {
            i.send_request(state, info);
        }
    }

    pub fn receive_reply(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::ReceiveReply);
        for i in self.clients() {
            i.receive_reply(state, info);
        }
    }

    pub fn receive_exception(&self, state: &mut InterceptorState, info: &RequestInfo, error: &TransportError) {
        state.record(InterceptionPoint::ReceiveException);
        for i in self.clients() {
            i.receive_exception(state, info, error);
        }
    }

    pub fn receive_other(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::ReceiveOther);
        for i in self.clients() {
            i.receive_other(state, info);
        }
    }

    pub fn receive_request_service_contexts(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::ReceiveRequestServiceContexts);
        for i in self.servers() {
            i.receive_request_service_contexts(state, info);
        }
    }

    pub fn receive_request(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::ReceiveRequest);
        for i in self.servers() {
            i.receive_request(state, info);
        }
    }

    pub fn send_reply(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::SendReply);
        for i in self.servers() {
            i.send_reply(state, info);
        }
    }

    pub fn send_exception(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::SendException);
        for i in self.servers() {
            i.send_exception(state, info);
        }
    }

    pub fn send_other(&self, state: &mut InterceptorState, info: &RequestInfo) {
        state.record(InterceptionPoint::SendOther);
        for i in self.servers() {
            i.send_other(state, info);
        }
    }

    /// Server-side ending point for a reply with `status`
    pub fn send_for_status(&self, state: &mut InterceptorState, info: &RequestInfo, status: ReplyStatus) {
        match status {
            ReplyStatus::NoException => self.send_reply(state, info),
            ReplyStatus::UserException | ReplyStatus::SystemException => {
                self.send_exception(state, info)
            }
            ReplyStatus::LocationForward
            | ReplyStatus::LocationForwardPerm
            | ReplyStatus::NeedsAddressingMode => self.send_other(state, info),
        }
    }
}
