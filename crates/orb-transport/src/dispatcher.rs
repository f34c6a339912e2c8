//! Server-side request dispatch
//!
//! [`RequestDispatcher`] is the seam to the object adapter. [`ObjectRegistry`]
//! is a small adapter keyed by object key, enough to serve requests in tests
//! and demos.

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use giop::{
    AddressingDisposition, ByteOrder, CompletionStatus, Ior, LocateReplyMessage,
    LocateRequestMessage, LocateStatus, ReplyMessage, ReplyStatus, RequestMessage,
    SystemException, SystemExceptionKind, TargetAddress, Writer,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of running one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Reply(Bytes),
    UserException(Bytes),
    SystemException(SystemException),
    Forward { ior: Ior, permanent: bool },
    NeedsAddressingMode(AddressingDisposition),
}

impl DispatchOutcome {
    pub fn system(kind: SystemExceptionKind, completed: CompletionStatus) -> Self {
        Self::SystemException(SystemException::new(kind, 0, completed))
    }

    pub fn into_reply(self, request_id: u32) -> ReplyMessage {
        match self {
            Self::Reply(body) => ReplyMessage::new(request_id, body),
            Self::UserException(body) => {
                ReplyMessage::with_status(request_id, ReplyStatus::UserException, body)
            }
            Self::SystemException(ex) => ReplyMessage::system_exception(request_id, &ex),
            Self::Forward { ior, permanent } => {
                ReplyMessage::location_forward(request_id, &ior, permanent)
            }
            Self::NeedsAddressingMode(disposition) => {
                ReplyMessage::needs_addressing_mode(request_id, disposition)
            }
        }
    }
}

pub trait RequestDispatcher: Send + Sync {
    fn dispatch(&self, request: RequestMessage) -> BoxFuture<'static, DispatchOutcome>;

    fn locate(&self, request: &LocateRequestMessage) -> LocateReplyMessage {
        LocateReplyMessage {
            request_id: request.request_id,
            status: LocateStatus::ObjectHere,
            body: Bytes::new(),
        }
    }
}

/// Operation handler function type
pub type OperationHandler =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = DispatchOutcome> + Send>> + Send + Sync>;

/// Operations served under one object key
#[derive(Default)]
pub struct Servant {
    operations: HashMap<String, OperationHandler>,
}

impl Servant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_operation<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchOutcome> + Send + 'static,
    {
        self.operations
            .insert(name.to_string(), Arc::new(move |args| Box::pin(handler(args))));
    }

    /// Builder form of `register_operation`
    pub fn operation<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchOutcome> + Send + 'static,
    {
        self.register_operation(name, handler);
        self
    }

    pub fn get_operation(&self, name: &str) -> Option<&OperationHandler> {
        self.operations.get(name)
    }
}

/// Object key → servant, with optional forwarding entries
#[derive(Default)]
pub struct ObjectRegistry {
    servants: RwLock<HashMap<Bytes, Arc<Servant>>>,
    forwards: RwLock<HashMap<Bytes, (Ior, bool)>>,
    required_disposition: RwLock<Option<AddressingDisposition>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, object_key: impl Into<Bytes>, servant: Servant) {
        let key = object_key.into();
        info!("registering servant for key {:?}", key);
        self.servants.write().insert(key, Arc::new(servant));
    }

    pub fn unregister(&self, object_key: &[u8]) -> bool {
        self.servants.write().remove(object_key).is_some()
    }

    /// Answer requests for `object_key` with a location forward
    pub fn forward(&self, object_key: impl Into<Bytes>, ior: Ior, permanent: bool) {
        self.forwards.write().insert(object_key.into(), (ior, permanent));
    }

    /// Reject requests not addressed with `disposition`
    pub fn require_disposition(&self, disposition: Option<AddressingDisposition>) {
        *self.required_disposition.write() = disposition;
    }
}

impl RequestDispatcher for ObjectRegistry {
    fn dispatch(&self, request: RequestMessage) -> BoxFuture<'static, DispatchOutcome> {
        if let Some(required) = *self.required_disposition.read() {
            if request.target.disposition() != required {
                debug!(
                    "request {} used {:?}, asking for {:?}",
                    request.request_id,
                    request.target.disposition(),
                    required
                );
                return Box::pin(async move { DispatchOutcome::NeedsAddressingMode(required) });
            }
        }

        let Some(key) = target_object_key(&request.target) else {
            return Box::pin(async {
                DispatchOutcome::system(SystemExceptionKind::BadParam, CompletionStatus::No)
            });
        };

        if let Some((ior, permanent)) = self.forwards.read().get(&key).cloned() {
            return Box::pin(async move { DispatchOutcome::Forward { ior, permanent } });
        }

        let servant = self.servants.read().get(&key).cloned();
        let Some(servant) = servant else {
            return Box::pin(async {
                DispatchOutcome::system(SystemExceptionKind::ObjectNotExist, CompletionStatus::No)
            });
        };

        match servant.get_operation(&request.operation) {
            Some(handler) => handler(request.body),
            None => Box::pin(async {
                DispatchOutcome::system(SystemExceptionKind::BadOperation, CompletionStatus::No)
            }),
        }
    }

    fn locate(&self, request: &LocateRequestMessage) -> LocateReplyMessage {
        let reply = |status, body| LocateReplyMessage {
            request_id: request.request_id,
            status,
            body,
        };
        let Some(key) = target_object_key(&request.target) else {
            return reply(LocateStatus::UnknownObject, Bytes::new());
        };
        if let Some((ior, permanent)) = self.forwards.read().get(&key) {
            let status = if *permanent {
                LocateStatus::ObjectForwardPerm
            } else {
                LocateStatus::ObjectForward
            };
            return reply(status, ior.encode());
        }
        if self.servants.read().contains_key(&key) {
            reply(LocateStatus::ObjectHere, Bytes::new())
        } else {
            reply(LocateStatus::UnknownObject, Bytes::new())
        }
    }
}

/// Object key named by a request target, whatever its addressing disposition
pub fn target_object_key(target: &TargetAddress) -> Option<Bytes> {
    match target {
        TargetAddress::Key(key) => Some(key.clone()),
        TargetAddress::Profile(profile) => Some(profile.object_key.clone()),
        TargetAddress::Reference {
            selected_profile,
            ior,
        } => ior
            .iiop_profiles()
            .nth(*selected_profile as usize)
            .map(|p| p.object_key.clone()),
    }
}

/// Encode a user exception body as its repository id followed by `payload`
pub fn user_exception_body(repository_id: &str, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    let mut w = Writer::new(&mut buf, ByteOrder::native());
    w.put_string(repository_id);
    w.put_raw(payload);
    buf.freeze()
}
