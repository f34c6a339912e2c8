//! Client invocation driver
//!
//! Walks a [`ContactInfoList`] for one request: connect, send, wait, and turn
//! every reply status into the next step for the failover iterator. A pass
//! that ends with a retryable failure is repeated after a backoff wait until
//! the backoff timer expires.

use crate::backoff::BackoffTimer;
use crate::connection::Connection;
use crate::contact_info::{ContactInfo, ContactInfoIterator, ContactInfoList, ReportOutcome};
use crate::error::{Result, TransportError};
use crate::interceptor::{InterceptorState, RequestInfo};
use crate::transport_manager::TransportManager;
use bytes::Bytes;
use giop::{AddressingDisposition, Ior, Message, ReplyStatus, RequestMessage};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What one attempt against one contact info came to
enum Attempt {
    /// The target answered; user exceptions end up here too
    Completed(Result<Bytes>),
    Failed(TransportError),
    Forward(Ior),
    NeedsAddressingMode(AddressingDisposition),
}

pub struct ClientInvocation {
    manager: Arc<TransportManager>,
    list: ContactInfoList,
    operation: String,
    body: Bytes,
    response_expected: bool,
    state: InterceptorState,
}

impl ClientInvocation {
    pub fn new(
        manager: Arc<TransportManager>,
        list: ContactInfoList,
        operation: impl Into<String>,
        body: Bytes,
    ) -> Self {
        Self {
            manager,
            list,
            operation: operation.into(),
            body,
            response_expected: true,
            state: InterceptorState::new(),
        }
    }

    /// Send without waiting for a reply
    pub fn oneway(mut self) -> Self {
        self.response_expected = false;
        self
    }

    pub fn interceptor_state(&self) -> &InterceptorState {
        &self.state
    }

    pub fn list(&self) -> &ContactInfoList {
        &self.list
    }

    /// Run the request to completion.
    ///
    /// Returns the reply body, or an empty body for a oneway request.
    pub async fn invoke(&mut self) -> Result<Bytes> {
        let stats = self.manager.stats().clone();
        stats.invocations.fetch_add(1, Ordering::Relaxed);
        let mut backoff = BackoffTimer::from_config(&self.manager.config().backoff);

        loop {
            let mut iterator = self.list.iterator();
            let result = self.run_pass(&mut iterator).await;
            stats
                .redirects_followed
                .fetch_add(iterator.redirects() as u64, Ordering::Relaxed);
            stats
                .failovers
                .fetch_add(iterator.exceptions() as u64, Ordering::Relaxed);

            match result {
                Err(err) if err.is_retryable() && !backoff.is_expired() => {
                    debug!(
                        "{}: every endpoint failed ({}), retrying after {:?}",
                        self.operation,
                        err,
                        backoff.current()
                    );
                    backoff.sleep().await;
                }
                Err(err) => {
                    if !matches!(err, TransportError::UserException(_)) {
                        stats.invocation_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    return Err(err);
                }
                Ok(body) => return Ok(body),
            }
        }
    }

    async fn run_pass(&mut self, iterator: &mut ContactInfoIterator) -> Result<Bytes> {
        while let Some(ci) = iterator.next() {
            let outcome = match self.attempt(&ci).await {
                Attempt::Completed(result) => {
                    iterator.report_success(&ci);
                    return result;
                }
                Attempt::Failed(err) => iterator.report_exception(&ci, err),
                Attempt::Forward(reference) => iterator.report_redirect(&ci, reference),
                Attempt::NeedsAddressingMode(disposition) => {
                    iterator.report_addr_disposition_retry(&ci, disposition)
                }
            };
            if outcome == ReportOutcome::Exhausted {
                break;
            }
        }
        Err(iterator.failure())
    }

    async fn attempt(&mut self, ci: &ContactInfo) -> Attempt {
        let connection = match self.manager.get_outbound_connection(ci).await {
            Ok(connection) => connection,
            Err(err) => return Attempt::Failed(err),
        };
        let attempt = self.exchange(&connection, ci).await;
        self.manager.release_outbound(&connection);
        attempt
    }

    async fn exchange(&mut self, connection: &Connection, ci: &ContactInfo) -> Attempt {
        let request_id = match connection.allocate_request_id() {
            Ok(id) => id,
            Err(err) => {
                connection.close();
                return Attempt::Failed(err);
            }
        };

        let interceptors = self.manager.interceptors().clone();
        let mut info = RequestInfo::new(request_id, self.operation.as_str(), ci.object_key().clone());
        info.response_expected = self.response_expected;
        interceptors.send_request(&mut self.state, &info);

        let request = RequestMessage {
            request_id,
            response_expected: self.response_expected,
            target: ci.target_address(),
            operation: self.operation.clone(),
            body: self.body.clone(),
        };
        trace!("{}: request {} to {} on connection {}", self.operation, request_id, ci, connection.id());

        let pending = match connection.send_request(request).await {
            Ok(pending) => pending,
            Err(err) => {
                interceptors.receive_exception(&mut self.state, &info, &err);
                return Attempt::Failed(err);
            }
        };
        let Some(pending) = pending else {
            interceptors.receive_other(&mut self.state, &info);
            return Attempt::Completed(Ok(Bytes::new()));
        };

        let timeout = self.manager.config().request_timeout;
        let reply = match connection.wait_for_response_timeout(pending, timeout).await {
            Ok(Message::Reply(reply)) => reply,
            Ok(other) => {
                let err = TransportError::Protocol(format!(
                    "{:?} in answer to request {}",
                    other.msg_type(),
                    request_id
                ));
                connection.abort(err.clone());
                interceptors.receive_exception(&mut self.state, &info, &err);
                return Attempt::Failed(err);
            }
            Err(TransportError::Timeout) => {
                warn!("{}: no reply to request {} within {:?}", self.operation, request_id, timeout);
                if let Err(err) = connection.send_cancel(request_id).await {
                    debug!("cancel of request {} not sent: {}", request_id, err);
                }
                interceptors.receive_exception(&mut self.state, &info, &TransportError::Timeout);
                return Attempt::Failed(TransportError::Timeout);
            }
            Err(err) => {
                interceptors.receive_exception(&mut self.state, &info, &err);
                return Attempt::Failed(err);
            }
        };

        info.reply_status = Some(reply.status);
        match reply.status {
            ReplyStatus::NoException => {
                interceptors.receive_reply(&mut self.state, &info);
                Attempt::Completed(Ok(reply.body))
            }
            ReplyStatus::UserException => {
                let err = TransportError::UserException(reply.body);
                interceptors.receive_exception(&mut self.state, &info, &err);
                Attempt::Completed(Err(err))
            }
            ReplyStatus::SystemException => {
                let err = match reply.decode_system_exception() {
                    Ok(ex) => TransportError::SystemException(ex),
                    Err(e) => e.into(),
                };
                interceptors.receive_exception(&mut self.state, &info, &err);
                Attempt::Failed(err)
            }
            ReplyStatus::LocationForward | ReplyStatus::LocationForwardPerm => {
                match reply.decode_forward() {
                    Ok(reference) => {
                        interceptors.receive_other(&mut self.state, &info);
                        Attempt::Forward(reference)
                    }
                    Err(e) => {
                        let err = TransportError::from(e);
                        interceptors.receive_exception(&mut self.state, &info, &err);
                        Attempt::Failed(err)
                    }
                }
            }
            ReplyStatus::NeedsAddressingMode => match reply.decode_disposition() {
                Ok(disposition) => {
                    interceptors.receive_other(&mut self.state, &info);
                    Attempt::NeedsAddressingMode(disposition)
                }
                Err(e) => {
                    let err = TransportError::from(e);
                    interceptors.receive_exception(&mut self.state, &info, &err);
                    Attempt::Failed(err)
                }
            },
        }
    }
}
