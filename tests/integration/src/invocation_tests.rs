//! Invocation Tests - End-to-End Requests over Loopback
//!
//! A client transport manager invoking a server transport manager:
//! - Plain request/reply and connection reuse
//! - User and system exceptions
//! - Oneway requests
//! - Request timeout and cancellation
//! - Interceptor ordering on both sides

mod common;

use bytes::Bytes;
use common::*;
use giop::{Reader, ByteOrder, SystemExceptionKind};
use orb_transport::{
    ClientInvocation, ClientRequestInterceptor, InterceptionPoint, InterceptorChain,
    InterceptorState, RequestInfo, ServerRequestInterceptor, TransportError, TransportManager,
};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_echo_round_trip() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);

    let binary: Vec<u8> = (0..=255).collect();
    for payload in [Bytes::from("Hello, ORB!"), Bytes::from(binary), Bytes::new()] {
        let reply = client.invoke(&list, "echo", payload.clone()).await.unwrap();
        assert_eq!(reply, payload);
    }

    let stats = client.stats().snapshot();
    assert_eq!(stats.invocations, 3);
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.invocation_failures, 0);
    assert_eq!(server.manager.inbound_cache().number_of_connections(), 1);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_user_exception_reaches_caller() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);

    let err = client.invoke(&list, "oops", Bytes::from_static(b"detail")).await.unwrap_err();
    let TransportError::UserException(body) = err else {
        panic!("expected a user exception, got {:?}", err);
    };
    let mut reader = Reader::new(body, ByteOrder::native());
    assert_eq!(reader.get_string().unwrap(), OOPS_ID);

    // The connection survives a user exception
    let reply = client.invoke(&list, "echo", Bytes::from_static(b"after")).await.unwrap();
    assert_eq!(reply.as_ref(), b"after");
    assert_eq!(client.stats().snapshot().connections_opened, 1);
    assert_eq!(client.stats().snapshot().invocation_failures, 0);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_system_exceptions() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();

    let list = client.contact_info_list(server.reference().await);
    match client.invoke(&list, "no_such_operation", Bytes::new()).await {
        Err(TransportError::SystemException(ex)) => assert_eq!(ex.kind, SystemExceptionKind::BadOperation),
        other => panic!("unexpected {:?}", other),
    }

    let unknown = client.contact_info_list(server.reference_for(b"nobody").await);
    match client.invoke(&unknown, "echo", Bytes::new()).await {
        Err(TransportError::SystemException(ex)) => assert_eq!(ex.kind, SystemExceptionKind::ObjectNotExist),
        other => panic!("unexpected {:?}", other),
    }

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_oneway_is_delivered() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);

    for _ in 0..5 {
        client.invoke_oneway(&list, "record", Bytes::new()).await.unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.calls.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.calls.load(Ordering::SeqCst), 5);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_timeout_cancels_request() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let mut config = test_config();
    config.request_timeout = Duration::from_millis(100);
    let client = TransportManager::new(config).unwrap();
    let list = client.contact_info_list(server.reference().await);

    let started = Instant::now();
    let err = client
        .invoke(&list, "slow", Bytes::copy_from_slice(&500u32.to_le_bytes()))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout), "{:?}", err);
    assert!(started.elapsed() < Duration::from_millis(450));

    // The late reply is suppressed or discarded; the connection keeps working
    tokio::time::sleep(Duration::from_millis(500)).await;
    let reply = client.invoke(&list, "echo", Bytes::from_static(b"still here")).await.unwrap();
    assert_eq!(reply.as_ref(), b"still here");
    assert_eq!(client.stats().snapshot().connections_opened, 1);

    client.shutdown().await;
    server.shutdown().await;
}

/// Records every point it sees, in order
#[derive(Default)]
struct RecordingInterceptor {
    seen: Mutex<Vec<InterceptionPoint>>,
}

impl ClientRequestInterceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        "recording-client"
    }

    fn send_request(&self, _state: &mut InterceptorState, _info: &RequestInfo) {
        self.seen.lock().push(InterceptionPoint::SendRequest);
    }

    fn receive_reply(&self, _state: &mut InterceptorState, _info: &RequestInfo) {
        self.seen.lock().push(InterceptionPoint::ReceiveReply);
    }

    fn receive_exception(&self, _state: &mut InterceptorState, _info: &RequestInfo, _error: &TransportError) {
        self.seen.lock().push(InterceptionPoint::ReceiveException);
    }

    fn receive_other(&self, _state: &mut InterceptorState, _info: &RequestInfo) {
        self.seen.lock().push(InterceptionPoint::ReceiveOther);
    }
}

impl ServerRequestInterceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        "recording-server"
    }

    fn receive_request_service_contexts(&self, state: &mut InterceptorState, _info: &RequestInfo) {
        assert_eq!(state.open_points(), 1);
        self.seen.lock().push(InterceptionPoint::ReceiveRequestServiceContexts);
    }

    fn receive_request(&self, _state: &mut InterceptorState, _info: &RequestInfo) {
        self.seen.lock().push(InterceptionPoint::ReceiveRequest);
    }

    fn send_reply(&self, state: &mut InterceptorState, _info: &RequestInfo) {
        assert!(state.is_balanced());
        self.seen.lock().push(InterceptionPoint::SendReply);
    }

    fn send_exception(&self, _state: &mut InterceptorState, _info: &RequestInfo) {
        self.seen.lock().push(InterceptionPoint::SendException);
    }

    fn send_other(&self, _state: &mut InterceptorState, _info: &RequestInfo) {
        self.seen.lock().push(InterceptionPoint::SendOther);
    }
}

#[tokio::test]
async fn test_interceptor_ordering() {
    init_logging();
    use InterceptionPoint::*;

    let server_side = Arc::new(RecordingInterceptor::default());
    let chain = Arc::new(InterceptorChain::new());
    chain.add_server(server_side.clone());
    let server = TestServer::start_with(test_config(), |b| b.with_interceptors(chain)).await;

    let client_side = Arc::new(RecordingInterceptor::default());
    let client_chain = Arc::new(InterceptorChain::new());
    client_chain.add_client(client_side.clone());
    let client = TransportManager::builder(test_config())
        .with_interceptors(client_chain)
        .build()
        .unwrap();
    let list = client.contact_info_list(server.reference().await);

    let mut invocation = ClientInvocation::new(client.clone(), list.clone(), "echo", Bytes::from_static(b"x"));
    invocation.invoke().await.unwrap();
    assert_eq!(invocation.interceptor_state().steps(), &[SendRequest, ReceiveReply]);
    assert!(invocation.interceptor_state().is_balanced());

    let mut failing = ClientInvocation::new(client.clone(), list, "oops", Bytes::new());
    assert!(failing.invoke().await.is_err());
    assert_eq!(failing.interceptor_state().steps(), &[SendRequest, ReceiveException]);
    assert!(failing.interceptor_state().is_balanced());

    assert_eq!(
        *client_side.seen.lock(),
        vec![SendRequest, ReceiveReply, SendRequest, ReceiveException]
    );
    assert_eq!(
        *server_side.seen.lock(),
        vec![
            ReceiveRequestServiceContexts,
            ReceiveRequest,
            SendReply,
            ReceiveRequestServiceContexts,
            ReceiveRequest,
            SendException,
        ]
    );

    client.shutdown().await;
    server.shutdown().await;
}
