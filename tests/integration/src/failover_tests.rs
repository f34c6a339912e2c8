//! Failover Tests - Alternate Endpoints, Redirects and Addressing Modes
//!
//! - Dead primary endpoint with a live alternate
//! - Sticky failover across invocations
//! - Every endpoint dead, bounded by the backoff timer
//! - Location forwards, including a forwarding loop
//! - NeedsAddressingMode retries on the same endpoint
//! - Peer shutdown purging cached connections

mod common;

use bytes::Bytes;
use common::*;
use giop::AddressingDisposition;
use orb_transport::{ClientInvocation, InterceptionPoint, TransportError, TransportManager};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_dead_primary_fails_over_to_alternate() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let dead = dead_port().await;
    let reference = reference_on_ports(&[dead, server.port()], ECHO_KEY);

    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(reference);
    let reply = client.invoke(&list, "echo", Bytes::from_static(b"failover")).await.unwrap();
    assert_eq!(reply.as_ref(), b"failover");

    let stats = client.stats().snapshot();
    assert_eq!(stats.connect_failures, 1);
    assert_eq!(stats.failovers, 1);
    assert_eq!(stats.connections_opened, 1);

    // Without sticky failover the dead primary is tried again
    client.invoke(&list, "echo", Bytes::new()).await.unwrap();
    assert_eq!(client.stats().snapshot().connect_failures, 2);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_sticky_failover_skips_known_bad_endpoint() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let dead = dead_port().await;
    let reference = reference_on_ports(&[dead, server.port()], ECHO_KEY);

    let client = TransportManager::builder(test_config())
        .with_sticky_failover(true)
        .build()
        .unwrap();
    let list = client.contact_info_list(reference);

    for _ in 0..5 {
        client.invoke(&list, "echo", Bytes::from_static(b"sticky")).await.unwrap();
    }
    let stats = client.stats().snapshot();
    assert_eq!(stats.connect_failures, 1);
    assert_eq!(stats.connections_reused, 4);

    let primary = list.contact_infos()[0].clone();
    let remembered = client.sticky_table().unwrap().current(&primary).unwrap();
    assert_eq!(remembered.endpoint().port(), server.port());

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_all_endpoints_dead() {
    init_logging();
    let reference = reference_on_ports(&[dead_port().await, dead_port().await], ECHO_KEY);
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(reference);

    let started = Instant::now();
    let err = client.invoke(&list, "echo", Bytes::new()).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectFailed { .. }), "{:?}", err);
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(2));

    // Several passes ran before the backoff timer expired
    let stats = client.stats().snapshot();
    assert!(stats.connect_failures >= 4, "{:?}", stats);
    assert_eq!(stats.invocation_failures, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_location_forward_is_followed() {
    init_logging();
    let origin = TestServer::start(test_config()).await;
    let replica = TestServer::start(test_config()).await;
    let target = replica.reference().await;
    origin.registry.forward(Bytes::from_static(b"moved"), target.clone(), false);

    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(origin.reference_for(b"moved").await);

    let mut invocation = ClientInvocation::new(client.clone(), list.clone(), "echo", Bytes::from_static(b"hop"));
    let reply = invocation.invoke().await.unwrap();
    assert_eq!(reply.as_ref(), b"hop");
    assert_eq!(
        invocation.interceptor_state().steps(),
        &[
            InterceptionPoint::SendRequest,
            InterceptionPoint::ReceiveOther,
            InterceptionPoint::SendRequest,
            InterceptionPoint::ReceiveReply,
        ]
    );
    assert!(invocation.interceptor_state().is_balanced());

    // The list now points at the replica; the next call goes there directly
    assert_eq!(*list.effective_reference(), target);
    client.invoke(&list, "echo", Bytes::new()).await.unwrap();
    assert_eq!(client.stats().snapshot().redirects_followed, 1);

    client.shutdown().await;
    origin.shutdown().await;
    replica.shutdown().await;
}

#[tokio::test]
async fn test_forwarding_loop_hits_hop_limit() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let looping = server.reference_for(b"loop").await;
    server.registry.forward(Bytes::from_static(b"loop"), looping.clone(), true);

    let mut config = test_config();
    config.max_redirect_hops = 3;
    let client = TransportManager::new(config).unwrap();
    let list = client.contact_info_list(looping);

    let err = client.invoke(&list, "echo", Bytes::new()).await.unwrap_err();
    assert!(matches!(err, TransportError::RedirectLimitExceeded(3)), "{:?}", err);
    assert_eq!(client.stats().snapshot().redirects_followed, 4);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_addressing_mode_retry() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    server.registry.require_disposition(Some(AddressingDisposition::Reference));

    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);
    let mut invocation = ClientInvocation::new(client.clone(), list, "echo", Bytes::from_static(b"addr"));
    let reply = invocation.invoke().await.unwrap();
    assert_eq!(reply.as_ref(), b"addr");
    assert_eq!(invocation.interceptor_state().step(), 4);
    assert_eq!(client.stats().snapshot().connections_opened, 1);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_peer_shutdown_purges_cached_connection() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);

    client.invoke(&list, "echo", Bytes::new()).await.unwrap();
    assert_eq!(client.outbound_cache().number_of_connections(), 1);

    server.shutdown().await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while client.outbound_cache().number_of_connections() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.outbound_cache().number_of_connections(), 0);

    let err = client.invoke(&list, "echo", Bytes::new()).await.unwrap_err();
    assert!(err.is_retryable(), "{:?}", err);

    client.shutdown().await;
}
