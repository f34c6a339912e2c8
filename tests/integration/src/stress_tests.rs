//! Stress Tests - Concurrency at Scale
//!
//! These tests exercise races in the connection layer by:
//! - Running many concurrent invocations against one server
//! - Checking data integrity under load
//! - Reclaiming idle connections while and after load runs
//! - Reclaiming server connections while a request is still running
//! - Spreading connections over several multiplexers

mod common;

use bytes::Bytes;
use common::*;
use futures::future::join_all;
use orb_transport::{DispatchOutcome, Servant, TransportManager};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_high_concurrency_many_clients() {
    init_logging();
    const NUM_CLIENTS: usize = 32;
    const REQUESTS_PER_CLIENT: usize = 50;

    let server = TestServer::start(test_config()).await;
    let reference = server.reference().await;
    let stats = Arc::new(ConcurrentStats::new());
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));

    let mut handles = Vec::new();
    for client_id in 0..NUM_CLIENTS {
        let stats = stats.clone();
        let barrier = barrier.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            let client = TransportManager::new(test_config()).unwrap();
            let list = client.contact_info_list(reference);
            barrier.wait().await;

            for req_id in 0..REQUESTS_PER_CLIENT {
                let payload = Bytes::from(format!("client_{}_request_{}", client_id, req_id));
                let started = Instant::now();
                match client.invoke(&list, "echo", payload.clone()).await {
                    Ok(reply) if reply == payload => stats.record_success(started.elapsed()),
                    Ok(_) => stats.record_data_corruption(),
                    Err(e) => {
                        eprintln!("client {} request {} failed: {}", client_id, req_id, e);
                        stats.record_failure();
                    }
                }
            }
            client.shutdown().await;
        }));
    }
    join_all(handles).await;

    stats.print_report("High Concurrency Test Results");
    assert_eq!(stats.success_count(), (NUM_CLIENTS * REQUESTS_PER_CLIENT) as u64);
    assert_eq!(stats.data_corruption_count(), 0);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_shared_manager_under_load() {
    init_logging();
    const NUM_TASKS: usize = 24;
    const REQUESTS_PER_TASK: usize = 40;

    let mut config = test_config();
    config.multiplexer_count = 4;
    let server = TestServer::start(config.clone()).await;
    let client = TransportManager::new(config).unwrap();
    let list = client.contact_info_list(server.reference().await);
    let stats = Arc::new(ConcurrentStats::new());

    let handles = (0..NUM_TASKS).map(|task| {
        let client = client.clone();
        let list = list.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            for i in 0..REQUESTS_PER_TASK {
                let payload = generate_pattern(16 + task * 7 + i);
                let started = Instant::now();
                match client.invoke(&list, "checksum", payload.clone()).await {
                    Ok(sum) if sum.as_ref() == compute_checksum(&payload).to_le_bytes() => {
                        stats.record_success(started.elapsed())
                    }
                    Ok(_) => stats.record_data_corruption(),
                    Err(_) => stats.record_failure(),
                }
            }
        })
    });
    join_all(handles).await;

    stats.print_report("Shared Manager Under Load");
    assert_eq!(stats.success_count(), (NUM_TASKS * REQUESTS_PER_TASK) as u64);

    // Busy connections are exclusive, so the cache holds at most one per task
    let cache = client.outbound_cache();
    assert!(cache.number_of_connections() <= NUM_TASKS);
    assert_eq!(cache.number_of_busy_connections(), 0);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reclaim_after_load() {
    init_logging();
    const NUM_TASKS: usize = 12;

    let mut config = test_config();
    config.idle_timeout = Duration::from_millis(50);
    config.max_reclaim_per_pass = 4;
    config.reclaim_interval = Duration::from_secs(3600);
    let server = TestServer::start(config.clone()).await;
    let client = TransportManager::new(config).unwrap();
    let list = client.contact_info_list(server.reference().await);

    // Hold NUM_TASKS requests open at once so each needs its own connection
    let handles = (0..NUM_TASKS).map(|_| {
        let client = client.clone();
        let list = list.clone();
        tokio::spawn(async move {
            client
                .invoke(&list, "slow", Bytes::copy_from_slice(&100u32.to_le_bytes()))
                .await
        })
    });
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }
    let opened = client.outbound_cache().number_of_connections();
    assert_eq!(opened, NUM_TASKS);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.reclaim());
    assert_eq!(client.outbound_cache().number_of_connections(), NUM_TASKS - 4);

    let mut passes = 1;
    while client.reclaim() {
        passes += 1;
    }
    assert_eq!(passes, NUM_TASKS / 4);
    assert_eq!(client.outbound_cache().number_of_connections(), 0);

    // A fresh connection is opened on demand
    let reply = client.invoke(&list, "echo", Bytes::from_static(b"again")).await.unwrap();
    assert_eq!(reply.as_ref(), b"again");
    assert_eq!(client.stats().snapshot().connections_opened, NUM_TASKS as u64 + 1);

    // The server notices the closed connections and drops them too
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.manager.inbound_cache().number_of_connections() > 1 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.manager.inbound_cache().number_of_connections(), 1);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_reclaim_spares_running_request() {
    init_logging();
    let mut config = test_config();
    config.idle_timeout = Duration::from_millis(50);
    config.reclaim_interval = Duration::from_secs(3600);
    let server = TestServer::start(config).await;

    let executions = Arc::new(AtomicU64::new(0));
    let count = executions.clone();
    server.registry.register(
        Bytes::from_static(b"counted"),
        Servant::new().operation("slow", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                DispatchOutcome::Reply(Bytes::from_static(b"done"))
            }
        }),
    );

    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference_for(b"counted").await);
    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.invoke(&list, "slow", Bytes::new()).await })
    };

    // Past the idle timeout with the servant still sleeping
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.manager.inbound_cache().number_of_busy_connections(), 1);
    assert!(!server.manager.inbound_cache().reclaim());

    let reply = call.await.unwrap().unwrap();
    assert_eq!(reply.as_ref(), b"done");
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(client.stats().snapshot().connections_opened, 1);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_churn() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let reference = server.reference().await;

    for round in 0..20u8 {
        let client = TransportManager::new(test_config()).unwrap();
        let list = client.contact_info_list(reference.clone());
        let reply = client.invoke(&list, "echo", Bytes::from(vec![round; 32])).await.unwrap();
        assert_eq!(reply.as_ref(), &[round; 32]);
        client.shutdown().await;
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.manager.inbound_cache().number_of_connections() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.manager.inbound_cache().number_of_connections(), 0);

    server.shutdown().await;
}
