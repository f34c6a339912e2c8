//! Fragmentation Tests - Large Message Transfer
//!
//! These tests push messages far beyond the fragment size through real
//! sockets:
//! - Large requests and large replies
//! - Small fragment sizes on both sides
//! - Concurrent large transfers
//! - Dedicated reader tasks instead of the multiplexer

mod common;

use bytes::Bytes;
use common::*;
use futures::future::join_all;
use orb_transport::{ReadStrategy, TransportManager};
use std::sync::Arc;
use std::time::Instant;

#[tokio::test]
async fn test_large_request_and_reply() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);

    for size in [1023usize, 1024, 4096, 64 * 1024, 256 * 1024] {
        let payload = generate_pattern(size);
        let started = Instant::now();
        let reply = client.invoke(&list, "echo", payload.clone()).await.unwrap();
        println!("echoed {} bytes in {:?}", size, started.elapsed());
        assert_eq!(reply.len(), size);
        assert_eq!(compute_checksum(&reply), compute_checksum(&payload));
    }

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_large_generated_reply() {
    init_logging();
    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);

    let size = 512 * 1024u32;
    let reply = client
        .invoke(&list, "generate", Bytes::copy_from_slice(&size.to_le_bytes()))
        .await
        .unwrap();
    assert_eq!(reply, generate_pattern(size as usize));

    // Checksum computed on the far side of a fragmented request
    let payload = generate_pattern(100_000);
    let remote = client.invoke(&list, "checksum", payload.clone()).await.unwrap();
    assert_eq!(remote.as_ref(), &compute_checksum(&payload).to_le_bytes());

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_minimum_fragment_size() {
    init_logging();
    let mut config = test_config();
    config.fragment_size = giop::MIN_FRAGMENT_SIZE;
    let server = TestServer::start(config.clone()).await;
    let client = TransportManager::new(config).unwrap();
    let list = client.contact_info_list(server.reference().await);

    let payload = generate_pattern(10_000);
    let reply = client.invoke(&list, "echo", payload.clone()).await.unwrap();
    assert_eq!(reply, payload);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_large_transfers() {
    init_logging();
    const NUM_TASKS: usize = 8;
    const SIZE: usize = 96 * 1024;

    let server = TestServer::start(test_config()).await;
    let client = TransportManager::new(test_config()).unwrap();
    let list = client.contact_info_list(server.reference().await);
    let stats = Arc::new(ConcurrentStats::new());

    let handles = (0..NUM_TASKS).map(|task| {
        let client = client.clone();
        let list = list.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let payload: Bytes = generate_pattern(SIZE + task).slice(task..);
            let started = Instant::now();
            match client.invoke(&list, "echo", payload.clone()).await {
                Ok(reply) if reply == payload => stats.record_success(started.elapsed()),
                Ok(_) => stats.record_data_corruption(),
                Err(e) => {
                    eprintln!("task {} failed: {}", task, e);
                    stats.record_failure();
                }
            }
        })
    });
    join_all(handles).await;

    stats.print_report("Concurrent Large Transfers");
    assert_eq!(stats.success_count(), NUM_TASKS as u64);
    assert_eq!(stats.data_corruption_count(), 0);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dedicated_readers() {
    init_logging();
    let mut config = test_config();
    config.read_strategy = ReadStrategy::Dedicated;
    let server = TestServer::start(config.clone()).await;
    let client = TransportManager::new(config).unwrap();
    let list = client.contact_info_list(server.reference().await);

    for i in 0..10usize {
        let payload = generate_pattern(8 * 1024 + i);
        let reply = client.invoke(&list, "echo", payload.clone()).await.unwrap();
        assert_eq!(reply, payload);
    }
    assert_eq!(client.stats().snapshot().connections_opened, 1);

    client.shutdown().await;
    server.shutdown().await;
}
