//! Shared fixtures for the integration suites

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use giop::{HostPort, IiopProfile, Ior};
use orb_transport::{
    user_exception_body, AcceptorConfig, DispatchOutcome, Endpoint, ObjectRegistry, Servant,
    TransportConfig, TransportManager,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const ECHO_KEY: &[u8] = b"echo";
pub const TYPE_ID: &str = "IDL:demo/Echo:1.0";
pub const OOPS_ID: &str = "IDL:demo/Oops:1.0";

static INIT: Once = Once::new();

/// Install a test-friendly subscriber once; `RUST_LOG` overrides the level
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Defaults tightened so failing tests finish quickly
pub fn test_config() -> TransportConfig {
    let mut config = TransportConfig::default();
    config.request_timeout = Duration::from_secs(10);
    config.connect_timeout = Duration::from_secs(2);
    config.backoff.initial = Duration::from_millis(5);
    config.backoff.max_single = Duration::from_millis(20);
    config.backoff.max_total = Some(Duration::from_millis(50));
    config.worker_threads = 32;
    config
}

/// Simple checksum for data integrity checks
pub fn compute_checksum(data: &[u8]) -> u64 {
    data.iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc.wrapping_mul(31).wrapping_add(*b as u64 ^ i as u64))
}

/// `size` bytes of a repeating pattern
pub fn generate_pattern(size: usize) -> Bytes {
    let mut data = BytesMut::with_capacity(size);
    for i in 0..size {
        data.put_u8((i % 251) as u8);
    }
    data.freeze()
}

/// Servant under `ECHO_KEY` with the operations the suites use:
///
/// - `echo`: returns its arguments
/// - `generate`: 4-byte LE size in, that many pattern bytes out
/// - `checksum`: 8-byte LE checksum of the arguments
/// - `oops`: raises a user exception
/// - `slow`: 4-byte LE milliseconds in, replies after sleeping that long
/// - `record`: counts calls in `calls`
pub fn echo_servant(calls: Arc<AtomicU64>) -> Servant {
    Servant::new()
        .operation("echo", |args| async move { DispatchOutcome::Reply(args) })
        .operation("generate", |args| async move {
            let size = u32::from_le_bytes(args.get(..4).and_then(|b| b.try_into().ok()).unwrap_or_default()) as usize;
            DispatchOutcome::Reply(generate_pattern(size))
        })
        .operation("checksum", |args| async move {
            let mut out = BytesMut::with_capacity(8);
            out.put_u64_le(compute_checksum(&args));
            DispatchOutcome::Reply(out.freeze())
        })
        .operation("oops", |args| async move {
            DispatchOutcome::UserException(user_exception_body(OOPS_ID, &args))
        })
        .operation("slow", |args| async move {
            let ms = u32::from_le_bytes(args.get(..4).and_then(|b| b.try_into().ok()).unwrap_or_default());
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
            DispatchOutcome::Reply(args)
        })
        .operation("record", move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                DispatchOutcome::Reply(Bytes::new())
            }
        })
}

/// A running server: manager, its registry and the `record` call counter
pub struct TestServer {
    pub manager: Arc<TransportManager>,
    pub registry: Arc<ObjectRegistry>,
    pub calls: Arc<AtomicU64>,
}

impl TestServer {
    pub async fn start(config: TransportConfig) -> Self {
        Self::start_with(config, |builder| builder).await
    }

    /// Start with a chance to adjust the builder, e.g. to add interceptors
    pub async fn start_with<F>(config: TransportConfig, customize: F) -> Self
    where
        F: FnOnce(orb_transport::TransportManagerBuilder) -> orb_transport::TransportManagerBuilder,
    {
        let calls = Arc::new(AtomicU64::new(0));
        let registry = Arc::new(ObjectRegistry::new());
        registry.register(Bytes::from_static(ECHO_KEY), echo_servant(calls.clone()));

        let builder = TransportManager::builder(config).with_dispatcher(registry.clone());
        let manager = customize(builder).build().expect("server manager");
        manager
            .register_acceptor(Endpoint::iiop("127.0.0.1", 0), &AcceptorConfig::default())
            .await
            .expect("acceptor");
        manager.start().await.expect("start");
        Self {
            manager,
            registry,
            calls,
        }
    }

    pub async fn reference(&self) -> Ior {
        self.reference_for(ECHO_KEY).await
    }

    pub async fn reference_for(&self, key: &'static [u8]) -> Ior {
        self.manager
            .create_reference(TYPE_ID, Bytes::from_static(key))
            .await
            .expect("reference")
    }

    pub fn port(&self) -> u16 {
        self.manager.acceptors()[0]
            .local_addr()
            .expect("bound acceptor")
            .port()
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

/// A loopback port nothing listens on
pub async fn dead_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

/// One IIOP profile: the first port as the address, the rest as alternates
pub fn reference_on_ports(ports: &[u16], key: &'static [u8]) -> Ior {
    let mut profile = IiopProfile::new(HostPort::new("127.0.0.1", ports[0]), Bytes::from_static(key));
    for port in &ports[1..] {
        profile = profile.with_alternate(HostPort::new("127.0.0.1", *port));
    }
    Ior::with_profile(TYPE_ID, profile)
}

/// Thread-safe statistics for concurrent tests
pub struct ConcurrentStats {
    success: AtomicU64,
    failure: AtomicU64,
    corrupted: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
}

impl ConcurrentStats {
    pub fn new() -> Self {
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            corrupted: AtomicU64::new(0),
            latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.latencies.lock().push(latency);
    }

    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_data_corruption(&self) {
        self.corrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn data_corruption_count(&self) -> u64 {
        self.corrupted.load(Ordering::Relaxed)
    }

    pub fn avg_latency(&self) -> Duration {
        let latencies = self.latencies.lock();
        if latencies.is_empty() {
            return Duration::ZERO;
        }
        latencies.iter().sum::<Duration>() / latencies.len() as u32
    }

    pub fn max_latency(&self) -> Duration {
        self.latencies.lock().iter().max().copied().unwrap_or_default()
    }

    pub fn print_report(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Successful: {}", self.success_count());
        println!("Failed: {}", self.failure_count());
        println!("Corrupted: {}", self.data_corruption_count());
        println!("Avg latency: {:?}", self.avg_latency());
        println!("Max latency: {:?}", self.max_latency());
    }
}

/// Outcome of one suite, as reported by the harness binary
#[derive(Debug, Clone)]
pub struct TestSuiteResults {
    pub name: &'static str,
    pub passed: bool,
    pub duration: Duration,
    pub summary: String,
}
