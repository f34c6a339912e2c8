//! Transport manager
//!
//! Owns everything one ORB instance shares: acceptors, the inbound and
//! outbound connection caches, event multiplexers, the worker pool, buffer
//! pool, interceptors and the reclaim loop. Build one with
//! [`TransportManagerBuilder`] from inside a tokio runtime.

use crate::acceptor::{Acceptor, AcceptorContext, InitializeStatus, IorTemplate, TcpAcceptor};
use crate::buffer_pool::ByteBufferPool;
use crate::cache::{AcceptorId, InboundConnectionCache, OutboundConnectionCache};
use crate::config::{AcceptorConfig, TransportConfig};
use crate::connection::{Connection, ConnectionOptions, ReadStrategy};
use crate::contact_info::{ContactInfo, ContactInfoList, StickyFailoverTable};
use crate::dispatcher::RequestDispatcher;
use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::interceptor::InterceptorChain;
use crate::invocation::ClientInvocation;
use crate::multiplexer::EventMultiplexer;
use crate::socket_factory::{DefaultSocketFactory, SocketFactory};
use crate::worker_pool::WorkerPool;
use bytes::Bytes;
use giop::Ior;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Transport statistics
#[derive(Debug, Default)]
pub struct TransportStats {
    pub connections_opened: AtomicU64,
    pub connections_reused: AtomicU64,
    pub connect_failures: AtomicU64,
    pub invocations: AtomicU64,
    pub invocation_failures: AtomicU64,
    pub failovers: AtomicU64,
    pub redirects_followed: AtomicU64,
    pub reclaim_passes: AtomicU64,
}

impl TransportStats {
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_reused: self.connections_reused.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            invocation_failures: self.invocation_failures.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            redirects_followed: self.redirects_followed.load(Ordering::Relaxed),
            reclaim_passes: self.reclaim_passes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of transport statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub connections_opened: u64,
    pub connections_reused: u64,
    pub connect_failures: u64,
    pub invocations: u64,
    pub invocation_failures: u64,
    pub failovers: u64,
    pub redirects_followed: u64,
    pub reclaim_passes: u64,
}

pub struct TransportManagerBuilder {
    config: TransportConfig,
    socket_factory: Arc<dyn SocketFactory>,
    dispatcher: Option<Arc<dyn RequestDispatcher>>,
    interceptors: Arc<InterceptorChain>,
    sticky_failover: bool,
}

impl TransportManagerBuilder {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            socket_factory: Arc::new(DefaultSocketFactory),
            dispatcher: None,
            interceptors: Arc::new(InterceptorChain::new()),
            sticky_failover: false,
        }
    }

    pub fn with_socket_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.socket_factory = factory;
        self
    }

    /// Object adapter serving requests on accepted connections
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn RequestDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_interceptors(mut self, interceptors: Arc<InterceptorChain>) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Remember the last good alternate per primary endpoint
    pub fn with_sticky_failover(mut self, enabled: bool) -> Self {
        self.sticky_failover = enabled;
        self
    }

    /// Validate the configuration and start the multiplexers.
    ///
    /// Must run inside a tokio runtime.
    pub fn build(self) -> Result<Arc<TransportManager>> {
        let config = self.config;
        config.validate()?;

        let worker_pool = Arc::new(WorkerPool::new(config.worker_threads));
        let multiplexers = (0..config.multiplexer_count.max(1))
            .map(|_| EventMultiplexer::new(worker_pool.clone()))
            .collect();
        let inbound = InboundConnectionCache::new(
            "inbound",
            config.idle_timeout,
            config.max_reclaim_per_pass,
        );
        let outbound = OutboundConnectionCache::new(
            "outbound",
            config.idle_timeout,
            config.max_reclaim_per_pass,
        );

        info!(
            "transport manager: {} workers, {} multiplexers, {:?} reads",
            config.worker_threads, config.multiplexer_count, config.read_strategy
        );

        Ok(Arc::new(TransportManager {
            socket_factory: self.socket_factory,
            dispatcher: self.dispatcher,
            interceptors: self.interceptors,
            sticky: self
                .sticky_failover
                .then(|| Arc::new(StickyFailoverTable::new())),
            buffer_pool: Arc::new(ByteBufferPool::default()),
            worker_pool,
            multiplexers,
            next_multiplexer: AtomicUsize::new(0),
            acceptors: RwLock::new(Vec::new()),
            next_acceptor_id: AtomicUsize::new(1),
            inbound,
            outbound,
            stats: Arc::new(TransportStats::default()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            config,
        }))
    }
}

pub struct TransportManager {
    config: TransportConfig,
    socket_factory: Arc<dyn SocketFactory>,
    dispatcher: Option<Arc<dyn RequestDispatcher>>,
    interceptors: Arc<InterceptorChain>,
    sticky: Option<Arc<StickyFailoverTable>>,
    buffer_pool: Arc<ByteBufferPool>,
    worker_pool: Arc<WorkerPool>,
    multiplexers: Vec<Arc<EventMultiplexer>>,
    next_multiplexer: AtomicUsize,
    acceptors: RwLock<Vec<Arc<dyn Acceptor>>>,
    next_acceptor_id: AtomicUsize,
    inbound: Arc<InboundConnectionCache>,
    outbound: Arc<OutboundConnectionCache>,
    stats: Arc<TransportStats>,
    started: AtomicBool,
    shut_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportManager {
    pub fn builder(config: TransportConfig) -> TransportManagerBuilder {
        TransportManagerBuilder::new(config)
    }

    /// Manager with the default socket factory and no dispatcher
    pub fn new(config: TransportConfig) -> Result<Arc<Self>> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<TransportStats> {
        &self.stats
    }

    pub fn interceptors(&self) -> &Arc<InterceptorChain> {
        &self.interceptors
    }

    pub fn buffer_pool(&self) -> &Arc<ByteBufferPool> {
        &self.buffer_pool
    }

    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        &self.worker_pool
    }

    pub fn inbound_cache(&self) -> &Arc<InboundConnectionCache> {
        &self.inbound
    }

    pub fn outbound_cache(&self) -> &Arc<OutboundConnectionCache> {
        &self.outbound
    }

    pub fn sticky_table(&self) -> Option<&Arc<StickyFailoverTable>> {
        self.sticky.as_ref()
    }

    /// Next multiplexer, round-robin
    pub fn multiplexer(&self) -> Arc<EventMultiplexer> {
        let n = self.next_multiplexer.fetch_add(1, Ordering::Relaxed);
        self.multiplexers[n % self.multiplexers.len()].clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn connection_options(&self, is_server_side: bool) -> ConnectionOptions {
        ConnectionOptions {
            is_server_side,
            dispatcher: if is_server_side { self.dispatcher.clone() } else { None },
            interceptors: self.interceptors.clone(),
            buffer_pool: self.buffer_pool.clone(),
            worker_pool: Some(self.worker_pool.clone()),
            ..ConnectionOptions::from_config(&self.config)
        }
    }

    // Acceptors

    /// Create a TCP acceptor for `endpoint`. After `start` it is brought up
    /// right away unless it is lazy.
    pub async fn register_acceptor(
        &self,
        endpoint: Endpoint,
        config: &AcceptorConfig,
    ) -> Result<Arc<dyn Acceptor>> {
        let id = AcceptorId(self.next_acceptor_id.fetch_add(1, Ordering::Relaxed));
        let context = AcceptorContext {
            socket_factory: self.socket_factory.clone(),
            inbound: self.inbound.clone(),
            connection_options: self.connection_options(true),
            multiplexer: Some(self.multiplexer()),
        };
        let acceptor: Arc<dyn Acceptor> = TcpAcceptor::from_config(id, endpoint, config, context);
        self.add_acceptor(acceptor.clone()).await?;
        Ok(acceptor)
    }

    /// Adopt an acceptor built elsewhere
    pub async fn add_acceptor(&self, acceptor: Arc<dyn Acceptor>) -> Result<()> {
        if self.is_shut_down() {
            return Err(TransportError::ConnectionClosed);
        }
        debug!("registering acceptor {} for {}", acceptor.id(), acceptor.endpoint());
        self.acceptors.write().push(acceptor.clone());
        if self.started.load(Ordering::Acquire) && !acceptor.is_lazy() {
            self.start_acceptor(&acceptor).await?;
        }
        Ok(())
    }

    pub fn acceptors(&self) -> Vec<Arc<dyn Acceptor>> {
        self.acceptors.read().clone()
    }

    pub fn acceptor(&self, id: AcceptorId) -> Option<Arc<dyn Acceptor>> {
        self.acceptors.read().iter().find(|a| a.id() == id).cloned()
    }

    /// Bind the acceptor and hook up its accept path, once
    async fn start_acceptor(&self, acceptor: &Arc<dyn Acceptor>) -> Result<()> {
        if acceptor.initialize().await? == InitializeStatus::AlreadyInitialized {
            return Ok(());
        }
        if acceptor.should_register_accept_event() {
            acceptor.clone().register_accept_event(&self.multiplexer())?;
        } else {
            let task = tokio::spawn(acceptor.clone().accept_loop());
            self.tasks.lock().push(task);
        }
        Ok(())
    }

    /// Bring up every eager acceptor and start the reclaim loop
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_shut_down() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for acceptor in self.acceptors() {
            if !acceptor.is_lazy() {
                self.start_acceptor(&acceptor).await?;
            }
        }

        let weak = Arc::downgrade(self);
        let interval = self.config.reclaim_interval;
        let reclaimer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if manager.is_shut_down() {
                    break;
                }
                manager.reclaim();
            }
            trace!("reclaim loop stopped");
        });
        self.tasks.lock().push(reclaimer);
        info!("transport manager started with {} acceptors", self.acceptors.read().len());
        Ok(())
    }

    /// One reclaim pass over both caches
    pub fn reclaim(&self) -> bool {
        self.stats.reclaim_passes.fetch_add(1, Ordering::Relaxed);
        let inbound = self.inbound.reclaim();
        let outbound = self.outbound.reclaim();
        inbound || outbound
    }

    // Object references

    /// Endpoints of every live acceptor; lazy acceptors are brought up here
    pub async fn ior_template(&self) -> Result<IorTemplate> {
        let mut template = IorTemplate::new();
        for acceptor in self.acceptors() {
            if acceptor.is_closed() {
                continue;
            }
            if acceptor.is_lazy() && !acceptor.is_initialized() {
                self.start_acceptor(&acceptor).await?;
            }
            acceptor.add_to_ior_template(&mut template);
        }
        Ok(template)
    }

    /// A reference to `object_key` served by this manager's acceptors
    pub async fn create_reference(&self, type_id: &str, object_key: impl Into<Bytes>) -> Result<Ior> {
        let template = self.ior_template().await?;
        if template.is_empty() {
            return Err(TransportError::NoContactInfo);
        }
        Ok(template.make_ior(type_id, object_key.into()))
    }

    pub fn contact_info_list(&self, reference: Ior) -> ContactInfoList {
        let list = ContactInfoList::new(reference).with_max_redirect_hops(self.config.max_redirect_hops);
        match &self.sticky {
            Some(table) => list.with_sticky(table.clone()),
            None => list,
        }
    }

    // Outbound

    /// A connection to `contact_info`, marked busy: a cached idle one, or a
    /// newly opened one
    pub async fn get_outbound_connection(&self, contact_info: &ContactInfo) -> Result<Arc<Connection>> {
        if self.is_shut_down() {
            return Err(TransportError::ConnectionClosed);
        }
        if let Some(connection) = self.outbound.get(contact_info) {
            self.stats.connections_reused.fetch_add(1, Ordering::Relaxed);
            return Ok(connection);
        }

        let endpoint = contact_info.endpoint();
        let stream = match self
            .socket_factory
            .create_socket(endpoint, self.config.connect_timeout)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                debug!("connect to {} failed: {}", endpoint, err);
                return Err(err);
            }
        };

        let connection = Connection::new(stream, endpoint.clone(), self.connection_options(false));
        connection.open();
        let reading = match connection.read_strategy() {
            ReadStrategy::Multiplexed => connection.register_with(&self.multiplexer()),
            ReadStrategy::Dedicated => {
                connection.start_reader();
                Ok(())
            }
        };
        if let Err(err) = reading {
            connection.abort(err.clone());
            return Err(err);
        }

        connection.try_acquire();
        self.outbound.put(contact_info.clone(), connection.clone());
        self.stats.connections_opened.fetch_add(1, Ordering::Relaxed);
        info!("connection {} opened to {}", connection.id(), endpoint);
        Ok(connection)
    }

    pub fn release_outbound(&self, connection: &Connection) {
        self.outbound.release(connection);
    }

    // Invocation

    /// Invoke `operation` on the object `list` refers to and wait for the reply
    pub async fn invoke(self: &Arc<Self>, list: &ContactInfoList, operation: &str, body: Bytes) -> Result<Bytes> {
        ClientInvocation::new(self.clone(), list.clone(), operation, body)
            .invoke()
            .await
    }

    /// Send `operation` without expecting a reply
    pub async fn invoke_oneway(self: &Arc<Self>, list: &ContactInfoList, operation: &str, body: Bytes) -> Result<()> {
        ClientInvocation::new(self.clone(), list.clone(), operation, body)
            .oneway()
            .invoke()
            .await
            .map(|_| ())
    }

    /// Close acceptors and connections, then stop background tasks and
    /// multiplexers
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("transport manager shutting down");
        for acceptor in self.acceptors() {
            acceptor.close();
        }
        self.inbound.close_all();
        self.outbound.close_all();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("background task failed: {}", e);
                }
            }
        }
        for multiplexer in &self.multiplexers {
            multiplexer.shutdown().await;
        }
    }
}
