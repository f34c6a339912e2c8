//! Acceptors
//!
//! An acceptor owns one listening endpoint. Variations are policy values
//! composed into [`TcpAcceptor`] rather than subtypes:
//!
//! - [`ListenPolicy::Lazy`] defers binding until the acceptor is first used
//! - [`ServicePolicy::AcceptOnly`] caches accepted connections without ever
//!   reading from them
//! - [`ServicePolicy::BlockingAccept`] runs a dedicated accept loop instead
//!   of registering with the event multiplexer

use crate::cache::{AcceptorId, InboundConnectionCache};
use crate::config::AcceptorConfig;
use crate::connection::{Connection, ConnectionOptions, ReadStrategy};
use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::multiplexer::{EventHandler, EventMultiplexer, HandlerOutcome, Interest, Registration};
use crate::socket_factory::SocketFactory;
use bytes::Bytes;
use futures::future::BoxFuture;
use giop::{IiopProfile, Ior};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeStatus {
    Initialized,
    AlreadyInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenPolicy {
    Eager,
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePolicy {
    Serve,
    AcceptOnly,
    BlockingAccept,
}

impl From<&AcceptorConfig> for ListenPolicy {
    fn from(config: &AcceptorConfig) -> Self {
        if config.lazy {
            Self::Lazy
        } else {
            Self::Eager
        }
    }
}

impl From<&AcceptorConfig> for ServicePolicy {
    fn from(config: &AcceptorConfig) -> Self {
        if config.accept_only {
            Self::AcceptOnly
        } else if config.blocking_accept {
            Self::BlockingAccept
        } else {
            Self::Serve
        }
    }
}

/// Endpoints advertised in new object references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IorTemplate {
    endpoints: Vec<Endpoint>,
}

impl IorTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        if !self.endpoints.contains(&endpoint) {
            self.endpoints.push(endpoint);
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// First endpoint as the address, the rest as alternates
    pub fn make_profile(&self, object_key: Bytes) -> Option<IiopProfile> {
        let (primary, alternates) = self.endpoints.split_first()?;
        let profile = alternates
            .iter()
            .fold(IiopProfile::new(primary.to_host_port(), object_key), |p, e| {
                p.with_alternate(e.to_host_port())
            });
        Some(profile)
    }

    /// A reference for `object_key`; nil when nothing is listening
    pub fn make_ior(&self, type_id: &str, object_key: Bytes) -> Ior {
        match self.make_profile(object_key) {
            Some(profile) => Ior::with_profile(type_id, profile),
            None => Ior::new(type_id),
        }
    }
}

pub trait Acceptor: Send + Sync + 'static {
    fn id(&self) -> AcceptorId;

    /// Endpoint as configured; the port may be 0
    fn endpoint(&self) -> &Endpoint;

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Bind the listening socket. Calling it again is harmless.
    fn initialize(&self) -> BoxFuture<'_, Result<InitializeStatus>>;

    fn is_initialized(&self) -> bool;

    fn get_accepted_socket(&self) -> BoxFuture<'_, Result<(TcpStream, SocketAddr)>>;

    /// Wrap an accepted socket in a connection and cache it
    fn process_socket(&self, socket: TcpStream, peer: SocketAddr) -> Result<Arc<Connection>>;

    fn should_register_accept_event(&self) -> bool;

    fn should_use_worker_thread_for_event(&self) -> bool;

    fn is_lazy(&self) -> bool;

    fn add_to_ior_template(&self, template: &mut IorTemplate);

    fn register_accept_event(self: Arc<Self>, multiplexer: &EventMultiplexer) -> Result<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Accept until closed; used instead of an accept event registration
    fn accept_loop(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            info!("acceptor {}: dedicated accept loop started", self.id());
            while !self.is_closed() {
                match self.get_accepted_socket().await {
                    Ok((socket, peer)) => {
                        if let Err(e) = self.process_socket(socket, peer) {
                            warn!("acceptor {}: dropping connection from {}: {}", self.id(), peer, e);
                        }
                    }
                    Err(_) if self.is_closed() => break,
                    Err(e) => {
                        warn!("acceptor {}: accept failed: {}", self.id(), e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
            info!("acceptor {}: accept loop stopped", self.id());
        })
    }
}

/// What every TCP acceptor shares with the transport manager
#[derive(Clone)]
pub struct AcceptorContext {
    pub socket_factory: Arc<dyn SocketFactory>,
    pub inbound: Arc<InboundConnectionCache>,
    pub connection_options: ConnectionOptions,
    /// Where accepted connections are registered for reading
    pub multiplexer: Option<Arc<EventMultiplexer>>,
}

pub struct TcpAcceptor {
    id: AcceptorId,
    endpoint: Endpoint,
    listen: ListenPolicy,
    service: ServicePolicy,
    context: AcceptorContext,
    init_lock: AsyncMutex<()>,
    listener: Mutex<Option<Arc<TcpListener>>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    registration: Mutex<Option<Registration>>,
    accepted: AtomicU64,
}

impl TcpAcceptor {
    pub fn new(
        id: AcceptorId,
        endpoint: Endpoint,
        listen: ListenPolicy,
        service: ServicePolicy,
        mut context: AcceptorContext,
    ) -> Arc<Self> {
        context.connection_options.is_server_side = true;
        if context.multiplexer.is_none() {
            context.connection_options.read_strategy = ReadStrategy::Dedicated;
        }
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            id,
            endpoint,
            listen,
            service,
            context,
            init_lock: AsyncMutex::new(()),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown,
            registration: Mutex::new(None),
            accepted: AtomicU64::new(0),
        })
    }

    pub fn from_config(
        id: AcceptorId,
        endpoint: Endpoint,
        config: &AcceptorConfig,
        context: AcceptorContext,
    ) -> Arc<Self> {
        Self::new(id, endpoint, config.into(), config.into(), context)
    }

    pub fn service_policy(&self) -> ServicePolicy {
        self.service
    }

    pub fn connections_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    fn listener(&self) -> Option<Arc<TcpListener>> {
        self.listener.lock().clone()
    }

    /// Configured host with the bound port
    fn advertised_endpoint(&self) -> Endpoint {
        match self.local_addr() {
            Some(addr) => Endpoint::iiop(self.endpoint.host(), addr.port()),
            None => self.endpoint.clone(),
        }
    }

    async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let listener = match self.listener() {
            Some(listener) => listener,
            None if self.is_lazy() && !self.is_closed() => {
                self.initialize().await?;
                self.listener()
                    .ok_or_else(|| TransportError::NotInitialized(self.endpoint.to_string()))?
            }
            None => return Err(TransportError::NotInitialized(self.endpoint.to_string())),
        };

        let mut shutdown = self.shutdown.subscribe();
        let (socket, peer) = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => return Err(TransportError::ConnectionClosed),
            accepted = listener.accept() => accepted?,
        };
        socket.set_nodelay(true)?;
        self.accepted.fetch_add(1, Ordering::Relaxed);
        trace!("acceptor {}: accepted {}", self.id, peer);
        Ok((socket, peer))
    }
}

impl Acceptor for TcpAcceptor {
    fn id(&self) -> AcceptorId {
        self.id
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener().and_then(|l| l.local_addr().ok())
    }

    fn initialize(&self) -> BoxFuture<'_, Result<InitializeStatus>> {
        Box::pin(async move {
            let _guard = self.init_lock.lock().await;
            if self.is_closed() {
                return Err(TransportError::ConnectionClosed);
            }
            if self.listener.lock().is_some() {
                return Ok(InitializeStatus::AlreadyInitialized);
            }
            let listener = self.context.socket_factory.create_server_socket(&self.endpoint).await?;
            info!(
                "acceptor {} listening on {} ({:?}, {:?})",
                self.id,
                listener.local_addr()?,
                self.listen,
                self.service
            );
            *self.listener.lock() = Some(Arc::new(listener));
            Ok(InitializeStatus::Initialized)
        })
    }

    fn is_initialized(&self) -> bool {
        self.listener.lock().is_some()
    }

    fn get_accepted_socket(&self) -> BoxFuture<'_, Result<(TcpStream, SocketAddr)>> {
        Box::pin(self.accept())
    }

    fn process_socket(&self, socket: TcpStream, peer: SocketAddr) -> Result<Arc<Connection>> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let peer = Endpoint::iiop(peer.ip().to_string(), peer.port());
        let connection = Connection::new(socket, peer, self.context.connection_options.clone());
        connection.open();
        self.context.inbound.put(self.id, connection.clone());

        match (self.service, connection.read_strategy(), &self.context.multiplexer) {
            (ServicePolicy::AcceptOnly, _, _) => {
                debug!("acceptor {}: connection {} cached, not served", self.id, connection.id());
            }
            (_, ReadStrategy::Multiplexed, Some(multiplexer)) => connection.register_with(multiplexer)?,
            _ => {
                connection.start_reader();
            }
        }
        Ok(connection)
    }

    fn should_register_accept_event(&self) -> bool {
        self.service != ServicePolicy::BlockingAccept
    }

    fn should_use_worker_thread_for_event(&self) -> bool {
        true
    }

    fn is_lazy(&self) -> bool {
        self.listen == ListenPolicy::Lazy
    }

    fn add_to_ior_template(&self, template: &mut IorTemplate) {
        if self.is_closed() {
            return;
        }
        template.add_endpoint(self.advertised_endpoint());
    }

    fn register_accept_event(self: Arc<Self>, multiplexer: &EventMultiplexer) -> Result<()> {
        let handler = Arc::new(AcceptHandler {
            acceptor: self.clone(),
            slot: Mutex::new(None),
        });
        let registration = multiplexer.register(handler)?;
        *self.registration.lock() = Some(registration);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        let registration = self.registration.lock().take();
        if let Some(registration) = registration {
            registration.cancel_nowait();
        }
        self.listener.lock().take();
        info!("acceptor {} on {} closed", self.id, self.endpoint);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Accept readiness for one acceptor; the accepted socket waits in `slot`
/// until the handler runs
struct AcceptHandler {
    acceptor: Arc<TcpAcceptor>,
    slot: Mutex<Option<(TcpStream, SocketAddr)>>,
}

impl EventHandler for AcceptHandler {
    fn name(&self) -> String {
        format!("acceptor {}", self.acceptor.id)
    }

    fn interest(&self) -> Interest {
        Interest::Acceptable
    }

    fn ready(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match self.acceptor.accept().await {
                Ok(accepted) => *self.slot.lock() = Some(accepted),
                Err(e) if !self.acceptor.is_closed() => {
                    warn!("acceptor {}: accept failed: {}", self.acceptor.id, e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(_) => {}
            }
        })
    }

    fn handle_event(self: Arc<Self>, registration: Registration) -> BoxFuture<'static, HandlerOutcome> {
        Box::pin(async move {
            let accepted = self.slot.lock().take();
            if !registration.is_active() || self.acceptor.is_closed() {
                return HandlerOutcome::Done;
            }
            if let Some((socket, peer)) = accepted {
                if let Err(e) = self.acceptor.process_socket(socket, peer) {
                    warn!("acceptor {}: dropping connection from {}: {}", self.acceptor.id, peer, e);
                }
            }
            HandlerOutcome::Rearm
        })
    }

    fn should_use_worker_thread_for_event(&self) -> bool {
        self.acceptor.should_use_worker_thread_for_event()
    }
}
