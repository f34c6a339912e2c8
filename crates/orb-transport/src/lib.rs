//! IIOP transport and connection management
//!
//! The layer of an object request broker between invocation and the wire:
//! connections with request correlation, inbound and outbound connection
//! caches with idle reclamation, acceptors, an event multiplexer, and
//! failover across the addresses of an object reference.
//!
//! # Features
//!
//! - FIFO write lock per connection, fragmentation and reassembly
//! - Reply correlation by request id through a response waiting room
//! - Failover over every profile and alternate address, with optional
//!   sticky failover and bounded location-forward handling
//! - Multiplexed or dedicated reading per connection
//! - Interceptor hook points with guaranteed ordering
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use orb_transport::{
//!     AcceptorConfig, DispatchOutcome, Endpoint, ObjectRegistry, Servant, TransportConfig,
//!     TransportManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> orb_transport::Result<()> {
//!     let registry = ObjectRegistry::new();
//!     registry.register(
//!         Bytes::from_static(b"echo"),
//!         Servant::new().operation("echo", |args| async move { DispatchOutcome::Reply(args) }),
//!     );
//!
//!     let server = TransportManager::builder(TransportConfig::default())
//!         .with_dispatcher(Arc::new(registry))
//!         .build()?;
//!     server
//!         .register_acceptor(Endpoint::iiop("127.0.0.1", 2809), &AcceptorConfig::default())
//!         .await?;
//!     server.start().await?;
//!     let reference = server.create_reference("IDL:demo/Echo:1.0", Bytes::from_static(b"echo")).await?;
//!
//!     let client = TransportManager::new(TransportConfig::default())?;
//!     let list = client.contact_info_list(reference);
//!     let reply = client.invoke(&list, "echo", Bytes::from("hello")).await?;
//!     assert_eq!(reply.as_ref(), b"hello");
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod backoff;
pub mod buffer_pool;
pub mod cache;
pub mod config;
pub mod connection;
pub mod contact_info;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod interceptor;
pub mod invocation;
pub mod multiplexer;
pub mod socket_factory;
pub mod transport_manager;
pub mod waiting_room;
pub mod worker_pool;

pub use acceptor::{
    Acceptor, AcceptorContext, InitializeStatus, IorTemplate, ListenPolicy, ServicePolicy,
    TcpAcceptor,
};
pub use backoff::BackoffTimer;
pub use buffer_pool::ByteBufferPool;
pub use cache::{
    AcceptorId, ConnectionCache, ConnectionOwner, InboundConnectionCache, OutboundConnectionCache,
};
pub use config::{AcceptorConfig, BackoffConfig, TransportConfig};
pub use connection::{Connection, ConnectionOptions, ConnectionState, ReadStrategy, WriteGuard};
pub use contact_info::{
    ContactInfo, ContactInfoIterator, ContactInfoList, ReportOutcome, StickyFailoverTable,
};
pub use dispatcher::{
    target_object_key, user_exception_body, DispatchOutcome, ObjectRegistry, OperationHandler,
    RequestDispatcher, Servant,
};
pub use endpoint::{Endpoint, TransportType};
pub use error::{ErrorClass, Result, TransportError};
pub use interceptor::{
    ClientRequestInterceptor, InterceptionPoint, InterceptorChain, InterceptorState, RequestInfo,
    ServerRequestInterceptor,
};
pub use invocation::ClientInvocation;
pub use multiplexer::{
    EventHandler, EventMultiplexer, HandlerOutcome, Interest, MultiplexerStats, Registration,
    RegistrationState,
};
pub use socket_factory::{DefaultSocketFactory, SocketFactory};
pub use transport_manager::{
    TransportManager, TransportManagerBuilder, TransportStats, TransportStatsSnapshot,
};
pub use waiting_room::{PendingInvocation, ResponseWaitingRoom};
pub use worker_pool::{WorkerPool, WorkerPoolStats};
