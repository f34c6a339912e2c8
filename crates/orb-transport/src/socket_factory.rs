//! Socket creation seam

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

/// Creates listening and connected sockets for endpoints
pub trait SocketFactory: Send + Sync {
    fn create_server_socket<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<TcpListener>>;

    fn create_socket<'a>(&'a self, endpoint: &'a Endpoint, timeout: Duration) -> BoxFuture<'a, Result<TcpStream>>;
}

/// Plain tokio TCP with `TCP_NODELAY`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSocketFactory;

impl SocketFactory for DefaultSocketFactory {
    fn create_server_socket<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<TcpListener>> {
        Box::pin(async move {
            let listener = TcpListener::bind(endpoint.socket_addr_string()).await?;
            debug!("listening on {}", listener.local_addr()?);
            Ok(listener)
        })
    }

    fn create_socket<'a>(&'a self, endpoint: &'a Endpoint, timeout: Duration) -> BoxFuture<'a, Result<TcpStream>> {
        Box::pin(async move {
            let connect_failed = |reason: String| TransportError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason,
            };
            let stream = match tokio::time::timeout(timeout, TcpStream::connect(endpoint.socket_addr_string())).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(connect_failed(e.to_string())),
                Err(_) => return Err(connect_failed(format!("no answer within {:?}", timeout))),
            };
            stream.set_nodelay(true)?;
            trace!("connected to {}", endpoint);
            Ok(stream)
        })
    }
}
