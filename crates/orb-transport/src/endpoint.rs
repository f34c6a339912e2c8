//! Network endpoints

use crate::error::TransportError;
use giop::HostPort;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    Iiop,
}

impl TransportType {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Iiop => "iiop",
        }
    }
}

/// One place a request could be sent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    transport_type: TransportType,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(transport_type: TransportType, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport_type,
            host: host.into(),
            port,
        }
    }

    pub fn iiop(host: impl Into<String>, port: u16) -> Self {
        Self::new(TransportType::Iiop, host, port)
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` as accepted by tokio's connect and bind
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn to_host_port(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.port)
    }
}

impl From<&HostPort> for Endpoint {
    fn from(hp: &HostPort) -> Self {
        Self::iiop(hp.host.clone(), hp.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport_type.scheme(), self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("iiop://")
            .ok_or_else(|| TransportError::Config(format!("unsupported endpoint {:?}", s)))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| TransportError::Config(format!("endpoint {:?} has no port", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| TransportError::Config(format!("invalid port in {:?}", s)))?;
        if host.is_empty() {
            return Err(TransportError::Config(format!("endpoint {:?} has no host", s)));
        }
        Ok(Self::iiop(host, port))
    }
}
