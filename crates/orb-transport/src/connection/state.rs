use std::fmt;
use std::str::FromStr;

/// Connection lifecycle
///
/// ```text
/// Opening ──open──► Established ──close (server)──► CloseSent
///                        │      ──peer close──────► CloseRecvd
///                        └──────abort / close (client)──► Abort
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Established,
    CloseSent,
    CloseRecvd,
    Abort,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Opening | Self::Established)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opening => "opening",
            Self::Established => "established",
            Self::CloseSent => "close-sent",
            Self::CloseRecvd => "close-recvd",
            Self::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// Who owns the read side of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadStrategy {
    /// Readiness is watched by an event multiplexer
    #[default]
    Multiplexed,
    /// A task loops on `read` for the connection's lifetime
    Dedicated,
}

impl FromStr for ReadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multiplexed" | "mux" => Ok(Self::Multiplexed),
            "dedicated" | "blocking" => Ok(Self::Dedicated),
            other => Err(format!("unknown read strategy: {}", other)),
        }
    }
}
