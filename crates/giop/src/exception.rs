//! Standard system exceptions carried in `SystemException` replies

use crate::codec::{ByteOrder, Reader, Writer};
use crate::error::{GiopError, Result};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Whether the server ran the operation before the exception was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompletionStatus {
    Yes = 0,
    No = 1,
    Maybe = 2,
}

impl CompletionStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Yes),
            1 => Some(Self::No),
            2 => Some(Self::Maybe),
            _ => None,
        }
    }
}

/// System exception kinds this layer produces or reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemExceptionKind {
    Transient,
    CommFailure,
    ObjectNotExist,
    BadOperation,
    BadParam,
    Marshal,
    NoImplement,
    NoResources,
    ObjAdapter,
    Timeout,
    Internal,
    Unknown,
}

impl SystemExceptionKind {
    const ALL: [SystemExceptionKind; 12] = [
        Self::Transient,
        Self::CommFailure,
        Self::ObjectNotExist,
        Self::BadOperation,
        Self::BadParam,
        Self::Marshal,
        Self::NoImplement,
        Self::NoResources,
        Self::ObjAdapter,
        Self::Timeout,
        Self::Internal,
        Self::Unknown,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::CommFailure => "COMM_FAILURE",
            Self::ObjectNotExist => "OBJECT_NOT_EXIST",
            Self::BadOperation => "BAD_OPERATION",
            Self::BadParam => "BAD_PARAM",
            Self::Marshal => "MARSHAL",
            Self::NoImplement => "NO_IMPLEMENT",
            Self::NoResources => "NO_RESOURCES",
            Self::ObjAdapter => "OBJ_ADAPTER",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn repository_id(self) -> String {
        format!("IDL:omg.org/CORBA/{}:1.0", self.name())
    }

    /// Unrecognized repository ids map to `Unknown`
    pub fn from_repository_id(id: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.repository_id() == id)
            .unwrap_or(Self::Unknown)
    }
}

/// A system exception as it travels in a reply body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemException {
    pub kind: SystemExceptionKind,
    pub minor: u32,
    pub completed: CompletionStatus,
}

impl SystemException {
    pub fn new(kind: SystemExceptionKind, minor: u32, completed: CompletionStatus) -> Self {
        Self {
            kind,
            minor,
            completed,
        }
    }

    /// Safe to resend to another endpoint: the server never started the call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            SystemExceptionKind::Transient | SystemExceptionKind::CommFailure
        ) && self.completed == CompletionStatus::No
    }

    pub fn encode(&self, order: ByteOrder) -> Bytes {
        let mut buf = BytesMut::new();
        let mut w = Writer::new(&mut buf, order);
        w.put_string(&self.kind.repository_id());
        w.put_u32(self.minor);
        w.put_u32(self.completed as u32);
        buf.freeze()
    }

    pub fn decode(body: Bytes, order: ByteOrder) -> Result<Self> {
        let mut r = Reader::new(body, order);
        let id = r.get_string()?;
        let minor = r.get_u32()?;
        let completed = r.get_u32()?;
        let completed = CompletionStatus::from_u32(completed).ok_or_else(|| {
            GiopError::InvalidData(format!("invalid completion status {}", completed))
        })?;
        Ok(Self {
            kind: SystemExceptionKind::from_repository_id(&id),
            minor,
            completed,
        })
    }
}

impl fmt::Display for SystemException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (minor {}, completed {:?})",
            self.kind.name(),
            self.minor,
            self.completed
        )
    }
}
