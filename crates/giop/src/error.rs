//! Error types for GIOP framing and object reference decoding

use thiserror::Error;

/// Wire-level error types
#[derive(Debug, Error)]
pub enum GiopError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic: expected GIOP, got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported GIOP version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("unknown reply status: {0}")]
    UnknownReplyStatus(u32),

    #[error("unknown locate status: {0}")]
    UnknownLocateStatus(u32),

    #[error("unknown addressing disposition: {0}")]
    UnknownDisposition(u16),

    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request ID mismatch: expected {expected}, got {got}")]
    RequestIdMismatch { expected: u32, got: u32 },

    #[error("fragment for request {0} arrived after the last fragment")]
    FragmentAfterLast(u32),

    #[error("message type {0} cannot be fragmented")]
    NotFragmentable(u8),
}

pub type Result<T> = std::result::Result<T, GiopError>;
