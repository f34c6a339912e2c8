//! GIOP 1.2 wire layer
//!
//! Message framing, fragmentation and object reference encoding for the
//! IIOP transport. This crate knows nothing about connections, caches or
//! failover; it turns bytes into messages and back.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use giop::{Message, RequestMessage};
//!
//! let request = RequestMessage::new(1, Bytes::from_static(b"key"), "echo", Bytes::from_static(b"hi"));
//! let encoded = Message::Request(request.clone()).encode();
//! assert_eq!(Message::decode(&encoded).unwrap(), Message::Request(request));
//! ```

pub mod codec;
pub mod error;
pub mod exception;
pub mod fragmentation;
pub mod ior;
pub mod message;
pub mod transport;

pub use codec::{ByteOrder, Reader, Writer};
pub use error::{GiopError, Result};
pub use exception::{CompletionStatus, SystemException, SystemExceptionKind};
pub use fragmentation::{FragmentAssembler, FragmentGenerator, MIN_FRAGMENT_SIZE};
pub use ior::{HostPort, IiopProfile, Ior, TaggedProfile, TAG_ALTERNATE_IIOP_ADDRESS, TAG_INTERNET_IOP};
pub use message::{
    peek_request_id, AddressingDisposition, FragmentMessage, LocateReplyMessage,
    LocateRequestMessage, LocateStatus, Message, MessageFlags, MessageHeader, MsgType,
    ReplyMessage, ReplyStatus, RequestMessage, TargetAddress, Version, GIOP_MAGIC,
};
pub use transport::{Frame, GiopTransport, DEFAULT_MAX_MESSAGE_SIZE};
