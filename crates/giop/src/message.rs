//! GIOP message types
//!
//! GIOP 1.2 message header:
//! ```text
//! +--------+--------+--------+--------+
//! |   'G'  |   'I'  |   'O'  |   'P'  |
//! +--------+--------+--------+--------+
//! | major  | minor  | flags  | msgtype|
//! +--------+--------+--------+--------+
//! |          message size             |
//! +--------+--------+--------+--------+
//! ```
//!
//! `flags` bit 0 selects little-endian encoding for the size field and the
//! body; bit 1 announces that `Fragment` messages with the same request id
//! follow. The message size counts body bytes only.

use crate::codec::{ByteOrder, Reader, Writer};
use crate::error::{GiopError, Result};
use crate::exception::SystemException;
use crate::ior::{IiopProfile, Ior};
use bytes::{Bytes, BytesMut};

/// Magic bytes that open every message
pub const GIOP_MAGIC: [u8; 4] = *b"GIOP";

/// Protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const GIOP_1_2: Version = Version { major: 1, minor: 2 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

/// GIOP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Request = 0,
    Reply = 1,
    CancelRequest = 2,
    LocateRequest = 3,
    LocateReply = 4,
    CloseConnection = 5,
    MessageError = 6,
    Fragment = 7,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            1 => Some(Self::Reply),
            2 => Some(Self::CancelRequest),
            3 => Some(Self::LocateRequest),
            4 => Some(Self::LocateReply),
            5 => Some(Self::CloseConnection),
            6 => Some(Self::MessageError),
            7 => Some(Self::Fragment),
            _ => None,
        }
    }

    /// In GIOP 1.2 the request id is the first body field of these types
    pub fn carries_request_id(self) -> bool {
        !matches!(self, Self::CloseConnection | Self::MessageError)
    }

    /// Types whose body may be continued by `Fragment` messages
    pub fn is_fragmentable(self) -> bool {
        matches!(
            self,
            Self::Request | Self::Reply | Self::LocateRequest | Self::LocateReply | Self::Fragment
        )
    }
}

/// Header flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const LITTLE_ENDIAN: u8 = 0x01;
    pub const MORE_FRAGMENTS: u8 = 0x02;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn for_order(order: ByteOrder) -> Self {
        let mut flags = Self::new();
        flags.set_little_endian(order.is_little_endian());
        flags
    }

    pub fn set_little_endian(&mut self, on: bool) -> &mut Self {
        self.set(Self::LITTLE_ENDIAN, on)
    }

    pub fn set_more_fragments(&mut self, on: bool) -> &mut Self {
        self.set(Self::MORE_FRAGMENTS, on)
    }

    fn set(&mut self, bit: u8, on: bool) -> &mut Self {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
        self
    }

    pub fn is_little_endian(&self) -> bool {
        (self.0 & Self::LITTLE_ENDIAN) != 0
    }

    pub fn has_more_fragments(&self) -> bool {
        (self.0 & Self::MORE_FRAGMENTS) != 0
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Fixed 12-byte message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: Version,
    pub flags: MessageFlags,
    pub msg_type: MsgType,
    pub message_size: u32,
}

impl MessageHeader {
    pub const SIZE: usize = 12;

    pub fn new(msg_type: MsgType, order: ByteOrder) -> Self {
        Self {
            version: Version::GIOP_1_2,
            flags: MessageFlags::for_order(order),
            msg_type,
            message_size: 0,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_flag(self.flags.is_little_endian())
    }

    /// Header plus body
    pub fn total_len(&self) -> usize {
        Self::SIZE + self.message_size as usize
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&GIOP_MAGIC);
        let mut w = Writer::new(buf, self.byte_order());
        w.put_u8(self.version.major);
        w.put_u8(self.version.minor);
        w.put_u8(self.flags.as_u8());
        w.put_u8(self.msg_type as u8);
        w.put_u32(self.message_size);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(GiopError::BufferUnderflow {
                needed: Self::SIZE,
                have: data.len(),
            });
        }
        let magic = [data[0], data[1], data[2], data[3]];
        if magic != GIOP_MAGIC {
            return Err(GiopError::InvalidMagic(magic));
        }
        let version = Version::new(data[4], data[5]);
        if version.major != 1 || version.minor > 2 {
            return Err(GiopError::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
            });
        }
        let flags = MessageFlags::from_u8(data[6]);
        let msg_type = MsgType::from_u8(data[7]).ok_or(GiopError::InvalidMessageType(data[7]))?;
        let size_bytes = [data[8], data[9], data[10], data[11]];
        let message_size = if flags.is_little_endian() {
            u32::from_le_bytes(size_bytes)
        } else {
            u32::from_be_bytes(size_bytes)
        };
        Ok(Self {
            version,
            flags,
            msg_type,
            message_size,
        })
    }

    /// Overwrite the size field of an already encoded header in place
    pub fn patch_size(encoded: &mut [u8], size: u32, order: ByteOrder) {
        let bytes = match order {
            ByteOrder::LittleEndian => size.to_le_bytes(),
            ByteOrder::BigEndian => size.to_be_bytes(),
        };
        encoded[8..12].copy_from_slice(&bytes);
    }
}

/// How a request names its target object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AddressingDisposition {
    Key = 0,
    Profile = 1,
    Reference = 2,
}

impl AddressingDisposition {
    pub const COUNT: usize = 3;

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Key),
            1 => Some(Self::Profile),
            2 => Some(Self::Reference),
            _ => None,
        }
    }
}

/// Target of a request in one of the three addressing modes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddress {
    Key(Bytes),
    Profile(IiopProfile),
    Reference { selected_profile: u32, ior: Ior },
}

impl TargetAddress {
    pub fn disposition(&self) -> AddressingDisposition {
        match self {
            Self::Key(_) => AddressingDisposition::Key,
            Self::Profile(_) => AddressingDisposition::Profile,
            Self::Reference { .. } => AddressingDisposition::Reference,
        }
    }

    fn encode(&self, w: &mut Writer<'_>) {
        let order = w.order();
        w.put_u16(self.disposition() as u16);
        match self {
            Self::Key(key) => w.put_octets(key),
            Self::Profile(profile) => w.put_octets(&profile.encode(order)),
            Self::Reference {
                selected_profile,
                ior,
            } => {
                w.put_u32(*selected_profile);
                let mut encoded = BytesMut::new();
                ior.encode_into(&mut encoded, order);
                w.put_octets(&encoded);
            }
        }
    }

    fn decode(r: &mut Reader) -> Result<Self> {
        let raw = r.get_u16()?;
        let disposition =
            AddressingDisposition::from_u16(raw).ok_or(GiopError::UnknownDisposition(raw))?;
        Ok(match disposition {
            AddressingDisposition::Key => Self::Key(r.get_octets()?),
            AddressingDisposition::Profile => Self::Profile(IiopProfile::decode(r.get_octets()?)?),
            AddressingDisposition::Reference => {
                let selected_profile = r.get_u32()?;
                let ior = Ior::decode(r.get_octets()?)?;
                Self::Reference {
                    selected_profile,
                    ior,
                }
            }
        })
    }
}

/// Outcome carried by a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReplyStatus {
    NoException = 0,
    UserException = 1,
    SystemException = 2,
    LocationForward = 3,
    LocationForwardPerm = 4,
    NeedsAddressingMode = 5,
}

impl ReplyStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::NoException),
            1 => Some(Self::UserException),
            2 => Some(Self::SystemException),
            3 => Some(Self::LocationForward),
            4 => Some(Self::LocationForwardPerm),
            5 => Some(Self::NeedsAddressingMode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LocateStatus {
    UnknownObject = 0,
    ObjectHere = 1,
    ObjectForward = 2,
    ObjectForwardPerm = 3,
    LocSystemException = 4,
    LocNeedsAddressingMode = 5,
}

impl LocateStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::UnknownObject),
            1 => Some(Self::ObjectHere),
            2 => Some(Self::ObjectForward),
            3 => Some(Self::ObjectForwardPerm),
            4 => Some(Self::LocSystemException),
            5 => Some(Self::LocNeedsAddressingMode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub request_id: u32,
    pub response_expected: bool,
    pub target: TargetAddress,
    pub operation: String,
    /// Encoded arguments, opaque to this layer
    pub body: Bytes,
}

impl RequestMessage {
    pub fn new(request_id: u32, object_key: Bytes, operation: impl Into<String>, body: Bytes) -> Self {
        Self {
            request_id,
            response_expected: true,
            target: TargetAddress::Key(object_key),
            operation: operation.into(),
            body,
        }
    }

    pub fn oneway(mut self) -> Self {
        self.response_expected = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    pub request_id: u32,
    pub status: ReplyStatus,
    pub body: Bytes,
    /// Byte order the body was encoded in
    pub byte_order: ByteOrder,
}

impl ReplyMessage {
    pub fn new(request_id: u32, body: Bytes) -> Self {
        Self::with_status(request_id, ReplyStatus::NoException, body)
    }

    pub fn with_status(request_id: u32, status: ReplyStatus, body: Bytes) -> Self {
        Self {
            request_id,
            status,
            body,
            byte_order: ByteOrder::native(),
        }
    }

    pub fn system_exception(request_id: u32, ex: &SystemException) -> Self {
        let order = ByteOrder::native();
        Self {
            request_id,
            status: ReplyStatus::SystemException,
            body: ex.encode(order),
            byte_order: order,
        }
    }

    pub fn location_forward(request_id: u32, ior: &Ior, permanent: bool) -> Self {
        let status = if permanent {
            ReplyStatus::LocationForwardPerm
        } else {
            ReplyStatus::LocationForward
        };
        Self::with_status(request_id, status, ior.encode())
    }

    pub fn needs_addressing_mode(request_id: u32, disposition: AddressingDisposition) -> Self {
        let order = ByteOrder::native();
        let mut buf = BytesMut::new();
        Writer::new(&mut buf, order).put_u16(disposition as u16);
        Self {
            request_id,
            status: ReplyStatus::NeedsAddressingMode,
            body: buf.freeze(),
            byte_order: order,
        }
    }

    pub fn decode_system_exception(&self) -> Result<SystemException> {
        SystemException::decode(self.body.clone(), self.byte_order)
    }

    pub fn decode_forward(&self) -> Result<Ior> {
        Ior::decode(self.body.clone())
    }

    pub fn decode_disposition(&self) -> Result<AddressingDisposition> {
        let raw = Reader::new(self.body.clone(), self.byte_order).get_u16()?;
        AddressingDisposition::from_u16(raw).ok_or(GiopError::UnknownDisposition(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateRequestMessage {
    pub request_id: u32,
    pub target: TargetAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateReplyMessage {
    pub request_id: u32,
    pub status: LocateStatus,
    pub body: Bytes,
}

/// Continuation of a fragmented message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMessage {
    pub request_id: u32,
    pub more_fragments: bool,
    pub body: Bytes,
}

/// Any GIOP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(RequestMessage),
    Reply(ReplyMessage),
    CancelRequest { request_id: u32 },
    LocateRequest(LocateRequestMessage),
    LocateReply(LocateReplyMessage),
    CloseConnection,
    MessageError,
    Fragment(FragmentMessage),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Request(_) => MsgType::Request,
            Self::Reply(_) => MsgType::Reply,
            Self::CancelRequest { .. } => MsgType::CancelRequest,
            Self::LocateRequest(_) => MsgType::LocateRequest,
            Self::LocateReply(_) => MsgType::LocateReply,
            Self::CloseConnection => MsgType::CloseConnection,
            Self::MessageError => MsgType::MessageError,
            Self::Fragment(_) => MsgType::Fragment,
        }
    }

    pub fn request_id(&self) -> Option<u32> {
        match self {
            Self::Request(m) => Some(m.request_id),
            Self::Reply(m) => Some(m.request_id),
            Self::CancelRequest { request_id } => Some(*request_id),
            Self::LocateRequest(m) => Some(m.request_id),
            Self::LocateReply(m) => Some(m.request_id),
            Self::Fragment(m) => Some(m.request_id),
            Self::CloseConnection | Self::MessageError => None,
        }
    }

    /// Encode in the host byte order
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoded message to `buf` (which may already hold data)
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let order = ByteOrder::native();
        let start = buf.len();
        let mut header = MessageHeader::new(self.msg_type(), order);
        if let Self::Fragment(frag) = self {
            header.flags.set_more_fragments(frag.more_fragments);
        }
        header.encode(buf);

        {
            let mut w = Writer::new(buf, order);
            match self {
                Self::Request(req) => {
                    w.put_u32(req.request_id);
                    w.put_bool(req.response_expected);
                    req.target.encode(&mut w);
                    w.put_string(&req.operation);
                    w.put_raw(&req.body);
                }
                Self::Reply(reply) => {
                    w.put_u32(reply.request_id);
                    w.put_u32(reply.status as u32);
                    w.put_raw(&reply.body);
                }
                Self::CancelRequest { request_id } => w.put_u32(*request_id),
                Self::LocateRequest(req) => {
                    w.put_u32(req.request_id);
                    req.target.encode(&mut w);
                }
                Self::LocateReply(reply) => {
                    w.put_u32(reply.request_id);
                    w.put_u32(reply.status as u32);
                    w.put_raw(&reply.body);
                }
                Self::CloseConnection | Self::MessageError => {}
                Self::Fragment(frag) => {
                    w.put_u32(frag.request_id);
                    w.put_raw(&frag.body);
                }
            }
        }

        let body_len = (buf.len() - start - MessageHeader::SIZE) as u32;
        MessageHeader::patch_size(&mut buf[start..start + MessageHeader::SIZE], body_len, order);
    }

    /// Decode one complete (unfragmented or reassembled) message
    pub fn decode(data: &Bytes) -> Result<Self> {
        let header = MessageHeader::decode(data)?;
        if data.len() < header.total_len() {
            return Err(GiopError::BufferUnderflow {
                needed: header.total_len(),
                have: data.len(),
            });
        }
        let body = data.slice(MessageHeader::SIZE..header.total_len());
        let mut r = Reader::new(body, header.byte_order());

        let message = match header.msg_type {
            MsgType::Request => {
                let request_id = r.get_u32()?;
                let response_expected = r.get_bool()?;
                let target = TargetAddress::decode(&mut r)?;
                let operation = r.get_string()?;
                Self::Request(RequestMessage {
                    request_id,
                    response_expected,
                    target,
                    operation,
                    body: r.rest(),
                })
            }
            MsgType::Reply => {
                let request_id = r.get_u32()?;
                let raw = r.get_u32()?;
                let status = ReplyStatus::from_u32(raw).ok_or(GiopError::UnknownReplyStatus(raw))?;
                Self::Reply(ReplyMessage {
                    request_id,
                    status,
                    body: r.rest(),
                    byte_order: header.byte_order(),
                })
            }
            MsgType::CancelRequest => Self::CancelRequest {
                request_id: r.get_u32()?,
            },
            MsgType::LocateRequest => {
                let request_id = r.get_u32()?;
                let target = TargetAddress::decode(&mut r)?;
                Self::LocateRequest(LocateRequestMessage { request_id, target })
            }
            MsgType::LocateReply => {
                let request_id = r.get_u32()?;
                let raw = r.get_u32()?;
                let status =
                    LocateStatus::from_u32(raw).ok_or(GiopError::UnknownLocateStatus(raw))?;
                Self::LocateReply(LocateReplyMessage {
                    request_id,
                    status,
                    body: r.rest(),
                })
            }
            MsgType::CloseConnection => Self::CloseConnection,
            MsgType::MessageError => Self::MessageError,
            MsgType::Fragment => Self::Fragment(FragmentMessage {
                request_id: r.get_u32()?,
                more_fragments: header.flags.has_more_fragments(),
                body: r.rest(),
            }),
        };
        Ok(message)
    }
}

/// Read the request id of an encoded message without decoding the rest
pub fn peek_request_id(data: &[u8]) -> Option<u32> {
    let header = MessageHeader::decode(data).ok()?;
    if !header.msg_type.carries_request_id() || data.len() < MessageHeader::SIZE + 4 {
        return None;
    }
    let raw = [data[12], data[13], data[14], data[15]];
    Some(match header.byte_order() {
        ByteOrder::LittleEndian => u32::from_le_bytes(raw),
        ByteOrder::BigEndian => u32::from_be_bytes(raw),
    })
}
