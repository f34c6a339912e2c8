//! Interoperable object references
//!
//! An [`Ior`] names one remote object through an ordered list of tagged
//! profiles. Each IIOP profile carries a primary host/port, the object key
//! the server uses to find the servant, and zero or more alternate addresses
//! (replicas reachable the same way).
//!
//! ```text
//! IOR encapsulation
//! ├── byte order (u8)
//! ├── type id (string)
//! └── profiles (u32 count)
//!     ├── tag (u32)              TAG_INTERNET_IOP = 0
//!     └── profile body (octets, itself an encapsulation)
//!         ├── byte order, version major/minor
//!         ├── host (string), port (u16)
//!         ├── object key (octets)
//!         └── components (u32 count) of tag + octets
//! ```

use crate::codec::{ByteOrder, Reader, Writer};
use crate::error::{GiopError, Result};
use crate::message::Version;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Profile tag for IIOP profiles
pub const TAG_INTERNET_IOP: u32 = 0;
/// Component tag for an additional host/port of the same profile
pub const TAG_ALTERNATE_IIOP_ADDRESS: u32 = 3;

/// Host and port of one listening endpoint
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// IIOP profile body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IiopProfile {
    pub version: Version,
    pub address: HostPort,
    pub object_key: Bytes,
    pub alternate_addresses: Vec<HostPort>,
}

impl IiopProfile {
    pub fn new(address: HostPort, object_key: Bytes) -> Self {
        Self {
            version: Version::GIOP_1_2,
            address,
            object_key,
            alternate_addresses: Vec::new(),
        }
    }

    pub fn with_alternate(mut self, address: HostPort) -> Self {
        self.alternate_addresses.push(address);
        self
    }

    /// Primary address first, then alternates in declaration order
    pub fn addresses(&self) -> impl Iterator<Item = &HostPort> {
        std::iter::once(&self.address).chain(self.alternate_addresses.iter())
    }

    /// Encode as a standalone encapsulation
    pub fn encode(&self, order: ByteOrder) -> Bytes {
        let mut buf = BytesMut::new();
        let mut w = Writer::new(&mut buf, order);
        w.put_bool(order.is_little_endian());
        w.put_u8(self.version.major);
        w.put_u8(self.version.minor);
        w.put_string(&self.address.host);
        w.put_u16(self.address.port);
        w.put_octets(&self.object_key);
        w.put_u32(self.alternate_addresses.len() as u32);
        for alt in &self.alternate_addresses {
            w.put_u32(TAG_ALTERNATE_IIOP_ADDRESS);
            w.put_octets(&encode_host_port(alt, order));
        }
        buf.freeze()
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let mut r = encapsulation(data)?;
        let version = Version::new(r.get_u8()?, r.get_u8()?);
        let host = r.get_string()?;
        let port = r.get_u16()?;
        let object_key = r.get_octets()?;
        let count = r.get_u32()?;
        let mut alternate_addresses = Vec::new();
        for _ in 0..count {
            let tag = r.get_u32()?;
            let body = r.get_octets()?;
            // Components other than alternate addresses carry nothing this layer uses
            if tag == TAG_ALTERNATE_IIOP_ADDRESS {
                alternate_addresses.push(decode_host_port(body)?);
            }
        }
        Ok(Self {
            version,
            address: HostPort::new(host, port),
            object_key,
            alternate_addresses,
        })
    }
}

/// One entry of an IOR's profile list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaggedProfile {
    Iiop(IiopProfile),
    /// Profile for a protocol this ORB does not speak, preserved verbatim
    Unknown { tag: u32, data: Bytes },
}

impl TaggedProfile {
    pub fn tag(&self) -> u32 {
        match self {
            Self::Iiop(_) => TAG_INTERNET_IOP,
            Self::Unknown { tag, .. } => *tag,
        }
    }
}

/// Interoperable object reference
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Ior {
    pub type_id: String,
    pub profiles: Vec<TaggedProfile>,
}

impl Ior {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            profiles: Vec::new(),
        }
    }

    /// Reference with a single IIOP profile
    pub fn with_profile(type_id: impl Into<String>, profile: IiopProfile) -> Self {
        let mut ior = Self::new(type_id);
        ior.add_profile(profile);
        ior
    }

    pub fn add_profile(&mut self, profile: IiopProfile) {
        self.profiles.push(TaggedProfile::Iiop(profile));
    }

    /// A nil reference has no profiles
    pub fn is_nil(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iiop_profiles(&self) -> impl Iterator<Item = &IiopProfile> {
        self.profiles.iter().filter_map(|p| match p {
            TaggedProfile::Iiop(iiop) => Some(iiop),
            TaggedProfile::Unknown { .. } => None,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf, ByteOrder::native());
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut, order: ByteOrder) {
        let mut w = Writer::new(buf, order);
        w.put_bool(order.is_little_endian());
        w.put_string(&self.type_id);
        w.put_u32(self.profiles.len() as u32);
        for profile in &self.profiles {
            match profile {
                TaggedProfile::Iiop(iiop) => {
                    w.put_u32(TAG_INTERNET_IOP);
                    w.put_octets(&iiop.encode(order));
                }
                TaggedProfile::Unknown { tag, data } => {
                    w.put_u32(*tag);
                    w.put_octets(data);
                }
            }
        }
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let mut r = encapsulation(data)?;
        let ior = Self::decode_from(&mut r)?;
        Ok(ior)
    }

    /// Decode the fields after the byte-order octet
    fn decode_from(r: &mut Reader) -> Result<Self> {
        let type_id = r.get_string()?;
        let count = r.get_u32()? as usize;
        if count > r.remaining() {
            return Err(GiopError::InvalidData(format!(
                "IOR claims {} profiles in {} bytes",
                count,
                r.remaining()
            )));
        }
        let mut profiles = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = r.get_u32()?;
            let data = r.get_octets()?;
            if tag == TAG_INTERNET_IOP {
                profiles.push(TaggedProfile::Iiop(IiopProfile::decode(data)?));
            } else {
                profiles.push(TaggedProfile::Unknown { tag, data });
            }
        }
        Ok(Self { type_id, profiles })
    }
}

impl fmt::Display for Ior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IOR[{}", self.type_id)?;
        for profile in self.iiop_profiles() {
            for addr in profile.addresses() {
                write!(f, " {}", addr)?;
            }
        }
        write!(f, "]")
    }
}

/// Open an encapsulation: the first octet selects the byte order
fn encapsulation(data: Bytes) -> Result<Reader> {
    let mut r = Reader::new(data, ByteOrder::BigEndian);
    let little = r.get_bool()?;
    let rest = r.rest();
    Ok(Reader::new(rest, ByteOrder::from_flag(little)))
}

fn encode_host_port(addr: &HostPort, order: ByteOrder) -> Bytes {
    let mut buf = BytesMut::new();
    let mut w = Writer::new(&mut buf, order);
    w.put_bool(order.is_little_endian());
    w.put_string(&addr.host);
    w.put_u16(addr.port);
    buf.freeze()
}

fn decode_host_port(data: Bytes) -> Result<HostPort> {
    let mut r = encapsulation(data)?;
    let host = r.get_string()?;
    let port = r.get_u16()?;
    Ok(HostPort { host, port })
}
