//! Primitive encoders shared by message bodies and object references.
//!
//! Integers are written in the byte order announced by the enclosing message
//! header (or encapsulation). Octet sequences and strings carry a `u32`
//! length prefix; strings are UTF-8 without a terminator.

use crate::error::{GiopError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Byte order of an encoded message or encapsulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Byte order of the host, used for everything this process encodes
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::LittleEndian
        } else {
            Self::BigEndian
        }
    }

    pub fn from_flag(little_endian: bool) -> Self {
        if little_endian {
            Self::LittleEndian
        } else {
            Self::BigEndian
        }
    }

    pub fn is_little_endian(self) -> bool {
        self == Self::LittleEndian
    }
}

/// Appends primitives to a buffer in a fixed byte order
pub struct Writer<'a> {
    buf: &'a mut BytesMut,
    order: ByteOrder,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut BytesMut, order: ByteOrder) -> Self {
        Self { buf, order }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn put_u16(&mut self, value: u16) {
        match self.order {
            ByteOrder::LittleEndian => self.buf.put_u16_le(value),
            ByteOrder::BigEndian => self.buf.put_u16(value),
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::LittleEndian => self.buf.put_u32_le(value),
            ByteOrder::BigEndian => self.buf.put_u32(value),
        }
    }

    /// Length-prefixed octet sequence
    pub fn put_octets(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.buf.put_slice(data);
    }

    pub fn put_string(&mut self, value: &str) {
        self.put_octets(value.as_bytes());
    }

    /// Raw bytes with no length prefix (trailing payloads)
    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }
}

/// Reads primitives from an immutable buffer in a fixed byte order
pub struct Reader {
    buf: Bytes,
    order: ByteOrder,
}

impl Reader {
    pub fn new(buf: Bytes, order: ByteOrder) -> Self {
        Self { buf, order }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(GiopError::BufferUnderflow {
                needed,
                have: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => self.buf.get_u16_le(),
            ByteOrder::BigEndian => self.buf.get_u16(),
        })
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => self.buf.get_u32_le(),
            ByteOrder::BigEndian => self.buf.get_u32(),
        })
    }

    pub fn get_octets(&mut self) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn get_string(&mut self) -> Result<String> {
        let raw = self.get_octets()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| GiopError::InvalidData("string is not valid UTF-8".to_string()))
    }

    /// Everything not yet consumed
    pub fn rest(&mut self) -> Bytes {
        self.buf.split_off(0)
    }
}
