//! Framed GIOP transport
//!
//! GIOP messages are self-delimiting: the 12-byte header carries the body
//! size, so a stream can be cut into frames without decoding bodies.
//! Reads are cancel-safe; bytes already received stay in the read buffer
//! when a `read_frame` future is dropped.

use crate::error::{GiopError, Result};
use crate::message::{Message, MessageHeader};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Default upper bound on a single frame (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// One undecoded message as read from the wire
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MessageHeader,
    /// Header and body
    pub data: Bytes,
}

impl Frame {
    pub fn request_id(&self) -> Option<u32> {
        crate::message::peek_request_id(&self.data)
    }

    pub fn decode(&self) -> Result<Message> {
        Message::decode(&self.data)
    }
}

/// Reads and writes whole GIOP frames over a byte stream
pub struct GiopTransport<T> {
    inner: T,
    max_message_size: usize,
    read_buf: BytesMut,
}

impl<T> GiopTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    pub fn with_max_message_size(mut self, max_size: usize) -> Self {
        self.max_message_size = max_size;
        self
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// True when a complete frame is already buffered
    pub fn has_buffered_frame(&self) -> bool {
        match MessageHeader::decode(&self.read_buf) {
            Ok(header) => self.read_buf.len() >= header.total_len(),
            Err(_) => false,
        }
    }
}

impl<T: AsyncRead + Unpin> GiopTransport<T> {
    /// Read one complete frame
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let header = self.fill_frame().await?;
        let data = self.read_buf.split_to(header.total_len()).freeze();
        trace!("read {:?} frame of {} bytes", header.msg_type, data.len());
        Ok(Frame { header, data })
    }

    /// Buffer input until a complete frame is available, without consuming it.
    ///
    /// Errors are sticky: calling again after a failure fails the same way.
    pub async fn fill_frame(&mut self) -> Result<MessageHeader> {
        while self.read_buf.len() < MessageHeader::SIZE {
            let n = self.fill_buf().await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Err(GiopError::ConnectionClosed);
                }
                return Err(GiopError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "incomplete GIOP header",
                )));
            }
        }

        let header = MessageHeader::decode(&self.read_buf)?;
        let total = header.total_len();
        if total > self.max_message_size {
            debug!(
                "rejecting {:?} frame of {} bytes (limit {})",
                header.msg_type, total, self.max_message_size
            );
            return Err(GiopError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            });
        }

        while self.read_buf.len() < total {
            let n = self.fill_buf().await?;
            if n == 0 {
                return Err(GiopError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "incomplete GIOP message: expected {} bytes, got {}",
                        total,
                        self.read_buf.len()
                    ),
                )));
            }
        }
        Ok(header)
    }

    /// Read and decode one frame
    pub async fn read_message(&mut self) -> Result<Message> {
        self.read_frame().await?.decode()
    }

    async fn fill_buf(&mut self) -> Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < 4096 {
            self.read_buf.reserve(8192);
        }
        let n = self.inner.read_buf(&mut self.read_buf).await?;
        Ok(n)
    }
}

impl<T: AsyncWrite + Unpin> GiopTransport<T> {
    /// Write already encoded bytes (one or more frames)
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let data = message.encode();
        self.write_frame(&data).await
    }
}
