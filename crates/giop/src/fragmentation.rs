//! GIOP 1.2 message fragmentation
//!
//! A message larger than the fragment size is split after encoding:
//!
//! ```text
//! initial frame   header(flags |= MORE_FRAGMENTS) + first body bytes
//! Fragment        header(MORE_FRAGMENTS) + request id + next body bytes
//! ...
//! Fragment        header + request id + last body bytes
//! ```
//!
//! The receiver keeps the initial frame, appends each continuation body,
//! then rewrites the size field and clears the flag so the result decodes
//! as an ordinary message.

use crate::codec::{ByteOrder, Writer};
use crate::error::{GiopError, Result};
use crate::message::{peek_request_id, MessageHeader, MsgType};
use crate::transport::Frame;
use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Header plus request id
const FRAGMENT_OVERHEAD: usize = MessageHeader::SIZE + 4;

/// Smallest fragment size that still carries payload
pub const MIN_FRAGMENT_SIZE: usize = FRAGMENT_OVERHEAD + 16;

/// Splits encoded messages into wire frames
pub struct FragmentGenerator;

impl FragmentGenerator {
    /// Split `encoded` into frames of at most `fragment_size` bytes.
    ///
    /// Messages that already fit are returned unchanged as a single frame.
    pub fn fragment(encoded: Bytes, fragment_size: usize) -> Result<Vec<Bytes>> {
        let fragment_size = fragment_size.max(MIN_FRAGMENT_SIZE);
        if encoded.len() <= fragment_size {
            return Ok(vec![encoded]);
        }

        let header = MessageHeader::decode(&encoded)?;
        if !header.msg_type.is_fragmentable() || header.msg_type == MsgType::Fragment {
            return Err(GiopError::NotFragmentable(header.msg_type as u8));
        }
        let request_id =
            peek_request_id(&encoded).ok_or(GiopError::NotFragmentable(header.msg_type as u8))?;
        let order = header.byte_order();

        let mut frames = Vec::new();

        let mut initial = BytesMut::with_capacity(fragment_size);
        let mut first_header = header;
        first_header.flags.set_more_fragments(true);
        first_header.message_size = (fragment_size - MessageHeader::SIZE) as u32;
        first_header.encode(&mut initial);
        initial.extend_from_slice(&encoded[MessageHeader::SIZE..fragment_size]);
        frames.push(initial.freeze());

        let chunk_size = fragment_size - FRAGMENT_OVERHEAD;
        let mut offset = fragment_size;
        while offset < encoded.len() {
            let end = (offset + chunk_size).min(encoded.len());
            let is_last = end == encoded.len();
            frames.push(Self::continuation(
                request_id,
                &encoded[offset..end],
                !is_last,
                order,
            ));
            offset = end;
        }

        trace!(
            "request {}: {} bytes split into {} frames",
            request_id,
            encoded.len(),
            frames.len()
        );
        Ok(frames)
    }

    fn continuation(request_id: u32, chunk: &[u8], more: bool, order: ByteOrder) -> Bytes {
        let mut header = MessageHeader::new(MsgType::Fragment, order);
        header.flags.set_more_fragments(more);
        header.message_size = (4 + chunk.len()) as u32;

        let mut buf = BytesMut::with_capacity(FRAGMENT_OVERHEAD + chunk.len());
        header.encode(&mut buf);
        let mut w = Writer::new(&mut buf, order);
        w.put_u32(request_id);
        w.put_raw(chunk);
        buf.freeze()
    }
}

/// Reassembles one fragmented message
pub struct FragmentAssembler {
    request_id: u32,
    order: ByteOrder,
    data: BytesMut,
    max_size: usize,
    complete: bool,
}

impl FragmentAssembler {
    /// Start from the initial frame (the one carrying the real message type)
    pub fn new(initial: &Frame, max_size: usize) -> Result<Self> {
        let request_id = initial
            .request_id()
            .ok_or(GiopError::NotFragmentable(initial.header.msg_type as u8))?;
        Ok(Self {
            request_id,
            order: initial.header.byte_order(),
            data: BytesMut::from(&initial.data[..]),
            max_size,
            complete: false,
        })
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Append a `Fragment` frame.
    ///
    /// Returns the reassembled message once the last fragment arrives.
    pub fn add_fragment(&mut self, frame: &Frame) -> Result<Option<Bytes>> {
        if self.complete {
            return Err(GiopError::FragmentAfterLast(self.request_id));
        }
        if frame.header.msg_type != MsgType::Fragment {
            return Err(GiopError::InvalidData(format!(
                "expected Fragment, got {:?}",
                frame.header.msg_type
            )));
        }
        let got = frame.request_id().ok_or(GiopError::BufferUnderflow {
            needed: FRAGMENT_OVERHEAD,
            have: frame.data.len(),
        })?;
        if got != self.request_id {
            return Err(GiopError::RequestIdMismatch {
                expected: self.request_id,
                got,
            });
        }

        let chunk = &frame.data[FRAGMENT_OVERHEAD..];
        if self.data.len() + chunk.len() > self.max_size {
            return Err(GiopError::MessageTooLarge {
                size: self.data.len() + chunk.len(),
                max: self.max_size,
            });
        }
        self.data.extend_from_slice(chunk);

        if frame.header.flags.has_more_fragments() {
            return Ok(None);
        }

        self.complete = true;
        let body_len = (self.data.len() - MessageHeader::SIZE) as u32;
        MessageHeader::patch_size(&mut self.data[..MessageHeader::SIZE], body_len, self.order);
        self.data[6] &= !crate::message::MessageFlags::MORE_FRAGMENTS;
        Ok(Some(self.data.split().freeze()))
    }
}
