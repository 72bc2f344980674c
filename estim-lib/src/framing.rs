//! Frame recovery on raw byte streams.
//!
//! The codec in [`crate::message`] only ever sees exact, aligned frames.
//! Everything that deals with partial reads, garbage bytes and misalignment
//! lives here.

use crate::constants::{BUTTON_FRAME_HEAD, BUTTON_PACKET_SIZE, MAX_BUFFER_SIZE};
use crate::error::DecodeError;
use crate::message::{ButtonPacket, Packet, Record};
use crate::packet::frame_size;
use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

/// Offset of the first recognized head byte in `buffer`.
///
/// Returns `buffer.len()` when no head is present, meaning the whole buffer
/// can be dropped.
pub fn resync(buffer: &[u8], heads: &[u8]) -> usize {
    buffer
        .iter()
        .position(|b| heads.contains(b))
        .unwrap_or(buffer.len())
}

/// Bounded accumulator that turns a byte stream into frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    limit: usize,
    discarded: u64,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFER_SIZE)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
            discarded: 0,
        }
    }

    /// Append received bytes.
    ///
    /// Returns `false` if the buffer grew past its limit and was cleared.
    pub fn extend(&mut self, bytes: &[u8]) -> bool {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.limit {
            warn!(
                len = self.buf.len(),
                limit = self.limit,
                "Receive buffer overflow, clearing"
            );
            self.discarded += self.buf.len() as u64;
            self.buf.clear();
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Total bytes dropped by resync, failed decodes and overflow.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Next main-link record whose head is in `heads`.
    pub fn next_packet(&mut self, heads: &[u8]) -> Option<Packet> {
        self.next_frame(heads, frame_size, Packet::decode)
    }

    /// Next frame from the button link.
    pub fn next_button(&mut self) -> Option<ButtonPacket> {
        self.next_frame(
            &[BUTTON_FRAME_HEAD],
            |_| Some(BUTTON_PACKET_SIZE),
            ButtonPacket::decode,
        )
    }

    fn next_frame<T>(
        &mut self,
        heads: &[u8],
        size_for: impl Fn(u8) -> Option<usize>,
        decode: impl Fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Option<T> {
        loop {
            let offset = resync(&self.buf, heads);
            if offset > 0 {
                trace!(skipped = offset, "Resync");
                self.drop_front(offset);
            }

            let head = *self.buf.first()?;
            let Some(size) = size_for(head) else {
                self.drop_front(1);
                continue;
            };
            if self.buf.len() < size {
                // a complete shorter frame behind an unfinished head is not held back
                return self.frame_behind(heads, size, &size_for, &decode);
            }

            match decode(&self.buf[..size]) {
                Ok(frame) => {
                    self.buf.advance(size);
                    return Some(frame);
                }
                Err(e) => {
                    trace!(error = %e, frame = %hex::encode(&self.buf[..size]), "Dropping bad frame head");
                    self.drop_front(1);
                }
            }
        }
    }

    /// First complete, valid frame shorter than `pending` that starts after
    /// the head at offset 0. Bytes in front of it are dropped.
    fn frame_behind<T>(
        &mut self,
        heads: &[u8],
        pending: usize,
        size_for: &dyn Fn(u8) -> Option<usize>,
        decode: &dyn Fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Option<T> {
        let (at, size, frame) = (1..self.buf.len()).find_map(|at| {
            let head = self.buf[at];
            if !heads.contains(&head) {
                return None;
            }
            let size = size_for(head).filter(|&size| size < pending)?;
            let bytes = self.buf.get(at..at + size)?;
            decode(bytes).ok().map(|frame| (at, size, frame))
        })?;
        trace!(skipped = at, "Frame found behind incomplete head");
        self.drop_front(at);
        self.buf.advance(size);
        Some(frame)
    }

    fn drop_front(&mut self, n: usize) {
        self.buf.advance(n);
        self.discarded += n as u64;
    }
}
