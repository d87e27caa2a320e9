// src/connection/buffer.rs

//! Defines `FrameBuffer`, the per-connection byte accumulator that frames are
//! extracted from.

use crate::core::ModbusError;
use crate::core::protocol::MbapFrameCodec;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Accumulates bytes read from the socket and hands out complete frames.
///
/// TCP has no message boundaries, so one read may carry zero, one or several
/// frames. Callers append every read and then call [`try_extract_frame`]
/// until it reports that no complete frame is left.
///
/// [`try_extract_frame`]: FrameBuffer::try_extract_frame
#[derive(Debug)]
pub struct FrameBuffer<C = MbapFrameCodec> {
    buf: BytesMut,
    codec: C,
}

impl FrameBuffer<MbapFrameCodec> {
    /// Creates an empty buffer that decodes MBAP frames.
    pub fn new() -> Self {
        Self::with_codec(MbapFrameCodec)
    }
}

impl Default for FrameBuffer<MbapFrameCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> FrameBuffer<C>
where
    C: Decoder<Error = ModbusError>,
{
    /// Creates an empty buffer around an arbitrary decoder.
    pub fn with_codec(codec: C) -> Self {
        Self {
            buf: BytesMut::new(),
            codec,
        }
    }

    /// Appends bytes to the tail of the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Tries to decode exactly one frame from the front of the buffer.
    ///
    /// - `Ok(Some(frame))`: the frame's bytes have been removed, the rest is
    ///   kept in order.
    /// - `Ok(None)`: not enough bytes yet; the buffer is unchanged.
    /// - `Err(_)`: the buffered prefix can never form a valid frame. The
    ///   buffer is left as is; the stream cannot be resynchronized.
    pub fn try_extract_frame(&mut self) -> Result<Option<C::Item>, ModbusError> {
        self.codec.decode(&mut self.buf)
    }

    /// The number of buffered bytes not yet consumed by a frame.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// A read-only view of the buffered bytes.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}
