// src/core/protocol/mbap_frame.rs

//! Implements the MODBUS/TCP application frame (MBAP header + PDU) and the
//! corresponding `Encoder` and `Decoder` for network communication.
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//! +----------------+-------------+--------+---------+-----------------+
//! | transaction id | protocol id | length | unit id | PDU             |
//! | 2 bytes        | 2 bytes     | 2 bytes| 1 byte  | length - 1 bytes|
//! +----------------+-------------+--------+---------+-----------------+
//! ```
//!
//! `length` counts every byte that follows it, so a complete frame always
//! occupies `6 + length` bytes.

use crate::core::ModbusError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Bytes needed before the frame length is known (transaction id, protocol id, length).
pub const MBAP_PREFIX_LEN: usize = 6;
/// The full MBAP header, including the unit identifier.
pub const MBAP_HEADER_LEN: usize = 7;
/// The largest PDU a MODBUS frame can carry.
pub const MAX_PDU_LEN: usize = 253;
/// The only protocol identifier defined for MODBUS.
pub const MODBUS_PROTOCOL_ID: u16 = 0;

// The length field covers the unit id plus at least a function code.
const MIN_LENGTH_FIELD: usize = 2;
const MAX_LENGTH_FIELD: usize = MAX_PDU_LEN + 1;

/// The largest frame the decoder will ever accept.
pub const MAX_FRAME_LEN: usize = MBAP_PREFIX_LEN + MAX_LENGTH_FIELD;

/// A single MODBUS/TCP frame as exchanged with a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbapFrame {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub unit_id: u8,
    /// Function code followed by its data.
    pub pdu: Bytes,
}

impl MbapFrame {
    /// Creates a MODBUS frame (protocol id 0).
    pub fn new(transaction_id: u16, unit_id: u8, pdu: impl Into<Bytes>) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            unit_id,
            pdu: pdu.into(),
        }
    }

    /// Builds the answer to this frame, echoing its transaction, protocol and unit ids.
    pub fn reply(&self, pdu: impl Into<Bytes>) -> Self {
        Self {
            transaction_id: self.transaction_id,
            protocol_id: self.protocol_id,
            unit_id: self.unit_id,
            pdu: pdu.into(),
        }
    }

    /// The function code, i.e. the first byte of the PDU.
    pub fn function_code(&self) -> Option<u8> {
        self.pdu.first().copied()
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        MBAP_HEADER_LEN + self.pdu.len()
    }

    /// A convenience method to encode a frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, ModbusError> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        MbapFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `MbapFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MbapFrameCodec;

impl MbapFrameCodec {
    /// Validates the 6-byte prefix and returns the total length of the frame it announces.
    ///
    /// The header is judged as soon as it is available, so a bad protocol id or
    /// length field is reported without waiting for a payload that may never come.
    fn frame_len(prefix: &[u8]) -> Result<usize, ModbusError> {
        let protocol_id = u16::from_be_bytes([prefix[2], prefix[3]]);
        if protocol_id != MODBUS_PROTOCOL_ID {
            return Err(ModbusError::InvalidFrame(format!(
                "unsupported protocol id {protocol_id:#06x}"
            )));
        }

        let length = u16::from_be_bytes([prefix[4], prefix[5]]) as usize;
        if !(MIN_LENGTH_FIELD..=MAX_LENGTH_FIELD).contains(&length) {
            return Err(ModbusError::InvalidFrame(format!(
                "length field {length} outside {MIN_LENGTH_FIELD}..={MAX_LENGTH_FIELD}"
            )));
        }

        Ok(MBAP_PREFIX_LEN + length)
    }

    /// Reports how many more bytes `src` needs before a frame could be decoded.
    ///
    /// Returns `Ok(0)` when a complete frame is already present, and the
    /// framing error when the prefix can never become a valid frame.
    pub fn remaining_hint(src: &[u8]) -> Result<usize, ModbusError> {
        if src.len() < MBAP_PREFIX_LEN {
            return Ok(MBAP_PREFIX_LEN - src.len());
        }
        let frame_len = Self::frame_len(&src[..MBAP_PREFIX_LEN])?;
        Ok(frame_len.saturating_sub(src.len()))
    }
}

impl Encoder<MbapFrame> for MbapFrameCodec {
    type Error = ModbusError;

    /// Writes the MBAP header, computing the length field from the PDU.
    fn encode(&mut self, item: MbapFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.pdu.is_empty() {
            return Err(ModbusError::InvalidFrame("cannot encode an empty PDU".into()));
        }
        if item.pdu.len() > MAX_PDU_LEN {
            return Err(ModbusError::InvalidFrame(format!(
                "PDU of {} bytes exceeds the {MAX_PDU_LEN}-byte limit",
                item.pdu.len()
            )));
        }

        dst.reserve(item.wire_len());
        dst.put_u16(item.transaction_id);
        dst.put_u16(item.protocol_id);
        dst.put_u16((item.pdu.len() + 1) as u16);
        dst.put_u8(item.unit_id);
        dst.extend_from_slice(&item.pdu);
        Ok(())
    }
}

impl Decoder for MbapFrameCodec {
    type Item = MbapFrame;
    type Error = ModbusError;

    /// Decodes one frame from the front of `src`.
    ///
    /// `Ok(None)` leaves `src` untouched; `Ok(Some(_))` removes exactly the
    /// bytes of the returned frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MBAP_PREFIX_LEN {
            return Ok(None);
        }

        let frame_len = Self::frame_len(&src[..MBAP_PREFIX_LEN])?;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut raw = src.split_to(frame_len);
        let transaction_id = raw.get_u16();
        let protocol_id = raw.get_u16();
        let _length = raw.get_u16();
        let unit_id = raw.get_u8();

        Ok(Some(MbapFrame {
            transaction_id,
            protocol_id,
            unit_id,
            pdu: raw.freeze(),
        }))
    }
}
