//! Chronon Sample - Wire Sample Format
//!
//! The variable-length sample record that materializers emit and downstream
//! query nodes consume. Every sample starts with a fixed 32-byte header; the
//! `size` field makes records self-describing so packed runs of samples can
//! be walked without schema knowledge.
//!
//! Layout (little-endian):
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 8    | series id |
//! | 8      | 8    | timestamp |
//! | 16     | 2    | total sample size in bytes |
//! | 18     | 1    | payload type (FLOAT=1, TUPLE=2, EVENT=3) |
//! | 19     | 5    | reserved |
//! | 24     | 8    | value slot (float / presence bitmap / zero) |
//! | 32     | var  | TUPLE: popcount(bitmap) doubles; EVENT: payload bytes |
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::error::{ChrononError, Result};
use crate::types::{SeriesId, Timestamp};
use bytes::{Buf, BufMut, Bytes};

// =============================================================================
// Constants
// =============================================================================

/// Size of the fixed sample header in bytes.
pub const SAMPLE_HEADER_SIZE: usize = 32;

// =============================================================================
// Payload
// =============================================================================

/// Discriminant of a sample's payload as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Float = 1,
    Tuple = 2,
    Event = 3,
}

/// Sample payload. Tuples carry a presence bitmap in the value slot and one
/// double per set bit; events carry an opaque byte payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Float(f64),
    Tuple { bitmap: u64, values: Vec<f64> },
    Event(Bytes),
}

// =============================================================================
// Sample
// =============================================================================

/// A single materialized output record.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: SeriesId,
    pub timestamp: Timestamp,
    pub payload: Payload,
}

impl Sample {
    pub fn float(id: SeriesId, timestamp: Timestamp, value: f64) -> Self {
        Self {
            id,
            timestamp,
            payload: Payload::Float(value),
        }
    }

    /// Build a tuple sample. The number of values must match the bitmap's
    /// population count; a mismatch is a programmer error.
    pub fn tuple(id: SeriesId, timestamp: Timestamp, bitmap: u64, values: Vec<f64>) -> Self {
        assert_eq!(
            bitmap.count_ones() as usize,
            values.len(),
            "tuple bitmap does not match value count"
        );
        Self {
            id,
            timestamp,
            payload: Payload::Tuple { bitmap, values },
        }
    }

    pub fn event(id: SeriesId, timestamp: Timestamp, payload: Bytes) -> Self {
        Self {
            id,
            timestamp,
            payload: Payload::Event(payload),
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        match self.payload {
            Payload::Float(_) => PayloadType::Float,
            Payload::Tuple { .. } => PayloadType::Tuple,
            Payload::Event(_) => PayloadType::Event,
        }
    }

    /// Total encoded size of this sample in bytes.
    pub fn encoded_len(&self) -> usize {
        match &self.payload {
            Payload::Float(_) => SAMPLE_HEADER_SIZE,
            Payload::Tuple { values, .. } => SAMPLE_HEADER_SIZE + 8 * values.len(),
            Payload::Event(data) => SAMPLE_HEADER_SIZE + data.len(),
        }
    }

    /// Encode the sample at the start of `dest`. Returns the number of bytes
    /// written. The destination must hold the whole sample; callers check
    /// `encoded_len` first so that samples are never truncated mid-record.
    pub fn encode(&self, dest: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if len > u16::MAX as usize {
            return Err(ChrononError::BadValue(format!(
                "sample payload too large: {} bytes",
                len
            )));
        }
        if dest.len() < len {
            return Err(ChrononError::BadArg(
                "destination too small for sample".to_string(),
            ));
        }

        let mut buf = &mut dest[..len];
        buf.put_u64_le(self.id.0);
        buf.put_u64_le(self.timestamp);
        buf.put_u16_le(len as u16);
        buf.put_u8(self.payload_type() as u8);
        buf.put_bytes(0, 5);
        match &self.payload {
            Payload::Float(value) => buf.put_f64_le(*value),
            Payload::Tuple { bitmap, values } => {
                buf.put_u64_le(*bitmap);
                for value in values {
                    buf.put_f64_le(*value);
                }
            }
            Payload::Event(data) => {
                buf.put_u64_le(0);
                buf.put_slice(data);
            }
        }
        Ok(len)
    }

    /// Decode one sample from the start of `src`. Returns the sample and the
    /// number of bytes consumed.
    pub fn decode(src: &[u8]) -> Result<(Sample, usize)> {
        if src.len() < SAMPLE_HEADER_SIZE {
            return Err(ChrononError::Corruption(
                "truncated sample header".to_string(),
            ));
        }
        let mut buf = src;
        let id = SeriesId(buf.get_u64_le());
        let timestamp = buf.get_u64_le();
        let size = buf.get_u16_le() as usize;
        let type_tag = buf.get_u8();
        buf.advance(5);

        if size < SAMPLE_HEADER_SIZE || size > src.len() {
            return Err(ChrononError::Corruption(format!(
                "bad sample size: {}",
                size
            )));
        }

        let payload = match type_tag {
            1 => {
                if size != SAMPLE_HEADER_SIZE {
                    return Err(ChrononError::Corruption(format!(
                        "float sample with trailing bytes: {}",
                        size
                    )));
                }
                Payload::Float(buf.get_f64_le())
            }
            2 => {
                let bitmap = buf.get_u64_le();
                let count = bitmap.count_ones() as usize;
                if size != SAMPLE_HEADER_SIZE + 8 * count {
                    return Err(ChrononError::Corruption(format!(
                        "tuple size {} does not match bitmap {:#x}",
                        size, bitmap
                    )));
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(buf.get_f64_le());
                }
                Payload::Tuple { bitmap, values }
            }
            3 => {
                let _slot = buf.get_u64_le();
                Payload::Event(Bytes::copy_from_slice(&src[SAMPLE_HEADER_SIZE..size]))
            }
            other => {
                return Err(ChrononError::Corruption(format!(
                    "unknown payload type: {}",
                    other
                )))
            }
        };

        Ok((
            Sample {
                id,
                timestamp,
                payload,
            },
            size,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
