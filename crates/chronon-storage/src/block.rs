//! Chronon Block - Storage Block Management
//!
//! The atomic unit of block-store I/O: a checksummed payload with a small
//! self-describing header. Numeric compression of payloads belongs to the
//! encoding layer above; blocks only guarantee integrity.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use bytes::{Bytes, BytesMut, BufMut};
use chronon_common::{ChrononError, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Block Header
// =============================================================================

/// Header containing block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub data_size: u32,
    pub checksum: u32,
    pub version: u16,
}

impl BlockHeader {
    fn to_bytes(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| ChrononError::Serialization(e.to_string()))
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| ChrononError::Serialization(e.to_string()))
    }
}

// =============================================================================
// Block
// =============================================================================

/// A storage block containing header and payload.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub data: Bytes,
}

impl Block {
    /// Create a new block with the given payload.
    pub fn new(data: Bytes) -> Self {
        let header = BlockHeader {
            data_size: data.len() as u32,
            checksum: crc32fast::hash(&data),
            version: 1,
        };
        Self { header, data }
    }

    /// Verify the block's checksum.
    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.data) == self.header.checksum
    }

    /// Serialize the entire block to bytes.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let header_bytes = self.header.to_bytes()?;
        let mut buf = BytesMut::with_capacity(header_bytes.len() + self.data.len() + 8);
        buf.put_u32_le(header_bytes.len() as u32);
        buf.put(header_bytes);
        buf.put_u32_le(self.data.len() as u32);
        buf.put(self.data.clone());
        Ok(buf.freeze())
    }

    /// Deserialize a block from bytes and verify its checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(ChrononError::Corruption("block too small".to_string()));
        }
        let header_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + header_len + 4 {
            return Err(ChrononError::Corruption(
                "block header truncated".to_string(),
            ));
        }
        let header = BlockHeader::from_bytes(&data[4..4 + header_len])?;

        let data_offset = 4 + header_len;
        let data_len = u32::from_le_bytes([
            data[data_offset],
            data[data_offset + 1],
            data[data_offset + 2],
            data[data_offset + 3],
        ]) as usize;
        if data.len() < data_offset + 4 + data_len {
            return Err(ChrononError::Corruption("block data truncated".to_string()));
        }

        let block = Self {
            header,
            data: Bytes::copy_from_slice(&data[data_offset + 4..data_offset + 4 + data_len]),
        };
        if !block.verify_checksum() {
            return Err(ChrononError::Corruption("block checksum mismatch".to_string()));
        }
        Ok(block)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip() {
        let data = Bytes::from_static(b"extent payload");
        let block = Block::new(data.clone());
        assert!(block.verify_checksum());

        let serialized = block.to_bytes().expect("to_bytes should succeed");
        let deserialized = Block::from_bytes(&serialized).expect("from_bytes should succeed");
        assert_eq!(deserialized.data, data);
        assert!(deserialized.verify_checksum());
    }

    #[test]
    fn test_corrupted_payload_is_detected() {
        let block = Block::new(Bytes::from_static(b"sensor data"));
        let serialized = block.to_bytes().expect("to_bytes should succeed");

        let mut tampered = serialized.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        assert!(Block::from_bytes(&tampered).is_err());
    }

    #[test]
    fn test_truncated_block_is_rejected() {
        let block = Block::new(Bytes::from_static(b"sensor data"));
        let serialized = block.to_bytes().expect("to_bytes should succeed");
        assert!(Block::from_bytes(&serialized[..6]).is_err());
    }
}
