//! Chronon Backend - Block Store Abstraction
//!
//! The synchronous block store the series trees seal extents into. Reads
//! may block on I/O inside cursor reads; a missing address is the
//! `Unavailable` condition scan operators step over.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::block::Block;
use chronon_common::{ChrononError, LogicAddr, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Block Store Trait
// =============================================================================

/// Pluggable block store interface.
pub trait BlockStore: Send + Sync {
    /// Persist a block and return its address.
    fn write_block(&self, block: Block) -> Result<LogicAddr>;

    /// Read a block. A removed or cold block yields `Unavailable`.
    fn read_block(&self, addr: LogicAddr) -> Result<Block>;

    /// Delete a block.
    fn delete_block(&self, addr: LogicAddr) -> Result<()>;

    /// Check whether a block is resident.
    fn block_exists(&self, addr: LogicAddr) -> bool;

    /// Get storage statistics.
    fn stats(&self) -> StorageStats;
}

// =============================================================================
// Storage Statistics
// =============================================================================

/// Statistics about storage usage and operations.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub total_blocks: u64,
    pub total_bytes: u64,
    pub read_ops: u64,
    pub write_ops: u64,
    pub delete_ops: u64,
}

// =============================================================================
// Memory Backend
// =============================================================================

/// In-memory block store for testing and development.
pub struct MemoryBackend {
    blocks: RwLock<HashMap<LogicAddr, Block>>,
    next_addr: AtomicU64,
    stats: RwLock<StorageStats>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            next_addr: AtomicU64::new(1),
            stats: RwLock::new(StorageStats::default()),
        }
    }

    fn allocate_addr(&self) -> LogicAddr {
        LogicAddr(self.next_addr.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBackend {
    fn write_block(&self, block: Block) -> Result<LogicAddr> {
        let addr = self.allocate_addr();
        let size = block.size() as u64;
        self.blocks.write().insert(addr, block);

        let mut stats = self.stats.write();
        stats.write_ops += 1;
        stats.total_blocks += 1;
        stats.total_bytes += size;
        Ok(addr)
    }

    fn read_block(&self, addr: LogicAddr) -> Result<Block> {
        let block = self
            .blocks
            .read()
            .get(&addr)
            .cloned()
            .ok_or_else(|| ChrononError::Unavailable(format!("block {} not resident", addr.0)))?;
        self.stats.write().read_ops += 1;
        Ok(block)
    }

    fn delete_block(&self, addr: LogicAddr) -> Result<()> {
        match self.blocks.write().remove(&addr) {
            Some(block) => {
                let mut stats = self.stats.write();
                stats.delete_ops += 1;
                stats.total_blocks -= 1;
                stats.total_bytes -= block.size() as u64;
                Ok(())
            }
            None => Err(ChrononError::Unavailable(format!(
                "block {} not resident",
                addr.0
            ))),
        }
    }

    fn block_exists(&self, addr: LogicAddr) -> bool {
        self.blocks.read().contains_key(&addr)
    }

    fn stats(&self) -> StorageStats {
        self.stats.read().clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
