//! Chronon Storage - Block Store and Series Trees
//!
//! The write side of the engine: a pluggable block store holding sealed
//! extents, and the per-series append-only tree that buffers points, seals
//! them into blocks, and serves the point and aggregate cursors the query
//! operators compose.
//!
//! Key Features:
//! - Synchronous block store interface with an in-memory backend
//! - Checksummed, self-describing extent blocks
//! - Per-series extent trees with rescue-point recovery
//! - Lazy block loading inside cursor reads
//!
//! @version 0.1.0
//! @author Chronon Development Team

pub mod backend;
pub mod block;
pub mod tree;

pub use backend::{BlockStore, MemoryBackend, StorageStats};
pub use block::{Block, BlockHeader};
pub use tree::SeriesTree;
