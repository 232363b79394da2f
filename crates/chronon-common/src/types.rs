//! Chronon Types - Core Identifiers
//!
//! Identifier types shared by the storage and query layers.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use serde::{Deserialize, Serialize};

/// Timestamp in nanoseconds. Monotonic within a series, not across series.
pub type Timestamp = u64;

/// Unique identifier for a series within a column store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesId(pub u64);

/// Logical address of a block in a block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicAddr(pub u64);

impl LogicAddr {
    /// Marker appended to a rescue-point list when the tree was not closed
    /// cleanly. Never a valid block address.
    pub const TOMBSTONE: LogicAddr = LogicAddr(u64::MAX);
}

/// Outcome of a successful append to a series tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    Ok,
    /// An extent was sealed; the caller should persist the new root set.
    FlushNeeded,
}
