//! Chronon Config - Configuration Structures
//!
//! Tunables for the column store.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use serde::{Deserialize, Serialize};

/// Configuration for a column store and the trees it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStoreConfig {
    /// Number of points buffered per series before an extent is sealed into
    /// the block store.
    pub extent_capacity: usize,
}

impl Default for ColumnStoreConfig {
    fn default() -> Self {
        Self {
            extent_capacity: 1024,
        }
    }
}
