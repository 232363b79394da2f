//! Chronon Error - Unified Error Types
//!
//! Error handling for all Chronon operations. End-of-stream is not an
//! error: cursors report it through their read result. Everything that
//! aborts an operation is a variant here.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Chronon operations.
#[derive(Error, Debug)]
pub enum ChrononError {
    /// A referenced block was removed from the store or is not resident.
    #[error("block unavailable: {0}")]
    Unavailable(String),

    /// The requested series is not registered.
    #[error("series not found: {0}")]
    NotFound(u64),

    /// Malformed request or duplicate registration.
    #[error("bad argument: {0}")]
    BadArg(String),

    /// A write carried a payload the tree cannot accept.
    #[error("bad value: {0}")]
    BadValue(String),

    /// The request shape is recognized but not served.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Chronon operations.
pub type Result<T> = std::result::Result<T, ChrononError>;

// =============================================================================
// Error Classification
// =============================================================================

impl ChrononError {
    /// Returns true for the cold-block condition that scan operators skip
    /// over instead of aborting.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ChrononError::Unavailable(_))
    }
}
