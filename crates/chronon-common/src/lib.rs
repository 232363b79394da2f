//! Chronon Common - Shared Types and Utilities
//!
//! Foundational types used across the Chronon time-series engine: error
//! handling, series identifiers, the on-the-wire sample format, and the
//! aggregation records exchanged between storage and query layers.
//!
//! Key Features:
//! - Unified error type covering storage, query, and request failures
//! - Type-safe identifiers (SeriesId, LogicAddr)
//! - Self-describing variable-length sample encoding
//! - Aggregation records with lossless combine semantics
//!
//! @version 0.1.0
//! @author Chronon Development Team

pub mod aggregation;
pub mod config;
pub mod error;
pub mod sample;
pub mod types;

pub use aggregation::{AggregateFunction, AggregationResult};
pub use config::ColumnStoreConfig;
pub use error::{ChrononError, Result};
pub use sample::{Payload, PayloadType, Sample, SAMPLE_HEADER_SIZE};
pub use types::{AppendStatus, LogicAddr, SeriesId, Timestamp};
