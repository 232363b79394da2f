//! Chronon Operators - Read-Path Operator Family
//!
//! The composable operators that turn per-series storage cursors into the
//! materialized sample stream a query demands: chain (per-series
//! concatenation), k-way merge (time- or series-ordered interleaving), join
//! (columnar row assembly), aggregation (one summary per series), and
//! stepped group-aggregation with cross-cursor stitching.
//!
//! Key Features:
//! - Sealed cursor traits for points, aggregates, and packed samples
//! - Multi-call read contracts with partial progress and backpressure
//! - Deterministic tie-breaking in every merge discipline
//! - Lossless stitching of partial step buckets across cursor boundaries
//!
//! @version 0.1.0
//! @author Chronon Development Team

pub mod aggregate;
pub mod join;
pub mod merge;
pub mod operator;
pub mod scan;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregate::{
    Aggregator, CombineAggregateOperator, CombineGroupAggregateOperator, SeriesOrderIterator,
    TimeOrderIterator,
};
pub use join::JoinOperator;
pub use merge::{MergeJoinOperator, MergeOperator, SeriesOrder, TimeOrder};
pub use operator::{AggregateCursor, Direction, PointCursor, ReadBatch, SampleOperator};
pub use scan::{ChainMaterializer, ChainOperator};
