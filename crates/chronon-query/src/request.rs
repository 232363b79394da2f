//! Chronon Request - Query Shape Model
//!
//! The reshape request the registry's read path serves. Series names are
//! resolved to ids upstream; requests arrive with ids only.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use chronon_common::{AggregateFunction, SeriesId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Ordering
// =============================================================================

/// Output ordering of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBy {
    Series,
    Time,
}

// =============================================================================
// Selection
// =============================================================================

/// One selected column: an ordered list of series ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub ids: Vec<SeriesId>,
}

/// Time range and columns of a query. `begin > end` requests a backward
/// scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub begin: Timestamp,
    pub end: Timestamp,
    pub columns: Vec<Column>,
}

// =============================================================================
// Group-By and Aggregation
// =============================================================================

/// Series regrouping: every selected id is rewritten through the transient
/// map before merging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupBy {
    pub enabled: bool,
    pub transient_map: HashMap<SeriesId, SeriesId>,
}

/// Aggregation settings. Without a step the query collapses each series to
/// a single summary; with a step it produces one bucket per step interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregation {
    pub enabled: bool,
    pub funcs: Vec<AggregateFunction>,
    pub step: Option<u64>,
}

// =============================================================================
// Reshape Request
// =============================================================================

/// A fully resolved read request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshapeRequest {
    pub select: Selection,
    pub order_by: OrderBy,
    pub group_by: GroupBy,
    pub agg: Aggregation,
}

impl ReshapeRequest {
    /// Scan request over one column of series.
    pub fn scan(begin: Timestamp, end: Timestamp, ids: Vec<SeriesId>) -> Self {
        Self {
            select: Selection {
                begin,
                end,
                columns: vec![Column { ids }],
            },
            order_by: OrderBy::Series,
            group_by: GroupBy::default(),
            agg: Aggregation::default(),
        }
    }

    /// Join request over multiple columns.
    pub fn join(begin: Timestamp, end: Timestamp, columns: Vec<Vec<SeriesId>>) -> Self {
        Self {
            select: Selection {
                begin,
                end,
                columns: columns.into_iter().map(|ids| Column { ids }).collect(),
            },
            order_by: OrderBy::Series,
            group_by: GroupBy::default(),
            agg: Aggregation::default(),
        }
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    /// Request a single summary per series.
    pub fn with_aggregation(mut self, func: AggregateFunction) -> Self {
        self.agg.enabled = true;
        self.agg.funcs = vec![func];
        self
    }

    /// Request stepped aggregation with the given output components.
    pub fn with_group_aggregation(mut self, step: u64, funcs: Vec<AggregateFunction>) -> Self {
        self.agg.enabled = true;
        self.agg.funcs = funcs;
        self.agg.step = Some(step);
        self
    }

    pub fn with_group_by(mut self, transient_map: HashMap<SeriesId, SeriesId>) -> Self {
        self.group_by.enabled = true;
        self.group_by.transient_map = transient_map;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
