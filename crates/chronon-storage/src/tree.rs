//! Chronon Tree - Per-Series Extent List
//!
//! The write-side structure owning one series' data: an append buffer that
//! seals into checksummed extent blocks, plus the cursors the query
//! operators consume. Appends are serialized by the tree's interior lock;
//! readers snapshot under the lock and then run lock-free, loading sealed
//! extents lazily from the block store inside `read` calls.
//!
//! Rescue points are the sealed extent addresses. `close` seals the active
//! buffer and returns the full root set; a tree restored from those roots
//! serves exactly the points appended before the close.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::backend::BlockStore;
use crate::block::Block;
use bytes::Bytes;
use chronon_common::{
    AggregationResult, AppendStatus, ChrononError, LogicAddr, Result, SeriesId, Timestamp,
};
use chronon_operators::{
    AggregateCursor, ChainOperator, CombineGroupAggregateOperator, Direction, PointCursor,
    ReadBatch,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Extent Data
// =============================================================================

/// In-memory footprint of one buffered point.
const POINT_SIZE: usize = 16;

/// Serialized payload of a sealed extent.
#[derive(Debug, Serialize, Deserialize)]
struct ExtentData {
    ts: Vec<Timestamp>,
    values: Vec<f64>,
}

/// Summary of a sealed extent kept in the tree.
#[derive(Debug, Clone, Copy)]
struct ExtentRef {
    addr: LogicAddr,
    begin: Timestamp,
    end: Timestamp,
}

fn load_extent(store: &dyn BlockStore, addr: LogicAddr) -> Result<ExtentData> {
    let block = store.read_block(addr)?;
    bincode::deserialize(&block.data).map_err(|e| ChrononError::Serialization(e.to_string()))
}

// =============================================================================
// Series Tree
// =============================================================================

struct TreeState {
    pending: Vec<LogicAddr>,
    initialized: bool,
    sealed: Vec<ExtentRef>,
    buf_ts: Vec<Timestamp>,
    buf_xs: Vec<f64>,
    last_ts: Option<Timestamp>,
}

/// Append-only extent list for one series.
pub struct SeriesTree {
    id: SeriesId,
    store: Arc<dyn BlockStore>,
    extent_capacity: usize,
    state: Mutex<TreeState>,
}

impl SeriesTree {
    /// Construct a tree over the given rescue points. The tree is inert
    /// until `force_init` loads the extent summaries.
    pub fn new(
        id: SeriesId,
        store: Arc<dyn BlockStore>,
        extent_capacity: usize,
        rescue_points: Vec<LogicAddr>,
    ) -> Self {
        assert!(extent_capacity > 0, "extent capacity must be positive");
        Self {
            id,
            store,
            extent_capacity,
            state: Mutex::new(TreeState {
                pending: rescue_points,
                initialized: false,
                sealed: Vec::new(),
                buf_ts: Vec::new(),
                buf_xs: Vec::new(),
                last_ts: None,
            }),
        }
    }

    pub fn id(&self) -> SeriesId {
        self.id
    }

    /// A rescue-point list ending in the tombstone marks a dirty shutdown.
    pub fn repair_needed(rescue_points: &[LogicAddr]) -> bool {
        rescue_points.last() == Some(&LogicAddr::TOMBSTONE)
    }

    /// Load extent summaries from the rescue points.
    pub fn force_init(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.initialized {
            return Ok(());
        }
        let pending = std::mem::take(&mut state.pending);
        for addr in pending {
            if addr == LogicAddr::TOMBSTONE {
                continue;
            }
            let data = load_extent(self.store.as_ref(), addr)?;
            if data.ts.is_empty() {
                continue;
            }
            let begin = data.ts[0];
            let end = data.ts[data.ts.len() - 1];
            state.sealed.push(ExtentRef { addr, begin, end });
            state.last_ts = Some(end);
        }
        state.initialized = true;
        debug!(id = self.id.0, extents = state.sealed.len(), "series tree initialized");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append one point. Values must be finite and timestamps strictly
    /// increasing; a sealed extent reports `FlushNeeded` so the caller can
    /// persist the new root set.
    pub fn append(&self, ts: Timestamp, value: f64) -> Result<AppendStatus> {
        if !value.is_finite() {
            return Err(ChrononError::BadValue(format!(
                "non-finite value for series {}",
                self.id.0
            )));
        }
        let mut state = self.state.lock();
        if let Some(last) = state.last_ts {
            if ts <= last {
                return Err(ChrononError::BadValue(format!(
                    "out of order append for series {}: {} after {}",
                    self.id.0, ts, last
                )));
            }
        }
        state.buf_ts.push(ts);
        state.buf_xs.push(value);
        state.last_ts = Some(ts);
        if state.buf_ts.len() >= self.extent_capacity {
            self.seal_locked(&mut state)?;
            return Ok(AppendStatus::FlushNeeded);
        }
        Ok(AppendStatus::Ok)
    }

    fn seal_locked(&self, state: &mut TreeState) -> Result<()> {
        if state.buf_ts.is_empty() {
            return Ok(());
        }
        let data = ExtentData {
            ts: std::mem::take(&mut state.buf_ts),
            values: std::mem::take(&mut state.buf_xs),
        };
        let sealed = bincode::serialize(&data)
            .map_err(|e| ChrononError::Serialization(e.to_string()))
            .and_then(|payload| self.store.write_block(Block::new(Bytes::from(payload))));
        let addr = match sealed {
            Ok(addr) => addr,
            Err(err) => {
                // Keep the points; the append can be retried.
                state.buf_ts = data.ts;
                state.buf_xs = data.values;
                return Err(err);
            }
        };
        let begin = data.ts[0];
        let end = data.ts[data.ts.len() - 1];
        debug!(id = self.id.0, addr = addr.0, points = data.ts.len(), "sealed extent");
        state.sealed.push(ExtentRef { addr, begin, end });
        Ok(())
    }

    /// Current rescue points: the sealed extent addresses.
    pub fn get_roots(&self) -> Vec<LogicAddr> {
        self.state.lock().sealed.iter().map(|e| e.addr).collect()
    }

    /// Seal the active buffer and return the full root set.
    pub fn close(&self) -> Result<Vec<LogicAddr>> {
        let mut state = self.state.lock();
        self.seal_locked(&mut state)?;
        Ok(state.sealed.iter().map(|e| e.addr).collect())
    }

    /// Bytes buffered but not yet sealed into the block store.
    pub fn uncommitted_size(&self) -> usize {
        self.state.lock().buf_ts.len() * POINT_SIZE
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Point cursor over the requested range: `begin <= end` scans
    /// `[begin, end)` forward, `begin > end` scans `(end, begin]` backward.
    pub fn search(&self, begin: Timestamp, end: Timestamp) -> Box<dyn PointCursor> {
        let direction = direction_of(begin, end);
        let (lo, hi) = window_of(begin, end);
        let state = self.state.lock();

        let mut cursors: Vec<Box<dyn PointCursor>> = Vec::new();
        let extents: Vec<ExtentRef> = state
            .sealed
            .iter()
            .filter(|e| overlaps(e, lo, hi))
            .copied()
            .collect();
        let buffered = snapshot_buffer(&state, lo, hi, direction);
        match direction {
            Direction::Forward => {
                for extent in &extents {
                    cursors.push(Box::new(ExtentCursor::new(
                        self.store.clone(),
                        extent.addr,
                        lo,
                        hi,
                        direction,
                    )));
                }
                cursors.push(Box::new(BufferCursor::new(buffered, direction)));
            }
            Direction::Backward => {
                cursors.push(Box::new(BufferCursor::new(buffered, direction)));
                for extent in extents.iter().rev() {
                    cursors.push(Box::new(ExtentCursor::new(
                        self.store.clone(),
                        extent.addr,
                        lo,
                        hi,
                        direction,
                    )));
                }
            }
        }
        Box::new(ChainOperator::new(cursors))
    }

    /// Aggregate cursor producing exactly one record for a non-empty range.
    pub fn aggregate(&self, begin: Timestamp, end: Timestamp) -> Box<dyn AggregateCursor> {
        Box::new(ScanAggregateCursor {
            scan: self.search(begin, end),
            direction: direction_of(begin, end),
            finished: false,
        })
    }

    /// Stepped aggregation over the range. Buckets align to absolute
    /// multiples of `step`, clipped at span and range boundaries; the
    /// partial edge buckets are stitched back together by the combiner.
    pub fn group_aggregate(
        &self,
        begin: Timestamp,
        end: Timestamp,
        step: u64,
    ) -> Box<dyn AggregateCursor> {
        assert!(step > 0, "group-aggregate step must be positive");
        let direction = direction_of(begin, end);
        let (lo, hi) = window_of(begin, end);
        let state = self.state.lock();

        // Sources in ascending time order: sealed extents, then the buffer.
        let mut sources: Vec<(PointSource, Timestamp)> = Vec::new();
        for extent in state.sealed.iter().filter(|e| overlaps(e, lo, hi)) {
            sources.push((
                PointSource::Extent {
                    store: self.store.clone(),
                    addr: extent.addr,
                },
                extent.begin,
            ));
        }
        let buffered = snapshot_buffer(&state, lo, hi, Direction::Forward);
        if let Some(&(first, _)) = buffered.first() {
            sources.push((PointSource::Buffer(buffered), first));
        }
        drop(state);

        // The sources partition the window: each span runs from its own
        // first timestamp (the window edge for the outermost spans) to the
        // next source's first timestamp. Interior buckets come out full;
        // only span edges produce the partials the combiner stitches.
        let count = sources.len();
        let mut bounds: Vec<Timestamp> = Vec::with_capacity(count + 1);
        bounds.push(lo);
        for (index, (_, first)) in sources.iter().enumerate() {
            if index > 0 {
                bounds.push((*first).clamp(lo, hi));
            }
        }
        bounds.push(hi);

        let mut cursors: Vec<Box<dyn AggregateCursor>> = Vec::with_capacity(count);
        for (index, (source, _)) in sources.into_iter().enumerate() {
            cursors.push(Box::new(GroupAggregateCursor::new(
                source,
                bounds[index],
                bounds[index + 1],
                step,
                direction,
            )));
        }
        if direction == Direction::Backward {
            cursors.reverse();
        }
        Box::new(CombineGroupAggregateOperator::new(step, cursors))
    }
}

fn direction_of(begin: Timestamp, end: Timestamp) -> Direction {
    if begin <= end {
        Direction::Forward
    } else {
        Direction::Backward
    }
}

/// Normalize a (begin, end) request to a half-open ascending window.
fn window_of(begin: Timestamp, end: Timestamp) -> (Timestamp, Timestamp) {
    if begin <= end {
        (begin, end)
    } else {
        (end.saturating_add(1), begin.saturating_add(1))
    }
}

fn overlaps(extent: &ExtentRef, lo: Timestamp, hi: Timestamp) -> bool {
    extent.end >= lo && extent.begin < hi
}

fn snapshot_buffer(
    state: &TreeState,
    lo: Timestamp,
    hi: Timestamp,
    direction: Direction,
) -> Vec<(Timestamp, f64)> {
    let mut points: Vec<(Timestamp, f64)> = state
        .buf_ts
        .iter()
        .zip(&state.buf_xs)
        .filter(|(&t, _)| t >= lo && t < hi)
        .map(|(&t, &x)| (t, x))
        .collect();
    if direction == Direction::Backward {
        points.reverse();
    }
    points
}

/// Serve the next batch from an in-memory point list.
fn fill_from(
    points: &[(Timestamp, f64)],
    pos: &mut usize,
    ts: &mut [Timestamp],
    values: &mut [f64],
) -> ReadBatch {
    let remaining = points.len() - *pos;
    let n = ts.len().min(values.len()).min(remaining);
    for i in 0..n {
        let (t, x) = points[*pos + i];
        ts[i] = t;
        values[i] = x;
    }
    *pos += n;
    if *pos == points.len() {
        ReadBatch::end(n)
    } else {
        ReadBatch::more(n)
    }
}

// =============================================================================
// Point Cursors
// =============================================================================

/// Cursor over a snapshot of the active append buffer.
struct BufferCursor {
    points: Vec<(Timestamp, f64)>,
    pos: usize,
    direction: Direction,
}

impl BufferCursor {
    fn new(points: Vec<(Timestamp, f64)>, direction: Direction) -> Self {
        Self {
            points,
            pos: 0,
            direction,
        }
    }
}

impl PointCursor for BufferCursor {
    fn read(&mut self, ts: &mut [Timestamp], values: &mut [f64]) -> Result<ReadBatch> {
        Ok(fill_from(&self.points, &mut self.pos, ts, values))
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

/// Cursor over one sealed extent, loaded from the block store on first
/// read. The load is the suspension point where reads may block on I/O.
struct ExtentCursor {
    store: Arc<dyn BlockStore>,
    addr: LogicAddr,
    lo: Timestamp,
    hi: Timestamp,
    direction: Direction,
    points: Option<Vec<(Timestamp, f64)>>,
    pos: usize,
}

impl ExtentCursor {
    fn new(
        store: Arc<dyn BlockStore>,
        addr: LogicAddr,
        lo: Timestamp,
        hi: Timestamp,
        direction: Direction,
    ) -> Self {
        Self {
            store,
            addr,
            lo,
            hi,
            direction,
            points: None,
            pos: 0,
        }
    }

    fn load(&mut self) -> Result<()> {
        if self.points.is_some() {
            return Ok(());
        }
        let data = load_extent(self.store.as_ref(), self.addr)?;
        let mut points: Vec<(Timestamp, f64)> = data
            .ts
            .iter()
            .zip(&data.values)
            .filter(|(&t, _)| t >= self.lo && t < self.hi)
            .map(|(&t, &x)| (t, x))
            .collect();
        if self.direction == Direction::Backward {
            points.reverse();
        }
        self.points = Some(points);
        Ok(())
    }
}

impl PointCursor for ExtentCursor {
    fn read(&mut self, ts: &mut [Timestamp], values: &mut [f64]) -> Result<ReadBatch> {
        self.load()?;
        match self.points.as_ref() {
            Some(points) => Ok(fill_from(points, &mut self.pos, ts, values)),
            None => Ok(ReadBatch::end(0)),
        }
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

// =============================================================================
// Aggregate Cursors
// =============================================================================

/// One-shot aggregate over a point scan.
struct ScanAggregateCursor {
    scan: Box<dyn PointCursor>,
    direction: Direction,
    finished: bool,
}

impl AggregateCursor for ScanAggregateCursor {
    fn read(&mut self, ts: &mut [Timestamp], out: &mut [AggregationResult]) -> Result<ReadBatch> {
        if self.finished || ts.is_empty() || out.is_empty() {
            return Ok(ReadBatch::end(0));
        }
        let mut agg = AggregationResult::default();
        let mut ts_buf = [0u64; 256];
        let mut val_buf = [0f64; 256];
        loop {
            let batch = self.scan.read(&mut ts_buf, &mut val_buf)?;
            for i in 0..batch.len {
                agg.add(ts_buf[i], val_buf[i]);
            }
            if batch.at_end {
                break;
            }
        }
        self.finished = true;
        if agg.is_empty() {
            return Ok(ReadBatch::end(0));
        }
        ts[0] = match self.direction {
            Direction::Forward => agg.begin,
            Direction::Backward => agg.end,
        };
        out[0] = agg;
        Ok(ReadBatch::end(1))
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

enum PointSource {
    Extent {
        store: Arc<dyn BlockStore>,
        addr: LogicAddr,
    },
    Buffer(Vec<(Timestamp, f64)>),
}

/// Stepped aggregation over one extent or the buffer snapshot. Bucket
/// records clip to `[span_lo, span_hi)`, so the edge buckets of interior
/// spans come out partial and stitchable.
struct GroupAggregateCursor {
    source: Option<PointSource>,
    span_lo: Timestamp,
    span_hi: Timestamp,
    step: u64,
    direction: Direction,
    records: Vec<AggregationResult>,
    pos: usize,
}

impl GroupAggregateCursor {
    fn new(
        source: PointSource,
        span_lo: Timestamp,
        span_hi: Timestamp,
        step: u64,
        direction: Direction,
    ) -> Self {
        Self {
            source: Some(source),
            span_lo,
            span_hi,
            step,
            direction,
            records: Vec::new(),
            pos: 0,
        }
    }

    fn build(&mut self) -> Result<()> {
        let source = match self.source.take() {
            Some(source) => source,
            None => return Ok(()),
        };
        let points: Vec<(Timestamp, f64)> = match source {
            PointSource::Buffer(points) => points,
            PointSource::Extent { store, addr } => {
                let data = load_extent(store.as_ref(), addr)?;
                data.ts.into_iter().zip(data.values).collect()
            }
        };
        let mut current: Option<(u64, AggregationResult)> = None;
        for (ts, value) in points {
            if ts < self.span_lo || ts >= self.span_hi {
                continue;
            }
            let bucket = ts / self.step;
            match current.as_mut() {
                Some((index, agg)) if *index == bucket => agg.add(ts, value),
                _ => {
                    if let Some((index, agg)) = current.take() {
                        self.records.push(self.clip(index, agg));
                    }
                    let mut agg = AggregationResult::default();
                    agg.add(ts, value);
                    current = Some((bucket, agg));
                }
            }
        }
        if let Some((index, agg)) = current.take() {
            self.records.push(self.clip(index, agg));
        }
        if self.direction == Direction::Backward {
            self.records.reverse();
        }
        Ok(())
    }

    fn clip(&self, bucket: u64, mut agg: AggregationResult) -> AggregationResult {
        agg.begin = (bucket * self.step).max(self.span_lo);
        agg.end = (bucket.saturating_add(1)).saturating_mul(self.step).min(self.span_hi);
        agg
    }
}

impl AggregateCursor for GroupAggregateCursor {
    fn read(&mut self, ts: &mut [Timestamp], out: &mut [AggregationResult]) -> Result<ReadBatch> {
        self.build()?;
        let remaining = self.records.len() - self.pos;
        let n = ts.len().min(out.len()).min(remaining);
        for i in 0..n {
            let rec = self.records[self.pos + i];
            ts[i] = match self.direction {
                Direction::Forward => rec.begin,
                Direction::Backward => rec.end,
            };
            out[i] = rec;
        }
        self.pos += n;
        if self.pos == self.records.len() {
            Ok(ReadBatch::end(n))
        } else {
            Ok(ReadBatch::more(n))
        }
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn tree_with_capacity(capacity: usize) -> (Arc<MemoryBackend>, SeriesTree) {
        let store = Arc::new(MemoryBackend::new());
        let tree = SeriesTree::new(SeriesId(7), store.clone(), capacity, Vec::new());
        tree.force_init().expect("init should succeed");
        (store, tree)
    }

    fn drain(cursor: &mut dyn PointCursor) -> Vec<(Timestamp, f64)> {
        let mut out = Vec::new();
        let mut ts = [0u64; 64];
        let mut xs = [0f64; 64];
        loop {
            let batch = cursor.read(&mut ts, &mut xs).expect("read should succeed");
            for i in 0..batch.len {
                out.push((ts[i], xs[i]));
            }
            if batch.at_end {
                return out;
            }
        }
    }

    fn drain_aggregates(cursor: &mut dyn AggregateCursor) -> Vec<AggregationResult> {
        let mut out = Vec::new();
        let mut ts = [0u64; 64];
        let mut recs = [AggregationResult::default(); 64];
        loop {
            let batch = cursor.read(&mut ts, &mut recs).expect("read should succeed");
            out.extend_from_slice(&recs[..batch.len]);
            if batch.at_end {
                return out;
            }
        }
    }

    #[test]
    fn test_append_seals_at_capacity() {
        let (store, tree) = tree_with_capacity(3);
        assert_eq!(tree.append(1, 1.0).expect("append"), AppendStatus::Ok);
        assert_eq!(tree.append(2, 2.0).expect("append"), AppendStatus::Ok);
        assert_eq!(
            tree.append(3, 3.0).expect("append"),
            AppendStatus::FlushNeeded
        );
        assert_eq!(tree.get_roots().len(), 1);
        assert_eq!(store.stats().total_blocks, 1);
        assert_eq!(tree.uncommitted_size(), 0);

        tree.append(4, 4.0).expect("append");
        assert_eq!(tree.uncommitted_size(), POINT_SIZE);
    }

    #[test]
    fn test_append_rejects_out_of_order_and_nan() {
        let (_store, tree) = tree_with_capacity(16);
        tree.append(10, 1.0).expect("append");
        assert!(tree.append(10, 2.0).is_err());
        assert!(tree.append(5, 2.0).is_err());
        assert!(tree.append(11, f64::NAN).is_err());
        // The rejected writes must not disturb the series.
        let points = drain(tree.search(0, 100).as_mut());
        assert_eq!(points, vec![(10, 1.0)]);
    }

    #[test]
    fn test_search_spans_extents_and_buffer() {
        let (_store, tree) = tree_with_capacity(3);
        for i in 1..=8u64 {
            tree.append(i, i as f64).expect("append");
        }
        // Two sealed extents (1..=3, 4..=6) and a buffer (7, 8).
        assert_eq!(tree.get_roots().len(), 2);

        let points = drain(tree.search(0, 100).as_mut());
        assert_eq!(
            points,
            (1..=8u64).map(|i| (i, i as f64)).collect::<Vec<_>>()
        );

        let window = drain(tree.search(3, 7).as_mut());
        assert_eq!(window, vec![(3, 3.0), (4, 4.0), (5, 5.0), (6, 6.0)]);
    }

    #[test]
    fn test_backward_search() {
        let (_store, tree) = tree_with_capacity(3);
        for i in 1..=8u64 {
            tree.append(i, i as f64).expect("append");
        }
        // Backward range (2, 7]: descending timestamps.
        let points = drain(tree.search(7, 2).as_mut());
        assert_eq!(
            points,
            vec![(7, 7.0), (6, 6.0), (5, 5.0), (4, 4.0), (3, 3.0)]
        );
    }

    #[test]
    fn test_aggregate_single_record() {
        let (_store, tree) = tree_with_capacity(3);
        for (ts, value) in [(10, 5.0), (20, 3.0), (30, 7.0)] {
            tree.append(ts, value).expect("append");
        }
        let records = drain_aggregates(tree.aggregate(0, 100).as_mut());
        assert_eq!(records.len(), 1);
        let rec = records[0];
        assert_eq!(rec.cnt, 3);
        assert_eq!((rec.min, rec.mints), (3.0, 20));
        assert_eq!((rec.max, rec.maxts), (7.0, 30));
        assert_eq!((rec.begin, rec.end), (10, 30));
    }

    #[test]
    fn test_aggregate_empty_range() {
        let (_store, tree) = tree_with_capacity(4);
        tree.append(10, 1.0).expect("append");
        let records = drain_aggregates(tree.aggregate(50, 100).as_mut());
        assert!(records.is_empty());
    }

    #[test]
    fn test_group_aggregate_stitches_across_extents() {
        let (_store, tree) = tree_with_capacity(5);
        // First extent 5..=45, second extent 55..=80, buffer holds 95.
        for ts in [5u64, 10, 20, 35, 45, 55, 65, 70, 75, 80, 95] {
            tree.append(ts, 1.0).expect("append");
        }
        assert_eq!(tree.get_roots().len(), 2);

        let records = drain_aggregates(tree.group_aggregate(0, 100, 30).as_mut());
        let got: Vec<(u64, u64, u64)> = records.iter().map(|r| (r.begin, r.end, r.cnt)).collect();
        // The buffer span starts at 95, so the final partial starts there.
        assert_eq!(
            got,
            vec![(0, 30, 3), (30, 60, 3), (60, 90, 4), (95, 100, 1)]
        );
    }

    #[test]
    fn test_group_aggregate_matches_full_aggregate() {
        let (_store, tree) = tree_with_capacity(4);
        for i in 0..23u64 {
            tree.append(i * 7 + 1, (i % 5) as f64).expect("append");
        }
        let buckets = drain_aggregates(tree.group_aggregate(0, 1000, 50).as_mut());
        let mut merged = AggregationResult::default();
        for rec in &buckets {
            merged.combine(rec);
        }
        let full = drain_aggregates(tree.aggregate(0, 1000).as_mut());
        assert_eq!(full.len(), 1);
        assert_eq!(merged.cnt, full[0].cnt);
        assert_eq!(merged.sum, full[0].sum);
        assert_eq!(merged.min, full[0].min);
        assert_eq!(merged.max, full[0].max);
    }

    #[test]
    fn test_group_aggregate_backward() {
        let (_store, tree) = tree_with_capacity(5);
        for ts in [5u64, 10, 20, 35, 45, 55, 65, 70, 75, 80, 95] {
            tree.append(ts, 1.0).expect("append");
        }
        let records = drain_aggregates(tree.group_aggregate(99, 0, 30).as_mut());
        let got: Vec<(u64, u64, u64)> = records.iter().map(|r| (r.begin, r.end, r.cnt)).collect();
        // Window (0, 99] scanned high to low.
        assert_eq!(
            got,
            vec![(95, 100, 1), (60, 90, 4), (30, 60, 3), (1, 30, 3)]
        );
    }

    #[test]
    fn test_close_and_restore_roundtrip() {
        let store: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        let tree = SeriesTree::new(SeriesId(7), store.clone(), 3, Vec::new());
        tree.force_init().expect("init");
        for i in 1..=7u64 {
            tree.append(i, i as f64).expect("append");
        }
        let roots = tree.close().expect("close should succeed");
        assert_eq!(roots.len(), 3);

        let restored = SeriesTree::new(SeriesId(7), store, 3, roots);
        restored.force_init().expect("restore");
        let points = drain(restored.search(0, 100).as_mut());
        assert_eq!(
            points,
            (1..=7u64).map(|i| (i, i as f64)).collect::<Vec<_>>()
        );
        // Appends continue after the last closed timestamp.
        assert!(restored.append(5, 1.0).is_err());
        restored.append(8, 8.0).expect("append");
    }

    #[test]
    fn test_repair_marker_is_logged_and_skipped() {
        let store: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
        let tree = SeriesTree::new(SeriesId(7), store.clone(), 2, Vec::new());
        tree.force_init().expect("init");
        for i in 1..=4u64 {
            tree.append(i, i as f64).expect("append");
        }
        let mut roots = tree.close().expect("close");
        roots.push(LogicAddr::TOMBSTONE);
        assert!(SeriesTree::repair_needed(&roots));

        let restored = SeriesTree::new(SeriesId(7), store, 2, roots);
        restored.force_init().expect("restore");
        let points = drain(restored.search(0, 100).as_mut());
        assert_eq!(points.len(), 4);
    }

    #[test]
    fn test_deleted_extent_is_skipped() {
        let (store, tree) = tree_with_capacity(2);
        for i in 1..=6u64 {
            tree.append(i, i as f64).expect("append");
        }
        let roots = tree.get_roots();
        assert_eq!(roots.len(), 3);
        store.delete_block(roots[0]).expect("delete");

        // The chain steps over the missing extent and serves the rest.
        let points = drain(tree.search(0, 100).as_mut());
        assert_eq!(
            points,
            vec![(3, 3.0), (4, 4.0), (5, 5.0), (6, 6.0)]
        );
    }
}
