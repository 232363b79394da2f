//! Chronon Merge - K-Way Merge Operators
//!
//! Time- or series-ordered interleaving of per-series cursors. Each source
//! cursor feeds a fixed-size range that is refilled as the merge drains it;
//! a binary heap over composite keys picks the next point. Ties always
//! break on the declared secondary key (then on source rank), so repeated
//! reads of the same inputs produce identical output.
//!
//! `MergeJoinOperator` applies the same discipline one level up: it
//! re-interleaves packed sample streams by timestamp, which is how
//! time-ordered group-aggregate output is produced.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::operator::{Direction, PointCursor, ReadBatch, SampleOperator};
use chronon_common::{Result, Sample, SeriesId, Timestamp, SAMPLE_HEADER_SIZE};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::marker::PhantomData;

// =============================================================================
// Ordering Policies
// =============================================================================

/// Composite-key policy for the k-way merge.
pub trait MergeOrder: Send {
    /// Heap key: primary component first, tie-break second.
    fn key(ts: Timestamp, id: SeriesId) -> (u64, u64);
}

/// Time-major ordering with series-id tie-break.
pub struct TimeOrder;

impl MergeOrder for TimeOrder {
    fn key(ts: Timestamp, id: SeriesId) -> (u64, u64) {
        (ts, id.0)
    }
}

/// Series-major ordering with timestamp tie-break.
pub struct SeriesOrder;

impl MergeOrder for SeriesOrder {
    fn key(ts: Timestamp, id: SeriesId) -> (u64, u64) {
        (id.0, ts)
    }
}

// =============================================================================
// Merge Heap
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    key: (u64, u64),
    source: usize,
}

/// Direction-aware wrapper: forward merges pop the smallest key, backward
/// merges the largest.
enum MergeHeap {
    Min(BinaryHeap<Reverse<HeapEntry>>),
    Max(BinaryHeap<HeapEntry>),
}

impl MergeHeap {
    fn new(direction: Direction) -> Self {
        match direction {
            Direction::Forward => MergeHeap::Min(BinaryHeap::new()),
            Direction::Backward => MergeHeap::Max(BinaryHeap::new()),
        }
    }

    fn push(&mut self, entry: HeapEntry) {
        match self {
            MergeHeap::Min(heap) => heap.push(Reverse(entry)),
            MergeHeap::Max(heap) => heap.push(entry),
        }
    }

    fn pop(&mut self) -> Option<HeapEntry> {
        match self {
            MergeHeap::Min(heap) => heap.pop().map(|r| r.0),
            MergeHeap::Max(heap) => heap.pop(),
        }
    }

    fn peek(&self) -> Option<HeapEntry> {
        match self {
            MergeHeap::Min(heap) => heap.peek().map(|r| r.0),
            MergeHeap::Max(heap) => heap.peek().copied(),
        }
    }
}

// =============================================================================
// Source Range
// =============================================================================

const RANGE_SIZE: usize = 1024;

/// One merge input: a cursor plus the range of points pulled from it.
struct SourceRange {
    cursor: Box<dyn PointCursor>,
    id: SeriesId,
    ts: Vec<Timestamp>,
    xs: Vec<f64>,
    len: usize,
    pos: usize,
    done: bool,
}

impl SourceRange {
    fn new(id: SeriesId, cursor: Box<dyn PointCursor>) -> Self {
        Self {
            cursor,
            id,
            ts: vec![0; RANGE_SIZE],
            xs: vec![0.0; RANGE_SIZE],
            len: 0,
            pos: 0,
            done: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.len
    }

    fn head(&self) -> (Timestamp, f64) {
        (self.ts[self.pos], self.xs[self.pos])
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn refill(&mut self) -> Result<()> {
        if self.done {
            self.len = 0;
            self.pos = 0;
            return Ok(());
        }
        let batch = self.cursor.read(&mut self.ts, &mut self.xs)?;
        self.len = batch.len;
        self.pos = 0;
        self.done = batch.at_end;
        Ok(())
    }
}

// =============================================================================
// Merge Operator
// =============================================================================

/// K-way merge over per-series point cursors, materializing FLOAT samples
/// in the order declared by `O`.
pub struct MergeOperator<O: MergeOrder> {
    ids: Vec<SeriesId>,
    cursors: Vec<Box<dyn PointCursor>>,
    direction: Direction,
    ranges: Vec<SourceRange>,
    heap: Option<MergeHeap>,
    finished: bool,
    _order: PhantomData<O>,
}

impl<O: MergeOrder> MergeOperator<O> {
    pub fn new(ids: Vec<SeriesId>, cursors: Vec<Box<dyn PointCursor>>) -> Self {
        assert_eq!(
            ids.len(),
            cursors.len(),
            "merge ids do not match cursor count"
        );
        let direction = cursors
            .first()
            .map(|c| c.direction())
            .unwrap_or(Direction::Forward);
        Self {
            ids,
            cursors,
            direction,
            ranges: Vec::new(),
            heap: None,
            finished: false,
            _order: PhantomData,
        }
    }

    /// Pull the first block from every cursor. Sources that report
    /// end-of-stream with no data are dropped; a range whose final block
    /// still has points stays in the merge.
    fn init_ranges(&mut self) -> Result<()> {
        let ids = std::mem::take(&mut self.ids);
        let cursors = std::mem::take(&mut self.cursors);
        for (id, cursor) in ids.into_iter().zip(cursors) {
            let mut range = SourceRange::new(id, cursor);
            range.refill()?;
            if !range.is_empty() {
                self.ranges.push(range);
            }
        }
        let mut heap = MergeHeap::new(self.direction);
        for (index, range) in self.ranges.iter().enumerate() {
            let (ts, _) = range.head();
            heap.push(HeapEntry {
                key: O::key(ts, range.id),
                source: index,
            });
        }
        self.heap = Some(heap);
        Ok(())
    }
}

impl<O: MergeOrder> SampleOperator for MergeOperator<O> {
    fn read(&mut self, dest: &mut [u8]) -> Result<ReadBatch> {
        if self.finished {
            return Ok(ReadBatch::end(0));
        }
        if self.heap.is_none() {
            self.init_ranges()?;
        }
        let mut written = 0;
        loop {
            if dest.len() - written < SAMPLE_HEADER_SIZE {
                return Ok(ReadBatch::more(written));
            }
            let entry = match self.heap.as_mut().and_then(|h| h.pop()) {
                Some(entry) => entry,
                None => break,
            };
            let range = &mut self.ranges[entry.source];
            let (ts, value) = range.head();
            let sample = Sample::float(range.id, ts, value);
            written += sample.encode(&mut dest[written..])?;
            range.advance();
            if range.is_empty() {
                range.refill()?;
            }
            if !range.is_empty() {
                let (next_ts, _) = range.head();
                let key = O::key(next_ts, range.id);
                if let Some(heap) = self.heap.as_mut() {
                    heap.push(HeapEntry {
                        key,
                        source: entry.source,
                    });
                }
            }
        }
        // All sources drained: release cursors and ranges.
        self.finished = true;
        self.ranges.clear();
        self.heap = None;
        Ok(ReadBatch::end(written))
    }
}

// =============================================================================
// Merge-Join Operator
// =============================================================================

const STREAM_BUFFER_SIZE: usize = 4096;

/// One merge-join input: a sample operator plus its decoded lookahead.
struct SampleSource {
    op: Box<dyn SampleOperator>,
    queue: VecDeque<Sample>,
    buf: Vec<u8>,
    done: bool,
}

impl SampleSource {
    fn refill(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let batch = self.op.read(&mut self.buf)?;
        self.done = batch.at_end;
        let mut pos = 0;
        while pos < batch.len {
            let (sample, used) = Sample::decode(&self.buf[pos..batch.len])?;
            self.queue.push_back(sample);
            pos += used;
        }
        Ok(())
    }
}

/// Re-interleaves packed sample streams by timestamp, tie-breaking on
/// stream rank. The streams must share the given direction.
pub struct MergeJoinOperator {
    sources: Vec<SampleSource>,
    direction: Direction,
    heap: Option<MergeHeap>,
    finished: bool,
}

impl MergeJoinOperator {
    pub fn new(sources: Vec<Box<dyn SampleOperator>>, direction: Direction) -> Self {
        let sources = sources
            .into_iter()
            .map(|op| SampleSource {
                op,
                queue: VecDeque::new(),
                buf: vec![0; STREAM_BUFFER_SIZE],
                done: false,
            })
            .collect();
        Self {
            sources,
            direction,
            heap: None,
            finished: false,
        }
    }

    fn init(&mut self) -> Result<()> {
        let mut heap = MergeHeap::new(self.direction);
        for (index, source) in self.sources.iter_mut().enumerate() {
            while source.queue.is_empty() && !source.done {
                source.refill()?;
            }
            if let Some(sample) = source.queue.front() {
                heap.push(HeapEntry {
                    key: (sample.timestamp, index as u64),
                    source: index,
                });
            }
        }
        self.heap = Some(heap);
        Ok(())
    }
}

impl SampleOperator for MergeJoinOperator {
    fn read(&mut self, dest: &mut [u8]) -> Result<ReadBatch> {
        if self.finished {
            return Ok(ReadBatch::end(0));
        }
        if self.heap.is_none() {
            self.init()?;
        }
        let mut written = 0;
        loop {
            let entry = match self.heap.as_ref().and_then(|h| h.peek()) {
                Some(entry) => entry,
                None => break,
            };
            let need = match self.sources[entry.source].queue.front() {
                Some(sample) => sample.encoded_len(),
                None => {
                    if let Some(heap) = self.heap.as_mut() {
                        heap.pop();
                    }
                    continue;
                }
            };
            if dest.len() - written < need {
                return Ok(ReadBatch::more(written));
            }
            if let Some(heap) = self.heap.as_mut() {
                heap.pop();
            }
            let source = &mut self.sources[entry.source];
            if let Some(sample) = source.queue.pop_front() {
                written += sample.encode(&mut dest[written..])?;
            }
            while source.queue.is_empty() && !source.done {
                source.refill()?;
            }
            if let Some(next) = source.queue.front() {
                let key = (next.timestamp, entry.source as u64);
                if let Some(heap) = self.heap.as_mut() {
                    heap.push(HeapEntry {
                        key,
                        source: entry.source,
                    });
                }
            }
        }
        self.finished = true;
        self.sources.clear();
        self.heap = None;
        Ok(ReadBatch::end(written))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::VecPointCursor;
    use chronon_common::Payload;

    fn drain(op: &mut dyn SampleOperator, buf_size: usize) -> Vec<(u64, u64, f64)> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_size];
        loop {
            let batch = op.read(&mut buf).expect("read should succeed");
            let mut pos = 0;
            while pos < batch.len {
                let (sample, used) = Sample::decode(&buf[pos..batch.len]).expect("decode");
                match sample.payload {
                    Payload::Float(v) => out.push((sample.id.0, sample.timestamp, v)),
                    _ => panic!("expected float payload"),
                }
                pos += used;
            }
            if batch.at_end {
                return out;
            }
        }
    }

    #[test]
    fn test_time_order_interleaves() {
        let ids = vec![SeriesId(1), SeriesId(2)];
        let cursors: Vec<Box<dyn PointCursor>> = vec![
            Box::new(VecPointCursor::forward(vec![(1, 10.0), (3, 30.0)])),
            Box::new(VecPointCursor::forward(vec![(2, 20.0), (4, 40.0)])),
        ];
        let mut merge = MergeOperator::<TimeOrder>::new(ids, cursors);
        assert_eq!(
            drain(&mut merge, 4096),
            vec![(1, 1, 10.0), (2, 2, 20.0), (1, 3, 30.0), (2, 4, 40.0)]
        );
    }

    #[test]
    fn test_series_order_groups_by_id() {
        let ids = vec![SeriesId(2), SeriesId(1)];
        let cursors: Vec<Box<dyn PointCursor>> = vec![
            Box::new(VecPointCursor::forward(vec![(2, 20.0), (4, 40.0)])),
            Box::new(VecPointCursor::forward(vec![(1, 10.0), (3, 30.0)])),
        ];
        let mut merge = MergeOperator::<SeriesOrder>::new(ids, cursors);
        assert_eq!(
            drain(&mut merge, 4096),
            vec![(1, 1, 10.0), (1, 3, 30.0), (2, 2, 20.0), (2, 4, 40.0)]
        );
    }

    #[test]
    fn test_ties_break_on_series_id() {
        let ids = vec![SeriesId(9), SeriesId(3)];
        let cursors: Vec<Box<dyn PointCursor>> = vec![
            Box::new(VecPointCursor::forward(vec![(5, 90.0)])),
            Box::new(VecPointCursor::forward(vec![(5, 30.0)])),
        ];
        let mut merge = MergeOperator::<TimeOrder>::new(ids, cursors);
        assert_eq!(drain(&mut merge, 4096), vec![(3, 5, 30.0), (9, 5, 90.0)]);
    }

    #[test]
    fn test_backward_merge() {
        let ids = vec![SeriesId(1), SeriesId(2)];
        let cursors: Vec<Box<dyn PointCursor>> = vec![
            Box::new(VecPointCursor::backward(vec![(3, 30.0), (1, 10.0)])),
            Box::new(VecPointCursor::backward(vec![(4, 40.0), (2, 20.0)])),
        ];
        let mut merge = MergeOperator::<TimeOrder>::new(ids, cursors);
        assert_eq!(
            drain(&mut merge, 4096),
            vec![(2, 4, 40.0), (1, 3, 30.0), (2, 2, 20.0), (1, 1, 10.0)]
        );
    }

    #[test]
    fn test_empty_sources_are_discarded() {
        let ids = vec![SeriesId(1), SeriesId(2)];
        let cursors: Vec<Box<dyn PointCursor>> = vec![
            Box::new(VecPointCursor::forward(Vec::new())),
            Box::new(VecPointCursor::forward(vec![(1, 1.0)])),
        ];
        let mut merge = MergeOperator::<TimeOrder>::new(ids, cursors);
        assert_eq!(drain(&mut merge, 4096), vec![(2, 1, 1.0)]);
    }

    #[test]
    fn test_merge_backpressure_is_lossless() {
        let ids = vec![SeriesId(1), SeriesId(2)];
        let cursors: Vec<Box<dyn PointCursor>> = vec![
            Box::new(VecPointCursor::forward(
                (0..50).map(|i| (i * 2, i as f64)).collect(),
            )),
            Box::new(VecPointCursor::forward(
                (0..50).map(|i| (i * 2 + 1, i as f64)).collect(),
            )),
        ];
        let mut merge = MergeOperator::<TimeOrder>::new(ids, cursors);
        // Destination holds two samples per call.
        let points = drain(&mut merge, 2 * SAMPLE_HEADER_SIZE);
        assert_eq!(points.len(), 100);
        let timestamps: Vec<u64> = points.iter().map(|p| p.1).collect();
        assert_eq!(timestamps, (0..100).collect::<Vec<u64>>());
    }

    #[test]
    fn test_refill_across_range_boundary() {
        // More points than one range holds, served in small cursor chunks.
        let total = RANGE_SIZE + 100;
        let ids = vec![SeriesId(1)];
        let cursors: Vec<Box<dyn PointCursor>> = vec![Box::new(
            VecPointCursor::forward((0..total as u64).map(|i| (i, i as f64)).collect())
                .with_chunk(300),
        )];
        let mut merge = MergeOperator::<TimeOrder>::new(ids, cursors);
        let points = drain(&mut merge, 64 * SAMPLE_HEADER_SIZE);
        assert_eq!(points.len(), total);
        assert!(points.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[test]
    fn test_merge_join_reorders_streams() {
        let left: Vec<Box<dyn PointCursor>> =
            vec![Box::new(VecPointCursor::forward(vec![(1, 1.0), (4, 4.0)]))];
        let right: Vec<Box<dyn PointCursor>> =
            vec![Box::new(VecPointCursor::forward(vec![(2, 2.0), (3, 3.0)]))];
        let sources: Vec<Box<dyn SampleOperator>> = vec![
            Box::new(MergeOperator::<TimeOrder>::new(vec![SeriesId(1)], left)),
            Box::new(MergeOperator::<TimeOrder>::new(vec![SeriesId(2)], right)),
        ];
        let mut join = MergeJoinOperator::new(sources, Direction::Forward);
        assert_eq!(
            drain(&mut join, 4096),
            vec![(1, 1, 1.0), (2, 2, 2.0), (2, 3, 3.0), (1, 4, 4.0)]
        );
    }
}
