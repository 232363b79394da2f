//! Chronon Aggregate - Aggregation Operators
//!
//! Operators that collapse per-series cursors into aggregation records and
//! materialize them: one summary per series, stepped group-aggregation with
//! cross-cursor stitching, and the tuple materializers that route stepped
//! output into series or time order.
//!
//! The group-aggregate combiner joins sub-iterators covering disjoint time
//! spans. The first and last bucket of any sub-iterator may be partial; an
//! edge bucket narrower than a full step is merged with the neighboring
//! cursor's edge bucket so no bucket is ever emitted twice or split. The
//! read buffer always retains its trailing bucket until the next refill —
//! surfacing it early would make that stitch impossible.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::merge::MergeJoinOperator;
use crate::operator::{AggregateCursor, Direction, ReadBatch, SampleOperator};
use chronon_common::{
    AggregateFunction, AggregationResult, Result, Sample, SeriesId, Timestamp, SAMPLE_HEADER_SIZE,
};
use tracing::trace;

// =============================================================================
// Combine Aggregate Operator
// =============================================================================

/// Presents a list of single-shot aggregate cursors as one cursor: each
/// sub-iterator is read exactly once and its record forwarded.
pub struct CombineAggregateOperator {
    cursors: Vec<Box<dyn AggregateCursor>>,
    pos: usize,
    direction: Direction,
}

impl CombineAggregateOperator {
    pub fn new(cursors: Vec<Box<dyn AggregateCursor>>) -> Self {
        let direction = cursors
            .first()
            .map(|c| c.direction())
            .unwrap_or(Direction::Forward);
        Self {
            cursors,
            pos: 0,
            direction,
        }
    }
}

impl AggregateCursor for CombineAggregateOperator {
    fn read(&mut self, ts: &mut [Timestamp], out: &mut [AggregationResult]) -> Result<ReadBatch> {
        let mut acc = 0;
        while self.pos < self.cursors.len() && acc < ts.len() {
            let batch = self.cursors[self.pos].read(&mut ts[acc..], &mut out[acc..])?;
            acc += batch.len;
            self.pos += 1;
        }
        if self.pos == self.cursors.len() {
            Ok(ReadBatch::end(acc))
        } else {
            Ok(ReadBatch::more(acc))
        }
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

// =============================================================================
// Combine Group Aggregate Operator
// =============================================================================

const RDBUF_SIZE: usize = 256;

/// Joins group-aggregate cursors covering disjoint time spans into one
/// stepped stream, stitching partial edge buckets across cursor boundaries.
pub struct CombineGroupAggregateOperator {
    step: u64,
    cursors: Vec<Box<dyn AggregateCursor>>,
    direction: Direction,
    pos: usize,
    rdbuf: Vec<AggregationResult>,
    rdpos: usize,
    stitch_pending: bool,
    done: bool,
}

impl CombineGroupAggregateOperator {
    pub fn new(step: u64, cursors: Vec<Box<dyn AggregateCursor>>) -> Self {
        assert!(step > 0, "group-aggregate step must be positive");
        let direction = cursors
            .first()
            .map(|c| c.direction())
            .unwrap_or(Direction::Forward);
        Self {
            step,
            cursors,
            direction,
            pos: 0,
            rdbuf: Vec::with_capacity(RDBUF_SIZE),
            rdpos: 0,
            stitch_pending: false,
            done: false,
        }
    }

    fn elements_in_rdbuf(&self) -> usize {
        self.rdbuf.len() - self.rdpos
    }

    /// Buffered records safe to hand out. The trailing record stays behind
    /// until every sub-iterator is exhausted: it may still need to merge
    /// with the next cursor's leading bucket.
    fn available(&self) -> usize {
        let n = self.elements_in_rdbuf();
        if self.done {
            n
        } else {
            n.saturating_sub(1)
        }
    }

    /// The retained tail and the next cursor's leading bucket merge only
    /// when the tail is partial (spans less than a full step) and both fall
    /// into the same step bucket.
    fn should_stitch(&self, tail: &AggregationResult, head: &AggregationResult) -> bool {
        tail.end - tail.begin < self.step && tail.begin / self.step == head.begin / self.step
    }

    fn refill_read_buffer(&mut self) -> Result<()> {
        if self.rdpos > 0 {
            self.rdbuf.drain(..self.rdpos);
            self.rdpos = 0;
        }
        let mut ts_buf = vec![0u64; RDBUF_SIZE];
        let mut agg_buf = vec![AggregationResult::default(); RDBUF_SIZE];
        while self.pos < self.cursors.len() && self.rdbuf.len() < RDBUF_SIZE {
            let want = RDBUF_SIZE - self.rdbuf.len();
            let batch = self.cursors[self.pos].read(&mut ts_buf[..want], &mut agg_buf[..want])?;
            for rec in &agg_buf[..batch.len] {
                if self.stitch_pending {
                    self.stitch_pending = false;
                    if let Some(tail) = self.rdbuf.last() {
                        if self.should_stitch(tail, rec) {
                            let last = self.rdbuf.len() - 1;
                            self.rdbuf[last].combine(rec);
                            continue;
                        }
                    }
                }
                self.rdbuf.push(*rec);
            }
            if batch.at_end {
                self.pos += 1;
                self.stitch_pending = true;
            } else if batch.len == 0 {
                break;
            }
        }
        if self.pos == self.cursors.len() {
            self.done = true;
        }
        Ok(())
    }

    /// Copy as many released buckets as fit into the caller's arrays.
    fn copy_to(&mut self, ts: &mut [Timestamp], out: &mut [AggregationResult]) -> usize {
        let n = self.available().min(ts.len()).min(out.len());
        for i in 0..n {
            let rec = self.rdbuf[self.rdpos + i];
            ts[i] = match self.direction {
                Direction::Forward => rec.begin,
                Direction::Backward => rec.end,
            };
            out[i] = rec;
        }
        self.rdpos += n;
        n
    }
}

impl AggregateCursor for CombineGroupAggregateOperator {
    fn read(&mut self, ts: &mut [Timestamp], out: &mut [AggregationResult]) -> Result<ReadBatch> {
        let mut acc = 0;
        while acc < ts.len() {
            if self.available() == 0 {
                if self.done {
                    break;
                }
                let before = self.elements_in_rdbuf();
                self.refill_read_buffer()?;
                if !self.done && self.available() == 0 && self.elements_in_rdbuf() == before {
                    // Sub-iterator made no progress; surface what we have.
                    break;
                }
                continue;
            }
            acc += self.copy_to(&mut ts[acc..], &mut out[acc..]);
        }
        let finished = self.done && self.elements_in_rdbuf() == 0;
        Ok(ReadBatch {
            len: acc,
            at_end: finished,
        })
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Collapses each per-series aggregate cursor to one FLOAT sample using the
/// selected function's (timestamp, value) mapping.
pub struct Aggregator {
    ids: Vec<SeriesId>,
    cursors: Vec<Box<dyn AggregateCursor>>,
    func: AggregateFunction,
    pos: usize,
}

impl Aggregator {
    pub fn new(
        ids: Vec<SeriesId>,
        cursors: Vec<Box<dyn AggregateCursor>>,
        func: AggregateFunction,
    ) -> Self {
        assert_eq!(
            ids.len(),
            cursors.len(),
            "aggregator ids do not match cursor count"
        );
        Self {
            ids,
            cursors,
            func,
            pos: 0,
        }
    }
}

impl SampleOperator for Aggregator {
    fn read(&mut self, dest: &mut [u8]) -> Result<ReadBatch> {
        let mut written = 0;
        while self.pos < self.cursors.len() {
            if dest.len() - written < SAMPLE_HEADER_SIZE {
                return Ok(ReadBatch::more(written));
            }
            let mut ts = [0u64; 1];
            let mut agg = [AggregationResult::default(); 1];
            let batch = self.cursors[self.pos].read(&mut ts, &mut agg)?;
            let id = self.ids[self.pos];
            self.pos += 1;
            if batch.len != 1 {
                trace!(id = id.0, produced = batch.len, "unexpected aggregate read size, skipping");
                continue;
            }
            let rec = agg[0];
            let timestamp = match self.func {
                AggregateFunction::Min => rec.mints,
                AggregateFunction::Max => rec.maxts,
                AggregateFunction::First => rec.begin,
                _ => rec.end,
            };
            let sample = Sample::float(id, timestamp, rec.component(self.func));
            written += sample.encode(&mut dest[written..])?;
        }
        Ok(ReadBatch::end(written))
    }
}

// =============================================================================
// Tuple Materialization
// =============================================================================

/// Flag word marking all `n` tuple components as populated, low bits first.
fn component_flags(n: usize) -> u64 {
    debug_assert!(n >= 1 && n <= 64);
    u64::MAX >> (64 - n)
}

const TUPLE_READ_CHUNK: usize = 256;

/// Materializes group-aggregate output as TUPLE samples, cursor by cursor:
/// all buckets of series 0, then series 1, and so on.
pub struct SeriesOrderIterator {
    ids: Vec<SeriesId>,
    cursors: Vec<Box<dyn AggregateCursor>>,
    components: Vec<AggregateFunction>,
    pos: usize,
}

impl SeriesOrderIterator {
    pub fn new(
        ids: Vec<SeriesId>,
        cursors: Vec<Box<dyn AggregateCursor>>,
        components: Vec<AggregateFunction>,
    ) -> Self {
        assert_eq!(
            ids.len(),
            cursors.len(),
            "tuple iterator ids do not match cursor count"
        );
        assert!(
            !components.is_empty() && components.len() <= 64,
            "tuple component list out of range"
        );
        Self {
            ids,
            cursors,
            components,
            pos: 0,
        }
    }
}

impl SampleOperator for SeriesOrderIterator {
    fn read(&mut self, dest: &mut [u8]) -> Result<ReadBatch> {
        let row = SAMPLE_HEADER_SIZE + 8 * self.components.len();
        let flags = component_flags(self.components.len());
        let mut ts_buf = vec![0u64; TUPLE_READ_CHUNK];
        let mut agg_buf = vec![AggregationResult::default(); TUPLE_READ_CHUNK];
        let mut written = 0;
        while self.pos < self.cursors.len() {
            let room = (dest.len() - written) / row;
            if room == 0 {
                return Ok(ReadBatch::more(written));
            }
            let n = room.min(TUPLE_READ_CHUNK);
            let batch = self.cursors[self.pos].read(&mut ts_buf[..n], &mut agg_buf[..n])?;
            let id = self.ids[self.pos];
            for i in 0..batch.len {
                let values: Vec<f64> = self
                    .components
                    .iter()
                    .map(|func| agg_buf[i].component(*func))
                    .collect();
                let sample = Sample::tuple(id, ts_buf[i], flags, values);
                written += sample.encode(&mut dest[written..])?;
            }
            if batch.at_end {
                self.pos += 1;
            }
        }
        Ok(ReadBatch::end(written))
    }
}

/// Materializes group-aggregate output in time order by merge-joining
/// single-series tuple streams.
pub struct TimeOrderIterator {
    inner: MergeJoinOperator,
}

impl TimeOrderIterator {
    pub fn new(
        ids: Vec<SeriesId>,
        cursors: Vec<Box<dyn AggregateCursor>>,
        components: Vec<AggregateFunction>,
    ) -> Self {
        assert_eq!(
            ids.len(),
            cursors.len(),
            "tuple iterator ids do not match cursor count"
        );
        let direction = cursors
            .first()
            .map(|c| c.direction())
            .unwrap_or(Direction::Forward);
        let sources: Vec<Box<dyn SampleOperator>> = ids
            .into_iter()
            .zip(cursors)
            .map(|(id, cursor)| {
                Box::new(SeriesOrderIterator::new(
                    vec![id],
                    vec![cursor],
                    components.clone(),
                )) as Box<dyn SampleOperator>
            })
            .collect();
        Self {
            inner: MergeJoinOperator::new(sources, direction),
        }
    }
}

impl SampleOperator for TimeOrderIterator {
    fn read(&mut self, dest: &mut [u8]) -> Result<ReadBatch> {
        self.inner.read(dest)
    }
}

// =============================================================================
// Tests
// =============================================================================
