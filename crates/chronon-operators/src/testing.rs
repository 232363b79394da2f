//! Vector-backed cursors for operator tests.

use crate::operator::{AggregateCursor, Direction, PointCursor, ReadBatch};
use chronon_common::{AggregationResult, ChrononError, Result, Timestamp};

/// Point cursor over a fixed point list. Backward cursors expect their
/// points pre-sorted in descending order.
pub struct VecPointCursor {
    points: Vec<(Timestamp, f64)>,
    pos: usize,
    direction: Direction,
    chunk: usize,
}

impl VecPointCursor {
    pub fn forward(points: Vec<(Timestamp, f64)>) -> Self {
        Self {
            points,
            pos: 0,
            direction: Direction::Forward,
            chunk: usize::MAX,
        }
    }

    pub fn backward(points: Vec<(Timestamp, f64)>) -> Self {
        Self {
            points,
            pos: 0,
            direction: Direction::Backward,
            chunk: usize::MAX,
        }
    }

    /// Cap each read at `chunk` points to exercise multi-call contracts.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }
}

impl PointCursor for VecPointCursor {
    fn read(&mut self, ts: &mut [Timestamp], values: &mut [f64]) -> Result<ReadBatch> {
        let remaining = self.points.len() - self.pos;
        let n = ts.len().min(values.len()).min(self.chunk).min(remaining);
        for i in 0..n {
            let (t, x) = self.points[self.pos + i];
            ts[i] = t;
            values[i] = x;
        }
        self.pos += n;
        if self.pos == self.points.len() {
            Ok(ReadBatch::end(n))
        } else {
            Ok(ReadBatch::more(n))
        }
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

/// Cursor whose backing block is gone: every read is `Unavailable`.
pub struct UnavailableCursor;

impl PointCursor for UnavailableCursor {
    fn read(&mut self, _ts: &mut [Timestamp], _values: &mut [f64]) -> Result<ReadBatch> {
        Err(ChrononError::Unavailable("block evicted".to_string()))
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }
}

/// Cursor that yields its points and then fails with an internal error.
pub struct FailingCursor {
    inner: VecPointCursor,
}

impl FailingCursor {
    pub fn new(points: Vec<(Timestamp, f64)>) -> Self {
        Self {
            inner: VecPointCursor::forward(points),
        }
    }
}

impl PointCursor for FailingCursor {
    fn read(&mut self, ts: &mut [Timestamp], values: &mut [f64]) -> Result<ReadBatch> {
        let batch = self.inner.read(ts, values)?;
        if batch.at_end {
            return Err(ChrononError::Internal("cursor failed".to_string()));
        }
        Ok(batch)
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }
}

/// Aggregate cursor over a fixed record list.
pub struct VecAggregateCursor {
    records: Vec<AggregationResult>,
    pos: usize,
    direction: Direction,
    chunk: usize,
}

impl VecAggregateCursor {
    pub fn forward(records: Vec<AggregationResult>) -> Self {
        Self {
            records,
            pos: 0,
            direction: Direction::Forward,
            chunk: usize::MAX,
        }
    }

    pub fn backward(records: Vec<AggregationResult>) -> Self {
        Self {
            records,
            pos: 0,
            direction: Direction::Backward,
            chunk: usize::MAX,
        }
    }
}

impl AggregateCursor for VecAggregateCursor {
    fn read(&mut self, ts: &mut [Timestamp], out: &mut [AggregationResult]) -> Result<ReadBatch> {
        let remaining = self.records.len() - self.pos;
        let n = ts.len().min(out.len()).min(self.chunk).min(remaining);
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

/// Fold a point list into one record per aligned step bucket, clipped to
/// `[span_begin, span_end)`.
pub fn bucketize(
    points: &[(Timestamp, f64)],
    span_begin: Timestamp,
    span_end: Timestamp,
    step: u64,
) -> Vec<AggregationResult> {
    let mut out: Vec<AggregationResult> = Vec::new();
    let mut current: Option<(u64, AggregationResult)> = None;
    for &(ts, value) in points {
        if ts < span_begin || ts >= span_end {
            continue;
        }
        let bucket = ts / step;
        match current.as_mut() {
            Some((index, agg)) if *index == bucket => agg.add(ts, value),
            _ => {
                if let Some((_, agg)) = current.take() {
                    out.push(agg);
                }
                let mut agg = AggregationResult::default();
                agg.add(ts, value);
                current = Some((bucket, agg));
            }
        }
    }
    if let Some((_, agg)) = current.take() {
        out.push(agg);
    }
    for agg in &mut out {
        let bucket = agg.begin / step;
        agg.begin = (bucket * step).max(span_begin);
        agg.end = ((bucket + 1) * step).min(span_end);
    }
    out
}
