//! Chronon Scan - Chained Per-Series Scans
//!
//! Concatenation of per-series cursors in input order. The operator form
//! stays at the (timestamp, value) level and is what the storage tree uses
//! to splice its extent cursors together; the materializer form stamps the
//! producing series id onto every point and encodes FLOAT samples.
//!
//! A sub-cursor that ends (or whose block is unavailable) advances the
//! chain to the next cursor; any other failure is surfaced after the points
//! already produced in the current call have been handed out.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::operator::{Direction, PointCursor, ReadBatch, SampleOperator};
use chronon_common::{ChrononError, Result, Sample, SeriesId, Timestamp, SAMPLE_HEADER_SIZE};

// =============================================================================
// Chain Operator
// =============================================================================

/// Concatenates a fixed ordered list of point cursors.
pub struct ChainOperator {
    cursors: Vec<Box<dyn PointCursor>>,
    pos: usize,
    direction: Direction,
    pending: Option<ChrononError>,
}

impl ChainOperator {
    pub fn new(cursors: Vec<Box<dyn PointCursor>>) -> Self {
        let direction = cursors
            .first()
            .map(|c| c.direction())
            .unwrap_or(Direction::Forward);
        Self {
            cursors,
            pos: 0,
            direction,
            pending: None,
        }
    }
}

impl PointCursor for ChainOperator {
    fn read(&mut self, ts: &mut [Timestamp], values: &mut [f64]) -> Result<ReadBatch> {
        if let Some(err) = self.pending.take() {
            return Err(err);
        }
        let mut acc = 0;
        while self.pos < self.cursors.len() && acc < ts.len() {
            match self.cursors[self.pos].read(&mut ts[acc..], &mut values[acc..]) {
                Ok(batch) => {
                    acc += batch.len;
                    if batch.at_end {
                        self.pos += 1;
                    }
                }
                Err(err) if err.is_unavailable() => self.pos += 1,
                Err(err) => {
                    if acc == 0 {
                        return Err(err);
                    }
                    // Hand out what this call produced; re-raise on the next.
                    self.pending = Some(err);
                    return Ok(ReadBatch::more(acc));
                }
            }
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
// Chain Materializer
// =============================================================================

const READ_CHUNK: usize = 1024;

/// Chains per-series cursors and materializes FLOAT samples, stamping each
/// point with the id of the cursor that produced it.
pub struct ChainMaterializer {
    ids: Vec<SeriesId>,
    cursors: Vec<Box<dyn PointCursor>>,
    pos: usize,
    pending: Option<ChrononError>,
}

impl ChainMaterializer {
    pub fn new(ids: Vec<SeriesId>, cursors: Vec<Box<dyn PointCursor>>) -> Self {
        assert_eq!(
            ids.len(),
            cursors.len(),
            "chain ids do not match cursor count"
        );
        Self {
            ids,
            cursors,
            pos: 0,
            pending: None,
        }
    }
}

impl SampleOperator for ChainMaterializer {
    fn read(&mut self, dest: &mut [u8]) -> Result<ReadBatch> {
        if let Some(err) = self.pending.take() {
            return Err(err);
        }
        let capacity = (dest.len() / SAMPLE_HEADER_SIZE).min(READ_CHUNK);
        let mut ts_buf = vec![0u64; capacity];
        let mut val_buf = vec![0f64; capacity];
        let mut written = 0;
        while self.pos < self.cursors.len() {
            let room = (dest.len() - written) / SAMPLE_HEADER_SIZE;
            if room == 0 {
                return Ok(ReadBatch::more(written));
            }
            let n = room.min(capacity);
            match self.cursors[self.pos].read(&mut ts_buf[..n], &mut val_buf[..n]) {
                Ok(batch) => {
                    let id = self.ids[self.pos];
                    for i in 0..batch.len {
                        let sample = Sample::float(id, ts_buf[i], val_buf[i]);
                        written += sample.encode(&mut dest[written..])?;
                    }
                    if batch.at_end {
                        self.pos += 1;
                    }
                }
                Err(err) if err.is_unavailable() => self.pos += 1,
                Err(err) => {
                    if written == 0 {
                        return Err(err);
                    }
                    self.pending = Some(err);
                    return Ok(ReadBatch::more(written));
                }
            }
        }
        Ok(ReadBatch::end(written))
    }
}

// =============================================================================
// Tests
// =============================================================================
