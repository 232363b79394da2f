//! Chronon Join - Columnar Row Assembly
//!
//! Aligns up to 64 per-series cursors on timestamp and emits one TUPLE
//! sample per point of column 0. The value slot carries the presence
//! bitmap; the trailing doubles are the present column values in column
//! order. Rows are keyed by column 0, so bit 0 is always set.
//!
//! Column buffers are refilled together whenever column 0 is consumed. A
//! non-key column that drains before reaching the row key contributes no
//! value to that row.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::operator::{PointCursor, ReadBatch, SampleOperator};
use chronon_common::{Result, Sample, SeriesId, Timestamp, SAMPLE_HEADER_SIZE};

// =============================================================================
// Constants
// =============================================================================

const BUFFER_SIZE: usize = 4096;
const MAX_TUPLE_SIZE: usize = 64;

// =============================================================================
// Column Buffer
// =============================================================================

/// One join column: a cursor plus its buffered points.
struct ColumnBuffer {
    cursor: Box<dyn PointCursor>,
    ts: Vec<Timestamp>,
    xs: Vec<f64>,
    len: usize,
    pos: usize,
    done: bool,
}

impl ColumnBuffer {
    fn new(cursor: Box<dyn PointCursor>) -> Self {
        Self {
            cursor,
            ts: vec![0; BUFFER_SIZE],
            xs: vec![0.0; BUFFER_SIZE],
            len: 0,
            pos: 0,
            done: false,
        }
    }

    fn is_consumed(&self) -> bool {
        self.pos >= self.len
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
// Join Operator
// =============================================================================

/// Row assembly across per-series cursors sharing a time range.
pub struct JoinOperator {
    key_id: SeriesId,
    columns: Vec<ColumnBuffer>,
    finished: bool,
}

impl JoinOperator {
    pub fn new(ids: Vec<SeriesId>, cursors: Vec<Box<dyn PointCursor>>) -> Self {
        if ids.len() != cursors.len() || ids.is_empty() || ids.len() > MAX_TUPLE_SIZE {
            panic!("invalid join: {} ids, {} cursors", ids.len(), cursors.len());
        }
        let key_id = ids[0];
        let columns = cursors.into_iter().map(ColumnBuffer::new).collect();
        Self {
            key_id,
            columns,
            finished: false,
        }
    }

    fn fill_buffers(&mut self) -> Result<()> {
        debug_assert!(self.columns[0].is_consumed());
        for column in &mut self.columns {
            column.refill()?;
        }
        Ok(())
    }
}

impl SampleOperator for JoinOperator {
    fn read(&mut self, dest: &mut [u8]) -> Result<ReadBatch> {
        if self.finished {
            return Ok(ReadBatch::end(0));
        }
        let ncols = self.columns.len();
        let max_row = SAMPLE_HEADER_SIZE + 8 * ncols;
        let mut written = 0;
        loop {
            if self.columns[0].is_consumed() {
                if self.columns[0].done {
                    self.finished = true;
                    self.columns.clear();
                    return Ok(ReadBatch::end(written));
                }
                self.fill_buffers()?;
                if self.columns[0].is_consumed() {
                    self.finished = true;
                    self.columns.clear();
                    return Ok(ReadBatch::end(written));
                }
            }
            if dest.len() - written < max_row {
                return Ok(ReadBatch::more(written));
            }

            let key_col = &self.columns[0];
            let key = key_col.ts[key_col.pos];
            let mut bitmap: u64 = 1;
            let mut values = Vec::with_capacity(ncols);
            values.push(key_col.xs[key_col.pos]);

            for i in 1..ncols {
                let column = &mut self.columns[i];
                while column.pos < column.len && column.ts[column.pos] < key {
                    column.pos += 1;
                }
                if column.pos < column.len && column.ts[column.pos] == key {
                    bitmap |= 1 << i;
                    values.push(column.xs[column.pos]);
                }
            }

            let sample = Sample::tuple(self.key_id, key, bitmap, values);
            written += sample.encode(&mut dest[written..])?;
            self.columns[0].pos += 1;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
