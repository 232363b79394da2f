//! Chronon Column Store - Series Registry and Query Dispatch
//!
//! Owns the per-series trees, dispatches read requests to the operator
//! pipeline the request shape demands, and serves the write path. The
//! id → tree map is guarded by a single mutex; tree handles obtained under
//! it are reference-counted, so operators keep reading after the lock is
//! released and sessions cache handles to skip the lock on repeated writes.
//!
//! @version 0.1.0
//! @author Chronon Development Team

use crate::processor::StreamProcessor;
use crate::request::{OrderBy, ReshapeRequest, Selection};
use chronon_common::{
    AppendStatus, ChrononError, ColumnStoreConfig, LogicAddr, Payload, Result, Sample, SeriesId,
    SAMPLE_HEADER_SIZE,
};
use chronon_operators::{
    AggregateCursor, Aggregator, ChainMaterializer, JoinOperator, MergeOperator, PointCursor,
    SampleOperator, SeriesOrder, SeriesOrderIterator, TimeOrder, TimeOrderIterator,
};
use chronon_storage::{BlockStore, SeriesTree};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, trace};

/// Samples per drain batch.
const DRAIN_BATCH: usize = 4096;

// =============================================================================
// Column Store
// =============================================================================

/// Registry mapping series ids to tree handles.
pub struct ColumnStore {
    store: Arc<dyn BlockStore>,
    config: ColumnStoreConfig,
    columns: Mutex<HashMap<SeriesId, Arc<SeriesTree>>>,
}

impl ColumnStore {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self::with_config(store, ColumnStoreConfig::default())
    }

    pub fn with_config(store: Arc<dyn BlockStore>, config: ColumnStoreConfig) -> Self {
        Self {
            store,
            config,
            columns: Mutex::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Restore a tree per entry from its rescue points. A duplicate id is a
    /// hard error; an empty rescue-point list is a programmer error.
    pub fn open_or_restore(
        &self,
        mapping: &HashMap<SeriesId, Vec<LogicAddr>>,
    ) -> Result<()> {
        for (&id, rescue_points) in mapping {
            if rescue_points.is_empty() {
                panic!("invalid rescue points state for series {}", id.0);
            }
            if SeriesTree::repair_needed(rescue_points) {
                error!(id = id.0, "repair needed");
            }
            let tree = Arc::new(SeriesTree::new(
                id,
                self.store.clone(),
                self.config.extent_capacity,
                rescue_points.clone(),
            ));
            {
                let mut columns = self.columns.lock();
                if columns.contains_key(&id) {
                    error!(id = id.0, "cannot open series, already registered");
                    return Err(ChrononError::BadArg(format!(
                        "series {} already open",
                        id.0
                    )));
                }
                columns.insert(id, tree.clone());
            }
            tree.force_init()?;
        }
        Ok(())
    }

    /// Register an empty tree for a fresh series.
    pub fn create_new_column(&self, id: SeriesId) -> Result<()> {
        let tree = Arc::new(SeriesTree::new(
            id,
            self.store.clone(),
            self.config.extent_capacity,
            Vec::new(),
        ));
        {
            let mut columns = self.columns.lock();
            if columns.contains_key(&id) {
                return Err(ChrononError::BadArg(format!(
                    "series {} already open",
                    id.0
                )));
            }
            columns.insert(id, tree.clone());
        }
        tree.force_init()
    }

    /// Drain every tree to its root set, detach all trees, and return the
    /// rescue-point map for durable recovery.
    pub fn close(&self) -> Result<HashMap<SeriesId, Vec<LogicAddr>>> {
        let drained: Vec<(SeriesId, Arc<SeriesTree>)> = {
            let mut columns = self.columns.lock();
            columns.drain().collect()
        };
        info!(series = drained.len(), "column-store commit started");
        let mut result = HashMap::new();
        for (id, tree) in drained {
            result.insert(id, tree.close()?);
        }
        info!("column-store commit completed");
        Ok(result)
    }

    /// Bytes buffered across all trees but not yet sealed.
    pub fn uncommitted_memory(&self) -> usize {
        let columns = self.columns.lock();
        columns.values().map(|tree| tree.uncommitted_size()).sum()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append one point to the tree for `sample.id`. On `FlushNeeded` the
    /// rescue points are replaced with the tree's current roots. A supplied
    /// session cache receives the handle so the next write for the same id
    /// can bypass the registry lock.
    pub fn write(
        &self,
        sample: &Sample,
        rescue_points: &mut Vec<LogicAddr>,
        cache: Option<&mut HashMap<SeriesId, Arc<SeriesTree>>>,
    ) -> Result<AppendStatus> {
        let value = match sample.payload {
            Payload::Float(value) => value,
            _ => {
                return Err(ChrononError::BadValue(
                    "only float samples can be written".to_string(),
                ))
            }
        };
        let tree = self.lookup(sample.id)?;
        let status = tree.append(sample.timestamp, value)?;
        if status == AppendStatus::FlushNeeded {
            *rescue_points = tree.get_roots();
        }
        if let Some(cache) = cache {
            cache.insert(sample.id, tree);
        }
        Ok(status)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Serve a scalar or aggregate query, streaming samples into the
    /// processor until the operator ends, an error surfaces, or the
    /// processor refuses a sample.
    pub fn query(&self, request: &ReshapeRequest, processor: &mut dyn StreamProcessor) {
        trace!(
            begin = request.select.begin,
            end = request.select.end,
            columns = request.select.columns.len(),
            "column-store select query"
        );
        if request.select.columns.len() != 1 {
            error!(
                columns = request.select.columns.len(),
                "bad select request: expected exactly one column"
            );
            processor.set_error(&ChrononError::BadArg(
                "select expects exactly one column".to_string(),
            ));
            return;
        }

        let operator = if request.agg.enabled {
            self.build_aggregate_operator(request, processor)
        } else {
            self.build_scan_operator(request, processor)
        };
        let operator = match operator {
            Some(operator) => operator,
            None => return,
        };
        if self.drain(operator, processor) {
            processor.complete();
        }
    }

    /// Serve a row-assembly query: one join operator per row of the column
    /// matrix, drained sequentially.
    pub fn join_query(&self, request: &ReshapeRequest, processor: &mut dyn StreamProcessor) {
        trace!(
            begin = request.select.begin,
            end = request.select.end,
            columns = request.select.columns.len(),
            "column-store join query"
        );
        if request.select.columns.len() < 2 {
            error!("bad join request: not enough columns");
            processor.set_error(&ChrononError::BadArg(
                "join expects at least two columns".to_string(),
            ));
            return;
        }
        let rows = request.select.columns[0].ids.len();
        if request
            .select
            .columns
            .iter()
            .any(|column| column.ids.len() != rows)
        {
            error!("bad join request: misaligned column id lists");
            processor.set_error(&ChrononError::BadArg(
                "join columns must list one id per row".to_string(),
            ));
            return;
        }

        let mut operators: Vec<JoinOperator> = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut ids = Vec::with_capacity(request.select.columns.len());
            let mut cursors: Vec<Box<dyn PointCursor>> =
                Vec::with_capacity(request.select.columns.len());
            for column in &request.select.columns {
                let id = column.ids[row];
                ids.push(id);
                match self.lookup(id) {
                    Ok(tree) => {
                        cursors.push(tree.search(request.select.begin, request.select.end))
                    }
                    Err(err) => {
                        processor.set_error(&err);
                        return;
                    }
                }
            }
            operators.push(JoinOperator::new(ids, cursors));
        }
        for operator in operators {
            if !self.drain(Box::new(operator), processor) {
                return;
            }
        }
        processor.complete();
    }

    // -------------------------------------------------------------------------
    // Dispatch Helpers
    // -------------------------------------------------------------------------

    fn build_scan_operator(
        &self,
        request: &ReshapeRequest,
        processor: &mut dyn StreamProcessor,
    ) -> Option<Box<dyn SampleOperator>> {
        let mut ids = request.select.columns[0].ids.clone();
        let cursors = match self.search_cursors(&ids, &request.select) {
            Ok(cursors) => cursors,
            Err(err) => {
                processor.set_error(&err);
                return None;
            }
        };
        if request.group_by.enabled {
            for id in ids.iter_mut() {
                match request.group_by.transient_map.get(id) {
                    Some(mapped) => *id = *mapped,
                    None => {
                        error!(id = id.0, "id missing from group-by transient map");
                        processor.set_error(&ChrononError::NotFound(id.0));
                        return None;
                    }
                }
            }
            Some(match request.order_by {
                OrderBy::Series => Box::new(MergeOperator::<SeriesOrder>::new(ids, cursors)),
                OrderBy::Time => Box::new(MergeOperator::<TimeOrder>::new(ids, cursors)),
            })
        } else {
            Some(match request.order_by {
                OrderBy::Series => Box::new(ChainMaterializer::new(ids, cursors)),
                OrderBy::Time => Box::new(MergeOperator::<TimeOrder>::new(ids, cursors)),
            })
        }
    }

    fn build_aggregate_operator(
        &self,
        request: &ReshapeRequest,
        processor: &mut dyn StreamProcessor,
    ) -> Option<Box<dyn SampleOperator>> {
        if request.group_by.enabled {
            error!("group-by with aggregation is reserved");
            processor.set_error(&ChrononError::NotPermitted(
                "group-by with aggregation is reserved".to_string(),
            ));
            return None;
        }
        if request.agg.funcs.is_empty() {
            processor.set_error(&ChrononError::BadArg(
                "aggregation requires a function".to_string(),
            ));
            return None;
        }
        let ids = request.select.columns[0].ids.clone();
        let cursors =
            match self.aggregate_cursors(&ids, &request.select, request.agg.step) {
                Ok(cursors) => cursors,
                Err(err) => {
                    processor.set_error(&err);
                    return None;
                }
            };
        match request.agg.step {
            Some(_) => {
                let components = request.agg.funcs.clone();
                Some(match request.order_by {
                    OrderBy::Series => {
                        Box::new(SeriesOrderIterator::new(ids, cursors, components))
                    }
                    OrderBy::Time => Box::new(TimeOrderIterator::new(ids, cursors, components)),
                })
            }
            None => {
                if request.order_by == OrderBy::Time {
                    error!("time-ordered single aggregation is not supported");
                    processor.set_error(&ChrononError::NotPermitted(
                        "time-ordered aggregation is not supported".to_string(),
                    ));
                    return None;
                }
                Some(Box::new(Aggregator::new(ids, cursors, request.agg.funcs[0])))
            }
        }
    }

    fn lookup(&self, id: SeriesId) -> Result<Arc<SeriesTree>> {
        let columns = self.columns.lock();
        columns
            .get(&id)
            .cloned()
            .ok_or(ChrononError::NotFound(id.0))
    }

    fn search_cursors(
        &self,
        ids: &[SeriesId],
        select: &Selection,
    ) -> Result<Vec<Box<dyn PointCursor>>> {
        ids.iter()
            .map(|&id| {
                self.lookup(id)
                    .map(|tree| tree.search(select.begin, select.end))
            })
            .collect()
    }

    fn aggregate_cursors(
        &self,
        ids: &[SeriesId],
        select: &Selection,
        step: Option<u64>,
    ) -> Result<Vec<Box<dyn AggregateCursor>>> {
        ids.iter()
            .map(|&id| {
                self.lookup(id).map(|tree| match step {
                    Some(step) => tree.group_aggregate(select.begin, select.end, step),
                    None => tree.aggregate(select.begin, select.end),
                })
            })
            .collect()
    }

    /// Drain the operator into the processor. Returns false when the stream
    /// was cut short by an error or by the processor refusing a sample.
    fn drain(
        &self,
        mut operator: Box<dyn SampleOperator>,
        processor: &mut dyn StreamProcessor,
    ) -> bool {
        let mut buf = vec![0u8; DRAIN_BATCH * SAMPLE_HEADER_SIZE];
        loop {
            let batch = match operator.read(&mut buf) {
                Ok(batch) => batch,
                Err(err) if err.is_unavailable() => return true,
                Err(err) => {
                    error!(error = %err, "iteration error");
                    processor.set_error(&err);
                    return false;
                }
            };
            let mut pos = 0;
            while pos < batch.len {
                match Sample::decode(&buf[pos..batch.len]) {
                    Ok((sample, used)) => {
                        if !processor.put(&sample) {
                            return false;
                        }
                        pos += used;
                    }
                    Err(err) => {
                        error!(error = %err, "malformed sample in operator output");
                        processor.set_error(&err);
                        return false;
                    }
                }
            }
            if batch.at_end {
                return true;
            }
        }
    }
}

// =============================================================================
// Write Session
// =============================================================================

/// A write session holding a private id → tree cache. Cache hits append
/// without touching the registry's map lock.
pub struct WriteSession {
    registry: Arc<ColumnStore>,
    cache: HashMap<SeriesId, Arc<SeriesTree>>,
}

impl WriteSession {
    pub fn new(registry: Arc<ColumnStore>) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
        }
    }

    /// Append one float sample. On `FlushNeeded` the rescue points are
    /// replaced with the tree's current roots.
    pub fn write(
        &mut self,
        sample: &Sample,
        rescue_points: &mut Vec<LogicAddr>,
    ) -> Result<AppendStatus> {
        let value = match sample.payload {
            Payload::Float(value) => value,
            _ => {
                return Err(ChrononError::BadValue(
                    "only float samples can be written".to_string(),
                ))
            }
        };
        if let Some(tree) = self.cache.get(&sample.id) {
            let status = tree.append(sample.timestamp, value)?;
            if status == AppendStatus::FlushNeeded {
                *rescue_points = tree.get_roots();
            }
            return Ok(status);
        }
        self.registry.write(sample, rescue_points, Some(&mut self.cache))
    }

    /// Number of cached tree handles.
    pub fn cached_series(&self) -> usize {
        self.cache.len()
    }

    pub fn query(&self, request: &ReshapeRequest, processor: &mut dyn StreamProcessor) {
        self.registry.query(request, processor)
    }
}
