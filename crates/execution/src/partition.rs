//! Hash partitioner with per-partition accumulation buffers.
//!
//! Each call to [`Partitioner::partition`] assigns every row of the input
//! batch to a hash partition and accumulates the rows into per-partition
//! pending buffers. A partition is emitted only once it holds a full
//! capacity-sized batch; trailing sub-capacity batches stay buffered until
//! [`Partitioner::flush_tail`]. One partitioner instance is owned by one
//! split task; the pure hash function keeps assignment identical across
//! instances.

use std::collections::HashMap;

use arrow::array::UInt32Array;
use arrow::compute::{concat_batches, take};
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use partq_common::{PartqError, Result};

use crate::hash::partition_ids;

pub struct Partitioner {
    num_partitions: usize,
    capacity: usize,
    schema: SchemaRef,
    key_columns: Vec<usize>,
    pending: Vec<Vec<RecordBatch>>,
    pending_rows: Vec<usize>,
    ids_buf: Vec<u32>,
}

impl Partitioner {
    pub fn new(
        num_partitions: usize,
        capacity: usize,
        schema: SchemaRef,
        key_columns: Vec<usize>,
    ) -> Result<Self> {
        if num_partitions == 0 {
            return Err(PartqError::InvalidInput(
                "partition count must be at least 1".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(PartqError::InvalidInput(
                "batch capacity must be at least 1".to_string(),
            ));
        }
        if key_columns.is_empty() {
            return Err(PartqError::InvalidInput(
                "at least one key column is required".to_string(),
            ));
        }
        for &k in &key_columns {
            if k >= schema.fields().len() {
                return Err(PartqError::InvalidInput(format!(
                    "key column id {k} outside output schema with {} columns",
                    schema.fields().len()
                )));
            }
        }
        Ok(Self {
            num_partitions,
            capacity,
            schema,
            key_columns,
            pending: vec![Vec::new(); num_partitions],
            pending_rows: vec![0; num_partitions],
            ids_buf: Vec::new(),
        })
    }

    /// Assign every row of `batch` to its partition and return the
    /// partitions that reached a full capacity batch this call.
    pub fn partition(&mut self, batch: &RecordBatch) -> Result<HashMap<u32, RecordBatch>> {
        let mut out = HashMap::new();
        if batch.num_rows() == 0 {
            return Ok(out);
        }
        if batch.num_rows() > self.capacity {
            return Err(PartqError::Execution(format!(
                "input batch of {} rows exceeds partitioner capacity {}",
                batch.num_rows(),
                self.capacity
            )));
        }
        partition_ids(
            batch,
            &self.key_columns,
            self.num_partitions,
            &mut self.ids_buf,
        )?;

        let mut rows_by_partition: HashMap<u32, Vec<u32>> = HashMap::new();
        for (row, pid) in self.ids_buf.iter().enumerate() {
            rows_by_partition.entry(*pid).or_default().push(row as u32);
        }

        for (pid, rows) in rows_by_partition {
            let indices = UInt32Array::from(rows);
            let columns = batch
                .columns()
                .iter()
                .map(|c| take(c.as_ref(), &indices, None))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    PartqError::Execution(format!("partition row extraction failed: {e}"))
                })?;
            let sub = RecordBatch::try_new(self.schema.clone(), columns).map_err(|e| {
                PartqError::Execution(format!("partition sub-batch build failed: {e}"))
            })?;
            self.append_pending(pid, sub);
            if let Some(full) = self.take_full(pid)? {
                out.insert(pid, full);
            }
        }
        Ok(out)
    }

    /// Drain the trailing sub-capacity batches, indexed by partition id.
    pub fn flush_tail(&mut self) -> Result<Vec<Option<RecordBatch>>> {
        let mut out = Vec::with_capacity(self.num_partitions);
        for p in 0..self.num_partitions {
            if self.pending_rows[p] == 0 {
                out.push(None);
                continue;
            }
            let merged = concat_batches(&self.schema, &self.pending[p]).map_err(|e| {
                PartqError::Execution(format!("partition tail merge failed: {e}"))
            })?;
            self.pending[p].clear();
            self.pending_rows[p] = 0;
            out.push(Some(merged));
        }
        Ok(out)
    }

    fn append_pending(&mut self, pid: u32, sub: RecordBatch) {
        let p = pid as usize;
        self.pending_rows[p] += sub.num_rows();
        self.pending[p].push(sub);
    }

    fn take_full(&mut self, pid: u32) -> Result<Option<RecordBatch>> {
        let p = pid as usize;
        if self.pending_rows[p] < self.capacity {
            return Ok(None);
        }
        let merged = concat_batches(&self.schema, &self.pending[p])
            .map_err(|e| PartqError::Execution(format!("partition batch merge failed: {e}")))?;
        let emit = merged.slice(0, self.capacity);
        let rest = merged.num_rows() - self.capacity;
        self.pending[p].clear();
        self.pending_rows[p] = rest;
        if rest > 0 {
            self.pending[p].push(merged.slice(self.capacity, rest));
        }
        Ok(Some(emit))
    }
}
