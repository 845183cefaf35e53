//! Per-split processing: scan one input split, filter + project its row
//! batches, hash-partition the survivors, and append the resulting batches
//! into the invocation's shared buckets.
//!
//! One task per split, run on the bounded blocking pool. Tasks never block
//! on each other; they contend only on the bucket appends, the
//! set-once writer-schema slot, and the atomic metrics counters. Stage
//! attribution: storage opens and `next_batch` calls count as READ, filter/
//! projection/partitioning as COMPUTE.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use partq_common::{PartqError, Result, StageTimers, WorkerMetrics};
use partq_execution::{Partitioner, Scanner, TableScanFilter};
use partq_storage::{ReadOptions, Storage};
use tracing::debug;

use crate::domain::InputSplit;

/// Request-derived scan parameters shared by every split task of an
/// invocation.
pub(crate) struct SplitTask {
    pub storage: Arc<dyn Storage>,
    pub columns_to_read: Vec<String>,
    pub filter: TableScanFilter,
    pub projection: Vec<bool>,
    pub key_column_ids: Vec<usize>,
    pub num_partitions: usize,
    pub batch_size_rows: usize,
}

/// Mutable state shared by all split tasks of one invocation. Buckets are
/// write-only during the parallel phase and drained exactly once by the
/// orchestrator after the pool completes.
pub(crate) struct InvocationState {
    pub buckets: Vec<Mutex<Vec<RecordBatch>>>,
    pub writer_schema: OnceLock<SchemaRef>,
    pub metrics: WorkerMetrics,
    pub timers: StageTimers,
}

impl InvocationState {
    pub(crate) fn new(num_partitions: usize) -> Self {
        Self {
            buckets: (0..num_partitions).map(|_| Mutex::new(Vec::new())).collect(),
            writer_schema: OnceLock::new(),
            metrics: WorkerMetrics::new(),
            timers: StageTimers::new(),
        }
    }

    fn append(&self, partition: u32, batch: RecordBatch) -> Result<()> {
        let bucket = self.buckets.get(partition as usize).ok_or_else(|| {
            PartqError::Execution(format!(
                "partition id {partition} outside {} buckets",
                self.buckets.len()
            ))
        })?;
        bucket
            .lock()
            .map_err(|_| PartqError::Execution("partition bucket poisoned".to_string()))?
            .push(batch);
        Ok(())
    }
}

struct SplitStages {
    scanner: Scanner,
    partitioner: Partitioner,
}

/// Scan and partition the storage objects of one input split.
pub(crate) fn process_split(
    split: &InputSplit,
    task: &SplitTask,
    state: &InvocationState,
) -> Result<()> {
    let mut stages: Option<SplitStages> = None;
    let mut read_cost = Duration::ZERO;
    let mut compute_cost = Duration::ZERO;
    let mut read_bytes = 0_u64;
    let mut read_requests = 0_u64;

    for input in &split.inputs {
        let started = Instant::now();
        let object = task.storage.open(&input.path)?;
        let elapsed = started.elapsed();
        state.timers.read.add(elapsed);
        read_cost += elapsed;

        let num_row_groups = object.num_row_groups();
        if input.rg_start >= num_row_groups {
            debug!(
                path = %input.path,
                rg_start = input.rg_start,
                num_row_groups,
                "split input starts beyond the object bound, contributing zero rows"
            );
            continue;
        }
        // Clamp the declared range once, before any read. The split is owned
        // by this task, so the clamp cannot race.
        let rg_count = input.rg_count.min(num_row_groups - input.rg_start);

        let started = Instant::now();
        let mut reader = object.read(ReadOptions {
            columns: task.columns_to_read.clone(),
            rg_start: input.rg_start,
            rg_count,
            batch_size_rows: task.batch_size_rows,
        })?;
        let elapsed = started.elapsed();
        state.timers.read.add(elapsed);
        read_cost += elapsed;

        if stages.is_none() {
            let scanner = Scanner::new(
                &reader.result_schema(),
                &task.columns_to_read,
                &task.projection,
                task.filter.clone(),
            )?;
            let partitioner = Partitioner::new(
                task.num_partitions,
                task.batch_size_rows,
                scanner.output_schema(),
                task.key_column_ids.clone(),
            )?;
            // First resolver wins; the value is derived deterministically
            // from static request fields, so losing the race is harmless.
            let _ = state.writer_schema.set(scanner.output_schema());
            stages = Some(SplitStages {
                scanner,
                partitioner,
            });
        }
        let Some(pipeline) = stages.as_mut() else {
            return Err(PartqError::Execution(
                "split scan stages not initialized".to_string(),
            ));
        };

        loop {
            let started = Instant::now();
            let raw = reader.next_batch()?;
            let elapsed = started.elapsed();
            state.timers.read.add(elapsed);
            read_cost += elapsed;
            let Some(raw) = raw else {
                break;
            };

            let started = Instant::now();
            let batch = pipeline.scanner.filter_and_project(&raw)?;
            if batch.num_rows() > 0 {
                for (partition, full) in pipeline.partitioner.partition(&batch)? {
                    state.append(partition, full)?;
                }
            }
            let elapsed = started.elapsed();
            state.timers.compute.add(elapsed);
            compute_cost += elapsed;
        }

        read_bytes += reader.completed_bytes();
        read_requests += reader.num_read_requests();
    }

    // Trailing sub-capacity batches held by the partitioner.
    if let Some(pipeline) = stages.as_mut() {
        let started = Instant::now();
        for (partition, tail) in pipeline.partitioner.flush_tail()?.into_iter().enumerate() {
            if let Some(batch) = tail {
                state.append(partition as u32, batch)?;
            }
        }
        let elapsed = started.elapsed();
        state.timers.compute.add(elapsed);
        compute_cost += elapsed;
    }

    state.metrics.add_read_bytes(read_bytes);
    state.metrics.add_num_read_requests(read_requests);
    state.metrics.add_input_cost(read_cost);
    state.metrics.add_compute_cost(compute_cost);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema};
    use partq_execution::TableScanFilter;
    use partq_storage::MemoryStorage;

    use crate::domain::{InputSplit, SplitInput};

    use super::{process_split, InvocationState, SplitTask};

    fn seed_object(storage: &MemoryStorage, path: &str, ids: &[i64], rows_per_group: usize) {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(ids.to_vec()))],
        )
        .expect("batch");
        let props = parquet::file::properties::WriterProperties::builder()
            .set_max_row_group_size(rows_per_group)
            .build();
        let mut buf = Vec::new();
        let mut writer =
            parquet::arrow::ArrowWriter::try_new(&mut buf, schema, Some(props)).expect("writer");
        writer.write(&batch).expect("write");
        writer.close().expect("close");
        storage
            .insert(path, bytes::Bytes::from(buf))
            .expect("insert");
    }

    fn task_for(storage: MemoryStorage, num_partitions: usize) -> SplitTask {
        SplitTask {
            storage: Arc::new(storage),
            columns_to_read: vec!["id".to_string()],
            filter: TableScanFilter::default(),
            projection: Vec::new(),
            key_column_ids: vec![0],
            num_partitions,
            batch_size_rows: 1024,
        }
    }

    fn bucket_ids(state: &InvocationState, partition: usize) -> Vec<i64> {
        state.buckets[partition]
            .lock()
            .expect("bucket")
            .iter()
            .flat_map(|b| {
                b.column(0)
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .expect("int64")
                    .values()
                    .to_vec()
            })
            .collect()
    }

    #[test]
    fn partitions_one_split_into_buckets() {
        let storage = MemoryStorage::new();
        seed_object(&storage, "mem://t/a", &[1, 5, 9, 2, 6], 1024);
        let task = task_for(storage, 4);
        let state = InvocationState::new(4);

        let split = InputSplit {
            inputs: vec![SplitInput {
                path: "mem://t/a".to_string(),
                rg_start: 0,
                rg_count: 1,
            }],
        };
        process_split(&split, &task, &state).expect("process");

        assert_eq!(bucket_ids(&state, 1), vec![1, 5, 9]);
        assert_eq!(bucket_ids(&state, 2), vec![2, 6]);
        assert!(bucket_ids(&state, 0).is_empty());
        assert!(bucket_ids(&state, 3).is_empty());
        assert!(state.writer_schema.get().is_some());

        let snap = state.metrics.snapshot();
        assert!(snap.read_bytes > 0);
        assert_eq!(snap.num_read_requests, 1);
    }

    #[test]
    fn declared_range_is_clamped_to_the_object() {
        let storage = MemoryStorage::new();
        // 3 row groups of 2 rows
        seed_object(&storage, "mem://t/clamped", &[0, 1, 2, 3, 4, 5], 2);
        let task = task_for(storage, 2);
        let state = InvocationState::new(2);

        let split = InputSplit {
            inputs: vec![SplitInput {
                path: "mem://t/clamped".to_string(),
                rg_start: 1,
                rg_count: 10,
            }],
        };
        process_split(&split, &task, &state).expect("process");

        let mut all = bucket_ids(&state, 0);
        all.extend(bucket_ids(&state, 1));
        all.sort_unstable();
        assert_eq!(all, vec![2, 3, 4, 5]);
    }

    #[test]
    fn start_beyond_object_bound_contributes_zero_rows() {
        let storage = MemoryStorage::new();
        seed_object(&storage, "mem://t/short", &[0, 1, 2, 3], 1);
        let task = task_for(storage, 2);
        let state = InvocationState::new(2);

        let split = InputSplit {
            inputs: vec![SplitInput {
                path: "mem://t/short".to_string(),
                rg_start: 10,
                rg_count: 5,
            }],
        };
        process_split(&split, &task, &state).expect("process");
        assert!(bucket_ids(&state, 0).is_empty());
        assert!(bucket_ids(&state, 1).is_empty());
        assert!(state.writer_schema.get().is_none());
    }

    #[test]
    fn missing_object_fails_the_split() {
        let storage = MemoryStorage::new();
        let task = task_for(storage, 2);
        let state = InvocationState::new(2);
        let split = InputSplit {
            inputs: vec![SplitInput {
                path: "mem://t/absent".to_string(),
                rg_start: 0,
                rg_count: 1,
            }],
        };
        let err = process_split(&split, &task, &state);
        assert!(err.is_err());
    }
}
