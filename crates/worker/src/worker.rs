//! Pipeline orchestrator: owns the worker pool lifecycle, the writer-schema
//! resolution, the ordered bucket drain, and the conversion of any failure
//! into a well-formed response.
//!
//! Responsibilities:
//! - validate the request and resolve storage handles, fail fast otherwise;
//! - dispatch one split task per input split onto a bounded blocking pool;
//! - await every task and collect per-task results; any failure fails the
//!   whole invocation after all tasks have finished (all-or-nothing);
//! - create the single output writer lazily, drain buckets in partition
//!   order, close the writer, and assemble the result record;
//! - feed the best-effort perf sinks, which can never fail the invocation.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use arrow_schema::SchemaRef;
use partq_common::{global_metrics, perf, PartqError, Result, WorkerConfig};
use partq_execution::{Scanner, TableScanFilter};
use partq_storage::{
    FileStorage, MemoryStorage, Storage, StorageScheme, WriterOptions,
};
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;
use tracing::{error, info};

use crate::domain::{
    OutputInfo, PartitionInfo, PartitionOutput, PartitionRequest, StorageInfo, TableInfo,
};
use crate::split::{process_split, InvocationState, SplitTask};

const WORKER_TYPE: &str = "PartitionWorker";

/// Upper bound on the requested partition count; buckets are allocated up
/// front, so the bound is enforced before allocation.
const MAX_PARTITIONS: usize = 1 << 16;

/// The partition worker. One instance serves many invocations; all
/// per-invocation state (buckets, timers, metrics) is allocated fresh in
/// [`PartitionWorker::process`] and discarded on return.
pub struct PartitionWorker {
    config: WorkerConfig,
    storages: HashMap<StorageScheme, Arc<dyn Storage>>,
}

struct RunOutcome {
    output_path: String,
    hash_values: BTreeSet<u32>,
    rows_written: u64,
}

impl PartitionWorker {
    pub fn new(config: WorkerConfig) -> Self {
        let mut storages: HashMap<StorageScheme, Arc<dyn Storage>> = HashMap::new();
        storages.insert(StorageScheme::File, Arc::new(FileStorage::new()));
        storages.insert(StorageScheme::Memory, Arc::new(MemoryStorage::new()));
        Self { config, storages }
    }

    /// Replace the storage implementation registered for its scheme.
    /// Callers sharing a [`MemoryStorage`] with the worker register their
    /// instance here.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storages.insert(storage.scheme(), storage);
        self
    }

    /// Run one partition invocation. Never returns an error: every failure
    /// is folded into a response with `successful = false`, a descriptive
    /// message, and the duration.
    pub async fn process(&self, request: PartitionRequest) -> PartitionOutput {
        let started = Instant::now();
        let num_partitions = request
            .partition
            .as_ref()
            .map(|p| p.num_partitions)
            .filter(|n| *n <= MAX_PARTITIONS)
            .unwrap_or(0);
        let state = Arc::new(InvocationState::new(num_partitions));

        let mut output = PartitionOutput {
            successful: true,
            ..PartitionOutput::default()
        };
        let mut rows_written = 0;
        match self.run(&request, &state).await {
            Ok(outcome) => {
                output.outputs.push(outcome.output_path);
                output.hash_values = outcome.hash_values;
                rows_written = outcome.rows_written;
            }
            Err(e) => {
                error!(trans_id = request.trans_id, error = %e, "partition invocation failed");
                output.successful = false;
                output.error_message = e.to_string();
            }
        }
        output.duration_ms = started.elapsed().as_millis() as u64;
        output.metrics = state.metrics.snapshot();
        self.report(&output, &state, rows_written);
        output
    }

    async fn run(&self, request: &PartitionRequest, state: &Arc<InvocationState>) -> Result<RunOutcome> {
        let (table, partition, output) = validate(request)?;
        let output_path = output.target.resolve_path()?;
        let filter = TableScanFilter::from_json(&table.filter)?;

        let input_storage = self.storage_for(&table.storage)?;
        let output_storage = self.storage_for(&output.storage)?;

        let pool_size = self.config.pool_size();
        info!(
            trans_id = request.trans_id,
            timestamp = request.timestamp,
            table = %table.table_name,
            splits = table.input_splits.len(),
            num_partitions = partition.num_partitions,
            pool_size,
            output_path = %output_path,
            "dispatching split tasks"
        );

        let task = Arc::new(SplitTask {
            storage: Arc::clone(&input_storage),
            columns_to_read: table.columns_to_read.clone(),
            filter,
            projection: request.projection.clone(),
            key_column_ids: partition.key_column_ids.clone(),
            num_partitions: partition.num_partitions,
            batch_size_rows: self.config.batch_size_rows,
        });
        let pool = Arc::new(Semaphore::new(pool_size));
        let mut handles = Vec::with_capacity(table.input_splits.len());
        for split in table.input_splits.clone() {
            let permit = Arc::clone(&pool)
                .acquire_owned()
                .await
                .map_err(|e| PartqError::Execution(format!("failed to acquire pool slot: {e}")))?;
            let task = Arc::clone(&task);
            let state = Arc::clone(state);
            handles.push(spawn_blocking(move || {
                let _permit = permit;
                process_split(&split, &task, &state)
            }));
        }

        // Await every task before reporting: no split is abandoned mid-read,
        // and the first failure is preserved for the invocation error.
        let mut first_failure: Option<PartqError> = None;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(PartqError::Execution(format!("split task join error: {e}"))),
            };
            if let Err(e) = result {
                error!(error = %e, "split task failed");
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
        if let Some(e) = first_failure {
            return Err(PartqError::Execution(format!("error during partitioning: {e}")));
        }

        let schema = match state.writer_schema.get() {
            Some(schema) => schema.clone(),
            None => fallback_writer_schema(input_storage.as_ref(), table, &request.projection)?,
        };

        // Writer creation and bucket appends belong to the WRITE_CACHE
        // stage; the final close is WRITE_FILE.
        let write_started = Instant::now();
        let started = Instant::now();
        let mut writer = output_storage.create(
            &output_path,
            &WriterOptions {
                schema,
                encoding: output.encoding,
            },
        )?;
        state.timers.write_cache.add(started.elapsed());

        let mut hash_values = BTreeSet::new();
        let mut rows_written = 0_u64;
        for (partition_id, bucket) in state.buckets.iter().enumerate() {
            let batches = {
                let mut guard = bucket.lock().map_err(|_| {
                    PartqError::Execution("partition bucket poisoned".to_string())
                })?;
                std::mem::take(&mut *guard)
            };
            if batches.is_empty() {
                continue;
            }
            for batch in &batches {
                let started = Instant::now();
                writer.add_row_batch(batch, partition_id as u32)?;
                state.timers.write_cache.add(started.elapsed());
                rows_written += batch.num_rows() as u64;
            }
            hash_values.insert(partition_id as u32);
        }

        let started = Instant::now();
        let summary = writer.close()?;
        state.timers.write_file.add(started.elapsed());
        state.metrics.add_output_cost(write_started.elapsed());
        state.metrics.add_write_bytes(summary.bytes_written);
        state.metrics.add_num_write_requests(summary.write_requests);

        info!(
            trans_id = request.trans_id,
            output_path = %output_path,
            rows_written,
            partitions = hash_values.len(),
            bytes_written = summary.bytes_written,
            "partition invocation completed"
        );
        Ok(RunOutcome {
            output_path,
            hash_values,
            rows_written,
        })
    }

    fn storage_for(&self, info: &StorageInfo) -> Result<Arc<dyn Storage>> {
        self.storages.get(&info.scheme).cloned().ok_or_else(|| {
            PartqError::Unsupported(format!(
                "storage scheme '{}' is not registered",
                info.scheme
            ))
        })
    }

    /// Best-effort sinks; never fail the invocation.
    fn report(&self, output: &PartitionOutput, state: &InvocationState, rows_written: u64) {
        let stages = self.config.detailed_perf.then_some(&state.timers);
        perf::log_stage_times(WORKER_TYPE, &output.metrics, stages);
        if let Some(path) = &self.config.perf_log_path {
            perf::write_perf_csv(Path::new(path), WORKER_TYPE, &output.metrics, stages);
        }
        let registry = global_metrics();
        registry.record_invocation(
            WORKER_TYPE,
            output.successful,
            rows_written,
            output.metrics.read_bytes,
            output.metrics.write_bytes,
        );
        for (stage, timer) in [
            ("read", &state.timers.read),
            ("compute", &state.timers.compute),
            ("write_cache", &state.timers.write_cache),
            ("write_file", &state.timers.write_file),
        ] {
            registry.record_stage_seconds(WORKER_TYPE, stage, timer.elapsed_ns() as f64 / 1e9);
        }
    }
}

fn validate(request: &PartitionRequest) -> Result<(&TableInfo, &PartitionInfo, &OutputInfo)> {
    let table = request
        .table
        .as_ref()
        .ok_or_else(|| PartqError::InvalidInput("request.table is required".to_string()))?;
    let partition = request
        .partition
        .as_ref()
        .ok_or_else(|| PartqError::InvalidInput("request.partition is required".to_string()))?;
    let output = request
        .output
        .as_ref()
        .ok_or_else(|| PartqError::InvalidInput("request.output is required".to_string()))?;

    if table.input_splits.is_empty() {
        return Err(PartqError::InvalidInput(
            "table.input_splits must not be empty".to_string(),
        ));
    }
    if table.columns_to_read.is_empty() {
        return Err(PartqError::InvalidInput(
            "table.columns_to_read must not be empty".to_string(),
        ));
    }
    if partition.num_partitions == 0 {
        return Err(PartqError::InvalidInput(
            "partition.num_partitions must be at least 1".to_string(),
        ));
    }
    if partition.num_partitions > MAX_PARTITIONS {
        return Err(PartqError::InvalidInput(format!(
            "partition.num_partitions {} exceeds the supported maximum {MAX_PARTITIONS}",
            partition.num_partitions
        )));
    }
    if !request.projection.is_empty() && request.projection.len() != table.columns_to_read.len() {
        return Err(PartqError::InvalidInput(format!(
            "projection mask has {} entries for {} columns to read",
            request.projection.len(),
            table.columns_to_read.len()
        )));
    }
    let projected_columns = if request.projection.is_empty() {
        table.columns_to_read.len()
    } else {
        request.projection.iter().filter(|keep| **keep).count()
    };
    for key in &partition.key_column_ids {
        if *key >= projected_columns {
            return Err(PartqError::InvalidInput(format!(
                "key column id {key} outside the {projected_columns} projected columns"
            )));
        }
    }
    Ok((table, partition, output))
}

/// Resolve the writer schema when no split produced rows: the first
/// openable split input's file schema, restricted to the requested columns
/// and the projection mask — identical to the scanner output schema.
fn fallback_writer_schema(
    storage: &dyn Storage,
    table: &TableInfo,
    projection: &[bool],
) -> Result<SchemaRef> {
    let mut last_err: Option<PartqError> = None;
    for split in &table.input_splits {
        for input in &split.inputs {
            match storage.open(&input.path) {
                Ok(object) => {
                    let scanner = Scanner::new(
                        &object.file_schema(),
                        &table.columns_to_read,
                        projection,
                        TableScanFilter::default(),
                    )?;
                    return Ok(scanner.output_schema());
                }
                Err(e) => last_err = Some(e),
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        PartqError::Execution("unable to resolve the writer schema from any split".to_string())
    }))
}

#[cfg(test)]
mod tests {
    use partq_storage::StorageScheme;

    use crate::domain::{
        InputSplit, OutputInfo, OutputTarget, PartitionInfo, PartitionRequest, SplitInput,
        StorageInfo, TableInfo,
    };

    use super::validate;

    fn storage_info() -> StorageInfo {
        StorageInfo {
            scheme: StorageScheme::Memory,
            options: Default::default(),
        }
    }

    fn valid_request() -> PartitionRequest {
        PartitionRequest {
            trans_id: 1,
            timestamp: 1,
            table: Some(TableInfo {
                table_name: "t".to_string(),
                storage: storage_info(),
                input_splits: vec![InputSplit {
                    inputs: vec![SplitInput {
                        path: "mem://t/0".to_string(),
                        rg_start: 0,
                        rg_count: 1,
                    }],
                }],
                columns_to_read: vec!["a".to_string(), "b".to_string()],
                filter: String::new(),
            }),
            partition: Some(PartitionInfo {
                num_partitions: 2,
                key_column_ids: vec![0],
            }),
            projection: Vec::new(),
            output: Some(OutputInfo {
                storage: storage_info(),
                target: OutputTarget::File {
                    path: "mem://out".to_string(),
                },
                encoding: false,
            }),
        }
    }

    #[test]
    fn accepts_a_complete_request() {
        assert!(validate(&valid_request()).is_ok());
    }

    #[test]
    fn missing_composites_fail_fast() {
        let strips: [fn(&mut PartitionRequest); 3] = [
            |r| r.table = None,
            |r| r.partition = None,
            |r| r.output = None,
        ];
        for strip in strips {
            let mut request = valid_request();
            strip(&mut request);
            assert!(validate(&request).is_err());
        }
    }

    #[test]
    fn key_ids_are_checked_against_the_projected_schema() {
        let mut request = valid_request();
        request.projection = vec![true, false];
        request.partition.as_mut().expect("partition").key_column_ids = vec![1];
        let err = validate(&request);
        assert!(matches!(err, Err(partq_common::PartqError::InvalidInput(_))));
    }

    #[test]
    fn zero_partitions_is_rejected() {
        let mut request = valid_request();
        request.partition.as_mut().expect("partition").num_partitions = 0;
        assert!(validate(&request).is_err());
    }

    #[test]
    fn empty_split_list_is_rejected() {
        let mut request = valid_request();
        request.table.as_mut().expect("table").input_splits.clear();
        assert!(validate(&request).is_err());
    }
}
