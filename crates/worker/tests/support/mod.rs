#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use partq_storage::{partition_row_groups, partition_spans, MemoryStorage, PartitionSpan};
use partq_worker::{
    InputSplit, OutputInfo, OutputTarget, PartitionInfo, PartitionRequest, SplitInput, StorageInfo,
    TableInfo,
};

pub fn memory_storage_info() -> StorageInfo {
    StorageInfo {
        scheme: partq_storage::StorageScheme::Memory,
        options: Default::default(),
    }
}

pub fn orders_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("region", DataType::Utf8, true),
        Field::new("amount", DataType::Int64, false),
    ]))
}

pub fn orders_batch(ids: &[i64]) -> RecordBatch {
    let regions = ids
        .iter()
        .map(|id| Some(if id % 2 == 0 { "east" } else { "west" }))
        .collect::<Vec<_>>();
    let amounts = ids.iter().map(|id| id * 10).collect::<Vec<_>>();
    RecordBatch::try_new(
        orders_schema(),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(regions)),
            Arc::new(Int64Array::from(amounts)),
        ],
    )
    .expect("orders batch")
}

/// Write one parquet object into the shared memory storage.
pub fn seed_orders_object(
    storage: &MemoryStorage,
    path: &str,
    ids: &[i64],
    rows_per_group: usize,
) {
    let batch = orders_batch(ids);
    let props = WriterProperties::builder()
        .set_max_row_group_size(rows_per_group)
        .build();
    let mut buf = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buf, batch.schema(), Some(props)).expect("fixture writer");
    writer.write(&batch).expect("fixture write");
    writer.close().expect("fixture close");
    storage.insert(path, Bytes::from(buf)).expect("seed");
}

pub fn single_object_split(path: &str) -> InputSplit {
    InputSplit {
        inputs: vec![SplitInput {
            path: path.to_string(),
            rg_start: 0,
            rg_count: usize::MAX / 2,
        }],
    }
}

pub fn request_for(
    splits: Vec<InputSplit>,
    num_partitions: usize,
    key_column_ids: Vec<usize>,
    output_path: &str,
) -> PartitionRequest {
    PartitionRequest {
        trans_id: 100,
        timestamp: 1,
        table: Some(TableInfo {
            table_name: "orders".to_string(),
            storage: memory_storage_info(),
            input_splits: splits,
            columns_to_read: vec![
                "id".to_string(),
                "region".to_string(),
                "amount".to_string(),
            ],
            filter: String::new(),
        }),
        partition: Some(PartitionInfo {
            num_partitions,
            key_column_ids,
        }),
        projection: Vec::new(),
        output: Some(OutputInfo {
            storage: memory_storage_info(),
            target: OutputTarget::File {
                path: output_path.to_string(),
            },
            encoding: true,
        }),
    }
}

pub fn output_spans(storage: &MemoryStorage, path: &str) -> Vec<PartitionSpan> {
    let payload = storage
        .get(path)
        .expect("storage get")
        .expect("output object exists");
    let builder = ParquetRecordBatchReaderBuilder::try_new(payload).expect("output builder");
    partition_spans(builder.metadata()).expect("partition spans")
}

/// Read back one hash partition's `id` column values, in stored order.
pub fn partition_ids_in_output(storage: &MemoryStorage, path: &str, partition: u32) -> Vec<i64> {
    let payload = storage
        .get(path)
        .expect("storage get")
        .expect("output object exists");
    let builder = ParquetRecordBatchReaderBuilder::try_new(payload).expect("output builder");
    let spans = partition_spans(builder.metadata()).expect("partition spans");
    let row_groups = partition_row_groups(&spans, partition);
    if row_groups.is_empty() {
        return Vec::new();
    }
    let reader = builder
        .with_row_groups(row_groups)
        .build()
        .expect("output reader");
    let mut ids = Vec::new();
    for batch in reader {
        let batch = batch.expect("output batch");
        let id_idx = batch.schema().index_of("id").expect("id column");
        let col = batch
            .column(id_idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64 ids");
        for i in 0..col.len() {
            ids.push(col.value(i));
        }
    }
    ids
}
