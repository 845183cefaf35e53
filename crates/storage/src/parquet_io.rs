//! Parquet plumbing shared by the `file` and `memory` schemes.
//!
//! Read path: row-group-ranged, column-projected batch reader built on
//! [`ParquetRecordBatchReaderBuilder`]. `completed_bytes` is the compressed
//! size of the selected row groups and each selected row group counts as one
//! read request.
//!
//! Write path: [`ArrowWriter`] with partitions aligned to row-group
//! boundaries (a flush on every partition switch). The partition-span index
//! is serialized as JSON into the Parquet key-value metadata under
//! [`PARTITION_SPANS_KEY`]; each flushed row group plus the footer counts as
//! one write request.

use std::io::Write;
use std::sync::Arc;

use arrow::record_batch::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression;
use parquet::file::metadata::ParquetMetaData;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::ChunkReader;
use parquet::format::KeyValue;
use partq_common::{PartqError, Result};
use serde::{Deserialize, Serialize};

use crate::api::{BatchReader, ObjectReader, ReadOptions, WriteSummary, WriterOptions};

/// Key-value metadata entry holding the partition-span index.
pub const PARTITION_SPANS_KEY: &str = "partq.partition.spans";

/// One hash partition's contiguous row-group range within an output object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpan {
    pub partition: u32,
    pub row_group_start: usize,
    pub row_group_count: usize,
    pub rows: u64,
}

/// Parse the partition-span index embedded in an output object.
pub fn partition_spans(metadata: &ParquetMetaData) -> Result<Vec<PartitionSpan>> {
    let kv = metadata
        .file_metadata()
        .key_value_metadata()
        .and_then(|kvs| kvs.iter().find(|kv| kv.key == PARTITION_SPANS_KEY))
        .ok_or_else(|| {
            PartqError::Execution("output object has no partition span index".to_string())
        })?;
    let value = kv.value.as_deref().unwrap_or("[]");
    serde_json::from_str(value)
        .map_err(|e| PartqError::Execution(format!("partition span index decode failed: {e}")))
}

/// Row groups holding `partition`, in file order.
pub fn partition_row_groups(spans: &[PartitionSpan], partition: u32) -> Vec<usize> {
    spans
        .iter()
        .filter(|s| s.partition == partition)
        .flat_map(|s| s.row_group_start..s.row_group_start + s.row_group_count)
        .collect()
}

pub(crate) struct ParquetObjectReader<R: ChunkReader + 'static> {
    path: String,
    builder: ParquetRecordBatchReaderBuilder<R>,
}

impl<R: ChunkReader + 'static> ParquetObjectReader<R> {
    pub(crate) fn new(path: &str, input: R) -> Result<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(input).map_err(|e| {
            PartqError::Execution(format!("parquet reader build failed for '{path}': {e}"))
        })?;
        Ok(Self {
            path: path.to_string(),
            builder,
        })
    }
}

impl<R: ChunkReader + 'static> ObjectReader for ParquetObjectReader<R> {
    fn num_row_groups(&self) -> usize {
        self.builder.metadata().num_row_groups()
    }

    fn file_schema(&self) -> SchemaRef {
        self.builder.schema().clone()
    }

    fn read(self: Box<Self>, options: ReadOptions) -> Result<Box<dyn BatchReader>> {
        let Self { path, builder } = *self;
        let file_schema = builder.schema().clone();
        let metadata = Arc::clone(builder.metadata());

        let mut indices = Vec::with_capacity(options.columns.len());
        for name in &options.columns {
            let idx = file_schema.index_of(name).map_err(|_| {
                PartqError::InvalidInput(format!("column '{name}' not found in '{path}'"))
            })?;
            indices.push(idx);
        }

        let rg_end = options.rg_start + options.rg_count;
        if rg_end > metadata.num_row_groups() {
            return Err(PartqError::Execution(format!(
                "row group range [{}, {rg_end}) exceeds {} row groups in '{path}'",
                options.rg_start,
                metadata.num_row_groups()
            )));
        }
        let row_groups = (options.rg_start..rg_end).collect::<Vec<_>>();
        let completed_bytes = row_groups
            .iter()
            .map(|i| metadata.row_group(*i).compressed_size() as u64)
            .sum();
        let num_read_requests = row_groups.len() as u64;

        let mask = ProjectionMask::roots(builder.parquet_schema(), indices.iter().copied());
        let reader = builder
            .with_projection(mask)
            .with_batch_size(options.batch_size_rows)
            .with_row_groups(row_groups)
            .build()
            .map_err(|e| {
                PartqError::Execution(format!("parquet reader open failed for '{path}': {e}"))
            })?;
        let schema = reader.schema();

        Ok(Box::new(ParquetBatchReader {
            path,
            schema,
            reader,
            completed_bytes,
            num_read_requests,
        }))
    }
}

struct ParquetBatchReader {
    path: String,
    schema: SchemaRef,
    reader: ParquetRecordBatchReader,
    completed_bytes: u64,
    num_read_requests: u64,
}

impl BatchReader for ParquetBatchReader {
    fn result_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match self.reader.next() {
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(e)) => Err(PartqError::Execution(format!(
                "parquet decode failed for '{}': {e}",
                self.path
            ))),
            None => Ok(None),
        }
    }

    fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    fn num_read_requests(&self) -> u64 {
        self.num_read_requests
    }
}

pub(crate) struct ParquetPartWriter<W: Write + Send> {
    writer: ArrowWriter<CountingWriter<W>>,
    // (partition, rows) in write order; one entry per partition switch.
    spans: Vec<(u32, u64)>,
    current: Option<u32>,
}

impl<W: Write + Send> ParquetPartWriter<W> {
    pub(crate) fn try_new(sink: W, options: &WriterOptions) -> Result<Self> {
        let compression = if options.encoding {
            Compression::SNAPPY
        } else {
            Compression::UNCOMPRESSED
        };
        let props = WriterProperties::builder()
            .set_compression(compression)
            .build();
        let writer = ArrowWriter::try_new(
            CountingWriter::new(sink),
            options.schema.clone(),
            Some(props),
        )
        .map_err(|e| PartqError::Execution(format!("parquet writer init failed: {e}")))?;
        Ok(Self {
            writer,
            spans: Vec::new(),
            current: None,
        })
    }

    pub(crate) fn add_row_batch(&mut self, batch: &RecordBatch, partition: u32) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        if self.current != Some(partition) {
            if self.current.is_some() {
                self.writer.flush().map_err(|e| {
                    PartqError::Execution(format!("parquet row group flush failed: {e}"))
                })?;
            }
            self.spans.push((partition, 0));
            self.current = Some(partition);
        }
        self.writer
            .write(batch)
            .map_err(|e| PartqError::Execution(format!("parquet write failed: {e}")))?;
        if let Some(last) = self.spans.last_mut() {
            last.1 += batch.num_rows() as u64;
        }
        Ok(())
    }

    pub(crate) fn close_into_inner(mut self) -> Result<(WriteSummary, W)> {
        self.writer
            .flush()
            .map_err(|e| PartqError::Execution(format!("parquet row group flush failed: {e}")))?;
        let rg_rows = self
            .writer
            .flushed_row_groups()
            .iter()
            .map(|rg| rg.num_rows())
            .collect::<Vec<_>>();
        let spans = assign_row_groups(&self.spans, &rg_rows)?;
        let payload = serde_json::to_string(&spans)
            .map_err(|e| PartqError::Execution(format!("partition span index encode failed: {e}")))?;
        self.writer
            .append_key_value_metadata(KeyValue::new(PARTITION_SPANS_KEY.to_string(), payload));
        self.writer
            .finish()
            .map_err(|e| PartqError::Execution(format!("parquet writer close failed: {e}")))?;
        let write_requests = rg_rows.len() as u64 + 1;
        let counting = self
            .writer
            .into_inner()
            .map_err(|e| PartqError::Execution(format!("parquet writer teardown failed: {e}")))?;
        Ok((
            WriteSummary {
                bytes_written: counting.bytes,
                write_requests,
            },
            counting.inner,
        ))
    }
}

/// Map each (partition, rows) span onto the contiguous row groups that hold
/// it. Spans are row-group aligned because the writer flushes on every
/// partition switch.
fn assign_row_groups(spans: &[(u32, u64)], rg_rows: &[i64]) -> Result<Vec<PartitionSpan>> {
    let mut out = Vec::with_capacity(spans.len());
    let mut rg = 0usize;
    for (partition, rows) in spans {
        let start = rg;
        let mut covered = 0u64;
        while covered < *rows {
            let Some(n) = rg_rows.get(rg) else {
                return Err(PartqError::Execution(format!(
                    "partition {partition} span exceeds flushed row groups"
                )));
            };
            covered += *n as u64;
            rg += 1;
        }
        if covered != *rows {
            return Err(PartqError::Execution(format!(
                "partition {partition} is not aligned to row-group boundaries"
            )));
        }
        out.push(PartitionSpan {
            partition: *partition,
            row_group_start: start,
            row_group_count: rg - start,
            rows: *rows,
        });
    }
    if rg != rg_rows.len() {
        return Err(PartqError::Execution(
            "flushed row groups outnumber recorded partition spans".to_string(),
        ));
    }
    Ok(out)
}

pub(crate) struct CountingWriter<W: Write> {
    pub(crate) inner: W,
    pub(crate) bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::{assign_row_groups, partition_row_groups, PartitionSpan};

    #[test]
    fn assigns_contiguous_row_groups_per_span() {
        // partition 1 spans two row groups (auto-flush split), partition 3 one.
        let spans = vec![(1_u32, 30_u64), (3, 5)];
        let rg_rows = vec![20_i64, 10, 5];
        let assigned = assign_row_groups(&spans, &rg_rows).expect("aligned");
        assert_eq!(
            assigned,
            vec![
                PartitionSpan {
                    partition: 1,
                    row_group_start: 0,
                    row_group_count: 2,
                    rows: 30
                },
                PartitionSpan {
                    partition: 3,
                    row_group_start: 2,
                    row_group_count: 1,
                    rows: 5
                },
            ]
        );
    }

    #[test]
    fn rejects_misaligned_spans() {
        let spans = vec![(0_u32, 15_u64)];
        let rg_rows = vec![20_i64];
        assert!(assign_row_groups(&spans, &rg_rows).is_err());
    }

    #[test]
    fn empty_output_has_no_spans() {
        let assigned = assign_row_groups(&[], &[]).expect("empty");
        assert!(assigned.is_empty());
    }

    #[test]
    fn row_group_lookup_merges_repeated_partitions() {
        let spans = vec![
            PartitionSpan {
                partition: 2,
                row_group_start: 0,
                row_group_count: 1,
                rows: 10,
            },
            PartitionSpan {
                partition: 5,
                row_group_start: 1,
                row_group_count: 2,
                rows: 40,
            },
            PartitionSpan {
                partition: 2,
                row_group_start: 3,
                row_group_count: 1,
                rows: 3,
            },
        ];
        assert_eq!(partition_row_groups(&spans, 2), vec![0, 3]);
        assert_eq!(partition_row_groups(&spans, 5), vec![1, 2]);
        assert!(partition_row_groups(&spans, 7).is_empty());
    }
}
