use std::fmt;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use partq_common::Result;
use serde::{Deserialize, Serialize};

/// Storage backend selector carried in request descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScheme {
    File,
    Memory,
}

impl fmt::Display for StorageScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageScheme::File => write!(f, "file"),
            StorageScheme::Memory => write!(f, "memory"),
        }
    }
}

/// Read-path options resolved by the split processor before opening a
/// batch reader.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Column names to read, in the order the scan expects them.
    pub columns: Vec<String>,
    /// First row group to read. Must already be clamped to the object bound.
    pub rg_start: usize,
    /// Number of row groups to read. Must already be clamped.
    pub rg_count: usize,
    /// Maximum rows per emitted batch.
    pub batch_size_rows: usize,
}

/// Write-path options for creating a partitioned output object.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Output row schema, resolved once per invocation.
    pub schema: SchemaRef,
    /// Compress the output payload.
    pub encoding: bool,
}

/// Byte/request totals reported by a closed writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub bytes_written: u64,
    pub write_requests: u64,
}

/// One storage backend. Implementations are scheme-specific and shared
/// across all split tasks of an invocation.
pub trait Storage: Send + Sync {
    fn scheme(&self) -> StorageScheme;

    /// Open one storage object for reading.
    ///
    /// # Errors
    /// Returns an error when the object does not exist or is not a readable
    /// columnar object.
    fn open(&self, path: &str) -> Result<Box<dyn ObjectReader>>;

    /// Create the partitioned output writer. Exactly one writer exists per
    /// invocation; it is exclusively owned by the caller after creation.
    fn create(&self, path: &str, options: &WriterOptions) -> Result<Box<dyn PartitionedWriter>>;
}

/// An opened storage object, before any row data is read. Exposes the
/// object-level facts the split processor needs to clamp its row-group
/// range, then converts into a [`BatchReader`].
pub trait ObjectReader: Send {
    fn num_row_groups(&self) -> usize;

    fn file_schema(&self) -> SchemaRef;

    /// Start reading row batches. Consumes the object reader.
    fn read(self: Box<Self>, options: ReadOptions) -> Result<Box<dyn BatchReader>>;
}

/// Streaming row-batch reader over one clamped row-group range.
pub trait BatchReader: Send {
    /// Schema of every batch this reader yields (projected column order).
    fn result_schema(&self) -> SchemaRef;

    /// Next batch, or `Ok(None)` at end of stream.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>>;

    /// Compressed bytes covered by the selected row groups.
    fn completed_bytes(&self) -> u64;

    /// Storage requests issued for the selected row groups.
    fn num_read_requests(&self) -> u64;
}

/// The single output writer of an invocation. Batches are appended tagged
/// with their hash partition; `close` persists the object and reports
/// write totals.
pub trait PartitionedWriter: Send {
    fn add_row_batch(&mut self, batch: &RecordBatch, partition: u32) -> Result<()>;

    fn close(self: Box<Self>) -> Result<WriteSummary>;
}
