use std::fs::{self, File};
use std::path::Path;

use arrow::record_batch::RecordBatch;
use partq_common::{PartqError, Result};

use crate::api::{
    ObjectReader, PartitionedWriter, Storage, StorageScheme, WriteSummary, WriterOptions,
};
use crate::parquet_io::{ParquetObjectReader, ParquetPartWriter};

/// Local-filesystem storage scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStorage;

impl FileStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for FileStorage {
    fn scheme(&self) -> StorageScheme {
        StorageScheme::File
    }

    fn open(&self, path: &str) -> Result<Box<dyn ObjectReader>> {
        let file = File::open(path)
            .map_err(|e| PartqError::Execution(format!("failed to open '{path}': {e}")))?;
        Ok(Box::new(ParquetObjectReader::new(path, file)?))
    }

    fn create(&self, path: &str, options: &WriterOptions) -> Result<Box<dyn PartitionedWriter>> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)
            .map_err(|e| PartqError::Execution(format!("failed to create '{path}': {e}")))?;
        Ok(Box::new(FilePartitionedWriter {
            inner: ParquetPartWriter::try_new(file, options)?,
        }))
    }
}

struct FilePartitionedWriter {
    inner: ParquetPartWriter<File>,
}

impl PartitionedWriter for FilePartitionedWriter {
    fn add_row_batch(&mut self, batch: &RecordBatch, partition: u32) -> Result<()> {
        self.inner.add_row_batch(batch, partition)
    }

    fn close(self: Box<Self>) -> Result<WriteSummary> {
        let (summary, file) = self.inner.close_into_inner()?;
        file.sync_all()?;
        Ok(summary)
    }
}
