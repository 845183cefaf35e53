use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use partq_common::{PartqError, Result};

use crate::api::{
    ObjectReader, PartitionedWriter, Storage, StorageScheme, WriteSummary, WriterOptions,
};
use crate::parquet_io::{ParquetObjectReader, ParquetPartWriter};

/// In-memory storage scheme: a shared path → object map. Used by tests and
/// by deployments that stage intermediate objects in memory. Clones share
/// the same object map.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly (test fixtures).
    pub fn insert(&self, path: &str, payload: Bytes) -> Result<()> {
        self.lock()?.insert(path.to_string(), payload);
        Ok(())
    }

    /// Fetch a stored object payload.
    pub fn get(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self.lock()?.get(path).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Bytes>>> {
        self.objects
            .lock()
            .map_err(|_| PartqError::Execution("memory storage map poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn scheme(&self) -> StorageScheme {
        StorageScheme::Memory
    }

    fn open(&self, path: &str) -> Result<Box<dyn ObjectReader>> {
        let payload = self
            .get(path)?
            .ok_or_else(|| PartqError::Execution(format!("memory object not found: '{path}'")))?;
        Ok(Box::new(ParquetObjectReader::new(path, payload)?))
    }

    fn create(&self, path: &str, options: &WriterOptions) -> Result<Box<dyn PartitionedWriter>> {
        Ok(Box::new(MemoryPartitionedWriter {
            inner: ParquetPartWriter::try_new(Vec::new(), options)?,
            path: path.to_string(),
            objects: self.clone(),
        }))
    }
}

struct MemoryPartitionedWriter {
    inner: ParquetPartWriter<Vec<u8>>,
    path: String,
    objects: MemoryStorage,
}

impl PartitionedWriter for MemoryPartitionedWriter {
    fn add_row_batch(&mut self, batch: &RecordBatch, partition: u32) -> Result<()> {
        self.inner.add_row_batch(batch, partition)
    }

    fn close(self: Box<Self>) -> Result<WriteSummary> {
        let (summary, buf) = self.inner.close_into_inner()?;
        self.objects.insert(&self.path, Bytes::from(buf))?;
        Ok(summary)
    }
}
