//! Storage contracts and implementations for partq.
//!
//! Architecture role:
//! - defines the [`Storage`] / [`ObjectReader`] / [`BatchReader`] /
//!   [`PartitionedWriter`] seams the worker pipeline consumes
//! - provides the `file` and `memory` schemes, both backed by Parquet
//!
//! The partitioned writer aligns partitions to row-group boundaries and
//! embeds a partition-span index in the Parquet key-value metadata so a
//! downstream reader can fetch one hash partition without scanning the
//! whole object.

pub mod api;
pub mod file;
pub mod memory;
pub mod parquet_io;

pub use api::{
    BatchReader, ObjectReader, PartitionedWriter, ReadOptions, Storage, StorageScheme,
    WriteSummary, WriterOptions,
};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use parquet_io::{partition_row_groups, partition_spans, PartitionSpan, PARTITION_SPANS_KEY};
